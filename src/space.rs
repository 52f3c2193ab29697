use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::layer::{Layer, LayerStore};
use crate::mounts::{Mount, MountOptions};
use crate::tree::{self, Node, Tree};
use crate::uid::Uid;

const SPACE_SUBPATH_TREE: &str = "tree.json";

/// reserved tag always pointing at the root node
pub const ROOT_TAG: &str = "ROOT";

/// a persistent tree of layers
///
/// owns the in-memory tree and references the layer store; the tree is
/// persisted as `tree.json` under the space's data directory.
pub struct Space {
    id: Uid,
    data_root: PathBuf,
    tree: Tree,
    layers: LayerStore,
}

impl Space {
    pub fn new(id: Uid, data_root: impl Into<PathBuf>, layers: LayerStore) -> Self {
        Self {
            id,
            data_root: data_root.into(),
            tree: Tree::new(),
            layers,
        }
    }

    /// space id
    pub fn id(&self) -> Uid {
        self.id
    }

    /// the layer tree
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// initialize a fresh space: an empty tree with one root layer tagged `ROOT`
    pub fn init(&mut self) -> Result<()> {
        info!(space = %self.id.base32(), "creating root layer");
        self.tree = Tree::new();

        let root = self.layers.create()?;
        debug!(layer = %root.id(), "adding root layer to tree");
        self.tree.add_node(None, Node::new(root.id()))?;
        self.tree.add_tag(ROOT_TAG, root.id())?;

        Ok(())
    }

    /// load the tree from `tree.json`
    pub fn load(&mut self) -> Result<()> {
        let path = self.tree_path();
        debug!(path = %path.display(), "reading tree dump");

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::SpaceMissing(path));
            }
            Err(source) => return Err(Error::Io { path, source }),
        };
        let dump: tree::TreeDump =
            serde_json::from_slice(&raw).map_err(|e| Error::TreeLoad(e.to_string()))?;
        self.tree = tree::load(dump)?;

        Ok(())
    }

    /// persist the tree to `tree.json`
    ///
    /// written to a temporary file and renamed into place
    pub fn save(&self) -> Result<()> {
        let path = self.tree_path();
        debug!(path = %path.display(), "writing tree dump");

        let raw = serde_json::to_vec(&tree::dump(&self.tree))?;

        // atomic write: temp -> fsync -> rename
        let tmp_path = self
            .data_root
            .join(format!(".{}.{}", SPACE_SUBPATH_TREE, uuid::Uuid::new_v4()));
        {
            use std::io::Write;
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            tmp_file.write_all(&raw).with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)?;

        // fsync the directory so the rename survives a crash
        let dir = File::open(&self.data_root).with_path(&self.data_root)?;
        dir.sync_all().with_path(&self.data_root)?;

        Ok(())
    }

    /// mint a new layer as a child of `base` and insert its node
    pub fn create_layer(&mut self, base: Uid) -> Result<Layer> {
        if self.tree.get(base).is_none() {
            return Err(Error::NodeNotFound(base.hex()));
        }

        info!(base = %base, "creating layer");
        let layer = self.layers.create()?;
        self.tree.add_node(Some(base), Node::new(layer.id()))?;

        Ok(layer)
    }

    /// create a mount of the tree state at `commit`
    ///
    /// a fresh upper layer is inserted as a child of `commit`; the mount
    /// stacks every layer from the root to that upper. returns the mount
    /// together with the new head node's uid.
    pub fn create_mount(
        &mut self,
        commit: Uid,
        mount_id: Uid,
        opts: MountOptions,
    ) -> Result<(Mount, Uid)> {
        let upper = self.create_layer(commit)?;

        // root..commit, then the upper on top
        let mut chain = self.tree.path_to_root(commit);
        chain.reverse();
        let mut layers = Vec::with_capacity(chain.len() + 1);
        for id in chain {
            layers.push(self.layers.get(id)?);
        }
        layers.push(upper.clone());

        debug!(
            mount = %mount_id.base32(),
            layers = layers.len(),
            "assembling overlay mount"
        );
        let mount = Mount::new(mount_id, &layers, opts)?;
        Ok((mount, upper.id()))
    }

    fn tree_path(&self) -> PathBuf {
        self.data_root.join(SPACE_SUBPATH_TREE)
    }
}

/// whether a directory holds space data
pub fn space_data_exists(data_root: &Path) -> bool {
    data_root.join(SPACE_SUBPATH_TREE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_space(dir: &Path) -> Space {
        let layers_root = dir.join("overlay");
        let space_root = dir.join("space");
        fs::create_dir_all(&layers_root).unwrap();
        fs::create_dir_all(&space_root).unwrap();

        let mut space = Space::new(Uid::random(), space_root, LayerStore::new(layers_root));
        space.init().unwrap();
        space
    }

    #[test]
    fn test_init_creates_tagged_root() {
        let dir = tempdir().unwrap();
        let space = test_space(dir.path());

        let root = space.tree().root().unwrap();
        assert_eq!(space.tree().len(), 1);
        assert_eq!(space.tree().get_by_tag(ROOT_TAG).unwrap().id(), root.id());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut space = test_space(dir.path());
        let root = space.tree().root().unwrap().id();
        space.create_layer(root).unwrap();
        space.save().unwrap();

        let mut reloaded = Space::new(
            space.id(),
            dir.path().join("space"),
            LayerStore::new(dir.path().join("overlay")),
        );
        reloaded.load().unwrap();

        assert_eq!(reloaded.tree().len(), 2);
        assert_eq!(reloaded.tree().root().unwrap().id(), root);
        assert_eq!(reloaded.tree().get_by_tag(ROOT_TAG).unwrap().id(), root);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempdir().unwrap();
        let space_root = dir.path().join("absent");
        fs::create_dir_all(&space_root).unwrap();

        let mut space = Space::new(
            Uid::random(),
            space_root,
            LayerStore::new(dir.path().join("overlay")),
        );
        assert!(matches!(space.load(), Err(Error::SpaceMissing(_))));
    }

    #[test]
    fn test_create_layer_unknown_base() {
        let dir = tempdir().unwrap();
        let mut space = test_space(dir.path());

        let result = space.create_layer(Uid::random());
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_create_layer_links_child() {
        let dir = tempdir().unwrap();
        let mut space = test_space(dir.path());
        let root = space.tree().root().unwrap().id();

        let layer = space.create_layer(root).unwrap();

        let node = space.tree().get(layer.id()).unwrap();
        assert_eq!(node.parent(), Some(root));
        assert!(layer.diff_dir().is_dir());
    }

    #[test]
    fn test_create_mount_adds_head_above_commit() {
        let dir = tempdir().unwrap();
        let mut space = test_space(dir.path());
        let root = space.tree().root().unwrap().id();

        let mount_root = dir.path().join("mount");
        fs::create_dir_all(&mount_root).unwrap();
        let (mount, head) = space
            .create_mount(
                root,
                Uid::random(),
                MountOptions {
                    data_root: mount_root,
                    chown_uid: 0,
                    chown_gid: 0,
                },
            )
            .unwrap();

        assert_eq!(space.tree().get(head).unwrap().parent(), Some(root));
        assert!(!mount.is_mounted());
        assert_eq!(space.tree().len(), 2);
    }
}
