use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::uid::Uid;

const LAYER_SUBPATH_DIFF: &str = "diff";

/// an immutable filesystem layer
///
/// a layer owns a `diff/` directory that participates in overlay mounts as a
/// lowerdir, or as the upperdir while the layer is the top of a live mount.
#[derive(Clone, Debug)]
pub struct Layer {
    id: Uid,
    data_root: PathBuf,
}

impl Layer {
    /// layer id
    pub fn id(&self) -> Uid {
        self.id
    }

    /// path of the diff directory
    pub fn diff_dir(&self) -> PathBuf {
        self.data_root.join(LAYER_SUBPATH_DIFF)
    }
}

/// directory store of layers keyed by base32 uid
///
/// layout: `<root>/<uid_base32>/diff/`. single-writer expected; no locking.
#[derive(Clone, Debug)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// store root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// mint a new layer with a random uid and create its directories
    pub fn create(&self) -> Result<Layer> {
        let id = Uid::random();
        let data_root = self.layer_data_root(id);
        DirBuilder::new()
            .mode(0o755)
            .create(&data_root)
            .with_path(&data_root)?;

        let layer = Layer { id, data_root };
        let diff = layer.diff_dir();
        DirBuilder::new().mode(0o755).create(&diff).with_path(&diff)?;

        Ok(layer)
    }

    /// get an existing layer by uid
    pub fn get(&self, id: Uid) -> Result<Layer> {
        let data_root = self.layer_data_root(id);
        if !data_root.is_dir() {
            return Err(Error::LayerNotFound(id));
        }
        Ok(Layer { id, data_root })
    }

    /// enumerate all layers in the store
    ///
    /// entries that do not parse as base32 uids are logged and skipped
    pub fn list(&self, cancel: &CancelToken) -> Result<Vec<Layer>> {
        let mut layers = Vec::new();

        for entry in fs::read_dir(&self.root).with_path(&self.root)? {
            cancel.check()?;
            let entry = entry.with_path(&self.root)?;

            if !entry.path().is_dir() {
                warn!(path = %entry.path().display(), "unexpected file in layer store");
                continue;
            }
            let name = entry.file_name();
            let id = match name.to_str().map(Uid::from_base32) {
                Some(Ok(id)) => id,
                _ => {
                    warn!(path = %entry.path().display(), "layer directory name is not a base32 uid");
                    continue;
                }
            };

            layers.push(Layer {
                id,
                data_root: entry.path(),
            });
        }

        Ok(layers)
    }

    /// delete a layer and its diff contents
    pub fn delete(&self, id: Uid) -> Result<Layer> {
        let data_root = self.layer_data_root(id);
        if !data_root.is_dir() {
            return Err(Error::LayerNotFound(id));
        }
        fs::remove_dir_all(&data_root).with_path(&data_root)?;
        Ok(Layer { id, data_root })
    }

    fn layer_data_root(&self, id: Uid) -> PathBuf {
        self.root.join(id.base32())
    }
}
