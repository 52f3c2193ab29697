use std::env;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::layer::LayerStore;
use crate::mounts::{Mount, MountOptions};
use crate::space::{Space, ROOT_TAG};
use crate::uid::Uid;
use crate::workspace::{BranchName, CommitInfo, RefKind, Workspace};

const DATA_SUBPATH_LAYERS: &str = "overlay";
const DATA_SUBPATH_SPACES: &str = "spaces";
const DATA_SUBPATH_MOUNTS: &str = "mounts";
const WORKSPACE_INFO_SUFFIX: &str = ".workspace";

/// default branch name for fresh workspaces
pub const DEFAULT_BRANCH: &str = "main";

/// manager construction options
#[derive(Clone, Debug)]
pub struct ManagerOptions {
    /// data storage root
    pub data_root: PathBuf,
    /// owner applied to mount points and symlinks
    pub chown_uid: u32,
    pub chown_gid: u32,
    /// branch name given to fresh workspaces
    pub initial_branch: String,
}

impl ManagerOptions {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            chown_uid: 0,
            chown_gid: 0,
            initial_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

/// per-mount workspace metadata, `mounts/<mountId>.workspace`
///
/// the `sapceID` spelling is preserved for on-disk compatibility with
/// existing data roots; `workspaceID` and `branch` are optional on read
#[derive(Clone, Debug, Serialize, Deserialize)]
struct WorkspaceInfo {
    path: String,
    head: String,
    #[serde(rename = "sapceID")]
    space_id: String,
    #[serde(rename = "mountID")]
    mount_id: String,
    #[serde(rename = "workspaceID", default, skip_serializing_if = "Option::is_none")]
    workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
}

/// owner of the data root and orchestrator of the workspace lifecycle
pub struct Manager {
    data_root: PathBuf,
    chown_uid: u32,
    chown_gid: u32,
    initial_branch: String,
    layers: LayerStore,
    prepared: bool,
}

impl Manager {
    pub fn new(opts: ManagerOptions) -> Result<Self> {
        let data_root = absolute(&opts.data_root)?;
        let layers = LayerStore::new(data_root.join(DATA_SUBPATH_LAYERS));
        Ok(Self {
            data_root,
            chown_uid: opts.chown_uid,
            chown_gid: opts.chown_gid,
            initial_branch: opts.initial_branch,
            layers,
            prepared: false,
        })
    }

    /// absolute data root
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// layer store over `<data_root>/overlay`
    pub fn layers(&self) -> &LayerStore {
        &self.layers
    }

    /// create the data-root directory skeleton; idempotent
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared {
            return Ok(());
        }
        debug!(data_root = %self.data_root.display(), "preparing data root");

        for dir in [
            self.data_root.clone(),
            self.data_root.join(DATA_SUBPATH_LAYERS),
            self.data_root.join(DATA_SUBPATH_SPACES),
            self.data_root.join(DATA_SUBPATH_MOUNTS),
        ] {
            if !dir.is_dir() {
                debug!(path = %dir.display(), "mkdir");
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o755)
                    .create(&dir)
                    .with_path(&dir)?;
            }
        }

        self.prepared = true;
        Ok(())
    }

    /// create a fresh workspace at `path`
    ///
    /// builds a new space (root layer, `ROOT` tag), mounts its root
    /// revision, registers the initial branch, and persists everything
    pub fn create_workspace(&self, path: &Path) -> Result<Workspace> {
        let abs_path = absolute(path)?;

        let mut space = self.create_space()?;
        let (mount, head) = self.create_mount(&mut space, ROOT_TAG)?;

        let mut ws = Workspace::new(
            Uid::random(),
            abs_path,
            space,
            mount,
            head,
            self.initial_branch.clone(),
        );
        ws.set_branch(&self.initial_branch)?;

        info!(space = %ws.space().id().base32(), "saving space");
        ws.space().save()?;
        self.save_workspace_info(&ws)?;

        Ok(ws)
    }

    /// resolve the workspace linked at `path`
    ///
    /// follows one symlink hop, derives the mount uid from the position
    /// under `mounts/`, and reloads the space and metadata
    pub fn get_workspace_from_path(&self, path: &Path) -> Result<Workspace> {
        let abs_path = absolute(path)?;

        let mut mount_path = abs_path.clone();
        if mount_path.is_symlink() {
            mount_path = fs::read_link(&mount_path).with_path(&mount_path)?;
        }
        let mount_path = absolute(&mount_path)?;

        let mounts_root = self.data_root.join(DATA_SUBPATH_MOUNTS);
        let mount_id = mount_path
            .strip_prefix(&mounts_root)
            .ok()
            .and_then(|rel| rel.components().next())
            .and_then(|c| c.as_os_str().to_str())
            .and_then(|s| Uid::from_base32(s).ok())
            .ok_or_else(|| Error::NotAWorkspacePath(abs_path.clone()))?;

        let ws_info = self.load_workspace_info(mount_id)?;

        info!(space = %ws_info.space_id, "loading space");
        let space_id = Uid::from_base32(&ws_info.space_id)
            .map_err(|_| Error::InvalidUid(ws_info.space_id.clone()))?;
        let mut space = Space::new(
            space_id,
            self.space_data_root(space_id),
            self.layers.clone(),
        );
        space.load()?;

        let mount = Mount::mounted(mount_id, self.mount_options(mount_id));

        let head = Uid::from_hex(&ws_info.head)?;
        if space.tree().get(head).is_none() {
            return Err(Error::NodeNotFound(ws_info.head.clone()));
        }

        // older data roots carry neither a workspace uid nor a branch; fall
        // back to a path-derived uid and the default branch
        let ws_id = match &ws_info.workspace_id {
            Some(b32) => Uid::from_base32(b32)?,
            None => Uid::from_hash(ws_info.path.as_bytes()),
        };
        let branch = ws_info
            .branch
            .clone()
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        Ok(Workspace::new(ws_id, abs_path, space, mount, head, branch))
    }

    /// commit the workspace's upper layer
    ///
    /// annotates the head node, fast-forwards the current branch to it,
    /// and builds a replacement workspace over a fresh mount on top.
    /// returns the new workspace plus the old mount for cleanup.
    pub fn commit(&self, ws: Workspace, info: &CommitInfo) -> Result<(Workspace, Mount)> {
        let ws_id = ws.id();
        let path = ws.path().to_path_buf();
        let branch = ws.branch().to_string();
        let branch_full = ws.current_branch().full_name();
        let committed = ws.head();
        let old_mount = ws.mount().clone();

        let mut space = ws.into_space();
        if space.tree().get_by_branch(&branch_full).is_none() {
            return Err(Error::Detached);
        }

        info.apply(space.tree_mut(), committed)?;
        space
            .tree_mut()
            .update_branch(&branch_full, committed, false)?;

        let (mount, head) = self.create_mount(&mut space, &committed.hex())?;
        info!(head = %committed, "forwarded to new head");

        let new_ws = Workspace::new(ws_id, path, space, mount, head, branch);

        info!(space = %new_ws.space().id().base32(), "saving space");
        new_ws.space().save()?;
        self.save_workspace_info(&new_ws)?;

        Ok((new_ws, old_mount))
    }

    /// switch the workspace to the revision named by `rev`
    ///
    /// mounts the resolved commit under a fresh upper layer and retargets
    /// the current branch there. returns the new workspace plus the old
    /// mount for cleanup.
    pub fn checkout(&self, ws: Workspace, rev: &str) -> Result<(Workspace, Mount)> {
        let (target, kind) = ws
            .search(rev)
            .ok_or_else(|| Error::UnknownRef(rev.to_string()))?;
        let ws_id = ws.id();
        let path = ws.path().to_path_buf();
        let old_mount = ws.mount().clone();

        // checking out one of this workspace's branches switches to it;
        // any other ref drags the current branch along (HEAD follows)
        let branch = match kind {
            RefKind::Branch => checkout_branch_name(&ws, rev),
            _ => None,
        }
        .unwrap_or_else(|| ws.branch().to_string());

        let mut space = ws.into_space();
        let (mount, head) = self.create_mount(&mut space, &target.hex())?;

        let mut new_ws = Workspace::new(ws_id, path, space, mount, head, branch.clone());
        new_ws.set_branch(&branch)?;

        info!(space = %new_ws.space().id().base32(), "saving space");
        new_ws.space().save()?;
        self.save_workspace_info(&new_ws)?;

        Ok((new_ws, old_mount))
    }

    /// clone a workspace to a new path
    ///
    /// mounts the source's current commit (not its uncommitted upper) under
    /// a fresh workspace uid; no layer content is copied
    pub fn clone_workspace(&self, ws: Workspace, target_path: &Path) -> Result<Workspace> {
        let abs_target = absolute(target_path)?;
        let commit = ws.head_commit()?;
        let branch = ws.branch().to_string();

        let mut space = ws.into_space();
        let (mount, head) = self.create_mount(&mut space, &commit.hex())?;
        info!(commit = %commit, "cloned at commit");

        let mut new_ws = Workspace::new(Uid::random(), abs_target, space, mount, head, branch.clone());
        new_ws.set_branch(&branch)?;

        info!(space = %new_ws.space().id().base32(), "saving space");
        new_ws.space().save()?;
        self.save_workspace_info(&new_ws)?;

        Ok(new_ws)
    }

    /// unmount and remove a workspace's mount record
    ///
    /// a failing umount is logged and cleanup continues; a missing
    /// `.workspace` file is tolerated
    pub fn remove_workspace_mount(&self, mount: &Mount, cancel: &CancelToken) -> Result<()> {
        let pwd = env::current_dir().with_path(".")?;
        env::set_current_dir("/").with_path("/")?;

        let result = self.remove_mount_data(mount, cancel);

        let restore = env::set_current_dir(&pwd).with_path(&pwd);
        result.and(restore)
    }

    fn remove_mount_data(&self, mount: &Mount, cancel: &CancelToken) -> Result<()> {
        if let Err(e) = mount.umount(cancel) {
            warn!(path = %mount.mount_path().display(), error = %e, "umount failed");
        }

        let mount_data = self.mount_data_root(mount.id());
        debug!(path = %mount_data.display(), "rm -r");
        if mount_data.exists() {
            fs::remove_dir_all(&mount_data).with_path(&mount_data)?;
        }

        let info_path = self.workspace_info_path(mount.id());
        debug!(path = %info_path.display(), "rm");
        match fs::remove_file(&info_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Io {
                path: info_path,
                source,
            }),
        }
    }

    /// mint a new space and initialize it
    fn create_space(&self) -> Result<Space> {
        let space_id = Uid::random();
        info!(space = %space_id.base32(), "creating space");

        let space_root = self.space_data_root(space_id);
        debug!(path = %space_root.display(), "mkdir");
        DirBuilder::new()
            .mode(0o755)
            .create(&space_root)
            .with_path(&space_root)?;

        let mut space = Space::new(space_id, space_root, self.layers.clone());
        space.init()?;
        Ok(space)
    }

    /// mint a mount directory and mount the revision named by `rev`
    fn create_mount(&self, space: &mut Space, rev: &str) -> Result<(Mount, Uid)> {
        let node = space
            .tree()
            .search(rev)
            .ok_or_else(|| Error::UnknownRef(rev.to_string()))?
            .id();

        let mount_id = Uid::random();
        info!(mount = %mount_id.base32(), "creating mount");
        let mount_root = self.mount_data_root(mount_id);
        debug!(path = %mount_root.display(), "mkdir");
        DirBuilder::new()
            .mode(0o755)
            .create(&mount_root)
            .with_path(&mount_root)?;

        space.create_mount(node, mount_id, self.mount_options(mount_id))
    }

    fn save_workspace_info(&self, ws: &Workspace) -> Result<()> {
        let info = WorkspaceInfo {
            path: ws.path().display().to_string(),
            head: ws.head().hex(),
            space_id: ws.space().id().base32(),
            mount_id: ws.mount().id().base32(),
            workspace_id: Some(ws.id().base32()),
            branch: Some(ws.branch().to_string()),
        };

        let info_path = self.workspace_info_path(ws.mount().id());
        debug!(path = %info_path.display(), "writing workspace info");
        let raw = serde_json::to_vec(&info)?;
        fs::write(&info_path, raw).with_path(&info_path)?;
        Ok(())
    }

    fn load_workspace_info(&self, mount_id: Uid) -> Result<WorkspaceInfo> {
        let info_path = self.workspace_info_path(mount_id);
        debug!(path = %info_path.display(), "reading workspace info");

        let raw = match fs::read(&info_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::WorkspaceInfoMissing(info_path));
            }
            Err(source) => {
                return Err(Error::Io {
                    path: info_path,
                    source,
                })
            }
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    fn space_data_root(&self, id: Uid) -> PathBuf {
        self.data_root.join(DATA_SUBPATH_SPACES).join(id.base32())
    }

    fn mount_data_root(&self, id: Uid) -> PathBuf {
        self.data_root.join(DATA_SUBPATH_MOUNTS).join(id.base32())
    }

    fn workspace_info_path(&self, mount_id: Uid) -> PathBuf {
        self.data_root
            .join(DATA_SUBPATH_MOUNTS)
            .join(format!("{}{}", mount_id.base32(), WORKSPACE_INFO_SUFFIX))
    }

    fn mount_options(&self, mount_id: Uid) -> MountOptions {
        MountOptions {
            data_root: self.mount_data_root(mount_id),
            chown_uid: self.chown_uid,
            chown_gid: self.chown_gid,
        }
    }
}

/// the local name to switch to when `rev` names one of the workspace's own
/// branches; `None` for global or foreign branches
fn checkout_branch_name(ws: &Workspace, rev: &str) -> Option<String> {
    if let Ok(branch) = BranchName::parse_full_name(rev) {
        if ws.space().tree().get_by_branch(&branch.full_name()).is_some() {
            return (branch.workspace_id() == Some(ws.id()))
                .then(|| branch.name().to_string());
        }
    }
    for candidate in BranchName::parse_local_name(ws.id(), rev) {
        if ws
            .space()
            .tree()
            .get_by_branch(&candidate.full_name())
            .is_some()
        {
            return (candidate.workspace_id() == Some(ws.id())).then(|| rev.to_string());
        }
    }
    None
}

/// absolute form of `path` against the current directory, without
/// resolving symlinks
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().with_path(".")?;
    Ok(cwd.join(path))
}
