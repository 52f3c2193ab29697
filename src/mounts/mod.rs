mod overlay;

pub use overlay::{overlay_mount, overlay_umount, OverlayOptions};

use std::ffi::CString;
use std::fs::DirBuilder;
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};

use nix::libc;
use nix::unistd::{chown, Gid, Uid as SysUid};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::layer::Layer;
use crate::uid::Uid;

const MOUNT_SUBPATH_MERGED: &str = "merged";
const MOUNT_SUBPATH_WORK: &str = "work";

/// options shared by fresh and reconstructed mounts
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// per-mount data directory, `mounts/<uid_base32>/`
    pub data_root: PathBuf,
    /// owner applied to the mount point and symlink after mounting
    pub chown_uid: u32,
    pub chown_gid: u32,
}

/// a live overlay composition of a space's layers
///
/// a fresh mount carries the overlay options needed to perform the syscall;
/// a mount reconstructed from on-disk metadata is already mounted and only
/// supports `umount` and `create_symlink`.
#[derive(Clone, Debug)]
pub struct Mount {
    id: Uid,
    data_root: PathBuf,
    chown_uid: u32,
    chown_gid: u32,
    state: MountState,
}

#[derive(Clone, Debug)]
enum MountState {
    Fresh(OverlayOptions),
    Mounted,
}

impl Mount {
    /// build a fresh mount from an ordered layer chain
    ///
    /// `layers[0]` is the root (oldest ancestor) and the last element is the
    /// upper layer; at least two layers are required. the lowerdir order is
    /// reversed so the newest lower shadows older ones.
    pub fn new(id: Uid, layers: &[Layer], opts: MountOptions) -> Result<Self> {
        if layers.len() < 2 {
            return Err(Error::TooFewLayers(layers.len()));
        }

        let upper = &layers[layers.len() - 1];
        let lower_dirs = layers[..layers.len() - 1]
            .iter()
            .rev()
            .map(Layer::diff_dir)
            .collect();

        let overlay = OverlayOptions {
            source: String::new(),
            mount_path: opts.data_root.join(MOUNT_SUBPATH_MERGED),
            lower_dirs,
            upper_dir: upper.diff_dir(),
            work_dir: opts.data_root.join(MOUNT_SUBPATH_WORK),
            read_only: false,
        };

        Ok(Self {
            id,
            data_root: opts.data_root,
            chown_uid: opts.chown_uid,
            chown_gid: opts.chown_gid,
            state: MountState::Fresh(overlay),
        })
    }

    /// reconstruct an already-mounted mount from its data directory
    pub fn mounted(id: Uid, opts: MountOptions) -> Self {
        Self {
            id,
            data_root: opts.data_root,
            chown_uid: opts.chown_uid,
            chown_gid: opts.chown_gid,
            state: MountState::Mounted,
        }
    }

    /// mount id
    pub fn id(&self) -> Uid {
        self.id
    }

    /// the mount point, `<data_root>/merged`
    pub fn mount_path(&self) -> PathBuf {
        self.data_root.join(MOUNT_SUBPATH_MERGED)
    }

    /// the overlay workdir, `<data_root>/work`
    pub fn work_dir(&self) -> PathBuf {
        self.data_root.join(MOUNT_SUBPATH_WORK)
    }

    /// whether this record was reconstructed from on-disk metadata
    pub fn is_mounted(&self) -> bool {
        matches!(self.state, MountState::Mounted)
    }

    /// perform the overlay mount and chown the mount point
    ///
    /// fails with `AlreadyMounted` on a reconstructed mount
    pub fn mount(&self, cancel: &CancelToken) -> Result<()> {
        let MountState::Fresh(overlay) = &self.state else {
            return Err(Error::AlreadyMounted);
        };

        let merged = self.mount_path();
        let work = self.work_dir();
        for dir in [&merged, &work] {
            if !dir.is_dir() {
                DirBuilder::new().mode(0o755).create(dir).with_path(dir)?;
            }
        }

        cancel.check()?;
        overlay_mount(overlay)?;

        chown(
            &merged,
            Some(SysUid::from_raw(self.chown_uid)),
            Some(Gid::from_raw(self.chown_gid)),
        )
        .map_err(|source| Error::Mount {
            path: merged,
            source,
        })?;

        Ok(())
    }

    /// unmount the mount point
    pub fn umount(&self, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        overlay_umount(&self.mount_path())
    }

    /// create a symlink at `path` pointing at the mount point
    ///
    /// the caller must have cleared the target path first. the link itself
    /// is chowned so the originating user owns it.
    pub fn create_symlink(&self, path: &Path) -> Result<()> {
        let merged = self.mount_path();
        debug!(target = %merged.display(), link = %path.display(), "ln -s");
        symlink(&merged, path).with_path(path)?;
        lchown(path, self.chown_uid, self.chown_gid)?;
        Ok(())
    }
}

/// chown a path without following symlinks
fn lchown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| Error::Io {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid path"),
    })?;
    let ret = unsafe { libc::lchown(c_path.as_ptr(), uid, gid) };
    if ret != 0 {
        return Err(Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::last_os_error(),
        });
    }
    Ok(())
}
