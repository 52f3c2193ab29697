use std::path::{Path, PathBuf};

/// options for an overlay mount
///
/// `lower_dirs` is ordered newest-first: earlier entries shadow later ones,
/// matching overlayfs `lowerdir` semantics.
#[derive(Clone, Debug, Default)]
pub struct OverlayOptions {
    /// mount source name, `overlay` when empty
    pub source: String,
    /// mount point
    pub mount_path: PathBuf,
    /// overlayfs lowerdir entries, newest first
    pub lower_dirs: Vec<PathBuf>,
    /// overlayfs upperdir
    pub upper_dir: PathBuf,
    /// overlayfs workdir
    pub work_dir: PathBuf,
    /// mount read-only
    pub read_only: bool,
}

impl OverlayOptions {
    /// the `data` string passed to the mount syscall
    pub fn data(&self) -> String {
        let lower = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lower,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// mount source name
    pub fn source(&self) -> &str {
        if self.source.is_empty() {
            "overlay"
        } else {
            &self.source
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::{overlay_mount, overlay_umount};

#[cfg(target_os = "linux")]
mod linux {
    use nix::mount::{mount, umount, MsFlags};
    use tracing::debug;

    use super::{OverlayOptions, Path};
    use crate::error::{Error, Result};

    /// perform the overlay mount syscall
    pub fn overlay_mount(opts: &OverlayOptions) -> Result<()> {
        let mut flags = MsFlags::empty();
        if opts.read_only {
            flags |= MsFlags::MS_RDONLY;
        }
        let data = opts.data();

        debug!(
            source = opts.source(),
            target = %opts.mount_path.display(),
            %data,
            "mount -t overlay"
        );
        mount(
            Some(opts.source()),
            &opts.mount_path,
            Some("overlay"),
            flags,
            Some(data.as_str()),
        )
        .map_err(|source| Error::Mount {
            path: opts.mount_path.clone(),
            source,
        })
    }

    /// unmount an overlay mount point
    pub fn overlay_umount(mount_path: &Path) -> Result<()> {
        debug!(target = %mount_path.display(), "umount");
        umount(mount_path).map_err(|source| Error::Umount {
            path: mount_path.to_path_buf(),
            source,
        })
    }
}

#[cfg(not(target_os = "linux"))]
pub use other::{overlay_mount, overlay_umount};

#[cfg(not(target_os = "linux"))]
mod other {
    use super::{OverlayOptions, Path};
    use crate::error::{Error, Result};

    pub fn overlay_mount(_opts: &OverlayOptions) -> Result<()> {
        Err(Error::Unsupported(std::env::consts::OS))
    }

    pub fn overlay_umount(_mount_path: &Path) -> Result<()> {
        Err(Error::Unsupported(std::env::consts::OS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_string_layout() {
        let opts = OverlayOptions {
            source: String::new(),
            mount_path: PathBuf::from("/mnt/merged"),
            lower_dirs: vec![
                PathBuf::from("/l/newest/diff"),
                PathBuf::from("/l/middle/diff"),
                PathBuf::from("/l/oldest/diff"),
            ],
            upper_dir: PathBuf::from("/l/upper/diff"),
            work_dir: PathBuf::from("/mnt/work"),
            read_only: false,
        };

        assert_eq!(
            opts.data(),
            "lowerdir=/l/newest/diff:/l/middle/diff:/l/oldest/diff,\
             upperdir=/l/upper/diff,workdir=/mnt/work"
        );
    }

    #[test]
    fn test_single_lower() {
        let opts = OverlayOptions {
            lower_dirs: vec![PathBuf::from("/a")],
            upper_dir: PathBuf::from("/b"),
            work_dir: PathBuf::from("/c"),
            ..Default::default()
        };
        assert_eq!(opts.data(), "lowerdir=/a,upperdir=/b,workdir=/c");
    }

    #[test]
    fn test_default_source() {
        let mut opts = OverlayOptions::default();
        assert_eq!(opts.source(), "overlay");

        opts.source = "strata".to_string();
        assert_eq!(opts.source(), "strata");
    }
}
