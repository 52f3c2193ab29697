//! strata - git-like version control on OverlayFS
//!
//! a version-control surface over an in-place working directory. instead of
//! copying files into a repository, every commit becomes an immutable
//! OverlayFS diff layer, and the working directory is an overlay mount
//! stacking those layers with a fresh writable layer on top.
//!
//! # Core concepts
//!
//! - **Layer**: immutable `diff/` directory, a lowerdir or upperdir of a mount
//! - **Space**: a persistent tree of layers with branch and tag refs
//! - **Mount**: a live overlay composition of a space's layers
//! - **Workspace**: the binding of a mount to a user-visible path
//!
//! `HEAD` names the mutable upper layer of the current mount; the current
//! commit is its parent in the tree.
//!
//! # Example usage
//!
//! ```no_run
//! use std::path::Path;
//! use strata::{CancelToken, CommitInfo, Manager, ManagerOptions};
//!
//! let mut manager = Manager::new(ManagerOptions::new("/var/lib/strata")).unwrap();
//! manager.prepare().unwrap();
//! let cancel = CancelToken::new();
//!
//! // create a workspace and expose it at a path
//! let ws = manager.create_workspace(Path::new("/tmp/ws")).unwrap();
//! ws.expand(&cancel).unwrap();
//!
//! // commit the changes written into the working directory
//! let ws = manager.get_workspace_from_path(Path::new("/tmp/ws")).unwrap();
//! let (new_ws, old_mount) = manager.commit(ws, &CommitInfo::new("first")).unwrap();
//! new_ws.expand(&cancel).unwrap();
//! manager.remove_workspace_mount(&old_mount, &cancel).unwrap();
//! ```

mod cancel;
mod error;
mod layer;
mod manager;
mod space;
mod uid;

pub mod mounts;
pub mod tree;
pub mod workspace;

pub use cancel::CancelToken;
pub use error::{Error, IoResultExt, Result};
pub use layer::{Layer, LayerStore};
pub use manager::{Manager, ManagerOptions, DEFAULT_BRANCH};
pub use mounts::{Mount, MountOptions, OverlayOptions};
pub use space::{Space, ROOT_TAG};
pub use uid::Uid;
pub use workspace::{BranchName, Commit, CommitInfo, RefKind, Workspace, HEAD_REF};
