use std::path::PathBuf;

use crate::uid::Uid;

/// error type for strata operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("layer not found: {0}")]
    LayerNotFound(Uid),

    #[error("node not found in tree: {0}")]
    NodeNotFound(String),

    #[error("root node already exists: {0}")]
    RootExists(Uid),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("non-fast-forward: {node} is not a descendant of the head of branch {branch}")]
    NonFastForward { branch: String, node: Uid },

    #[error("tree load error: {0}")]
    TreeLoad(String),

    #[error("space data not found at {0}")]
    SpaceMissing(PathBuf),

    #[error("too few layers to mount: {0} (need at least 2)")]
    TooFewLayers(usize),

    #[error("mount is already mounted")]
    AlreadyMounted,

    #[error("mount {path} error: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("umount {path} error: {source}")]
    Umount {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("overlay mounts are not supported on {0}")]
    Unsupported(&'static str),

    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("tag already exists: {0}")]
    TagExists(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("unknown revision: {0}")]
    UnknownRef(String),

    #[error("not on a branch, cannot commit")]
    Detached,

    #[error("{0} is not a workspace path")]
    NotAWorkspacePath(PathBuf),

    #[error("workspace info not found at {0}")]
    WorkspaceInfoMissing(PathBuf),

    #[error("target path {0} is not an empty directory")]
    TargetNotEmpty(PathBuf),

    #[error("invalid uid: {0}")]
    InvalidUid(String),

    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
