use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

use crate::error::Result;
use crate::tree::{Node, Tree};
use crate::uid::Uid;
use crate::workspace::branch::BranchName;

/// node annotation key for the commit date (RFC 3339)
pub const ANNO_COMMIT_DATE: &str = "commit-date";
/// node annotation key for the commit message
pub const ANNO_COMMIT_MESSAGE: &str = "commit-message";

/// metadata recorded on a node when it is committed
#[derive(Clone, Debug)]
pub struct CommitInfo {
    pub date: DateTime<Utc>,
    pub message: String,
}

impl CommitInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            message: message.into(),
        }
    }

    /// write this commit's metadata into the node's annotations
    pub fn apply(&self, tree: &mut Tree, node: Uid) -> Result<()> {
        tree.annotate(
            node,
            ANNO_COMMIT_DATE,
            self.date.to_rfc3339_opts(SecondsFormat::Secs, true),
        )?;
        tree.annotate(node, ANNO_COMMIT_MESSAGE, self.message.clone())?;
        Ok(())
    }
}

/// a commit as presented by `log`
#[derive(Clone, Debug)]
pub struct Commit {
    pub id: Uid,
    pub date: Option<DateTime<FixedOffset>>,
    pub message: String,
    /// branches whose head is this commit, visible from the workspace
    pub branches: Vec<BranchName>,
    /// tags pointing at this commit
    pub tags: Vec<String>,
}

impl Commit {
    /// read commit metadata back out of a node's annotations
    ///
    /// decorations (branches/tags) are filled in by the workspace, which
    /// knows which branches are visible to it
    pub fn from_node(node: &Node) -> Self {
        let date = node
            .annotation(ANNO_COMMIT_DATE)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
        let message = node
            .annotation(ANNO_COMMIT_MESSAGE)
            .unwrap_or_default()
            .to_string();

        Self {
            id: node.id(),
            date,
            message,
            branches: Vec::new(),
            tags: Vec::new(),
        }
    }
}
