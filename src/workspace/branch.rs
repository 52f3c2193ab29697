use std::fmt;

use crate::error::{Error, Result};
use crate::uid::Uid;

/// prefix of global branch full names in the tree
const GLOBAL_PREFIX: &str = "global/";
/// display prefix of global branches, what the user types and sees
const GLOBAL_LOCAL_PREFIX: &str = "origin/";

/// a branch reference
///
/// full-name grammar as stored in the tree: `global/<name>` for global
/// branches, `<workspace_base32>/<name>` for workspace-local ones. the
/// `origin/` prefix on global branches is display-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchName {
    name: String,
    workspace: Option<Uid>,
}

impl BranchName {
    /// a branch local to `workspace`
    pub fn local(workspace: Uid, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace: Some(workspace),
        }
    }

    /// a global branch
    pub fn global(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workspace: None,
        }
    }

    /// parse a full name as stored in the tree
    pub fn parse_full_name(full: &str) -> Result<Self> {
        let Some((prefix, name)) = full.split_once('/') else {
            return Err(Error::InvalidBranchName(full.to_string()));
        };
        if prefix == "global" {
            return Ok(Self::global(name));
        }
        let workspace = Uid::from_base32(prefix)
            .map_err(|_| Error::InvalidBranchName(full.to_string()))?;
        Ok(Self::local(workspace, name))
    }

    /// candidate branches a local name may refer to
    ///
    /// a plain name is a workspace-local branch; a name starting with
    /// `origin/` may additionally be a global branch
    pub fn parse_local_name(workspace: Uid, local: &str) -> Vec<Self> {
        let mut candidates = vec![Self::local(workspace, local)];
        if let Some(name) = local.strip_prefix(GLOBAL_LOCAL_PREFIX) {
            candidates.push(Self::global(name));
        }
        candidates
    }

    /// bare branch name without any prefix
    pub fn name(&self) -> &str {
        &self.name
    }

    /// full name as stored in the tree
    pub fn full_name(&self) -> String {
        match self.workspace {
            Some(ws) => format!("{}/{}", ws.base32(), self.name),
            None => format!("{GLOBAL_PREFIX}{}", self.name),
        }
    }

    /// display name within a workspace
    pub fn local_name(&self) -> String {
        match self.workspace {
            Some(_) => self.name.clone(),
            None => format!("{GLOBAL_LOCAL_PREFIX}{}", self.name),
        }
    }

    pub fn is_global(&self) -> bool {
        self.workspace.is_none()
    }

    pub fn is_local(&self) -> bool {
        self.workspace.is_some()
    }

    /// owning workspace for local branches
    pub fn workspace_id(&self) -> Option<Uid> {
        self.workspace
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.local_name())
    }
}
