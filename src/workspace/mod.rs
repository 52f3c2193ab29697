mod branch;
mod commit;

pub use branch::BranchName;
pub use commit::{Commit, CommitInfo, ANNO_COMMIT_DATE, ANNO_COMMIT_MESSAGE};

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, IoResultExt, Result};
use crate::mounts::Mount;
use crate::space::{Space, ROOT_TAG};
use crate::uid::Uid;

/// the ref naming the mutable upper layer of the current mount
pub const HEAD_REF: &str = "HEAD";

/// what kind of ref a search key resolved through
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    Commit,
    Branch,
    Tag,
}

/// a live binding of a space and a mount to a user path
///
/// the head node is the mutable upper layer of the mounted state; the
/// current commit is the head's parent. log, branch and tag operations all
/// address the current commit. workspaces are replaced, not mutated:
/// commit and checkout build a new workspace over a new mount.
pub struct Workspace {
    id: Uid,
    path: PathBuf,
    space: Space,
    mount: Mount,
    head: Uid,
    branch: String,
}

impl Workspace {
    pub fn new(
        id: Uid,
        path: impl Into<PathBuf>,
        space: Space,
        mount: Mount,
        head: Uid,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            space,
            mount,
            head,
            branch: branch.into(),
        }
    }

    /// workspace id
    pub fn id(&self) -> Uid {
        self.id
    }

    /// user path this workspace is linked at
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut Space {
        &mut self.space
    }

    /// take the space out of this workspace, consuming it
    pub fn into_space(self) -> Space {
        self.space
    }

    pub fn mount(&self) -> &Mount {
        &self.mount
    }

    /// head node uid, the mutable upper layer
    pub fn head(&self) -> Uid {
        self.head
    }

    /// current branch local name
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// current branch as a full ref
    pub fn current_branch(&self) -> BranchName {
        BranchName::local(self.id, self.branch.clone())
    }

    /// the current commit, parent of the head node
    pub fn head_commit(&self) -> Result<Uid> {
        self.space
            .tree()
            .get(self.head)
            .and_then(|n| n.parent())
            .ok_or_else(|| Error::NodeNotFound(self.head.hex()))
    }

    /// mount this workspace and link it at its user path
    ///
    /// the working directory is moved to `/` while the target path is
    /// swapped, so nothing holds the path; a failure after the mount
    /// unmounts again on the way out.
    pub fn expand(&self, cancel: &CancelToken) -> Result<()> {
        info!(mount = %self.mount.id().base32(), "mounting");
        self.mount.mount(cancel)?;

        if let Err(e) = self.link_into_place() {
            if let Err(umount_err) = self.mount.umount(cancel) {
                warn!(error = %umount_err, "umount after failed expand");
            }
            return Err(e);
        }
        Ok(())
    }

    fn link_into_place(&self) -> Result<()> {
        let pwd = env::current_dir().with_path(".")?;
        env::set_current_dir("/").with_path("/")?;

        let result = self.replace_target();

        let restore = env::set_current_dir(&pwd).with_path(&pwd);
        result.and(restore)
    }

    fn replace_target(&self) -> Result<()> {
        if let Ok(meta) = fs::symlink_metadata(&self.path) {
            debug!(path = %self.path.display(), "target path exists, removing");
            if meta.is_dir() {
                fs::remove_dir(&self.path).with_path(&self.path)?;
            } else {
                fs::remove_file(&self.path).with_path(&self.path)?;
            }
        }
        info!(path = %self.path.display(), "linking mount point");
        self.mount.create_symlink(&self.path)
    }

    /// commit history of `rev`, newest first
    ///
    /// walks from the resolved node toward the root, one entry per
    /// non-root node, with branch and tag decorations filled in
    pub fn history(&self, rev: &str) -> Result<Vec<Commit>> {
        let (from, _) = self
            .search(rev)
            .ok_or_else(|| Error::UnknownRef(rev.to_string()))?;

        let tree = self.space.tree();
        let mut commits = Vec::new();
        for id in tree.path_to_root(from) {
            let node = tree
                .get(id)
                .ok_or_else(|| Error::NodeNotFound(id.hex()))?;
            if node.is_root() {
                break;
            }
            let mut commit = Commit::from_node(node);
            self.decorate(&mut commit);
            commits.push(commit);
        }
        Ok(commits)
    }

    fn decorate(&self, commit: &mut Commit) {
        for branch in self.all_branches() {
            let entry = self.space.tree().get_by_branch(&branch.full_name());
            if entry.is_some_and(|n| n.id() == commit.id) {
                commit.branches.push(branch);
            }
        }
        for (tag, id) in self.space.tree().tags() {
            if tag != ROOT_TAG && id == commit.id {
                commit.tags.push(tag);
            }
        }
    }

    /// branches visible from this workspace: its locals plus all globals
    ///
    /// locals come first, each group sorted by name
    pub fn all_branches(&self) -> Vec<BranchName> {
        let mut branches: Vec<BranchName> = self
            .parsed_branches()
            .filter(|b| b.is_global() || b.workspace_id() == Some(self.id))
            .collect();
        branches.sort_by(|a, b| {
            b.is_local()
                .cmp(&a.is_local())
                .then_with(|| a.name().cmp(b.name()))
        });
        branches
    }

    /// this workspace's local branches, sorted by name
    pub fn local_branches(&self) -> Vec<BranchName> {
        let mut branches: Vec<BranchName> = self
            .parsed_branches()
            .filter(|b| b.workspace_id() == Some(self.id))
            .collect();
        branches.sort_by(|a, b| a.name().cmp(b.name()));
        branches
    }

    /// global branches, sorted by name
    pub fn remote_branches(&self) -> Vec<BranchName> {
        let mut branches: Vec<BranchName> = self
            .parsed_branches()
            .filter(BranchName::is_global)
            .collect();
        branches.sort_by(|a, b| a.name().cmp(b.name()));
        branches
    }

    fn parsed_branches(&self) -> impl Iterator<Item = BranchName> + '_ {
        self.space
            .tree()
            .branches()
            .into_keys()
            .filter_map(|full| BranchName::parse_full_name(&full).ok())
    }

    /// make `local_name` the current branch, pointing at the current commit
    pub fn set_branch(&mut self, local_name: &str) -> Result<()> {
        let commit = self.head_commit()?;
        let full = BranchName::local(self.id, local_name).full_name();
        self.space.tree_mut().add_branch(full, commit)?;
        self.branch = local_name.to_string();
        Ok(())
    }

    /// create a branch at `rev`
    ///
    /// fails with `BranchExists` when the name is taken and `force` is off
    pub fn add_branch(&mut self, local_name: &str, rev: &str, force: bool) -> Result<()> {
        let (target, _) = self
            .search(rev)
            .ok_or_else(|| Error::UnknownRef(rev.to_string()))?;

        let full = BranchName::local(self.id, local_name).full_name();
        if !force && self.space.tree().get_by_branch(&full).is_some() {
            return Err(Error::BranchExists(local_name.to_string()));
        }
        self.space.tree_mut().add_branch(full, target)?;
        self.space.save()
    }

    /// delete a branch by local name; `remote` targets a global branch
    pub fn delete_branch(&mut self, local_name: &str, remote: bool) -> Result<()> {
        let candidates = if remote {
            vec![BranchName::global(local_name)]
        } else {
            BranchName::parse_local_name(self.id, local_name)
        };

        for candidate in candidates {
            if self.space.tree_mut().delete_branch(&candidate.full_name()) {
                return self.space.save();
            }
        }
        Err(Error::BranchNotFound(local_name.to_string()))
    }

    /// tag names, sorted, with the reserved root tag hidden
    pub fn tags(&self) -> Vec<String> {
        self.space
            .tree()
            .tags()
            .into_keys()
            .filter(|t| t != ROOT_TAG)
            .collect()
    }

    /// create a tag at `rev`
    ///
    /// fails with `TagExists` when the name is taken and `force` is off
    pub fn add_tag(&mut self, name: &str, rev: &str, force: bool) -> Result<()> {
        let (target, _) = self
            .search(rev)
            .ok_or_else(|| Error::UnknownRef(rev.to_string()))?;

        if !force && self.space.tree().get_by_tag(name).is_some() {
            return Err(Error::TagExists(name.to_string()));
        }
        self.space.tree_mut().add_tag(name, target)?;
        self.space.save()
    }

    /// delete a tag
    pub fn delete_tag(&mut self, name: &str) -> Result<()> {
        if !self.space.tree_mut().delete_tag(name) {
            return Err(Error::TagNotFound(name.to_string()));
        }
        self.space.save()
    }

    /// resolve a ref to a node
    ///
    /// `HEAD` names the current commit; otherwise uids (hex then base32),
    /// tags, branch full names and branch local names are tried in order
    pub fn search(&self, key: &str) -> Option<(Uid, RefKind)> {
        let tree = self.space.tree();

        if key == HEAD_REF {
            let head = tree.get(self.head)?;
            return head.parent().map(|p| (p, RefKind::Commit));
        }

        let id = match key.len() {
            32 => Uid::from_hex(key).ok(),
            26 => Uid::from_base32(key).ok(),
            _ => None,
        };
        if let Some(node) = id.and_then(|id| tree.get(id)) {
            return Some((node.id(), RefKind::Commit));
        }

        if let Some(node) = tree.get_by_tag(key) {
            return Some((node.id(), RefKind::Tag));
        }
        if let Some(node) = tree.get_by_branch(key) {
            return Some((node.id(), RefKind::Branch));
        }

        for candidate in BranchName::parse_local_name(self.id, key) {
            if let Some(node) = tree.get_by_branch(&candidate.full_name()) {
                return Some((node.id(), RefKind::Branch));
            }
        }

        None
    }

    /// like `search`, failing with `UnknownRef`
    pub fn resolve(&self, key: &str) -> Result<Uid> {
        self.search(key)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::UnknownRef(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerStore;
    use crate::mounts::MountOptions;
    use tempfile::tempdir;

    fn mount_opts(dir: &Path) -> MountOptions {
        MountOptions {
            data_root: dir.to_path_buf(),
            chown_uid: 0,
            chown_gid: 0,
        }
    }

    /// space + unexpanded workspace over a fresh root mount
    fn test_workspace(dir: &Path) -> Workspace {
        for sub in ["overlay", "space", "mounts/a", "mounts/b"] {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        let mut space = Space::new(
            Uid::random(),
            dir.join("space"),
            LayerStore::new(dir.join("overlay")),
        );
        space.init().unwrap();

        let root = space.tree().root().unwrap().id();
        let (mount, head) = space
            .create_mount(root, Uid::random(), mount_opts(&dir.join("mounts/a")))
            .unwrap();

        let mut ws = Workspace::new(
            Uid::random(),
            dir.join("ws"),
            space,
            mount,
            head,
            "main",
        );
        ws.set_branch("main").unwrap();
        ws
    }

    /// simulate a commit plus the follow-up mount, returning the commit id
    fn commit(ws: &mut Workspace, message: &str, mount_dir: &Path) -> Uid {
        let committed = ws.head;
        CommitInfo::new(message)
            .apply(ws.space.tree_mut(), committed)
            .unwrap();
        let full = ws.current_branch().full_name();
        ws.space
            .tree_mut()
            .update_branch(&full, committed, false)
            .unwrap();

        let (mount, head) = ws
            .space
            .create_mount(committed, Uid::random(), mount_opts(mount_dir))
            .unwrap();
        ws.mount = mount;
        ws.head = head;
        committed
    }

    #[test]
    fn test_head_commit_is_parent_of_head() {
        let dir = tempdir().unwrap();
        let ws = test_workspace(dir.path());

        let root = ws.space.tree().root().unwrap().id();
        assert_eq!(ws.head_commit().unwrap(), root);
    }

    #[test]
    fn test_search_head() {
        let dir = tempdir().unwrap();
        let ws = test_workspace(dir.path());

        let (id, kind) = ws.search(HEAD_REF).unwrap();
        assert_eq!(id, ws.head_commit().unwrap());
        assert_eq!(kind, RefKind::Commit);
    }

    #[test]
    fn test_search_priority_uid_over_tag() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());
        let commit_id = commit(&mut ws, "first", &dir.path().join("mounts/b"));

        // tag with the exact spelling of the commit's base32 id, aimed elsewhere
        let root = ws.space.tree().root().unwrap().id();
        ws.space
            .tree_mut()
            .add_tag(commit_id.base32(), root)
            .unwrap();

        let (found, kind) = ws.search(&commit_id.base32()).unwrap();
        assert_eq!(found, commit_id);
        assert_eq!(kind, RefKind::Commit);
    }

    #[test]
    fn test_search_branch_local_name() {
        let dir = tempdir().unwrap();
        let ws = test_workspace(dir.path());

        let (id, kind) = ws.search("main").unwrap();
        assert_eq!(id, ws.head_commit().unwrap());
        assert_eq!(kind, RefKind::Branch);
    }

    #[test]
    fn test_search_origin_name_finds_global() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());
        let root = ws.space.tree().root().unwrap().id();
        ws.space
            .tree_mut()
            .add_branch("global/dev", root)
            .unwrap();

        let (id, kind) = ws.search("origin/dev").unwrap();
        assert_eq!(id, root);
        assert_eq!(kind, RefKind::Branch);
    }

    #[test]
    fn test_history_empty_at_init() {
        let dir = tempdir().unwrap();
        let ws = test_workspace(dir.path());

        assert!(ws.history(HEAD_REF).unwrap().is_empty());
        assert!(ws.history(ROOT_TAG).unwrap().is_empty());
    }

    #[test]
    fn test_history_after_commit() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());
        let commit_id = commit(&mut ws, "first", &dir.path().join("mounts/b"));

        let history = ws.history(HEAD_REF).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, commit_id);
        assert_eq!(history[0].message, "first");
        assert!(history[0].date.is_some());
        // the current branch decorates its head commit
        assert_eq!(history[0].branches.len(), 1);
        assert_eq!(history[0].branches[0].local_name(), "main");
    }

    #[test]
    fn test_history_unknown_ref() {
        let dir = tempdir().unwrap();
        let ws = test_workspace(dir.path());

        assert!(matches!(
            ws.history("no-such-rev"),
            Err(Error::UnknownRef(_))
        ));
    }

    #[test]
    fn test_branch_listing_order() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());
        let root = ws.space.tree().root().unwrap().id();

        ws.space.tree_mut().add_branch("global/zeta", root).unwrap();
        ws.space
            .tree_mut()
            .add_branch("global/alpha", root)
            .unwrap();
        ws.set_branch("dev").unwrap();
        // another workspace's local branch is invisible here
        ws.space
            .tree_mut()
            .add_branch(BranchName::local(Uid::random(), "other").full_name(), root)
            .unwrap();

        let all: Vec<String> = ws.all_branches().iter().map(|b| b.local_name()).collect();
        assert_eq!(all, ["dev", "main", "origin/alpha", "origin/zeta"]);

        let locals: Vec<String> = ws
            .local_branches()
            .iter()
            .map(|b| b.local_name())
            .collect();
        assert_eq!(locals, ["dev", "main"]);

        let remotes: Vec<String> = ws
            .remote_branches()
            .iter()
            .map(|b| b.local_name())
            .collect();
        assert_eq!(remotes, ["origin/alpha", "origin/zeta"]);
    }

    #[test]
    fn test_add_branch_conflict() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());

        ws.add_branch("dev", HEAD_REF, false).unwrap();
        let result = ws.add_branch("dev", HEAD_REF, false);
        assert!(matches!(result, Err(Error::BranchExists(_))));

        ws.add_branch("dev", ROOT_TAG, true).unwrap();
        let root = ws.space.tree().root().unwrap().id();
        let (id, _) = ws.search("dev").unwrap();
        assert_eq!(id, root);
    }

    #[test]
    fn test_delete_branch() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());

        ws.add_branch("dev", HEAD_REF, false).unwrap();
        ws.delete_branch("dev", false).unwrap();
        assert!(ws.search("dev").is_none());

        assert!(matches!(
            ws.delete_branch("dev", false),
            Err(Error::BranchNotFound(_))
        ));
    }

    #[test]
    fn test_tags_hide_root() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());

        ws.add_tag("v2", HEAD_REF, false).unwrap();
        ws.add_tag("v1", HEAD_REF, false).unwrap();

        assert_eq!(ws.tags(), ["v1", "v2"]);
    }

    #[test]
    fn test_tag_conflict_and_force() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());

        ws.add_tag("v1", HEAD_REF, false).unwrap();
        assert!(matches!(
            ws.add_tag("v1", HEAD_REF, false),
            Err(Error::TagExists(_))
        ));

        ws.add_tag("v1", ROOT_TAG, true).unwrap();
        let root = ws.space.tree().root().unwrap().id();
        let (id, _) = ws.search("v1").unwrap();
        assert_eq!(id, root);
    }

    #[test]
    fn test_delete_tag_missing() {
        let dir = tempdir().unwrap();
        let mut ws = test_workspace(dir.path());

        assert!(matches!(
            ws.delete_tag("absent"),
            Err(Error::TagNotFound(_))
        ));
    }
}
