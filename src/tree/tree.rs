use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::tree::node::Node;
use crate::uid::Uid;

/// tree of layer nodes with branch and tag refs
///
/// nodes are held in an arena keyed by uid hex; edges and refs are uid
/// handles into that arena. the tree is additive: nodes are never removed.
#[derive(Clone, Debug, Default)]
pub struct Tree {
    root: Option<Uid>,
    nodes: HashMap<String, Node>,
    branches: HashMap<String, Uid>,
    tags: HashMap<String, Uid>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// get a node by uid
    pub fn get(&self, id: Uid) -> Option<&Node> {
        self.nodes.get(&id.hex())
    }

    /// get the node a branch points at, by full name
    pub fn get_by_branch(&self, name: &str) -> Option<&Node> {
        self.branches.get(name).and_then(|id| self.get(*id))
    }

    /// get the node a tag points at
    pub fn get_by_tag(&self, name: &str) -> Option<&Node> {
        self.tags.get(name).and_then(|id| self.get(*id))
    }

    /// root node
    pub fn root(&self) -> Option<&Node> {
        self.root.and_then(|id| self.get(id))
    }

    /// snapshot of the branch map, full name -> node uid
    pub fn branches(&self) -> BTreeMap<String, Uid> {
        self.branches
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// snapshot of the tag map, name -> node uid
    pub fn tags(&self) -> BTreeMap<String, Uid> {
        self.tags.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// add a node under `parent`
    ///
    /// with `parent = None` the node becomes the root; installing a second
    /// root fails with `RootExists`. otherwise the parent must already be
    /// in the tree.
    pub fn add_node(&mut self, parent: Option<Uid>, mut node: Node) -> Result<()> {
        let Some(parent_id) = parent else {
            if let Some(root) = self.root {
                return Err(Error::RootExists(root));
            }
            self.root = Some(node.id());
            self.nodes.insert(node.id().hex(), node);
            return Ok(());
        };

        let id = node.id();
        node.set_parent(parent_id);

        let parent_node = self
            .nodes
            .get_mut(&parent_id.hex())
            .ok_or_else(|| Error::NodeNotFound(parent_id.hex()))?;
        parent_node.add_child(id);

        self.nodes.insert(id.hex(), node);
        Ok(())
    }

    /// set an annotation on an existing node
    pub fn annotate(&mut self, id: Uid, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id.hex())
            .ok_or_else(|| Error::NodeNotFound(id.hex()))?;
        node.add_annotation(key, value);
        Ok(())
    }

    /// add or overwrite a tag
    pub fn add_tag(&mut self, name: impl Into<String>, id: Uid) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::NodeNotFound(id.hex()));
        }
        self.tags.insert(name.into(), id);
        Ok(())
    }

    /// delete a tag; true when removed, false when missing
    pub fn delete_tag(&mut self, name: &str) -> bool {
        self.tags.remove(name).is_some()
    }

    /// add or overwrite a branch by full name
    pub fn add_branch(&mut self, name: impl Into<String>, id: Uid) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::NodeNotFound(id.hex()));
        }
        self.branches.insert(name.into(), id);
        Ok(())
    }

    /// delete a branch; true when removed, false when missing
    pub fn delete_branch(&mut self, name: &str) -> bool {
        self.branches.remove(name).is_some()
    }

    /// move a branch head
    ///
    /// with `force = false` the move is only permitted when the new node is
    /// a descendant of the current head (fast-forward); otherwise it fails
    /// with `NonFastForward`. `force = true` always succeeds.
    pub fn update_branch(&mut self, name: &str, id: Uid, force: bool) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::NodeNotFound(id.hex()));
        }
        let head = *self
            .branches
            .get(name)
            .ok_or_else(|| Error::BranchNotFound(name.to_string()))?;

        if head == id {
            return Ok(());
        }
        if !force && !self.is_descendant(id, head) {
            return Err(Error::NonFastForward {
                branch: name.to_string(),
                node: id,
            });
        }

        self.branches.insert(name.to_string(), id);
        Ok(())
    }

    /// whether `node` is `ancestor` or a descendant of it
    pub fn is_descendant(&self, node: Uid, ancestor: Uid) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.get(id).and_then(Node::parent);
        }
        false
    }

    /// uids from `id` up to the root, starting at `id`
    pub fn path_to_root(&self, id: Uid) -> Vec<Uid> {
        let mut path = Vec::new();
        let mut cur = Some(id);
        while let Some(id) = cur {
            path.push(id);
            cur = self.get(id).and_then(Node::parent);
        }
        path
    }

    /// search a node by key
    ///
    /// tried in order: 32-char hex uid, 26-char base32 uid, tag name,
    /// branch full name. returns `None` when nothing matches.
    pub fn search(&self, key: &str) -> Option<&Node> {
        let id = match key.len() {
            32 => Uid::from_hex(key).ok(),
            26 => Uid::from_base32(key).ok(),
            _ => None,
        };
        if let Some(node) = id.and_then(|id| self.get(id)) {
            return Some(node);
        }

        if let Some(node) = self.get_by_tag(key) {
            return Some(node);
        }

        self.get_by_branch(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(tree: &mut Tree, parent: Option<Uid>) -> Uid {
        let id = Uid::random();
        tree.add_node(parent, Node::new(id)).unwrap();
        id
    }

    #[test]
    fn test_add_root() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);

        assert_eq!(tree.root().unwrap().id(), root);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_second_root_rejected() {
        let mut tree = Tree::new();
        add(&mut tree, None);

        let result = tree.add_node(None, Node::new(Uid::random()));
        assert!(matches!(result, Err(Error::RootExists(_))));
    }

    #[test]
    fn test_add_node_missing_parent() {
        let mut tree = Tree::new();
        add(&mut tree, None);

        let result = tree.add_node(Some(Uid::random()), Node::new(Uid::random()));
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_edges_are_consistent() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let child = add(&mut tree, Some(root));

        assert!(tree.get(root).unwrap().has_child(child));
        assert_eq!(tree.get(child).unwrap().parent(), Some(root));
    }

    #[test]
    fn test_tags() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);

        tree.add_tag("v1", root).unwrap();
        assert_eq!(tree.get_by_tag("v1").unwrap().id(), root);

        // idempotent overwrite
        let child = add(&mut tree, Some(root));
        tree.add_tag("v1", child).unwrap();
        assert_eq!(tree.get_by_tag("v1").unwrap().id(), child);

        assert!(tree.delete_tag("v1"));
        assert!(!tree.delete_tag("v1"));
    }

    #[test]
    fn test_tag_unknown_node() {
        let mut tree = Tree::new();
        add(&mut tree, None);

        let result = tree.add_tag("v1", Uid::random());
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_branches() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);

        tree.add_branch("global/main", root).unwrap();
        assert_eq!(tree.get_by_branch("global/main").unwrap().id(), root);

        assert!(tree.delete_branch("global/main"));
        assert!(!tree.delete_branch("global/main"));
    }

    #[test]
    fn test_update_branch_fast_forward() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let c = add(&mut tree, Some(root));
        let d = add(&mut tree, Some(c)); // descendant of c
        let s = add(&mut tree, Some(root)); // sibling of c

        tree.add_branch("global/dev", c).unwrap();

        // descendant: allowed
        tree.update_branch("global/dev", d, false).unwrap();

        // sibling: rejected without force
        let result = tree.update_branch("global/dev", s, false);
        assert!(matches!(result, Err(Error::NonFastForward { .. })));

        // force always succeeds
        tree.update_branch("global/dev", s, true).unwrap();
        assert_eq!(tree.get_by_branch("global/dev").unwrap().id(), s);
    }

    #[test]
    fn test_update_branch_same_position() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        tree.add_branch("global/main", root).unwrap();

        tree.update_branch("global/main", root, false).unwrap();
        assert_eq!(tree.get_by_branch("global/main").unwrap().id(), root);
    }

    #[test]
    fn test_update_branch_missing() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);

        let result = tree.update_branch("global/none", root, false);
        assert!(matches!(result, Err(Error::BranchNotFound(_))));
    }

    #[test]
    fn test_path_to_root() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let a = add(&mut tree, Some(root));
        let b = add(&mut tree, Some(a));

        assert_eq!(tree.path_to_root(b), vec![b, a, root]);
        assert_eq!(tree.path_to_root(root), vec![root]);
    }

    #[test]
    fn test_search_by_uid_forms() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let child = add(&mut tree, Some(root));

        assert_eq!(tree.search(&child.hex()).unwrap().id(), child);
        assert_eq!(tree.search(&child.base32()).unwrap().id(), child);
    }

    #[test]
    fn test_search_by_tag_and_branch() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let child = add(&mut tree, Some(root));

        tree.add_tag("v1", child).unwrap();
        tree.add_branch("global/main", root).unwrap();

        assert_eq!(tree.search("v1").unwrap().id(), child);
        assert_eq!(tree.search("global/main").unwrap().id(), root);
        assert!(tree.search("nothing").is_none());
    }

    #[test]
    fn test_search_uid_beats_tag() {
        let mut tree = Tree::new();
        let root = add(&mut tree, None);
        let child = add(&mut tree, Some(root));

        // a tag spelled exactly like the child's base32 id, pointing elsewhere
        tree.add_tag(child.base32(), root).unwrap();

        assert_eq!(tree.search(&child.base32()).unwrap().id(), child);
    }
}
