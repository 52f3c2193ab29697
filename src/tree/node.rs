use std::collections::BTreeMap;

use crate::uid::Uid;

/// a node of the layer tree
///
/// nodes live in the tree's arena and reference each other by uid, never by
/// owning pointers. the child map is keyed by the child uid's hex form.
#[derive(Clone, Debug)]
pub struct Node {
    id: Uid,
    parent: Option<Uid>,
    children: BTreeMap<String, Uid>,
    annotations: BTreeMap<String, String>,
    data: BTreeMap<String, Vec<u8>>,
}

impl Node {
    pub fn new(id: Uid) -> Self {
        Self {
            id,
            parent: None,
            children: BTreeMap::new(),
            annotations: BTreeMap::new(),
            data: BTreeMap::new(),
        }
    }

    /// node id
    pub fn id(&self) -> Uid {
        self.id
    }

    /// parent uid, `None` for the root
    pub fn parent(&self) -> Option<Uid> {
        self.parent
    }

    /// child uids in ascending hex order
    pub fn children(&self) -> impl Iterator<Item = Uid> + '_ {
        self.children.values().copied()
    }

    pub fn has_child(&self, id: Uid) -> bool {
        self.children.contains_key(&id.hex())
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// annotation value for `key`
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// all annotations
    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    pub fn add_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn set_annotations(&mut self, annotations: BTreeMap<String, String>) {
        self.annotations = annotations;
    }

    /// opaque data value for `key`
    pub fn data(&self, key: &str) -> Option<&[u8]> {
        self.data.get(key).map(Vec::as_slice)
    }

    pub fn add_data(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.data.insert(key.into(), value);
    }

    pub(super) fn set_parent(&mut self, parent: Uid) {
        self.parent = Some(parent);
    }

    pub(super) fn add_child(&mut self, child: Uid) -> bool {
        self.children.insert(child.hex(), child).is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_node_is_root_and_leaf() {
        let node = Node::new(Uid::random());
        assert!(node.is_root());
        assert!(node.is_leaf());
    }

    #[test]
    fn test_parent_child_edges() {
        let parent_id = Uid::random();
        let child_id = Uid::random();

        let mut parent = Node::new(parent_id);
        let mut child = Node::new(child_id);

        assert!(parent.add_child(child_id));
        assert!(!parent.add_child(child_id)); // already present
        child.set_parent(parent_id);

        assert!(parent.has_child(child_id));
        assert!(!parent.is_leaf());
        assert!(!child.is_root());
        assert_eq!(child.parent(), Some(parent_id));
    }

    #[test]
    fn test_children_sorted_by_hex() {
        let mut node = Node::new(Uid::random());
        let mut ids: Vec<Uid> = (0..8).map(|_| Uid::random()).collect();
        for id in &ids {
            node.add_child(*id);
        }
        ids.sort_by_key(|id| id.hex());

        let listed: Vec<Uid> = node.children().collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_annotations() {
        let mut node = Node::new(Uid::random());
        node.add_annotation("commit-message", "first");

        assert_eq!(node.annotation("commit-message"), Some("first"));
        assert_eq!(node.annotation("missing"), None);

        node.add_annotation("commit-message", "amended");
        assert_eq!(node.annotation("commit-message"), Some("amended"));
    }

    #[test]
    fn test_data() {
        let mut node = Node::new(Uid::random());
        node.add_data("blob", vec![1, 2, 3]);

        assert_eq!(node.data("blob"), Some(&[1u8, 2, 3][..]));
        assert_eq!(node.data("missing"), None);
    }
}
