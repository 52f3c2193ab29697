use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tree::node::Node;
use crate::tree::tree::Tree;
use crate::uid::Uid;

/// serializable form of a tree
///
/// the node hierarchy nests children inside their parent; branches and tags
/// map ref names to node uids in hex. all three are `null` when empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDump {
    pub nodes: Option<NodeDump>,
    pub branches: Option<BTreeMap<String, String>>,
    pub tags: Option<BTreeMap<String, String>>,
}

/// serializable form of a node
///
/// children are ordered by ascending uid hex for reproducible output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDump {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeDump>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// export a tree to its serializable form
pub fn dump(tree: &Tree) -> TreeDump {
    let nodes = tree.root().map(|root| dump_node(tree, root));

    let branches = tree.branches();
    let branches = (!branches.is_empty())
        .then(|| branches.into_iter().map(|(k, v)| (k, v.hex())).collect());
    let tags = tree.tags();
    let tags = (!tags.is_empty())
        .then(|| tags.into_iter().map(|(k, v)| (k, v.hex())).collect());

    TreeDump {
        nodes,
        branches,
        tags,
    }
}

fn dump_node(tree: &Tree, node: &Node) -> NodeDump {
    NodeDump {
        id: node.id().hex(),
        children: node
            .children()
            .filter_map(|id| tree.get(id))
            .map(|child| dump_node(tree, child))
            .collect(),
        annotations: node.annotations().clone(),
    }
}

/// rebuild a tree from its serializable form
///
/// an empty document yields a tree with no root. branches and tags naming
/// uids that are not in the node hierarchy fail with `TreeLoad`.
pub fn load(dump: TreeDump) -> Result<Tree> {
    let mut tree = Tree::new();

    if let Some(root) = &dump.nodes {
        load_node(&mut tree, None, root)?;
    }

    for (name, hex) in dump.branches.iter().flatten() {
        let id = decode_ref_id(hex)?;
        tree.add_branch(name.clone(), id)
            .map_err(|_| Error::TreeLoad(format!("branch {name:?} points at unknown node {hex}")))?;
    }
    for (name, hex) in dump.tags.iter().flatten() {
        let id = decode_ref_id(hex)?;
        tree.add_tag(name.clone(), id)
            .map_err(|_| Error::TreeLoad(format!("tag {name:?} points at unknown node {hex}")))?;
    }

    Ok(tree)
}

fn load_node(tree: &mut Tree, parent: Option<Uid>, dump: &NodeDump) -> Result<()> {
    let id = decode_ref_id(&dump.id)?;
    let mut node = Node::new(id);
    node.set_annotations(dump.annotations.clone());

    tree.add_node(parent, node)
        .map_err(|e| Error::TreeLoad(format!("add node {}: {e}", dump.id)))?;

    for child in &dump.children {
        load_node(tree, Some(id), child)?;
    }
    Ok(())
}

fn decode_ref_id(hex: &str) -> Result<Uid> {
    Uid::from_hex(hex).map_err(|_| Error::TreeLoad(format!("invalid node id {hex:?}")))
}
