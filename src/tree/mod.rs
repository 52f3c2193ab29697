mod codec;
mod node;
#[allow(clippy::module_inception)]
mod tree;

pub use codec::{dump, load, NodeDump, TreeDump};
pub use node::Node;
pub use tree::Tree;
