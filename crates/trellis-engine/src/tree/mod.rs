//! The extension tree: nodes and batch construction

mod builder;
mod node;

pub(crate) use builder::{bake, BuilderNode, TreeBuilder};
pub(crate) use node::{NodeData, TreeNode};
