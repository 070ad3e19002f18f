use crate::NodeId;
use thiserror::Error;

/// Structural problems detected when a [`TreeBuilder`](crate::TreeBuilder) is finished.
///
/// These are programming errors in whatever produced the nodes (normally the
/// parser), not language-level diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// A node refers to a child id that was never allocated.
    #[error("node {parent} refers to missing child {child}")]
    MissingChild { parent: NodeId, child: NodeId },

    /// A node was claimed as a child by two different parents.
    #[error("node {child} has two parents: {first} and {second}")]
    SharedChild {
        child: NodeId,
        first: NodeId,
        second: NodeId,
    },

    /// The requested root is not a `Program` node.
    #[error("root {0} is not a program")]
    RootNotProgram(NodeId),

    /// A replacement targeted a node id that was never allocated.
    #[error("cannot replace missing node {0}")]
    MissingNode(NodeId),
}
