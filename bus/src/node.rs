//! Pipeline vocabulary: nodes, ports, links, and errors

use thiserror::Error;

/// Identifier of a node in the graph.
pub type NodeId = String;

/// Identifier of an input or output port on a node.
pub type PortId = String;

/// A directed edge from one node's output port to another node's input
/// port.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Link {
    /// Source node
    pub from_node: NodeId,
    /// Output port on the source
    pub from_output: PortId,
    /// Input port on the target
    pub to_input: PortId,
    /// Target node
    pub to_node: NodeId,
}

impl Link {
    /// Build a link from its four coordinates.
    #[must_use]
    pub fn new(
        from_node: impl Into<NodeId>,
        from_output: impl Into<PortId>,
        to_input: impl Into<PortId>,
        to_node: impl Into<NodeId>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_output: from_output.into(),
            to_input: to_input.into(),
            to_node: to_node.into(),
        }
    }

    /// Whether the link starts or ends at the node.
    #[must_use]
    pub fn touches(&self, node: &str) -> bool {
        self.from_node == node || self.to_node == node
    }
}

/// A processing step: one event in on a port, any number of events out.
///
/// Nodes are invoked one event at a time; a node owning mutable state
/// needs no further synchronization.
pub trait Node<E>: Send {
    /// Handle one event arriving on `input`, producing tagged outputs.
    fn process(&mut self, input: &str, event: E) -> Vec<(PortId, E)>;
}

impl<E, F> Node<E> for F
where
    F: FnMut(&str, E) -> Vec<(PortId, E)> + Send,
{
    fn process(&mut self, input: &str, event: E) -> Vec<(PortId, E)> {
        self(input, event)
    }
}

/// Structural errors of the pipeline graph.
///
/// These are caller faults: the graph itself is never corrupted by a
/// failed operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PipelineError {
    /// A node with this id already exists
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
    /// No node with this id exists
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// This exact link already exists
    #[error("duplicate link {0:?}")]
    DuplicateLink(Link),
    /// No such link exists
    #[error("unknown link {0:?}")]
    UnknownLink(Link),
    /// The node has no port with this name
    #[error("node {node} has no port {port}")]
    UnknownPort {
        /// Node looked up
        node: NodeId,
        /// Missing port
        port: PortId,
    },
}
