//! Flush-driven pipeline over a compare-and-set state cell
//!
//! Nodes, links, and the pending output buffer live in one immutable
//! state value behind a compare-and-set cell. Readers take consistent
//! snapshots without blocking; structural writers rebuild the state and
//! retry when another writer got there first. A `flush` delivers exactly
//! one generation of pending outputs, so cyclic graphs cannot loop
//! unboundedly inside a single call.

use crate::node::{Link, Node, NodeId, PipelineError, PortId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

type SharedNode<E> = Arc<Mutex<Box<dyn Node<E>>>>;

struct GraphState<E> {
    nodes: FxHashMap<NodeId, SharedNode<E>>,
    links: Vec<Link>,
    pending: Vec<(NodeId, PortId, E)>,
}

impl<E: Clone> Clone for GraphState<E> {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            links: self.links.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<E> GraphState<E> {
    fn empty() -> Self {
        Self {
            nodes: FxHashMap::default(),
            links: Vec::new(),
            pending: Vec::new(),
        }
    }
}

/// Compare-and-set cell over the graph state.
struct StateCell<E> {
    slot: Mutex<Arc<GraphState<E>>>,
}

impl<E> StateCell<E> {
    fn new(state: GraphState<E>) -> Self {
        Self {
            slot: Mutex::new(Arc::new(state)),
        }
    }

    fn load(&self) -> Arc<GraphState<E>> {
        self.slot.lock().clone()
    }

    /// Install `next` only if the cell still holds `expected`.
    fn compare_and_swap(&self, expected: &Arc<GraphState<E>>, next: GraphState<E>) -> bool {
        let mut slot = self.slot.lock();
        if Arc::ptr_eq(&slot, expected) {
            *slot = Arc::new(next);
            true
        } else {
            false
        }
    }
}

/// Synchronous event-flow pipeline.
///
/// `ingest` runs a node and buffers its outputs; `flush` routes one
/// generation of buffered outputs along the links present at drain time.
pub struct FlowGraph<E> {
    state: StateCell<E>,
}

impl<E: Clone + Send + 'static> Default for FlowGraph<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Clone + Send + 'static> FlowGraph<E> {
    /// Empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StateCell::new(GraphState::empty()),
        }
    }

    /// Add a node under a fresh id.
    pub fn add_node(
        &self,
        id: impl Into<NodeId>,
        node: impl Node<E> + 'static,
    ) -> Result<(), PipelineError> {
        let id = id.into();
        let shared: SharedNode<E> = Arc::new(Mutex::new(Box::new(node)));
        loop {
            let current = self.state.load();
            if current.nodes.contains_key(&id) {
                return Err(PipelineError::DuplicateNode(id));
            }
            let mut next = (*current).clone();
            next.nodes.insert(id.clone(), shared.clone());
            if self.state.compare_and_swap(&current, next) {
                return Ok(());
            }
        }
    }

    /// Remove a node, all links touching it, and its buffered outputs,
    /// atomically.
    pub fn remove_node(&self, id: &str) -> Result<(), PipelineError> {
        loop {
            let current = self.state.load();
            if !current.nodes.contains_key(id) {
                return Err(PipelineError::UnknownNode(id.to_string()));
            }
            let mut next = (*current).clone();
            next.nodes.remove(id);
            next.links.retain(|link| !link.touches(id));
            next.pending.retain(|(source, _, _)| source != id);
            if self.state.compare_and_swap(&current, next) {
                return Ok(());
            }
        }
    }

    /// Add a link between two existing nodes.
    pub fn add_link(&self, link: Link) -> Result<(), PipelineError> {
        loop {
            let current = self.state.load();
            for endpoint in [&link.from_node, &link.to_node] {
                if !current.nodes.contains_key(endpoint) {
                    return Err(PipelineError::UnknownNode(endpoint.clone()));
                }
            }
            if current.links.contains(&link) {
                return Err(PipelineError::DuplicateLink(link));
            }
            let mut next = (*current).clone();
            next.links.push(link.clone());
            if self.state.compare_and_swap(&current, next) {
                return Ok(());
            }
        }
    }

    /// Remove an existing link.
    pub fn remove_link(&self, link: &Link) -> Result<(), PipelineError> {
        loop {
            let current = self.state.load();
            let Some(position) = current.links.iter().position(|l| l == link) else {
                return Err(PipelineError::UnknownLink(link.clone()));
            };
            let mut next = (*current).clone();
            next.links.remove(position);
            if self.state.compare_and_swap(&current, next) {
                return Ok(());
            }
        }
    }

    /// Ids of all nodes.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.state.load().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All links.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        self.state.load().links.clone()
    }

    /// Number of buffered outputs awaiting a flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.load().pending.len()
    }

    /// Run a node on an event and buffer its outputs.
    ///
    /// If the node is removed between processing and recording, the
    /// outputs are dropped; a concurrent removal may also drop or
    /// duplicate outputs, which callers must tolerate.
    pub fn ingest(&self, id: &str, input: &str, event: E) -> Result<(), PipelineError> {
        let node = self
            .state
            .load()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))?;
        let outputs = node.lock().process(input, event);
        if outputs.is_empty() {
            return Ok(());
        }
        loop {
            let current = self.state.load();
            if !current.nodes.contains_key(id) {
                debug!(node = id, dropped = outputs.len(), "node removed, outputs dropped");
                return Ok(());
            }
            let mut next = (*current).clone();
            next.pending.extend(
                outputs
                    .iter()
                    .map(|(port, event)| (id.to_string(), port.clone(), event.clone())),
            );
            if self.state.compare_and_swap(&current, next) {
                return Ok(());
            }
        }
    }

    /// Drain the pending buffer and deliver one generation of outputs.
    ///
    /// Links are looked up at drain time. Outputs produced during the
    /// flush are buffered for the next one. Returns how many buffered
    /// entries were drained.
    pub fn flush(&self) -> usize {
        let (drained, links) = loop {
            let current = self.state.load();
            if current.pending.is_empty() {
                return 0;
            }
            let mut next = (*current).clone();
            let drained = std::mem::take(&mut next.pending);
            if self.state.compare_and_swap(&current, next) {
                break (drained, current.links.clone());
            }
        };

        let count = drained.len();
        for (source, output, event) in drained {
            for link in links
                .iter()
                .filter(|l| l.from_node == source && l.from_output == output)
            {
                // the target may have been removed since the drain
                let _ = self.ingest(&link.to_node, &link.to_input, event.clone());
            }
        }
        count
    }

    /// Flush until no outputs remain pending.
    pub fn drain(&self) {
        while self.flush() > 0 {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes every event from port `in` to port `out`.
    struct Echo;

    impl Node<i64> for Echo {
        fn process(&mut self, _input: &str, event: i64) -> Vec<(PortId, i64)> {
            vec![("out".to_string(), event)]
        }
    }

    /// Collects received events into a shared vector.
    struct Sink(Arc<Mutex<Vec<i64>>>);

    impl Node<i64> for Sink {
        fn process(&mut self, _input: &str, event: i64) -> Vec<(PortId, i64)> {
            self.0.lock().push(event);
            Vec::new()
        }
    }

    fn sink() -> (Sink, Arc<Mutex<Vec<i64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (Sink(seen.clone()), seen)
    }

    #[test]
    fn flush_delivers_one_generation() {
        let graph = FlowGraph::new();
        let (sink, seen) = sink();
        graph.add_node("a", Echo).unwrap();
        graph.add_node("b", sink).unwrap();
        graph.add_link(Link::new("a", "out", "in", "b")).unwrap();

        graph.ingest("a", "in", 7).unwrap();
        assert_eq!(graph.pending_len(), 1);
        assert!(seen.lock().is_empty());

        graph.flush();
        assert_eq!(graph.pending_len(), 0);
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn structural_preconditions() {
        let graph: FlowGraph<i64> = FlowGraph::new();
        graph.add_node("a", Echo).unwrap();
        assert_eq!(
            graph.add_node("a", Echo),
            Err(PipelineError::DuplicateNode("a".into()))
        );

        let link = Link::new("a", "out", "in", "missing");
        assert_eq!(
            graph.add_link(link.clone()),
            Err(PipelineError::UnknownNode("missing".into()))
        );
        assert_eq!(
            graph.remove_link(&link),
            Err(PipelineError::UnknownLink(link))
        );
        assert_eq!(
            graph.remove_node("missing"),
            Err(PipelineError::UnknownNode("missing".into()))
        );

        graph.add_node("b", Echo).unwrap();
        let ab = Link::new("a", "out", "in", "b");
        graph.add_link(ab.clone()).unwrap();
        assert_eq!(
            graph.add_link(ab.clone()),
            Err(PipelineError::DuplicateLink(ab))
        );
    }

    #[test]
    fn remove_node_purges_links_and_pending() {
        let graph = FlowGraph::new();
        let (sink, _) = sink();
        graph.add_node("a", Echo).unwrap();
        graph.add_node("b", sink).unwrap();
        graph.add_link(Link::new("a", "out", "in", "b")).unwrap();

        graph.ingest("a", "in", 1).unwrap();
        assert_eq!(graph.pending_len(), 1);

        graph.remove_node("a").unwrap();
        assert_eq!(graph.pending_len(), 0);
        assert!(graph.links().is_empty());
        assert_eq!(graph.nodes(), vec!["b".to_string()]);
    }

    #[test]
    fn fan_out_copies_to_every_link() {
        let graph = FlowGraph::new();
        let (sink_b, seen_b) = sink();
        let (sink_c, seen_c) = sink();
        graph.add_node("a", Echo).unwrap();
        graph.add_node("b", sink_b).unwrap();
        graph.add_node("c", sink_c).unwrap();
        graph.add_link(Link::new("a", "out", "in", "b")).unwrap();
        graph.add_link(Link::new("a", "out", "in", "c")).unwrap();

        graph.ingest("a", "in", 3).unwrap();
        graph.flush();
        assert_eq!(*seen_b.lock(), vec![3]);
        assert_eq!(*seen_c.lock(), vec![3]);
    }

    #[test]
    fn cycles_survive_flushes() {
        // a -> a: each flush processes exactly one generation
        let graph = FlowGraph::new();
        graph.add_node("a", Echo).unwrap();
        graph.add_link(Link::new("a", "out", "in", "a")).unwrap();

        graph.ingest("a", "in", 1).unwrap();
        for _ in 0..3 {
            assert_eq!(graph.flush(), 1);
            assert_eq!(graph.pending_len(), 1);
        }
    }

    #[test]
    fn drain_empties_an_acyclic_chain() {
        let graph = FlowGraph::new();
        let (sink, seen) = sink();
        graph.add_node("a", Echo).unwrap();
        graph.add_node("b", Echo).unwrap();
        graph.add_node("c", sink).unwrap();
        graph.add_link(Link::new("a", "out", "in", "b")).unwrap();
        graph.add_link(Link::new("b", "out", "in", "c")).unwrap();

        graph.ingest("a", "in", 9).unwrap();
        graph.drain();
        assert_eq!(graph.pending_len(), 0);
        assert_eq!(*seen.lock(), vec![9]);
    }

    #[test]
    fn closures_are_nodes() {
        let graph = FlowGraph::new();
        graph
            .add_node("double", |_input: &str, event: i64| {
                vec![("out".to_string(), event * 2)]
            })
            .unwrap();
        graph.ingest("double", "in", 21).unwrap();
        assert_eq!(graph.pending_len(), 1);
    }
}
