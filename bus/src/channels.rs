//! Channel-based pipeline with fan-out multiplexers
//!
//! The same graph surface as the flush-driven pipeline, executed over
//! bounded tokio channels. Every node output is wrapped in a multiplexer
//! task; links attach the target's input sender as a tap on the source
//! multiplexer. Bounded channels provide backpressure, so cyclic graphs
//! are safe. Sends to channels closed by a concurrent removal are
//! tolerated as no-ops.

use crate::node::{Link, Node, NodeId, PipelineError, PortId};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamMap;
use tracing::{debug, warn};

/// A running node: its channel maps and worker tasks.
pub struct Process<E> {
    inputs: FxHashMap<PortId, mpsc::Sender<E>>,
    outputs: FxHashMap<PortId, mpsc::Receiver<E>>,
    tasks: Vec<JoinHandle<()>>,
}

impl<E> Process<E> {
    /// Assemble a process from its parts.
    #[must_use]
    pub fn new(
        inputs: FxHashMap<PortId, mpsc::Sender<E>>,
        outputs: FxHashMap<PortId, mpsc::Receiver<E>>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            inputs,
            outputs,
            tasks,
        }
    }

    /// A process with no ports and no workers.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            inputs: FxHashMap::default(),
            outputs: FxHashMap::default(),
            tasks: Vec::new(),
        }
    }

    /// Sender for one input port.
    #[must_use]
    pub fn input(&self, port: &str) -> Option<mpsc::Sender<E>> {
        self.inputs.get(port).cloned()
    }

    /// Split into (input senders, output receivers, worker tasks).
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        FxHashMap<PortId, mpsc::Sender<E>>,
        FxHashMap<PortId, mpsc::Receiver<E>>,
        Vec<JoinHandle<()>>,
    ) {
        (self.inputs, self.outputs, self.tasks)
    }

    /// Close all inputs, let in-flight work drain, and wait for every
    /// worker to exit. Output channels close as a consequence.
    pub async fn shutdown(self) {
        let (inputs, outputs, tasks) = self.into_parts();
        drop(inputs);
        drop(outputs);
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Factory for a running [`Process`]; the asynchronous face of a node.
///
/// The graph initializes each node lazily, exactly once, on its first
/// structural use.
#[async_trait]
pub trait AsyncNode<E>: Send {
    /// Build the channels and spawn the workers.
    async fn initialize(&mut self, capacity: usize) -> Process<E>;
}

/// One cooperative task selecting across every input port.
///
/// Any-port fairness comes from the underlying stream multiplexing;
/// events of a single port keep their order, events of different ports
/// interleave arbitrarily.
pub fn alts_process<E, N>(
    node: N,
    inputs: &[PortId],
    outputs: &[PortId],
    capacity: usize,
) -> Process<E>
where
    E: Clone + Send + 'static,
    N: Node<E> + 'static,
{
    let mut input_txs = FxHashMap::default();
    let mut streams = StreamMap::new();
    for port in inputs {
        let (tx, rx) = mpsc::channel(capacity);
        input_txs.insert(port.clone(), tx);
        streams.insert(port.clone(), ReceiverStream::new(rx));
    }
    let (output_txs, output_rxs) = output_channels(outputs, capacity);

    let mut node = node;
    let task = tokio::spawn(async move {
        while let Some((port, event)) = streams.next().await {
            for (out, ev) in node.process(&port, event) {
                forward(&output_txs, &out, ev).await;
            }
        }
        // all inputs closed and drained; dropping the senders closes
        // the outputs
    });

    Process::new(input_txs, output_rxs, vec![task])
}

/// One task per input port over a shared node.
///
/// Per-input FIFO is preserved; cross-input ordering is not.
pub fn per_input_process<E, N>(
    node: N,
    inputs: &[PortId],
    outputs: &[PortId],
    capacity: usize,
) -> Process<E>
where
    E: Clone + Send + 'static,
    N: Node<E> + 'static,
{
    let shared = Arc::new(Mutex::new(node));
    let (output_txs, output_rxs) = output_channels(outputs, capacity);

    let mut input_txs = FxHashMap::default();
    let mut tasks = Vec::with_capacity(inputs.len());
    for port in inputs {
        let (tx, mut rx) = mpsc::channel::<E>(capacity);
        input_txs.insert(port.clone(), tx);
        let node = shared.clone();
        let outputs = output_txs.clone();
        let port = port.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let produced = { node.lock().await.process(&port, event) };
                for (out, ev) in produced {
                    forward(&outputs, &out, ev).await;
                }
            }
        }));
    }

    Process::new(input_txs, output_rxs, tasks)
}

fn output_channels<E>(
    outputs: &[PortId],
    capacity: usize,
) -> (
    FxHashMap<PortId, mpsc::Sender<E>>,
    FxHashMap<PortId, mpsc::Receiver<E>>,
) {
    let mut txs = FxHashMap::default();
    let mut rxs = FxHashMap::default();
    for port in outputs {
        let (tx, rx) = mpsc::channel(capacity);
        txs.insert(port.clone(), tx);
        rxs.insert(port.clone(), rx);
    }
    (txs, rxs)
}

async fn forward<E>(outputs: &FxHashMap<PortId, mpsc::Sender<E>>, port: &str, event: E) {
    if let Some(tx) = outputs.get(port) {
        // a closed channel means the consumer went away; drop the event
        let _ = tx.send(event).await;
    } else {
        debug!(port, "output for unknown port dropped");
    }
}

/// [`AsyncNode`] running a plain [`Node`] as an alts process.
pub struct AltsNode<N> {
    inner: Option<N>,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
}

impl<N> AltsNode<N> {
    /// Declare the node's ports.
    #[must_use]
    pub fn new(node: N, inputs: Vec<PortId>, outputs: Vec<PortId>) -> Self {
        Self {
            inner: Some(node),
            inputs,
            outputs,
        }
    }
}

#[async_trait]
impl<E, N> AsyncNode<E> for AltsNode<N>
where
    E: Clone + Send + 'static,
    N: Node<E> + 'static,
{
    async fn initialize(&mut self, capacity: usize) -> Process<E> {
        match self.inner.take() {
            Some(node) => alts_process(node, &self.inputs, &self.outputs, capacity),
            None => {
                warn!("node initialized twice");
                Process::idle()
            }
        }
    }
}

/// [`AsyncNode`] running a plain [`Node`] with one task per input.
pub struct PerInputNode<N> {
    inner: Option<N>,
    inputs: Vec<PortId>,
    outputs: Vec<PortId>,
}

impl<N> PerInputNode<N> {
    /// Declare the node's ports.
    #[must_use]
    pub fn new(node: N, inputs: Vec<PortId>, outputs: Vec<PortId>) -> Self {
        Self {
            inner: Some(node),
            inputs,
            outputs,
        }
    }
}

#[async_trait]
impl<E, N> AsyncNode<E> for PerInputNode<N>
where
    E: Clone + Send + 'static,
    N: Node<E> + 'static,
{
    async fn initialize(&mut self, capacity: usize) -> Process<E> {
        match self.inner.take() {
            Some(node) => per_input_process(node, &self.inputs, &self.outputs, capacity),
            None => {
                warn!("node initialized twice");
                Process::idle()
            }
        }
    }
}

struct Mux<E> {
    taps: Arc<Mutex<FxHashMap<Link, mpsc::Sender<E>>>>,
    task: JoinHandle<()>,
}

fn spawn_mux<E: Clone + Send + 'static>(mut rx: mpsc::Receiver<E>) -> Mux<E> {
    let taps: Arc<Mutex<FxHashMap<Link, mpsc::Sender<E>>>> =
        Arc::new(Mutex::new(FxHashMap::default()));
    let fan_out = taps.clone();
    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let senders: Vec<mpsc::Sender<E>> = fan_out.lock().await.values().cloned().collect();
            for tx in senders {
                // a detached or closed tap is skipped
                let _ = tx.send(event.clone()).await;
            }
        }
    });
    Mux { taps, task }
}

struct Running<E> {
    inputs: FxHashMap<PortId, mpsc::Sender<E>>,
    muxes: FxHashMap<PortId, Mux<E>>,
    tasks: Vec<JoinHandle<()>>,
}

struct NodeEntry<E> {
    factory: Box<dyn AsyncNode<E>>,
    running: Option<Running<E>>,
}

struct AsyncState<E> {
    nodes: FxHashMap<NodeId, NodeEntry<E>>,
    links: Vec<Link>,
}

/// Channel-based event-flow pipeline.
pub struct AsyncFlowGraph<E> {
    state: Mutex<AsyncState<E>>,
    capacity: usize,
}

impl<E: Clone + Send + 'static> AsyncFlowGraph<E> {
    /// Empty graph; `capacity` bounds every node input channel.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(AsyncState {
                nodes: FxHashMap::default(),
                links: Vec::new(),
            }),
            capacity,
        }
    }

    /// Register a node. It is materialized lazily on first use.
    pub async fn add_node(
        &self,
        id: impl Into<NodeId>,
        factory: impl AsyncNode<E> + 'static,
    ) -> Result<(), PipelineError> {
        let id = id.into();
        let mut state = self.state.lock().await;
        if state.nodes.contains_key(&id) {
            return Err(PipelineError::DuplicateNode(id));
        }
        state.nodes.insert(
            id,
            NodeEntry {
                factory: Box::new(factory),
                running: None,
            },
        );
        Ok(())
    }

    async fn ensure_running(
        state: &mut AsyncState<E>,
        id: &str,
        capacity: usize,
    ) -> Result<(), PipelineError> {
        let entry = state
            .nodes
            .get_mut(id)
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))?;
        if entry.running.is_none() {
            let process = entry.factory.initialize(capacity).await;
            let (inputs, outputs, tasks) = process.into_parts();
            let muxes = outputs
                .into_iter()
                .map(|(port, rx)| (port, spawn_mux(rx)))
                .collect();
            entry.running = Some(Running {
                inputs,
                muxes,
                tasks,
            });
            debug!(node = id, "node materialized");
        }
        Ok(())
    }

    /// Connect a source output to a target input.
    pub async fn add_link(&self, link: Link) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        for endpoint in [&link.from_node, &link.to_node] {
            if !state.nodes.contains_key(endpoint.as_str()) {
                return Err(PipelineError::UnknownNode(endpoint.clone()));
            }
        }
        if state.links.contains(&link) {
            return Err(PipelineError::DuplicateLink(link));
        }
        Self::ensure_running(&mut state, &link.from_node, self.capacity).await?;
        Self::ensure_running(&mut state, &link.to_node, self.capacity).await?;

        let target_input = state
            .nodes
            .get(&link.to_node)
            .and_then(|entry| entry.running.as_ref())
            .and_then(|running| running.inputs.get(&link.to_input))
            .cloned()
            .ok_or_else(|| PipelineError::UnknownPort {
                node: link.to_node.clone(),
                port: link.to_input.clone(),
            })?;
        let mux = state
            .nodes
            .get(&link.from_node)
            .and_then(|entry| entry.running.as_ref())
            .and_then(|running| running.muxes.get(&link.from_output))
            .ok_or_else(|| PipelineError::UnknownPort {
                node: link.from_node.clone(),
                port: link.from_output.clone(),
            })?;

        mux.taps.lock().await.insert(link.clone(), target_input);
        state.links.push(link);
        Ok(())
    }

    /// Detach a link.
    pub async fn remove_link(&self, link: &Link) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        let Some(position) = state.links.iter().position(|l| l == link) else {
            return Err(PipelineError::UnknownLink(link.clone()));
        };
        state.links.remove(position);
        if let Some(mux) = state
            .nodes
            .get(&link.from_node)
            .and_then(|entry| entry.running.as_ref())
            .and_then(|running| running.muxes.get(&link.from_output))
        {
            mux.taps.lock().await.remove(link);
        }
        Ok(())
    }

    /// Remove a node: detach every adjacent link, close its inputs, and
    /// wait for its workers and multiplexers to exit.
    pub async fn remove_node(&self, id: &str) -> Result<(), PipelineError> {
        let mut state = self.state.lock().await;
        if !state.nodes.contains_key(id) {
            return Err(PipelineError::UnknownNode(id.to_string()));
        }

        let (detached, kept): (Vec<Link>, Vec<Link>) =
            state.links.drain(..).partition(|l| l.touches(id));
        state.links = kept;

        // detach taps feeding this node, including self-links, so its
        // input channels actually close
        for link in &detached {
            if link.to_node == id {
                if let Some(mux) = state
                    .nodes
                    .get(&link.from_node)
                    .and_then(|entry| entry.running.as_ref())
                    .and_then(|running| running.muxes.get(&link.from_output))
                {
                    mux.taps.lock().await.remove(link);
                }
            }
        }

        let entry = state
            .nodes
            .remove(id)
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))?;
        drop(state);

        if let Some(running) = entry.running {
            drop(running.inputs);
            for task in running.tasks {
                let _ = task.await;
            }
            for (_, mux) in running.muxes {
                let _ = mux.task.await;
            }
        }
        Ok(())
    }

    /// Send one event to a node input; suspends while the channel is full.
    ///
    /// Racing a concurrent `remove_node` may drop the event; that is a
    /// tolerated no-op.
    pub async fn ingest(&self, id: &str, input: &str, event: E) -> Result<(), PipelineError> {
        let sender = {
            let mut state = self.state.lock().await;
            Self::ensure_running(&mut state, id, self.capacity).await?;
            state
                .nodes
                .get(id)
                .and_then(|entry| entry.running.as_ref())
                .and_then(|running| running.inputs.get(input))
                .cloned()
                .ok_or_else(|| PipelineError::UnknownPort {
                    node: id.to_string(),
                    port: input.to_string(),
                })?
        };
        if sender.send(event).await.is_err() {
            debug!(node = id, input, "event dropped on closed channel");
        }
        Ok(())
    }

    /// Ids of all nodes.
    pub async fn nodes(&self) -> Vec<NodeId> {
        let state = self.state.lock().await;
        let mut ids: Vec<NodeId> = state.nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All links.
    pub async fn links(&self) -> Vec<Link> {
        self.state.lock().await.links.clone()
    }

    /// Remove every node, waiting for all workers to exit.
    pub async fn shutdown(&self) {
        let ids = self.nodes().await;
        for id in ids {
            let _ = self.remove_node(&id).await;
        }
    }
}
