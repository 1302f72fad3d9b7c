//! Reconfigurable event-flow pipeline
//!
//! A directed graph of named nodes with typed ports, mutable at runtime.
//! Two executions share the surface: the flush-driven [`FlowGraph`] for
//! single-generation synchronous routing, and the channel-based
//! [`AsyncFlowGraph`] for cooperative execution with backpressure.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod channels;
pub mod node;
pub mod sync;

pub use channels::{
    alts_process, per_input_process, AltsNode, AsyncFlowGraph, AsyncNode, PerInputNode, Process,
};
pub use node::{Link, Node, NodeId, PipelineError, PortId};
pub use sync::FlowGraph;
