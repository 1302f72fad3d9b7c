//! Deterministic matching simulator driven by historical trades
//!
//! Maker orders rest in a limit book and fill when a print reaches their
//! level; taker orders queue FIFO per side and consume incoming trade
//! volume. Given the same open-order and trade streams, two runs emit
//! identical update sequences.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod engine;

pub use engine::{SimConfig, Simulator};
