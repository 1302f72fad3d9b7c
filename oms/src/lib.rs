//! Order-consistency reconciliation
//!
//! Venue updates arrive out of order, duplicated, or with the remote
//! execution ahead of the locally-known trades. The reconciler folds each
//! update into a locally-owned order, tracks which execution trades have
//! been ingested, remembers the most forward remote snapshot, and surfaces
//! the orders whose local and remote views disagree.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod reconcile;

pub use reconcile::{OrderIndex, ReconOrder, VenueUpdate};
