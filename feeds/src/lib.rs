//! Resilient WebSocket transport and topic fan-out
//!
//! A command-queue worker owns each connection: dialing, ping/pong
//! liveness, bounded-rate reconnection, and token-gated teardown. On top
//! of it, a topic hub parses venue frames and fans payloads out to
//! per-subscriber channels, replaying the subscription set on reconnect.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod fanout;
pub mod resilient;

pub use error::FeedError;
pub use fanout::{HubConfig, SubscribeFrameFn, TopicHub, TopicParser};
pub use resilient::{ResilientSocket, RetryDelayFn, SocketCallbacks, SocketConfig, UrlFn};
