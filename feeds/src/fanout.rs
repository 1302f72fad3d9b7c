//! Topic-keyed fan-out over a resilient socket
//!
//! Inbound frames are parsed to (topic, payload); payloads are forwarded
//! to per-subscriber bounded channels keyed by topic. The hub tracks the
//! subscribed topic set, emits the venue's subscribe/unsubscribe frames,
//! and replays the whole set on every reconnect.

use crate::error::FeedError;
use crate::resilient::{ResilientSocket, SocketCallbacks, SocketConfig};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Extracts (topic, payload) from a venue frame; `None` for frames that
/// are not topic data (acks, heartbeats).
pub type TopicParser = Arc<dyn Fn(&Message) -> Option<(String, Value)> + Send + Sync>;

/// Builds the venue frame subscribing (`true`) or unsubscribing
/// (`false`) a set of topics.
pub type SubscribeFrameFn = Arc<dyn Fn(&[String], bool) -> Message + Send + Sync>;

/// Hub configuration.
#[derive(Clone)]
pub struct HubConfig {
    /// Connection behavior
    pub socket: SocketConfig,
    /// Frame-to-topic parser
    pub parser: TopicParser,
    /// Venue subscribe/unsubscribe frame builder
    pub subscribe_frame: SubscribeFrameFn,
    /// Capacity of each subscriber channel
    pub subscriber_capacity: usize,
}

type Subscribers = Arc<DashMap<String, Vec<mpsc::Sender<Value>>>>;

/// Per-subscriber fan-out of venue topics.
pub struct TopicHub {
    socket: ResilientSocket,
    topics: Arc<Mutex<BTreeSet<String>>>,
    subscribers: Subscribers,
    subscribe_frame: SubscribeFrameFn,
    subscriber_capacity: usize,
}

impl TopicHub {
    /// Connect the underlying socket and start routing.
    ///
    /// `on_connection_error` reports transport failures; retries are
    /// handled underneath.
    #[must_use]
    pub fn connect(
        config: HubConfig,
        on_connection_error: Arc<dyn Fn(FeedError) + Send + Sync>,
    ) -> Self {
        let topics = Arc::new(Mutex::new(BTreeSet::new()));
        let subscribers: Subscribers = Arc::new(DashMap::new());

        // the replay callback needs the socket that is being constructed
        let socket_cell: Arc<OnceLock<ResilientSocket>> = Arc::new(OnceLock::new());

        let parser = config.parser.clone();
        let route_to = subscribers.clone();
        let on_message: Arc<dyn Fn(Message) + Send + Sync> = Arc::new(move |message| {
            if let Some((topic, payload)) = parser(&message) {
                route(&route_to, &topic, payload);
            }
        });

        let replay_topics = topics.clone();
        let replay_cell = socket_cell.clone();
        let replay_frame = config.subscribe_frame.clone();
        let on_new_connection: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            let pending: Vec<String> = replay_topics.lock().iter().cloned().collect();
            if pending.is_empty() {
                return;
            }
            let Some(socket) = replay_cell.get().cloned() else {
                return;
            };
            let frame = replay_frame(&pending, true);
            debug!(topics = pending.len(), "replaying subscriptions");
            tokio::spawn(async move {
                if let Err(err) = socket.send(frame).await {
                    warn!(%err, "subscription replay failed");
                }
            });
        });

        let socket = ResilientSocket::connect(
            config.socket,
            SocketCallbacks {
                on_new_connection,
                on_message,
                on_connection_error,
            },
        );
        let _ = socket_cell.set(socket.clone());

        Self {
            socket,
            topics,
            subscribers,
            subscribe_frame: config.subscribe_frame,
            subscriber_capacity: config.subscriber_capacity,
        }
    }

    /// The underlying connection.
    #[must_use]
    pub const fn socket(&self) -> &ResilientSocket {
        &self.socket
    }

    /// Currently subscribed topics.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    /// Subscribe to a topic, returning this subscriber's payload channel.
    ///
    /// The venue frame is sent only when the topic is new to the hub;
    /// additional subscribers share the venue subscription.
    pub async fn subscribe(&self, topic: impl Into<String>) -> Result<mpsc::Receiver<Value>, FeedError> {
        let topic = topic.into();
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribers.entry(topic.clone()).or_default().push(tx);

        let newly_added = self.topics.lock().insert(topic.clone());
        if newly_added {
            let frame = (self.subscribe_frame)(&[topic], true);
            // tolerated while disconnected: the reconnect replay covers it
            match self.socket.send(frame).await {
                Ok(()) | Err(FeedError::NotConnected) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(rx)
    }

    /// Drop a topic: every subscriber channel closes and the venue frame
    /// is sent.
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), FeedError> {
        let was_subscribed = self.topics.lock().remove(topic);
        self.subscribers.remove(topic);
        if was_subscribed {
            let frame = (self.subscribe_frame)(&[topic.to_string()], false);
            match self.socket.send(frame).await {
                Ok(()) | Err(FeedError::NotConnected) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Close the connection; all subscriber channels end once routing
    /// stops.
    pub async fn close(&self) {
        self.socket.close().await;
        self.subscribers.clear();
    }
}

/// Forward a payload to every subscriber of a topic.
///
/// Full channels are skipped (the subscriber lags, the socket must not
/// block); closed channels are pruned.
fn route(subscribers: &Subscribers, topic: &str, payload: Value) {
    let Some(mut entry) = subscribers.get_mut(topic) else {
        return;
    };
    entry.retain(|tx| match tx.try_send(payload.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(topic, "subscriber lagging, payload skipped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}
