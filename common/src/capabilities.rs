//! Capability traits exported to collaborators
//!
//! Protocol support is capability-typed: a provider implements whichever
//! subset of these traits it can honor. Streaming capabilities hand events
//! to a caller-supplied channel and return a [`StreamHandle`] owning the
//! venue-side resources.

use crate::candle::Candle;
use crate::error::CoreError;
use crate::order::{Order, OrderUpdate};
use crate::orderbook::Orderbook;
use crate::position::Position;
use crate::trade::{Balance, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tokio::sync::mpsc;

/// Owned handle to a running stream.
///
/// Stopping (or dropping) the handle releases venue-side resources; when
/// the stream was opened with `close_on_stop`, the provider also closes
/// the output channel by dropping its sender.
pub struct StreamHandle {
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl StreamHandle {
    /// Wrap a stop callback.
    #[must_use]
    pub fn new(on_stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_stop: Some(Box::new(on_stop)),
        }
    }

    /// Stop the stream now.
    pub fn stop(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(stop) = self.on_stop.take() {
            stop();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("stopped", &self.on_stop.is_none())
            .finish()
    }
}

/// Opening, cancelling, and querying orders at a venue.
#[async_trait]
pub trait OrderExecution: Send + Sync {
    /// Submit orders; each result carries the order state and, on refusal,
    /// an error category.
    async fn open(&self, orders: Vec<Order>) -> Vec<OrderUpdate>;

    /// Request cancellation of orders by id.
    async fn cancel(&self, symbol: &str, order_ids: Vec<String>) -> Vec<OrderUpdate>;

    /// Fetch the venue's view of one order.
    async fn get(&self, symbol: &str, order_id: &str) -> OrderUpdate;

    /// Fetch the execution trades of one order.
    async fn get_trades(&self, symbol: &str, order_id: &str) -> Result<Vec<Trade>, CoreError>;
}

/// Synchronous candle queries.
pub trait GetCandles: Send + Sync {
    /// Candles of `timeframe` covering `[from, to)`.
    fn get_candles(
        &self,
        symbol: &str,
        timeframe: Duration,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CoreError>;
}

/// Synchronous depth queries.
pub trait GetOrderbook: Send + Sync {
    /// Current depth snapshot.
    fn get_orderbook(&self, symbol: &str) -> Result<Orderbook, CoreError>;
}

/// Live candle streaming.
#[async_trait]
pub trait StreamCandles: Send + Sync {
    /// Stream candle updates into `out`.
    async fn stream_candles(
        &self,
        symbol: &str,
        timeframe: Duration,
        out: mpsc::Sender<Candle>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Live depth streaming.
#[async_trait]
pub trait StreamOrderbook: Send + Sync {
    /// Stream depth snapshots into `out`.
    async fn stream_orderbook(
        &self,
        symbol: &str,
        out: mpsc::Sender<Orderbook>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Live trade streaming.
#[async_trait]
pub trait StreamTrades: Send + Sync {
    /// Stream public trades into `out`.
    async fn stream_trades(
        &self,
        symbol: &str,
        out: mpsc::Sender<Trade>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Live order-update streaming.
#[async_trait]
pub trait StreamOrderUpdates: Send + Sync {
    /// Stream own-order updates into `out`.
    async fn stream_order_updates(
        &self,
        out: mpsc::Sender<OrderUpdate>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Live position streaming.
#[async_trait]
pub trait StreamPositions: Send + Sync {
    /// Stream position updates into `out`.
    async fn stream_positions(
        &self,
        out: mpsc::Sender<Position>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Live balance streaming.
#[async_trait]
pub trait StreamBalances: Send + Sync {
    /// Stream balance updates into `out`.
    async fn stream_balances(
        &self,
        out: mpsc::Sender<Balance>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}

/// Replay of historical trades.
#[async_trait]
pub trait StreamHistoricalTrades: Send + Sync {
    /// Stream trades of `[from, to)` into `out` in timestamp order.
    async fn stream_historical_trades(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        out: mpsc::Sender<Trade>,
        close_on_stop: bool,
    ) -> Result<StreamHandle, CoreError>;
}
