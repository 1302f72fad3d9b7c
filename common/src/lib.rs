//! Domain model and shared containers for the trading toolkit
//!
//! Decimal numerics, the sorted key-value container, the market/trade/
//! order/position/candle/orderbook model, the error taxonomy, and the
//! capability traits collaborators implement.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod candle;
pub mod capabilities;
pub mod error;
pub mod market;
pub mod numeric;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod sorted_map;
pub mod trade;
pub mod types;

pub use candle::{Candle, CandleChart};
pub use capabilities::{
    GetCandles, GetOrderbook, OrderExecution, StreamBalances, StreamCandles, StreamHandle,
    StreamHistoricalTrades, StreamOrderUpdates, StreamOrderbook, StreamPositions, StreamTrades,
};
pub use error::{CoreError, ErrorCategory};
pub use market::Market;
pub use order::{
    is_diverged, is_forward, is_forward_cancellation, CancelStatus, Execution, ExecutionStatus,
    Order, OrderParams, OrderUpdate,
};
pub use orderbook::{BookRow, Orderbook};
pub use position::{equity, pnl, Entry, Performance, Position};
pub use sorted_map::{NearestTest, SortOrder, SortedMap};
pub use trade::{Balance, Fee, Ledger, Trade, Transaction};
pub use types::{Actor, Direction, Side, TimeInForce};
