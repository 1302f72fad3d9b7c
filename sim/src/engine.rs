//! Simulator state and command handling

use chrono::{DateTime, Utc};
use common::{
    Actor, CancelStatus, CoreError, ErrorCategory, ExecutionStatus, Fee, Market, Order,
    OrderUpdate, Side, Trade, Transaction,
};
use lob::LimitOrderBook;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Simulator configuration, fixed for a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Market being simulated
    pub market: Market,
    /// Fee rate charged on maker fills
    pub maker_fee: Decimal,
    /// Fee rate charged on taker fills
    pub taker_fee: Decimal,
}

/// Deterministic matching engine over a historical trade stream.
///
/// The whole state serializes as a snapshot; replaying the same command
/// stream from the same snapshot reproduces the same updates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Simulator {
    config: SimConfig,
    orders: FxHashMap<String, Order>,
    book: LimitOrderBook,
    taker_buys: VecDeque<String>,
    taker_sells: VecDeque<String>,
    latest_trade: Option<Trade>,
    timestamp: Option<DateTime<Utc>>,
}

impl Simulator {
    /// Fresh simulator with no orders and no trades seen.
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            orders: FxHashMap::default(),
            book: LimitOrderBook::new(),
            taker_buys: VecDeque::new(),
            taker_sells: VecDeque::new(),
            latest_trade: None,
            timestamp: None,
        }
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Timestamp of the most recently ingested trade.
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Most recently ingested trade.
    #[must_use]
    pub const fn latest_trade(&self) -> Option<&Trade> {
        self.latest_trade.as_ref()
    }

    /// Current state of an order by id.
    #[must_use]
    pub fn order(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    /// The resting maker book.
    #[must_use]
    pub const fn book(&self) -> &LimitOrderBook {
        &self.book
    }

    /// A maker price must rest on the posting side of the latest trade.
    ///
    /// Equality is allowed only against a print on the opposite side; a
    /// same-side print at the same price means the order would have taken.
    /// Before any trade is seen there is no reference and every price is
    /// accepted.
    fn maker_price_posts(&self, side: Side, price: Decimal) -> bool {
        let Some(latest) = &self.latest_trade else {
            return true;
        };
        let last_price = latest.transaction.price;
        match (side, latest.transaction.side) {
            (Side::Buy, Side::Buy) => price < last_price,
            (Side::Buy, Side::Sell) => price <= last_price,
            (Side::Sell, Side::Sell) => price > last_price,
            (Side::Sell, Side::Buy) => price >= last_price,
        }
    }

    fn queue_mut(&mut self, side: Side) -> &mut VecDeque<String> {
        match side {
            Side::Buy => &mut self.taker_buys,
            Side::Sell => &mut self.taker_sells,
        }
    }

    fn is_queued_taker(&self, id: &str) -> bool {
        self.taker_buys.iter().any(|q| q == id) || self.taker_sells.iter().any(|q| q == id)
    }

    /// Accept or reject a batch of new orders.
    ///
    /// Makers must post relative to the latest trade; takers join the back
    /// of their side's queue. An unspecified actor is placed as a maker
    /// when its price posts and falls back to taker otherwise. Rejections
    /// come back as updates with `Rejected` status and an error category.
    pub fn open_orders(&mut self, orders: Vec<Order>) -> Vec<OrderUpdate> {
        let mut updates = Vec::with_capacity(orders.len());
        for mut order in orders {
            if self.orders.contains_key(&order.id) {
                if order.transition(ExecutionStatus::Rejected).is_err() {
                    order.execution.status = ExecutionStatus::Rejected;
                }
                updates.push(OrderUpdate::rejected(order, ErrorCategory::InvalidParams));
                continue;
            }

            let posts = order
                .params
                .price
                .map(|price| self.maker_price_posts(order.params.side, price));
            let role = match (order.params.actor, posts) {
                (Some(Actor::Maker), Some(true)) => Ok(Actor::Maker),
                (Some(Actor::Maker), _) => Err(CoreError::invalid_params(format!(
                    "order {} does not post at {:?}",
                    order.id, order.params.price
                ))),
                (Some(Actor::Taker), _) => Ok(Actor::Taker),
                (None, Some(true)) => Ok(Actor::Maker),
                (None, _) => Ok(Actor::Taker),
            };

            match role {
                Err(err) => {
                    if order.transition(ExecutionStatus::Rejected).is_err() {
                        order.execution.status = ExecutionStatus::Rejected;
                    }
                    debug!(order = %order.id, %err, "open rejected");
                    updates.push(OrderUpdate::rejected(order, err.category));
                }
                Ok(role) => {
                    order.params.actor = Some(role);
                    if let Err(err) = order.transition(ExecutionStatus::Created) {
                        updates.push(OrderUpdate::rejected(order, err.category));
                        continue;
                    }
                    let accepted = match role {
                        Actor::Maker => self.book.add_order(order.clone()),
                        Actor::Taker => {
                            self.queue_mut(order.params.side).push_back(order.id.clone());
                            Ok(())
                        }
                    };
                    match accepted {
                        Ok(()) => {
                            self.orders.insert(order.id.clone(), order.clone());
                            updates.push(OrderUpdate::ok(order));
                        }
                        Err(err) => {
                            order.execution.status = ExecutionStatus::Rejected;
                            updates.push(OrderUpdate::rejected(order, err.category));
                        }
                    }
                }
            }
        }
        updates
    }

    /// Cancel a batch of orders.
    ///
    /// Unknown ids come back `not_found` with a rejected cancellation.
    /// Queued takers cannot be withdrawn once enqueued.
    pub fn cancel_orders(&mut self, orders: Vec<Order>) -> Vec<OrderUpdate> {
        let mut updates = Vec::with_capacity(orders.len());
        for requested in orders {
            let Some(stored) = self.orders.get(&requested.id).cloned() else {
                let mut echo = requested;
                echo.cancellation = Some(CancelStatus::Rejected);
                updates.push(OrderUpdate::rejected(echo, ErrorCategory::NotFound));
                continue;
            };

            if self.is_queued_taker(&stored.id) {
                let mut echo = stored;
                echo.cancellation = Some(CancelStatus::Rejected);
                updates.push(OrderUpdate::rejected(echo, ErrorCategory::Unsupported));
                continue;
            }

            let mut cancelled = stored;
            if cancelled.is_terminal() {
                cancelled.cancellation = Some(CancelStatus::Rejected);
                updates.push(OrderUpdate::rejected(cancelled, ErrorCategory::InvalidParams));
                continue;
            }

            if let Some(price) = cancelled.params.price {
                // the order may have been consumed off the book already
                let _ = self
                    .book
                    .remove_order(cancelled.params.side, price, &cancelled.id);
            }
            if let Err(err) = cancelled.transition(ExecutionStatus::Cancelled) {
                cancelled.cancellation = Some(CancelStatus::Rejected);
                updates.push(OrderUpdate::rejected(cancelled, err.category));
                continue;
            }
            cancelled.cancellation = Some(CancelStatus::Created);
            self.orders.insert(cancelled.id.clone(), cancelled.clone());
            updates.push(OrderUpdate::ok(cancelled));
        }
        updates
    }

    /// Drive the simulation with a batch of historical trades.
    ///
    /// Each trade advances the clock, fills every resting maker its price
    /// reaches, then feeds remaining volume to the taker queue of its side.
    pub fn ingest_trades(&mut self, trades: Vec<Trade>) -> Vec<OrderUpdate> {
        let mut updates = Vec::new();
        for trade in trades {
            self.timestamp = Some(trade.at);
            self.latest_trade = Some(trade.clone());
            self.fill_makers(&trade, &mut updates);
            self.fill_takers(&trade, &mut updates);
        }
        updates
    }

    fn execution_trade(
        &self,
        source: &Trade,
        order: &Order,
        price: Decimal,
        size: Decimal,
        fee_rate: Decimal,
        actor: Actor,
    ) -> Result<Trade, CoreError> {
        let value = self.config.market.value_of(price, size)?;
        let fee = Fee::on_gross(
            value,
            -fee_rate,
            Some(self.config.market.settlement_asset().to_string()),
        );
        Ok(Trade {
            id: format!("{}:{}", source.id, order.id),
            symbol: order.symbol.clone(),
            at: source.at,
            transaction: Transaction {
                price,
                size,
                side: order.params.side,
                actor,
            },
            fee: Some(fee),
        })
    }

    fn fill_makers(&mut self, trade: &Trade, updates: &mut Vec<OrderUpdate>) {
        // a print at the maker's own price counts as reaching it
        let (touched, remaining) = self.book.touch(trade, false);
        self.book = remaining;
        for touched_order in touched {
            let Some(order) = self.orders.get(&touched_order.id).cloned() else {
                warn!(order = %touched_order.id, "touched order missing from index");
                continue;
            };
            let Some(price) = order.params.price else {
                warn!(order = %order.id, "resting order without price");
                continue;
            };
            let size = order.remaining();
            match self.execution_trade(trade, &order, price, size, self.config.maker_fee, Actor::Maker)
            {
                Ok(execution) => self.apply_fill(order, &execution, updates),
                Err(err) => warn!(order = %order.id, %err, "maker fill dropped"),
            }
        }
    }

    fn fill_takers(&mut self, trade: &Trade, updates: &mut Vec<OrderUpdate>) {
        let side = trade.transaction.side;
        let mut left = trade.transaction.size;
        while left > Decimal::ZERO {
            let Some(front) = self.queue_mut(side).front().cloned() else {
                break;
            };
            let Some(order) = self.orders.get(&front).cloned() else {
                self.queue_mut(side).pop_front();
                continue;
            };
            let fill = order.remaining().min(left);
            if fill.is_zero() {
                self.queue_mut(side).pop_front();
                continue;
            }
            let price = trade.transaction.price;
            match self.execution_trade(trade, &order, price, fill, self.config.taker_fee, Actor::Taker)
            {
                Ok(execution) => self.apply_fill(order, &execution, updates),
                Err(err) => {
                    warn!(order = %order.id, %err, "taker fill dropped");
                    self.queue_mut(side).pop_front();
                    continue;
                }
            }
            left -= fill;
            let done = self
                .orders
                .get(&front)
                .map_or(true, Order::is_terminal);
            if done {
                self.queue_mut(side).pop_front();
            } else {
                break;
            }
        }
    }

    fn apply_fill(&mut self, mut order: Order, execution: &Trade, updates: &mut Vec<OrderUpdate>) {
        match order.ingest_trade(execution, &self.config.market) {
            Ok(()) => {
                self.orders.insert(order.id.clone(), order.clone());
                updates.push(OrderUpdate::ok(order));
            }
            Err(err) => warn!(order = %order.id, %err, "fill rejected by order"),
        }
    }
}
