//! Price-level book of the caller's own maker orders

use common::{CoreError, Order, Side, SortedMap, Trade};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use tracing::debug;

/// Orders resting at one price, keyed by order id.
pub type PriceLevel = FxHashMap<String, Order>;

/// Resting maker orders grouped by price level.
///
/// Every order placed here is a maker with an explicit price. The book
/// performs no matching of its own; [`LimitOrderBook::touch`] only
/// identifies which orders a trade would have consumed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitOrderBook {
    bids: SortedMap<Decimal, PriceLevel>,
    asks: SortedMap<Decimal, PriceLevel>,
}

impl Default for LimitOrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitOrderBook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: SortedMap::descending(),
            asks: SortedMap::ascending(),
        }
    }

    fn side_map(&self, side: Side) -> &SortedMap<Decimal, PriceLevel> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut SortedMap<Decimal, PriceLevel> {
        match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        }
    }

    /// Number of resting orders across all levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bids.iter().map(|(_, l)| l.len()).sum::<usize>()
            + self.asks.iter().map(|(_, l)| l.len()).sum::<usize>()
    }

    /// Whether no orders rest in the book.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Bid levels, best (highest) price first.
    #[must_use]
    pub const fn bids(&self) -> &SortedMap<Decimal, PriceLevel> {
        &self.bids
    }

    /// Ask levels, best (lowest) price first.
    #[must_use]
    pub const fn asks(&self) -> &SortedMap<Decimal, PriceLevel> {
        &self.asks
    }

    /// Whether an order with this id rests at (side, price).
    #[must_use]
    pub fn contains(&self, side: Side, price: Decimal, id: &str) -> bool {
        self.side_map(side)
            .get(&price)
            .is_some_and(|level| level.contains_key(id))
    }

    /// Insert a maker order at its price level.
    ///
    /// The order must carry a price; an id already resting at that level
    /// is refused.
    pub fn add_order(&mut self, order: Order) -> Result<(), CoreError> {
        let Some(price) = order.params.price else {
            return Err(CoreError::invalid_params(format!(
                "order {} has no price to rest at",
                order.id
            )));
        };
        let side = order.params.side;
        let level = self
            .side_map_mut(side)
            .get_or_insert_with(price, PriceLevel::default);
        if level.contains_key(&order.id) {
            return Err(CoreError::invalid_params(format!(
                "order {} already rests at {price}",
                order.id
            )));
        }
        debug!(order = %order.id, %price, ?side, "resting order added");
        level.insert(order.id.clone(), order);
        Ok(())
    }

    /// Remove an order from its price level, dropping the level if it
    /// becomes empty.
    pub fn remove_order(
        &mut self,
        side: Side,
        price: Decimal,
        id: &str,
    ) -> Result<Order, CoreError> {
        let map = self.side_map_mut(side);
        let Some(level) = map.get_mut(&price) else {
            return Err(CoreError::not_found(format!("no level at {price}")));
        };
        let Some(order) = level.remove(id) else {
            return Err(CoreError::not_found(format!("order {id} not at {price}")));
        };
        if level.is_empty() {
            map.remove(&price);
        }
        Ok(order)
    }

    /// Orders a trade at this price would have consumed, plus the book
    /// without those levels.
    ///
    /// A buy trade consumes resting asks below its price, a sell trade
    /// consumes resting bids above it. With `pass_through` the level equal
    /// to the trade price is spared: the resting order is modeled at the
    /// back of the queue, so a print at its own price does not reach it.
    /// Touched orders are returned best level first, id order within a
    /// level.
    #[must_use]
    pub fn touch(&self, trade: &Trade, pass_through: bool) -> (Vec<Order>, Self) {
        let price = trade.transaction.price;
        let opposite = trade.transaction.side.opposite();
        let touched_prices: Vec<Decimal> = {
            let map = self.side_map(opposite);
            let bound = if pass_through {
                Bound::Excluded(&price)
            } else {
                Bound::Included(&price)
            };
            let range = match opposite {
                // resting asks below the buy print
                Side::Sell => map.subrange(Bound::Unbounded, bound),
                // resting bids above the sell print
                Side::Buy => map.subrange(bound, Bound::Unbounded),
            };
            range.map(|(p, _)| *p).collect()
        };

        let mut remaining = self.clone();
        let mut touched = Vec::new();
        for level_price in touched_prices {
            if let Some(level) = remaining.side_map_mut(opposite).remove(&level_price) {
                let mut orders: Vec<Order> = level.into_values().collect();
                orders.sort_by(|a, b| a.id.cmp(&b.id));
                touched.extend(orders);
            }
        }
        (touched, remaining)
    }
}
