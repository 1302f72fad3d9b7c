//! Market depth book patched by incremental updates

use crate::error::CoreError;
use crate::numeric;
use crate::sorted_map::SortedMap;
use crate::types::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One incremental change to a price level.
///
/// `size: None` removes the level; a zero size is treated the same way,
/// matching how venues encode removals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookRow {
    /// Side of the book to patch
    pub side: Side,
    /// Price level
    pub price: Decimal,
    /// Absolute size at the level, or removal
    pub size: Option<Decimal>,
}

/// Aggregated depth: price -> size per side, best price first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Orderbook {
    bids: SortedMap<Decimal, Decimal>,
    asks: SortedMap<Decimal, Decimal>,
}

impl Default for Orderbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Orderbook {
    /// Empty book.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bids: SortedMap::descending(),
            asks: SortedMap::ascending(),
        }
    }

    /// Bid side, best (highest) price first.
    #[must_use]
    pub const fn bids(&self) -> &SortedMap<Decimal, Decimal> {
        &self.bids
    }

    /// Ask side, best (lowest) price first.
    #[must_use]
    pub const fn asks(&self) -> &SortedMap<Decimal, Decimal> {
        &self.asks
    }

    /// Best bid price and size.
    #[must_use]
    pub fn best_bid(&self) -> Option<(Decimal, Decimal)> {
        self.bids.first().map(|(p, s)| (*p, *s))
    }

    /// Best ask price and size.
    #[must_use]
    pub fn best_ask(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().map(|(p, s)| (*p, *s))
    }

    /// Midpoint of the best bid and ask.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => numeric::div(bid + ask, Decimal::TWO).ok(),
            _ => None,
        }
    }

    /// Distance between the best ask and bid.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => Some(ask - bid),
            _ => None,
        }
    }

    /// Whether the best bid is at or above the best ask.
    #[must_use]
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Apply patch rows and return the inverse patch.
    ///
    /// Applying the returned rows restores the book to its prior state
    /// bit for bit. A patch that leaves the book crossed is an error; the
    /// rows are applied before the check, so the caller can use the inverse
    /// to roll back.
    pub fn apply(&mut self, rows: &[BookRow]) -> Result<Vec<BookRow>, CoreError> {
        let mut inverse = Vec::with_capacity(rows.len());
        for row in rows {
            let side_map = match row.side {
                Side::Buy => &mut self.bids,
                Side::Sell => &mut self.asks,
            };
            let prior = match row.size {
                Some(size) if !size.is_zero() => side_map.insert(row.price, size),
                _ => side_map.remove(&row.price),
            };
            inverse.push(BookRow {
                side: row.side,
                price: row.price,
                size: prior,
            });
        }
        inverse.reverse();

        if self.is_crossed() {
            return Err(CoreError::invalid_params(format!(
                "book crossed: bid {:?} >= ask {:?}",
                self.best_bid().map(|(p, _)| p),
                self.best_ask().map(|(p, _)| p)
            )));
        }
        Ok(inverse)
    }
}
