//! Market description, immutable for the lifetime of a session

use crate::error::CoreError;
use crate::numeric;
use crate::types::Direction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable market and its settlement arithmetic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Venue symbol, e.g. "BTCUSDT"
    pub symbol: String,
    /// Asset being traded
    pub base_asset: String,
    /// Asset prices are quoted in
    pub quote_asset: String,
    /// Settlement arithmetic
    pub direction: Direction,
    /// Contract or cash asset when it differs from base/quote
    pub contract_asset: Option<String>,
    /// Minimum price increment
    pub price_tick: Decimal,
    /// Minimum size increment
    pub lot_size: Decimal,
}

impl Market {
    /// Value of a fill of `size` at `price` in this market's arithmetic.
    pub fn value_of(&self, price: Decimal, size: Decimal) -> Result<Decimal, CoreError> {
        numeric::value_of(price, size, self.direction)
    }

    /// Average price implied by accumulated (size, value).
    pub fn avg_price(&self, size: Decimal, value: Decimal) -> Result<Decimal, CoreError> {
        numeric::avg_price(size, value, self.direction)
    }

    /// Asset pnl and fees settle in.
    #[must_use]
    pub fn settlement_asset(&self) -> &str {
        if let Some(contract) = &self.contract_asset {
            return contract;
        }
        match self.direction {
            Direction::Linear => &self.quote_asset,
            Direction::Inverse => &self.base_asset,
        }
    }
}
