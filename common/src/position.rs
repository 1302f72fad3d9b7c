//! Trade-driven position accounting for linear and inverse markets

use crate::error::CoreError;
use crate::market::Market;
use crate::numeric;
use crate::trade::Trade;
use crate::types::{Direction, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Open exposure of a position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Direction of the exposure
    pub side: Side,
    /// Open size, strictly positive
    pub size: Decimal,
    /// Average entry price
    pub price: Decimal,
    /// Entry value in settlement arithmetic
    pub value: Decimal,
}

/// Mark-to-market performance of an open entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    /// Unrealized pnl at the mark price
    pub pnl: Decimal,
    /// pnl relative to the entry value
    pub pnl_rate: Decimal,
    /// Entry value plus pnl
    pub equity: Decimal,
    /// Price the entry was marked at
    pub mark_price: Decimal,
}

/// Unrealized pnl of an entry marked at `at`.
///
/// Linear pnl settles in the quote asset, inverse pnl in the base asset;
/// the sign is decided by the entry side.
pub fn pnl(entry: &Entry, at: Decimal, direction: Direction) -> Result<Decimal, CoreError> {
    match (direction, entry.side) {
        (Direction::Linear, Side::Buy) => Ok((at - entry.price) * entry.size),
        (Direction::Linear, Side::Sell) => Ok((entry.price - at) * entry.size),
        (Direction::Inverse, Side::Buy) => {
            Ok(numeric::div(entry.size, entry.price)? - numeric::div(entry.size, at)?)
        }
        (Direction::Inverse, Side::Sell) => {
            Ok(numeric::div(entry.size, at)? - numeric::div(entry.size, entry.price)?)
        }
    }
}

/// Entry value plus unrealized pnl at `at`.
pub fn equity(entry: &Entry, at: Decimal, direction: Direction) -> Result<Decimal, CoreError> {
    Ok(entry.value + pnl(entry, at, direction)?)
}

/// A position on one market, folded from its trade stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Market symbol
    pub symbol: String,
    /// Open exposure; absent when flat
    pub entry: Option<Entry>,
    /// Mark-to-market state; absent when flat or never marked
    pub performance: Option<Performance>,
}

impl Position {
    /// A flat position.
    #[must_use]
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            entry: None,
            performance: None,
        }
    }

    /// Fold one trade into the position.
    ///
    /// Returns the signed settlement-balance change: entries consume value,
    /// exits release value plus realized pnl. The trade price becomes the
    /// new mark price.
    pub fn apply_trade(&mut self, trade: &Trade, market: &Market) -> Result<Decimal, CoreError> {
        let tx = &trade.transaction;
        if tx.size.is_zero() {
            return Err(CoreError::invalid_params(format!(
                "trade {} has zero size",
                trade.id
            )));
        }
        let direction = market.direction;
        let trade_value = trade.value(direction)?;

        let change = match self.entry.take() {
            // open
            None => {
                self.entry = Some(Entry {
                    side: tx.side,
                    size: tx.size,
                    price: tx.price,
                    value: trade_value,
                });
                -trade_value
            }
            // increase
            Some(entry) if entry.side == tx.side => {
                let size = entry.size + tx.size;
                let value = entry.value + trade_value;
                let price = market.avg_price(size, value)?;
                self.entry = Some(Entry {
                    side: entry.side,
                    size,
                    price,
                    value,
                });
                -trade_value
            }
            // decrease
            Some(entry) if tx.size < entry.size => {
                let consumed = Entry {
                    side: entry.side,
                    size: tx.size,
                    price: entry.price,
                    value: market.value_of(entry.price, tx.size)?,
                };
                let remainder_size = entry.size - tx.size;
                self.entry = Some(Entry {
                    side: entry.side,
                    size: remainder_size,
                    price: entry.price,
                    value: market.value_of(entry.price, remainder_size)?,
                });
                consumed.value + pnl(&consumed, tx.price, direction)?
            }
            // close
            Some(entry) if tx.size == entry.size => equity(&entry, tx.price, direction)?,
            // flip
            Some(entry) => {
                let released = equity(&entry, tx.price, direction)?;
                let opened_size = tx.size - entry.size;
                let opened_value = market.value_of(tx.price, opened_size)?;
                self.entry = Some(Entry {
                    side: tx.side,
                    size: opened_size,
                    price: tx.price,
                    value: opened_value,
                });
                released - opened_value
            }
        };

        debug!(symbol = %self.symbol, trade = %trade.id, %change, "position updated");
        self.mark(tx.price, market)?;
        Ok(change)
    }

    /// Refresh performance against a mark price.
    pub fn mark(&mut self, price: Decimal, market: &Market) -> Result<(), CoreError> {
        match &self.entry {
            None => self.performance = None,
            Some(entry) => {
                let pnl = pnl(entry, price, market.direction)?;
                self.performance = Some(Performance {
                    pnl,
                    pnl_rate: numeric::div(pnl, entry.value)?,
                    equity: entry.value + pnl,
                    mark_price: price,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Transaction;
    use crate::types::Actor;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn market(direction: Direction) -> Market {
        Market {
            symbol: "BTCUSD".into(),
            base_asset: "BTC".into(),
            quote_asset: "USD".into(),
            direction,
            contract_asset: None,
            price_tick: dec!(0.5),
            lot_size: dec!(1),
        }
    }

    fn trade(id: &str, price: Decimal, size: Decimal, side: Side) -> Trade {
        Trade {
            id: id.into(),
            symbol: "BTCUSD".into(),
            at: Utc::now(),
            transaction: Transaction {
                price,
                size,
                side,
                actor: Actor::Taker,
            },
            fee: None,
        }
    }

    #[test]
    fn linear_open_increase_decrease_close() {
        let m = market(Direction::Linear);
        let mut p = Position::flat("BTCUSD");
        let mut total = Decimal::ZERO;

        total += p
            .apply_trade(&trade("t1", dec!(100), dec!(2), Side::Buy), &m)
            .unwrap();
        assert_eq!(p.entry.as_ref().unwrap().size, dec!(2));
        assert_eq!(total, dec!(-200));

        total += p
            .apply_trade(&trade("t2", dec!(110), dec!(2), Side::Buy), &m)
            .unwrap();
        let entry = p.entry.as_ref().unwrap();
        assert_eq!(entry.size, dec!(4));
        assert_eq!(entry.price, dec!(105));
        assert_eq!(total, dec!(-420));

        total += p
            .apply_trade(&trade("t3", dec!(120), dec!(1), Side::Sell), &m)
            .unwrap();
        let entry = p.entry.as_ref().unwrap();
        assert_eq!(entry.size, dec!(3));
        assert_eq!(entry.value, dec!(315));

        total += p
            .apply_trade(&trade("t4", dec!(120), dec!(3), Side::Sell), &m)
            .unwrap();
        assert!(p.entry.is_none());
        assert!(p.performance.is_none());

        // flat again: net balance change equals realized pnl,
        // 4 bought at avg 105, 4 sold at 120 -> +60
        assert_eq!(total, dec!(60));
    }

    #[test]
    fn linear_short_profits_when_price_drops() {
        let entry = Entry {
            side: Side::Sell,
            size: dec!(2),
            price: dec!(100),
            value: dec!(200),
        };
        assert_eq!(pnl(&entry, dec!(90), Direction::Linear).unwrap(), dec!(20));
        assert_eq!(
            equity(&entry, dec!(90), Direction::Linear).unwrap(),
            dec!(220)
        );
    }

    #[test]
    fn inverse_flip_releases_equity_and_opens_short() {
        // long 100 contracts at 10000, taker sell 150 at 15000
        let m = market(Direction::Inverse);
        let mut p = Position::flat("BTCUSD");

        let open = p
            .apply_trade(&trade("t1", dec!(10000), dec!(100), Side::Buy), &m)
            .unwrap();
        assert_eq!(open, dec!(-0.01));

        let change = p
            .apply_trade(&trade("t2", dec!(15000), dec!(150), Side::Sell), &m)
            .unwrap();

        // equity(long, 15000) = 0.01 + (100/10000 - 100/15000),
        // minus the value of the new 50-contract short at 15000
        assert_eq!(change, dec!(0.01));

        let entry = p.entry.as_ref().unwrap();
        assert_eq!(entry.side, Side::Sell);
        assert_eq!(entry.size, dec!(50));
        assert_eq!(entry.price, dec!(15000));
    }

    #[test]
    fn inverse_round_trip_sums_to_realized_pnl() {
        let m = market(Direction::Inverse);
        let mut p = Position::flat("BTCUSD");
        let mut total = Decimal::ZERO;

        total += p
            .apply_trade(&trade("t1", dec!(10000), dec!(100), Side::Buy), &m)
            .unwrap();
        total += p
            .apply_trade(&trade("t2", dec!(12500), dec!(100), Side::Sell), &m)
            .unwrap();
        assert!(p.entry.is_none());

        // 100/10000 - 100/12500 = 0.002 base of profit
        assert_eq!(total, dec!(0.002));
    }

    #[test]
    fn mark_refreshes_performance() {
        let m = market(Direction::Linear);
        let mut p = Position::flat("BTCUSD");
        p.apply_trade(&trade("t1", dec!(100), dec!(2), Side::Buy), &m)
            .unwrap();

        p.mark(dec!(130), &m).unwrap();
        let perf = p.performance.as_ref().unwrap();
        assert_eq!(perf.pnl, dec!(60));
        assert_eq!(perf.equity, dec!(260));
        assert_eq!(perf.pnl_rate, dec!(0.3));
        assert_eq!(perf.mark_price, dec!(130));
    }
}
