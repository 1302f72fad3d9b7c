//! Transactions, trades, fees, and balances

use crate::error::CoreError;
use crate::numeric;
use crate::types::{Actor, Direction, Side};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A priced exchange of size between two parties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Execution price, strictly positive
    pub price: Decimal,
    /// Executed size, non-negative
    pub size: Decimal,
    /// Side of the aggressing party
    pub side: Side,
    /// Liquidity role of the order this transaction filled
    pub actor: Actor,
}

impl Transaction {
    /// Settlement value in the given market arithmetic.
    pub fn value(&self, direction: Direction) -> Result<Decimal, CoreError> {
        numeric::value_of(self.price, self.size, direction)
    }

    /// Size signed by side: sells are negative.
    #[must_use]
    pub fn signed_size(&self) -> Decimal {
        self.size * self.side.sign()
    }
}

/// Fee attributed to a fill.
///
/// `balance_change = gross * rate`; the rate and the change always carry
/// the same sign, so a deduction is expressed as a negative rate and a
/// rebate as a positive one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fee {
    /// Signed fee rate applied to the gross value
    pub rate: Decimal,
    /// Signed change to the settlement balance
    pub balance_change: Decimal,
    /// Asset the change applies to, when known
    pub asset: Option<String>,
}

impl Fee {
    /// Fee resulting from applying a signed `rate` to a `gross` value.
    #[must_use]
    pub fn on_gross(gross: Decimal, rate: Decimal, asset: Option<String>) -> Self {
        Self {
            rate,
            balance_change: gross * rate,
            asset,
        }
    }

    /// Fold another fee into this one, summing balance changes.
    ///
    /// The rate of the most recent component is kept; accumulated fees on
    /// an order always come from a single schedule.
    pub fn accumulate(&mut self, other: &Self) {
        self.balance_change += other.balance_change;
        self.rate = other.rate;
        if other.asset.is_some() {
            self.asset.clone_from(&other.asset);
        }
    }
}

/// A unique execution event on a market.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Venue-unique identifier within the symbol's stream
    pub id: String,
    /// Market symbol the trade printed on
    pub symbol: String,
    /// Execution instant
    pub at: DateTime<Utc>,
    /// Priced exchange
    #[serde(flatten)]
    pub transaction: Transaction,
    /// Fee attributed to this trade, if any
    pub fee: Option<Fee>,
}

impl Trade {
    /// Settlement value in the given market arithmetic.
    pub fn value(&self, direction: Direction) -> Result<Decimal, CoreError> {
        self.transaction.value(direction)
    }
}

/// Available funds in one asset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Asset identifier
    pub asset: String,
    /// Spendable amount
    pub available: Decimal,
}

impl Balance {
    /// Apply a signed change.
    ///
    /// Without margin the balance may not go negative; the change is
    /// rejected and the balance left untouched.
    pub fn apply(&mut self, change: Decimal, margin_enabled: bool) -> Result<(), CoreError> {
        let next = self.available + change;
        if next < Decimal::ZERO && !margin_enabled {
            return Err(CoreError::invalid_params(format!(
                "balance of {} would go negative: {next}",
                self.asset
            )));
        }
        self.available = next;
        Ok(())
    }
}

/// Balances per asset, mutated by fee and trade ingestion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    balances: FxHashMap<String, Balance>,
    /// Whether balances may go negative
    pub margin_enabled: bool,
}

impl Ledger {
    /// Empty ledger.
    #[must_use]
    pub fn new(margin_enabled: bool) -> Self {
        Self {
            balances: FxHashMap::default(),
            margin_enabled,
        }
    }

    /// Current balance of an asset.
    #[must_use]
    pub fn balance(&self, asset: &str) -> Option<&Balance> {
        self.balances.get(asset)
    }

    /// Apply a signed change to an asset, creating the balance when new.
    pub fn apply(&mut self, asset: &str, change: Decimal) -> Result<(), CoreError> {
        let margin = self.margin_enabled;
        self.balances
            .entry(asset.to_string())
            .or_insert_with(|| Balance {
                asset: asset.to_string(),
                available: Decimal::ZERO,
            })
            .apply(change, margin)
    }

    /// Apply a trade's attributed fee.
    pub fn apply_fee(&mut self, fee: &Fee, default_asset: &str) -> Result<(), CoreError> {
        let asset = fee.asset.as_deref().unwrap_or(default_asset);
        self.apply(asset, fee.balance_change)
    }
}
