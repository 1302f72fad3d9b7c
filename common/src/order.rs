//! Order lifecycle: parameters, execution state machine, forward equivalence

use crate::error::{CoreError, ErrorCategory};
use crate::market::Market;
use crate::trade::{Fee, Trade};
use crate::types::{Actor, Side, TimeInForce};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Execution status of an order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Submitted, not yet acknowledged by the venue
    InFlight,
    /// Acknowledged and resting
    Created,
    /// Some size executed, some remaining
    PartiallyFilled,
    /// Entire size executed
    Filled,
    /// Withdrawn before completion
    Cancelled,
    /// Refused by the venue
    Rejected,
}

impl ExecutionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// `PartiallyFilled -> PartiallyFilled` is the only legal self-loop;
    /// repeated partial fills advance the filled size without changing
    /// status.
    #[must_use]
    pub const fn can_transition(self, next: Self) -> bool {
        match self {
            Self::InFlight => matches!(
                next,
                Self::Created | Self::PartiallyFilled | Self::Filled | Self::Rejected
            ),
            Self::Created => {
                matches!(next, Self::PartiallyFilled | Self::Filled | Self::Cancelled)
            }
            Self::PartiallyFilled => {
                matches!(next, Self::PartiallyFilled | Self::Filled | Self::Cancelled)
            }
            Self::Filled | Self::Cancelled | Self::Rejected => false,
        }
    }
}

/// Status of a cancellation request, tracked separately from execution.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelStatus {
    /// Request submitted, not yet acknowledged
    InFlight,
    /// Cancellation accepted (terminal)
    Created,
    /// Cancellation refused
    Rejected,
}

const fn cancel_rank(status: Option<CancelStatus>) -> u8 {
    match status {
        None => 0,
        Some(CancelStatus::InFlight) => 1,
        Some(CancelStatus::Created | CancelStatus::Rejected) => 2,
    }
}

/// Whether `to` is strictly ahead of `from` along the legal cancellation
/// chain `none -> in_flight -> {created, rejected}`.
#[must_use]
pub const fn is_forward_cancellation(from: Option<CancelStatus>, to: Option<CancelStatus>) -> bool {
    cancel_rank(to) > cancel_rank(from)
}

/// User-supplied order parameters, immutable after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderParams {
    /// Resting policy
    pub time_in_force: TimeInForce,
    /// Total size to execute
    pub size: Decimal,
    /// Side of the order
    pub side: Side,
    /// Requested liquidity role; providers may infer one when absent
    pub actor: Option<Actor>,
    /// Limit price; required for makers
    pub price: Option<Decimal>,
}

/// Execution progress of an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Current lifecycle status
    pub status: ExecutionStatus,
    /// Side, always equal to the parameters' side
    pub side: Side,
    /// Cumulative executed size
    pub size: Decimal,
    /// Cumulative executed value in settlement arithmetic
    pub value: Decimal,
    /// Average execution price over all fills
    pub price: Option<Decimal>,
    /// Accumulated fee over all fills
    pub fee: Option<Fee>,
}

impl Execution {
    /// Fresh in-flight execution with nothing filled.
    #[must_use]
    pub fn new(side: Side) -> Self {
        Self {
            status: ExecutionStatus::InFlight,
            side,
            size: Decimal::ZERO,
            value: Decimal::ZERO,
            price: None,
            fee: None,
        }
    }
}

/// Whether `next` is a forward-equivalent snapshot of `prev`.
///
/// The transition must be legal, and either the snapshot reached
/// cancellation without inventing fills, the statuses differ outside the
/// partial-fill self-loop, or the filled size strictly grew.
#[must_use]
pub fn is_forward(prev: &Execution, next: &Execution) -> bool {
    if !prev.status.can_transition(next.status) {
        return false;
    }
    (next.status == ExecutionStatus::Cancelled && next.size <= prev.size)
        || !(prev.status == ExecutionStatus::PartiallyFilled
            && next.status == ExecutionStatus::PartiallyFilled)
        || next.size > prev.size
}

/// Whether two snapshots disagree without either being ahead.
///
/// Symmetric. A diverged pair signals corruption of the source of truth
/// and must be surfaced to the caller, not silently reconciled.
#[must_use]
pub fn is_diverged(a: &Execution, b: &Execution) -> bool {
    !is_forward(a, b)
        && !is_forward(b, a)
        && (a.size != b.size || a.status != b.status)
}

/// A client order: parameters plus execution progress.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client-assigned identifier
    pub id: String,
    /// Market the order targets
    pub symbol: String,
    /// Immutable request parameters
    pub params: OrderParams,
    /// Mutable execution progress
    pub execution: Execution,
    /// Cancellation request status, if one was issued
    pub cancellation: Option<CancelStatus>,
}

impl Order {
    /// Create an in-flight order from parameters.
    #[must_use]
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, params: OrderParams) -> Self {
        let execution = Execution::new(params.side);
        Self {
            id: id.into(),
            symbol: symbol.into(),
            params,
            execution,
            cancellation: None,
        }
    }

    /// Size still unexecuted.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.params.size - self.execution.size
    }

    /// Whether the execution reached a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.execution.status.is_terminal()
    }

    /// Move the execution status, validating the transition.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), CoreError> {
        if !self.execution.status.can_transition(next) {
            return Err(CoreError::invalid_params(format!(
                "order {}: illegal transition {:?} -> {next:?}",
                self.id, self.execution.status
            )));
        }
        debug!(order = %self.id, from = ?self.execution.status, to = ?next, "transition");
        self.execution.status = next;
        Ok(())
    }

    /// Apply an execution trade to this order.
    ///
    /// The trade must be on the order's side and must fit in the remaining
    /// size. Size, value, average price, and fee accumulate; the status
    /// moves to `Filled` exactly when the full size is executed.
    pub fn ingest_trade(&mut self, trade: &Trade, market: &Market) -> Result<(), CoreError> {
        let tx = &trade.transaction;
        if tx.side != self.params.side {
            return Err(CoreError::invalid_params(format!(
                "order {}: trade {} side {:?} does not match {:?}",
                self.id, trade.id, tx.side, self.params.side
            )));
        }
        if tx.size.is_zero() || self.is_terminal() || tx.size > self.remaining() {
            return Err(CoreError::invalid_params(format!(
                "order {}: trade {} size {} does not fit remaining {}",
                self.id,
                trade.id,
                tx.size,
                self.remaining()
            )));
        }

        let new_size = self.execution.size + tx.size;
        let new_value = self.execution.value + trade.value(market.direction)?;
        let new_status = if new_size == self.params.size {
            ExecutionStatus::Filled
        } else {
            ExecutionStatus::PartiallyFilled
        };
        self.transition(new_status)?;
        self.execution.size = new_size;
        self.execution.value = new_value;
        self.execution.price = Some(market.avg_price(new_size, new_value)?);
        if let Some(fee) = &trade.fee {
            match &mut self.execution.fee {
                Some(acc) => acc.accumulate(fee),
                none => *none = Some(fee.clone()),
            }
        }
        Ok(())
    }
}

/// An order snapshot paired with the failure category, if the operation
/// that produced it failed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    /// Order state after the operation
    pub order: Order,
    /// Category of the failure, when the operation was refused
    pub error: Option<ErrorCategory>,
}

impl OrderUpdate {
    /// Update for a successful operation.
    #[must_use]
    pub const fn ok(order: Order) -> Self {
        Self { order, error: None }
    }

    /// Update for a refused operation.
    #[must_use]
    pub const fn rejected(order: Order, category: ErrorCategory) -> Self {
        Self {
            order,
            error: Some(category),
        }
    }
}
