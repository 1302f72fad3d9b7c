//! Decimal arithmetic helpers for order, position, and fee math
//!
//! Every divide in the toolkit goes through [`div`] so that rounding is
//! explicit and uniform. Floating point is never used on these paths.

use crate::error::CoreError;
use crate::types::Direction;
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept after a division.
pub const SCALE: u32 = 25;

/// Rounding applied after a division.
pub const ROUNDING: RoundingStrategy = RoundingStrategy::MidpointNearestEven;

/// Divide with explicit rounding to [`SCALE`] places.
///
/// Division by zero is reported as `invalid_params` rather than panicking.
pub fn div(numerator: Decimal, denominator: Decimal) -> Result<Decimal, CoreError> {
    numerator
        .checked_div(denominator)
        .map(|q| q.round_dp_with_strategy(SCALE, ROUNDING))
        .ok_or_else(|| CoreError::invalid_params(format!("division of {numerator} by zero")))
}

/// Value of a fill in the market's settlement arithmetic.
///
/// Linear markets settle in the quote asset (`size * price`); inverse
/// markets settle in the base asset (`size / price`).
pub fn value_of(price: Decimal, size: Decimal, direction: Direction) -> Result<Decimal, CoreError> {
    match direction {
        Direction::Linear => Ok(size * price),
        Direction::Inverse => div(size, price),
    }
}

/// Average entry price implied by an accumulated (size, value) pair.
pub fn avg_price(
    total_size: Decimal,
    total_value: Decimal,
    direction: Direction,
) -> Result<Decimal, CoreError> {
    match direction {
        Direction::Linear => div(total_value, total_size),
        Direction::Inverse => div(total_size, total_value),
    }
}
