//! Decimal arithmetic utilities for price handling.

use rust_decimal::{Decimal, RoundingStrategy};

/// Round to the nearest multiple of `tick_size`, halves away from zero.
///
/// Returns `value` unchanged when the tick size is zero or the result
/// would overflow.
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    value
        .checked_div(tick_size)
        .map(|ticks| ticks.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|ticks| ticks.checked_mul(tick_size))
        .unwrap_or(value)
}

/// Shift a price by a whole number of ticks, then snap it to the grid.
pub fn offset_ticks(value: Decimal, tick_size: Decimal, ticks: i64) -> Decimal {
    let shifted = tick_size
        .checked_mul(Decimal::from(ticks))
        .and_then(|offset| value.checked_add(offset))
        .unwrap_or(value);
    round_to_tick(shifted, tick_size)
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator.checked_div(denominator).unwrap_or(Decimal::ZERO)
    }
}

/// Arithmetic mean, zero for an empty slice.
pub fn mean(values: &[Decimal]) -> Decimal {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
        .map(|sum| safe_div(sum, Decimal::from(values.len())))
        .unwrap_or(Decimal::ZERO)
}
