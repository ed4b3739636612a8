//! Shared utilities.

pub mod decimal;

pub use decimal::round_to_tick;
