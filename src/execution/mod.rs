//! Bracket order execution, monitoring and reconciliation.
//!
//! - `engine`: signal-to-bracket placement and lifecycle handling
//! - `monitor`: tick-driven cancel policy evaluation
//! - `reconcile`: trade counting and drift repair against the gateway
//!
//! All three operate on one [`OrderBook`] guarded by a single mutex, so a
//! monitoring pass, a lifecycle event and a sync never interleave.

mod book;
mod engine;
mod error;
mod identity;
mod lifecycle;
mod monitor;
mod reconcile;

#[cfg(test)]
mod test_support;

pub use book::{group_key, BracketGroup, OrderBook, OrderRole, Position, TrackedOrder};
pub use engine::{BookSnapshot, EngineSettings, OrderEngine};
pub use error::{ExecutionError, MonitorError, ReconciliationError};
pub use identity::StrategyIdentity;
pub use lifecycle::{transition, Transition};
pub use monitor::{CancelPolicy, StaleEntryPolicy, TickOutcome};
pub use reconcile::{active_groups, IsolationSnapshot, SyncReport, TradeCount};
