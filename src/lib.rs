//! # Bracket Trader
//!
//! Order execution and reconciliation engine for bracket orders (entry,
//! take-profit and stop-loss legs) placed through a brokerage gateway.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `gateway`: Brokerage gateway contract, events and the paper session
//! - `signal`: Strategy contract, signal pipeline and historical bootstrap
//! - `execution`: Bracket placement, monitoring and reconciliation
//! - `sinks`: Trade log and Telegram notification delivery
//! - `runtime`: Strategy session runner wiring everything together
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod execution;
pub mod gateway;
pub mod runtime;
pub mod signal;
pub mod sinks;
pub mod utils;

pub use config::Config;
