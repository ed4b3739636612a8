//! Outbound sinks for trade records and alerts.
//!
//! - `trade_log`: HTTP analytics service receiving signal/order/fill/cancel records
//! - `notify`: Telegram alerts for exits, connection changes and critical errors
//!
//! Both are fire-and-forget; failures never reach the trading path.

mod notify;
mod trade_log;

pub use notify::*;
pub use trade_log::*;

use thiserror::Error;

/// Errors from a sink delivery attempt.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),
}
