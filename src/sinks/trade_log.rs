//! Trade log sink: flat records POSTed to an analytics service.
//!
//! Calls are fire-and-forget. A failed POST is logged and dropped so
//! logging can never block or fail a trading decision.

use super::SinkError;
use crate::config::TradeLogConfig;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Emitted for every trade signal, placed or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignalRecord {
    pub bot_name: String,
    pub symbol: String,
    pub strategy_name: String,
    pub timeframe: String,
    pub action: String,
    pub entry_price: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub confidence: String,
    pub indicators: BTreeMap<String, Decimal>,
    pub current_active_trades: usize,
    pub max_concurrent_trades: usize,
    pub order_placed: bool,
    pub rejection_reason: Option<String>,
    pub signal_time: DateTime<Utc>,
}

/// Emitted once per successfully placed bracket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderPlacedRecord {
    pub bot_name: String,
    pub symbol: String,
    pub strategy_name: String,
    pub strategy_tag: String,
    pub action: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub parent_order_id: u64,
    pub take_profit_order_id: u64,
    pub stop_loss_order_id: u64,
    pub placed_at: DateTime<Utc>,
}

/// Emitted when a leg fills.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutedTradeRecord {
    pub bot_name: String,
    pub symbol: String,
    pub strategy_name: String,
    pub order_id: u64,
    pub parent_order_id: u64,
    pub order_purpose: String,
    pub action: String,
    pub quantity: Decimal,
    pub fill_price: Option<Decimal>,
    pub status: String,
    pub realized_pnl: Option<Decimal>,
    pub executed_at: DateTime<Utc>,
}

/// Emitted when a leg is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderCancellationRecord {
    pub bot_name: String,
    pub symbol: String,
    pub strategy_name: String,
    pub order_id: u64,
    pub parent_order_id: u64,
    pub order_purpose: String,
    /// `strategy_cancel` for policy cancellations, `broker_cancel` otherwise
    pub reason: String,
    pub status: String,
    pub cancelled_at: DateTime<Utc>,
}

/// Destination for trade lifecycle records.
#[cfg_attr(test, mockall::automock)]
pub trait TradeLogSink: Send + Sync {
    fn trade_signal(&self, record: TradeSignalRecord);

    fn order_placed(&self, record: OrderPlacedRecord);

    fn executed_trade(&self, record: ExecutedTradeRecord);

    fn order_cancelled(&self, record: OrderCancellationRecord);
}

/// Sink that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTradeLog;

impl TradeLogSink for NoopTradeLog {
    fn trade_signal(&self, _record: TradeSignalRecord) {}

    fn order_placed(&self, _record: OrderPlacedRecord) {}

    fn executed_trade(&self, _record: ExecutedTradeRecord) {}

    fn order_cancelled(&self, _record: OrderCancellationRecord) {}
}

pub const TRADE_SIGNALS_PATH: &str = "/trades/trade-signals";
pub const ORDERS_PATH: &str = "/trades/orders";
pub const EXECUTED_TRADES_PATH: &str = "/trades/executed-trades";
pub const ORDER_CANCELLATIONS_PATH: &str = "/trades/order-cancellations";

/// HTTP trade log client.
#[derive(Debug, Clone)]
pub struct HttpTradeLog {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTradeLog {
    /// Create a client from the trade log section.
    pub fn new(config: &TradeLogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build trade log HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    /// POST a record and wait for the response.
    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<(), SinkError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }

    fn spawn_post<T: Serialize + Send + Sync + 'static>(&self, path: &'static str, body: T) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(%path, "No runtime available, trade log record dropped");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            if let Err(e) = this.post(path, &body).await {
                debug!(%path, error = %e, "Trade log POST failed");
            }
        });
    }
}

impl TradeLogSink for HttpTradeLog {
    fn trade_signal(&self, record: TradeSignalRecord) {
        self.spawn_post(TRADE_SIGNALS_PATH, record);
    }

    fn order_placed(&self, record: OrderPlacedRecord) {
        self.spawn_post(ORDERS_PATH, record);
    }

    fn executed_trade(&self, record: ExecutedTradeRecord) {
        self.spawn_post(EXECUTED_TRADES_PATH, record);
    }

    fn order_cancelled(&self, record: OrderCancellationRecord) {
        self.spawn_post(ORDER_CANCELLATIONS_PATH, record);
    }
}
