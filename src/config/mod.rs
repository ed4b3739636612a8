//! Configuration management for the bracket trader.
//!
//! Loads settings from `.env`, an optional `config.toml` and
//! `BRACKET__SECTION__FIELD` environment variables.

use crate::gateway::AssetClass;
use crate::sinks::AlertLevel;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Brokerage session settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Bot identity and trading limits
    #[serde(default)]
    pub bot: BotConfig,
    /// Signal pipeline window settings
    #[serde(default)]
    pub signal: SignalConfig,
    /// Historical bootstrap settings
    #[serde(default)]
    pub history: HistoryConfig,
    /// Monitoring and reconciliation settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// HTTP trade log sink
    #[serde(default)]
    pub trade_log: TradeLogConfig,
    /// Telegram notifications
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Session client id; one per engine instance
    #[serde(default = "default_client_id")]
    pub client_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_asset_class")]
    pub asset_class: AssetClass,
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,
    /// Bar size, e.g. "5 mins"
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Maximum open brackets for this strategy identity
    #[serde(default = "default_max_concurrent_trades")]
    pub max_concurrent_trades: usize,
    /// Quantity per bracket
    #[serde(default = "default_quantity")]
    pub default_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Rolling window size in bars
    #[serde(default = "default_historical_window")]
    pub historical_window: usize,
    /// Bars required before the strategy runs
    #[serde(default = "default_min_data_points")]
    pub min_data_points: usize,
    /// Fast moving average period of the built-in strategy
    #[serde(default = "default_fast_period")]
    pub fast_period: usize,
    /// Slow moving average period of the built-in strategy
    #[serde(default = "default_slow_period")]
    pub slow_period: usize,
    /// Take-profit distance in average bar ranges
    #[serde(default = "default_take_profit_ranges")]
    pub take_profit_ranges: Decimal,
    /// Stop-loss distance in average bar ranges
    #[serde(default = "default_stop_loss_ranges")]
    pub stop_loss_ranges: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Bars requested on startup
    #[serde(default = "default_bar_count")]
    pub bar_count: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed delay between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Which cancellation policy the monitor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelPolicyKind {
    None,
    StaleEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_cancel_policy")]
    pub cancel_policy: CancelPolicyKind,
    /// Age after which an unfilled entry is cancelled
    #[serde(default = "default_stale_entry_secs")]
    pub stale_entry_secs: u64,
    /// Interval between reconciliation passes
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLogConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Sent as `X-API-Key` when present
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    /// Notifications below this level are dropped
    #[serde(default = "default_min_level")]
    pub min_level: AlertLevel,
}

impl NotificationConfig {
    pub fn has_credentials(&self) -> bool {
        !self.telegram_bot_token.is_empty() && !self.telegram_chat_id.is_empty()
    }
}

// Default value functions
fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    7497 // paper trading port
}

fn default_client_id() -> u32 {
    1
}

fn default_bot_name() -> String {
    "bracket-trader".to_string()
}

fn default_symbol() -> String {
    "ES".to_string()
}

fn default_exchange() -> String {
    "CME".to_string()
}

fn default_asset_class() -> AssetClass {
    AssetClass::Future
}

fn default_strategy_name() -> String {
    "ma_cross".to_string()
}

fn default_timeframe() -> String {
    "5 mins".to_string()
}

fn default_max_concurrent_trades() -> usize {
    1
}

fn default_quantity() -> Decimal {
    Decimal::ONE
}

fn default_historical_window() -> usize {
    200
}

fn default_min_data_points() -> usize {
    50
}

fn default_fast_period() -> usize {
    10
}

fn default_slow_period() -> usize {
    30
}

fn default_take_profit_ranges() -> Decimal {
    Decimal::new(20, 1) // 2.0
}

fn default_stop_loss_ranges() -> Decimal {
    Decimal::new(10, 1) // 1.0
}

fn default_bar_count() -> usize {
    200
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_cancel_policy() -> CancelPolicyKind {
    CancelPolicyKind::StaleEntry
}

fn default_stale_entry_secs() -> u64 {
    300
}

fn default_sync_interval_secs() -> u64 {
    30
}

fn default_heartbeat_secs() -> u64 {
    60
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_min_level() -> AlertLevel {
    AlertLevel::Info
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("BRACKET"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    ///
    /// Missing Telegram credentials disable notifications instead of failing.
    pub fn validate(&mut self) -> Result<()> {
        anyhow::ensure!(
            self.bot.max_concurrent_trades >= 1,
            "max_concurrent_trades must be >= 1"
        );

        anyhow::ensure!(
            self.bot.default_quantity > Decimal::ZERO,
            "default_quantity must be positive"
        );

        anyhow::ensure!(
            !self.bot.symbol.trim().is_empty() && !self.bot.strategy_name.trim().is_empty(),
            "symbol and strategy_name must be set"
        );

        anyhow::ensure!(
            self.signal.min_data_points >= 1
                && self.signal.min_data_points <= self.signal.historical_window,
            "min_data_points must be >= 1 and <= historical_window"
        );

        anyhow::ensure!(
            self.signal.fast_period >= 1 && self.signal.fast_period < self.signal.slow_period,
            "fast_period must be >= 1 and < slow_period"
        );

        anyhow::ensure!(self.history.max_retries >= 1, "history.max_retries must be >= 1");

        anyhow::ensure!(
            self.monitoring.sync_interval_secs >= 1 && self.monitoring.heartbeat_secs >= 1,
            "monitoring intervals must be >= 1 second"
        );

        if self.notifications.enabled && !self.notifications.has_credentials() {
            warn!("Telegram credentials missing, notifications disabled");
            self.notifications.enabled = false;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            bot: BotConfig::default(),
            signal: SignalConfig::default(),
            history: HistoryConfig::default(),
            monitoring: MonitoringConfig::default(),
            trade_log: TradeLogConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            client_id: default_client_id(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            symbol: default_symbol(),
            exchange: default_exchange(),
            asset_class: default_asset_class(),
            strategy_name: default_strategy_name(),
            timeframe: default_timeframe(),
            max_concurrent_trades: default_max_concurrent_trades(),
            default_quantity: default_quantity(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            historical_window: default_historical_window(),
            min_data_points: default_min_data_points(),
            fast_period: default_fast_period(),
            slow_period: default_slow_period(),
            take_profit_ranges: default_take_profit_ranges(),
            stop_loss_ranges: default_stop_loss_ranges(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            bar_count: default_bar_count(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            cancel_policy: default_cancel_policy(),
            stale_entry_secs: default_stale_entry_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            heartbeat_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for TradeLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base_url: default_api_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            min_level: default_min_level(),
        }
    }
}
