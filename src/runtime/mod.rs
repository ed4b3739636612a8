//! Process wiring: builds sinks and policies from configuration and runs
//! one strategy session end to end.

mod runner;

pub use runner::{RunnerStats, StrategyRunner};

use crate::config::{CancelPolicyKind, Config, MonitoringConfig};
use crate::execution::{CancelPolicy, StaleEntryPolicy};
use crate::sinks::{HttpTradeLog, NoopNotifier, NoopTradeLog, Notifier, TelegramNotifier, TradeLogSink};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Cancel policy selected by the monitoring section.
pub fn build_cancel_policy(config: &MonitoringConfig) -> Option<Arc<dyn CancelPolicy>> {
    match config.cancel_policy {
        CancelPolicyKind::None => None,
        CancelPolicyKind::StaleEntry => Some(Arc::new(StaleEntryPolicy::from_secs(
            config.stale_entry_secs,
        ))),
    }
}

/// Trade log and notifier for the configured destinations.
pub fn build_sinks(config: &Config) -> Result<(Arc<dyn TradeLogSink>, Arc<dyn Notifier>)> {
    let trade_log: Arc<dyn TradeLogSink> = if config.trade_log.enabled {
        info!(url = %config.trade_log.api_base_url, "📒 Trade log enabled");
        Arc::new(HttpTradeLog::new(&config.trade_log)?)
    } else {
        Arc::new(NoopTradeLog)
    };

    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        info!(min_level = %config.notifications.min_level, "🔔 Telegram notifications enabled");
        Arc::new(TelegramNotifier::new(&config.notifications, &config.bot.name))
    } else {
        Arc::new(NoopNotifier)
    };

    Ok((trade_log, notifier))
}
