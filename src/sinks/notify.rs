//! Alert notifications delivered through Telegram.

use super::SinkError;
use crate::config::NotificationConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Severity of a notification. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "ℹ️",
            AlertLevel::Warning => "⚠️",
            AlertLevel::Error => "❌",
            AlertLevel::Critical => "🚨",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "INFO"),
            AlertLevel::Warning => write!(f, "WARNING"),
            AlertLevel::Error => write!(f, "ERROR"),
            AlertLevel::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A single alert.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: AlertLevel,
    pub title: String,
    pub message: Option<String>,
    pub symbol: Option<String>,
    pub strategy: Option<String>,
    pub order_id: Option<u64>,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub error: Option<String>,
    pub time: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: AlertLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: None,
            symbol: None,
            strategy: None,
            order_id: None,
            price: None,
            quantity: None,
            pnl: None,
            error: None,
            time: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn with_strategy(mut self, strategy: &str) -> Self {
        self.strategy = Some(strategy.to_string());
        self
    }

    pub fn with_order(mut self, order_id: u64, price: Option<Decimal>, quantity: Decimal) -> Self {
        self.order_id = Some(order_id);
        self.price = price;
        self.quantity = Some(quantity);
        self
    }

    pub fn with_pnl(mut self, pnl: Option<Decimal>) -> Self {
        self.pnl = pnl;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Destination for alerts.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that drops every alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, notification: Notification) {
        debug!(level = %notification.level, title = %notification.title, "Notification suppressed");
    }
}

/// Escape characters that Telegram's Markdown mode treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Telegram bot notifier.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
    min_level: AlertLevel,
    bot_name: String,
}

impl TelegramNotifier {
    pub fn new(config: &NotificationConfig, bot_name: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
            min_level: config.min_level,
            bot_name: bot_name.to_string(),
        }
    }

    /// Point the notifier at a different Bot API host.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn accepts(&self, level: AlertLevel) -> bool {
        level >= self.min_level
    }

    /// Render a notification as a Markdown message.
    pub fn format_message(&self, notification: &Notification) -> String {
        let mut lines = vec![format!(
            "{} *{}*",
            notification.level.emoji(),
            escape_markdown(&notification.title)
        )];

        if let Some(message) = &notification.message {
            lines.push(escape_markdown(message));
        }
        lines.push(String::new());
        lines.push(format!("*Bot:* {}", escape_markdown(&self.bot_name)));
        if let Some(symbol) = &notification.symbol {
            lines.push(format!("*Symbol:* {}", escape_markdown(symbol)));
        }
        if let Some(strategy) = &notification.strategy {
            lines.push(format!("*Strategy:* {}", escape_markdown(strategy)));
        }
        lines.push(format!(
            "*Time:* {}",
            notification.time.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        if let Some(order_id) = notification.order_id {
            lines.push(format!("*Order ID:* {}", order_id));
        }
        if let Some(price) = notification.price {
            lines.push(format!("*Price:* {}", price));
        }
        if let Some(quantity) = notification.quantity {
            lines.push(format!("*Quantity:* {}", quantity));
        }
        if let Some(pnl) = notification.pnl {
            let sign = if pnl >= Decimal::ZERO { "+" } else { "" };
            lines.push(format!("*P&L:* {}{}", sign, pnl));
        }
        if let Some(error) = &notification.error {
            lines.push(format!("*Error:* {}", escape_markdown(error)));
        }

        lines.join("\n")
    }

    /// Deliver a notification and wait for the Bot API response.
    pub async fn send(&self, notification: &Notification) -> Result<(), SinkError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let params = serde_json::json!({
            "chat_id": self.chat_id,
            "text": self.format_message(notification),
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        let response = self.client.post(&url).json(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(level = %notification.level, "Telegram notification sent");
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, notification: Notification) {
        if !self.accepts(notification.level) {
            debug!(level = %notification.level, "Notification below minimum level");
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(title = %notification.title, "No runtime available, notification dropped");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            if let Err(e) = this.send(&notification).await {
                warn!(error = %e, title = %notification.title, "Failed to send Telegram notification");
            }
        });
    }
}
