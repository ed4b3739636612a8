//! Type definitions shared between the engine and gateway adapters.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad asset class used when qualifying an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Forex,
    Future,
    Stock,
    Crypto,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetClass::Forex => write!(f, "forex"),
            AssetClass::Future => write!(f, "future"),
            AssetClass::Stock => write!(f, "stock"),
            AssetClass::Crypto => write!(f, "crypto"),
        }
    }
}

/// Instrument class that determines the minimum price increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    /// EURUSD, GBPUSD, AUDUSD, USDCAD
    ForexMajor,
    /// Pairs quoted in yen
    JpyPair,
    /// ES, NQ, YM
    IndexFuture,
    Default,
}

impl InstrumentClass {
    /// Classify a symbol by its root.
    pub fn classify(symbol: &str) -> Self {
        let symbol = symbol.to_ascii_uppercase();
        match symbol.as_str() {
            "EURUSD" | "GBPUSD" | "AUDUSD" | "USDCAD" => InstrumentClass::ForexMajor,
            "ES" | "NQ" | "YM" => InstrumentClass::IndexFuture,
            s if s.len() == 6 && s.ends_with("JPY") => InstrumentClass::JpyPair,
            _ => InstrumentClass::Default,
        }
    }

    /// Minimum price increment for this class.
    pub fn tick_size(&self) -> Decimal {
        match self {
            InstrumentClass::ForexMajor => dec!(0.00005),
            InstrumentClass::JpyPair => dec!(0.001),
            InstrumentClass::IndexFuture => dec!(0.25),
            InstrumentClass::Default => dec!(0.01),
        }
    }
}

/// A qualified, tradable instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub exchange: String,
    /// Gateway-assigned contract identifier
    pub contract_id: u64,
    pub tick_size: Decimal,
}

impl Instrument {
    /// Build an instrument whose tick size is resolved from its class.
    pub fn new(symbol: &str, asset_class: AssetClass, exchange: &str, contract_id: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            asset_class,
            exchange: exchange.to_string(),
            contract_id,
            tick_size: InstrumentClass::classify(symbol).tick_size(),
        }
    }
}

/// Trade direction of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Action that opens a position in this direction.
    pub fn entry_action(&self) -> OrderAction {
        match self {
            Direction::Long => OrderAction::Buy,
            Direction::Short => OrderAction::Sell,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    Buy,
    Sell,
}

impl OrderAction {
    pub fn opposite(&self) -> Self {
        match self {
            OrderAction::Buy => OrderAction::Sell,
            OrderAction::Sell => OrderAction::Buy,
        }
    }

    /// Direction of the position an order with this action opens.
    pub fn direction(&self) -> Direction {
        match self {
            OrderAction::Buy => Direction::Long,
            OrderAction::Sell => Direction::Short,
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderAction::Buy => write!(f, "BUY"),
            OrderAction::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type as routed to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderKind {
    /// LMT: entry and take-profit legs
    Limit,
    /// STP: stop-loss leg
    Stop,
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Translate a raw broker status string.
    ///
    /// Unknown strings map to `Pending` so they never look terminal.
    pub fn from_broker(raw: &str) -> Self {
        match raw {
            "Submitted" => OrderStatus::Submitted,
            "PartiallyFilled" => OrderStatus::PartiallyFilled,
            "Filled" => OrderStatus::Filled,
            "Cancelled" | "ApiCancelled" | "PendingCancel" => OrderStatus::Cancelled,
            "Inactive" | "Rejected" => OrderStatus::Rejected,
            _ => OrderStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Submitted => "SUBMITTED",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Parameters for a three-leg bracket submission.
#[derive(Debug, Clone, PartialEq)]
pub struct BracketRequest {
    pub action: OrderAction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    /// Strategy identity tag attached to every leg
    pub tag: String,
}

/// Handle for an order accepted by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    pub order_id: u64,
    /// 0 for a parent order
    pub parent_id: u64,
    pub kind: OrderKind,
    pub action: OrderAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
}

/// An order as reported by the gateway's authoritative order list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub order_id: u64,
    pub parent_id: u64,
    pub symbol: String,
    pub action: OrderAction,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Limit price for LMT, trigger price for STP
    pub price: Decimal,
    pub status: OrderStatus,
    /// Free-form order reference carrying the strategy tag
    pub order_ref: String,
    pub filled: Decimal,
    pub avg_fill_price: Option<Decimal>,
}

impl GatewayOrder {
    pub fn remaining(&self) -> Decimal {
        (self.quantity - self.filled).max(Decimal::ZERO)
    }

    pub fn handle(&self) -> OrderHandle {
        OrderHandle {
            order_id: self.order_id,
            parent_id: self.parent_id,
            kind: self.kind,
            action: self.action,
            quantity: self.quantity,
            price: self.price,
            status: self.status,
        }
    }
}

/// Market data tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub time: DateTime<Utc>,
}

impl Tick {
    pub fn new(symbol: &str, price: Decimal, time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            price,
            time,
        }
    }
}

/// OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    /// High minus low.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}
