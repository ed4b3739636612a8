//! Typed messages posted by a gateway adapter onto the engine channel.

use super::types::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;

/// Sending half of the engine's inbound event channel.
pub type EventSender = mpsc::UnboundedSender<GatewayEvent>;

/// Receiving half of the engine's inbound event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<GatewayEvent>;

/// Create the single inbound channel for one engine instance.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Status change for a single order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub order_id: u64,
    pub parent_id: u64,
    pub symbol: String,
    pub kind: OrderKind,
    pub action: OrderAction,
    pub status: OrderStatus,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub order_ref: String,
    pub time: DateTime<Utc>,
}

impl OrderUpdate {
    /// Build an update reflecting an order's current gateway state.
    pub fn from_order(order: &GatewayOrder, time: DateTime<Utc>) -> Self {
        Self {
            order_id: order.order_id,
            parent_id: order.parent_id,
            symbol: order.symbol.clone(),
            kind: order.kind,
            action: order.action,
            status: order.status,
            filled: order.filled,
            remaining: order.remaining(),
            avg_fill_price: order.avg_fill_price,
            order_ref: order.order_ref.clone(),
            time,
        }
    }
}

/// Execution report for a (partial) fill.
#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub order_id: u64,
    pub parent_id: u64,
    pub symbol: String,
    pub action: OrderAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub order_ref: String,
    pub time: DateTime<Utc>,
}

/// Every message the engine's consumer loop dispatches on.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    OrderStatus(OrderUpdate),
    Fill(FillReport),
    Cancelled(OrderUpdate),
    Tick(Tick),
    Bar { symbol: String, bar: Bar },
    ConnectionLost { reason: String },
    ConnectionRestored,
    Error { code: i32, message: String },
}

impl GatewayEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::OrderStatus(_) => "order_status",
            GatewayEvent::Fill(_) => "fill",
            GatewayEvent::Cancelled(_) => "cancelled",
            GatewayEvent::Tick(_) => "tick",
            GatewayEvent::Bar { .. } => "bar",
            GatewayEvent::ConnectionLost { .. } => "connection_lost",
            GatewayEvent::ConnectionRestored => "connection_restored",
            GatewayEvent::Error { .. } => "error",
        }
    }
}
