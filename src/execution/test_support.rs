//! Shared fixtures for execution tests.

use super::book::{OrderRole, TrackedOrder};
use super::engine::{EngineSettings, OrderEngine};
use super::identity::StrategyIdentity;
use super::monitor::CancelPolicy;
use crate::gateway::{
    event_channel, AssetClass, Direction, EventReceiver, Gateway, GatewayEvent, GatewayOrder,
    Instrument, OrderAction, OrderKind, OrderStatus, OrderUpdate, PaperGateway,
};
use crate::signal::{Confidence, TradeSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

pub(crate) async fn paper_gateway() -> (Arc<PaperGateway>, EventReceiver) {
    let (tx, rx) = event_channel();
    let gateway = Arc::new(PaperGateway::new(tx));
    gateway.connect().await.unwrap();
    (gateway, rx)
}

pub(crate) fn settings(max_concurrent_trades: usize) -> EngineSettings {
    EngineSettings {
        bot_name: "test-bot".to_string(),
        max_concurrent_trades,
        quantity: dec!(1),
    }
}

pub(crate) fn es_instrument() -> Instrument {
    Instrument::new("ES", AssetClass::Future, "CME", 1)
}

/// Engine with the ES instrument already registered.
pub(crate) async fn engine_with(
    gateway: Arc<PaperGateway>,
    max_concurrent_trades: usize,
    policy: Option<Arc<dyn CancelPolicy>>,
) -> OrderEngine<PaperGateway> {
    let mut engine = OrderEngine::new(gateway, settings(max_concurrent_trades));
    if let Some(policy) = policy {
        engine = engine.with_cancel_policy(policy);
    }
    engine.register_instrument(es_instrument()).await;
    engine
}

pub(crate) fn identity() -> StrategyIdentity {
    StrategyIdentity::new("demo", "ES")
}

/// Long ES signal at 4150.25 with a 5 point target and stop.
pub(crate) fn long_signal() -> TradeSignal {
    TradeSignal {
        direction: Direction::Long,
        entry_price: dec!(4150.25),
        take_profit: dec!(4155.25),
        stop_loss: dec!(4145.25),
        confidence: Confidence::Medium,
        indicators: BTreeMap::new(),
        generated_at: Utc::now(),
    }
}

pub(crate) fn tracked_entry(order_id: u64, placed_at: DateTime<Utc>) -> TrackedOrder {
    TrackedOrder {
        order_id,
        parent_id: 0,
        role: OrderRole::Entry,
        status: OrderStatus::Submitted,
        strategy_tag: identity().tag(),
        symbol: "ES".to_string(),
        action: OrderAction::Buy,
        kind: OrderKind::Limit,
        quantity: dec!(1),
        price: dec!(4150.00),
        filled: Decimal::ZERO,
        placed_at,
    }
}

pub(crate) fn update_for(order: &GatewayOrder) -> OrderUpdate {
    OrderUpdate::from_order(order, Utc::now())
}

/// Feed every queued order event into the engine.
pub(crate) async fn deliver_order_events(
    engine: &OrderEngine<PaperGateway>,
    rx: &mut EventReceiver,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            GatewayEvent::OrderStatus(update) | GatewayEvent::Cancelled(update) => {
                engine.on_order_update(&update).await;
            }
            GatewayEvent::Fill(fill) => {
                engine.on_fill(&fill).await;
            }
            _ => {}
        }
    }
}
