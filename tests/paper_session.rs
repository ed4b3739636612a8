//! End-to-end paper sessions through the runner.

use bracket_trader::config::{CancelPolicyKind, Config};
use bracket_trader::gateway::{event_channel, Bar, OrderStatus, PaperGateway};
use bracket_trader::runtime::StrategyRunner;
use bracket_trader::signal::{FnStrategy, Strategy, StrategyRow};
use bracket_trader::sinks::{
    ExecutedTradeRecord, Notification, Notifier, OrderCancellationRecord, OrderPlacedRecord,
    TradeLogSink, TradeSignalRecord,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingTradeLog {
    signals: Mutex<Vec<TradeSignalRecord>>,
    placed: Mutex<Vec<OrderPlacedRecord>>,
    executed: Mutex<Vec<ExecutedTradeRecord>>,
    cancelled: Mutex<Vec<OrderCancellationRecord>>,
}

impl TradeLogSink for RecordingTradeLog {
    fn trade_signal(&self, record: TradeSignalRecord) {
        self.signals.lock().unwrap().push(record);
    }

    fn order_placed(&self, record: OrderPlacedRecord) {
        self.placed.lock().unwrap().push(record);
    }

    fn executed_trade(&self, record: ExecutedTradeRecord) {
        self.executed.lock().unwrap().push(record);
    }

    fn order_cancelled(&self, record: OrderCancellationRecord) {
        self.cancelled.lock().unwrap().push(record);
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.sent.lock().unwrap().push(notification);
    }
}

fn config(cancel_policy: CancelPolicyKind) -> Config {
    let mut config = Config::default();
    config.bot.strategy_name = "breakout".to_string();
    config.signal.historical_window = 20;
    config.signal.min_data_points = 3;
    config.history.retry_backoff_ms = 1;
    config.monitoring.cancel_policy = cancel_policy;
    config
}

fn bar(minutes: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Bar {
    Bar {
        time: Utc::now() + Duration::minutes(minutes),
        open,
        high,
        low,
        close,
        volume: dec!(100),
    }
}

fn flat_bar(minutes: i64, price: Decimal) -> Bar {
    bar(minutes, price, price + dec!(0.5), price - dec!(0.5), price)
}

/// Long once the close reaches 4160, exits 5 points away.
fn breakout() -> Box<dyn Strategy> {
    Box::new(FnStrategy::new(
        "breakout",
        |window: &[Bar]| -> anyhow::Result<Vec<StrategyRow>> {
            let last = window
                .last()
                .ok_or_else(|| anyhow::anyhow!("empty window"))?;
            let mut row = StrategyRow::flat(last);
            if last.close >= dec!(4160) {
                row.signal = 1;
            }
            row.take_profit = Some(last.close + dec!(5));
            row.stop_loss = Some(last.close - dec!(5));
            Ok(vec![row])
        },
    ))
}

struct Session {
    gateway: Arc<PaperGateway>,
    runner: StrategyRunner<PaperGateway>,
    trade_log: Arc<RecordingTradeLog>,
    notifier: Arc<RecordingNotifier>,
}

async fn start_session(cancel_policy: CancelPolicyKind) -> Session {
    let (tx, rx) = event_channel();
    let gateway = Arc::new(PaperGateway::new(tx));
    gateway
        .set_history("ES", (0..5).map(|i| flat_bar(i - 10, dec!(4150))).collect())
        .await;
    let trade_log = Arc::new(RecordingTradeLog::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let mut runner = StrategyRunner::new(
        config(cancel_policy),
        gateway.clone(),
        rx,
        breakout(),
        trade_log.clone(),
        notifier.clone(),
    );
    runner.start().await.unwrap();

    Session {
        gateway,
        runner,
        trade_log,
        notifier,
    }
}

#[tokio::test]
async fn test_take_profit_round_trip() {
    let mut session = start_session(CancelPolicyKind::StaleEntry).await;

    // signal: long, entry 4159.75, TP 4165, SL 4155
    session.gateway.push_bar("ES", flat_bar(0, dec!(4160))).await;
    session.runner.drain_events().await;
    assert_eq!(session.trade_log.placed.lock().unwrap().len(), 1);
    let placed = session.trade_log.placed.lock().unwrap()[0].clone();
    assert_eq!(placed.entry_price, dec!(4159.75));
    assert_eq!(placed.strategy_tag, "STRATEGY:breakout|SYMBOL:ES");

    // dips through the entry
    session
        .gateway
        .push_bar("ES", bar(1, dec!(4160), dec!(4161), dec!(4159.50), dec!(4160.50)))
        .await;
    session.runner.drain_events().await;
    let position = session.runner.engine().position("ES").await.unwrap();
    assert_eq!(position.entry_price, dec!(4159.75));

    // rallies through the target
    session
        .gateway
        .push_bar("ES", bar(2, dec!(4161), dec!(4166), dec!(4160), dec!(4165.50)))
        .await;
    session.runner.drain_events().await;

    assert!(session.runner.engine().position("ES").await.is_none());
    let executed = session.trade_log.executed.lock().unwrap().clone();
    assert_eq!(executed.len(), 2);
    assert_eq!(executed[1].order_purpose, "TAKE_PROFIT");
    assert_eq!(executed[1].realized_pnl, Some(dec!(5.25)));

    let cancelled = session.trade_log.cancelled.lock().unwrap().clone();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].order_purpose, "STOP_LOSS");
    assert_eq!(cancelled[0].reason, "broker_cancel");

    assert!(session
        .notifier
        .titles()
        .contains(&"Take profit filled".to_string()));
    let snapshot = session.runner.engine().snapshot().await;
    assert_eq!(snapshot.tracked_orders, 0);
    assert!(snapshot.tick_subscriptions.is_empty());
}

#[tokio::test]
async fn test_sustained_signal_places_one_bracket() {
    let mut session = start_session(CancelPolicyKind::None).await;

    for i in 0..4 {
        session
            .gateway
            .push_bar("ES", flat_bar(i, dec!(4170) + Decimal::from(i)))
            .await;
        session.runner.drain_events().await;
    }

    assert_eq!(session.trade_log.signals.lock().unwrap().len(), 1);
    assert_eq!(session.runner.stats().brackets_placed, 1);
}

#[tokio::test]
async fn test_reconnect_reconciles_external_cancel() {
    let mut session = start_session(CancelPolicyKind::None).await;
    session.gateway.push_bar("ES", flat_bar(0, dec!(4160))).await;
    session.runner.drain_events().await;
    let parent_id = session.trade_log.placed.lock().unwrap()[0].parent_order_id;

    // cancelled while disconnected, no event delivered
    session.gateway.drop_connection("socket reset");
    for id in parent_id..parent_id + 3 {
        session
            .gateway
            .set_order_status(id, OrderStatus::Cancelled)
            .await;
    }
    session.gateway.restore_connection();
    session.runner.drain_events().await;

    let titles = session.notifier.titles();
    assert!(titles.contains(&"Gateway connection lost".to_string()));
    assert!(titles.contains(&"Gateway connection restored".to_string()));
    let count = session
        .runner
        .engine()
        .active_trade_count(session.runner.identity())
        .await;
    assert_eq!(count.count, 0);
    assert!(session.runner.engine().tracked_order(parent_id).await.is_none());
}
