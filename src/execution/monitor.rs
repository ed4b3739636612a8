//! Tick-driven monitoring of open bracket legs.

use super::book::{BracketGroup, OrderBook, OrderRole, TrackedOrder};
use super::engine::OrderEngine;
use super::error::MonitorError;
use crate::gateway::{Gateway, GatewayError, OrderStatus, Tick};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

/// Decides whether a monitored order should be cancelled on a tick.
pub trait CancelPolicy: Send + Sync {
    fn should_cancel(
        &self,
        tick: &Tick,
        order: &TrackedOrder,
        placed_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

impl<F> CancelPolicy for F
where
    F: Fn(&Tick, &TrackedOrder, DateTime<Utc>) -> anyhow::Result<bool> + Send + Sync,
{
    fn should_cancel(
        &self,
        tick: &Tick,
        order: &TrackedOrder,
        placed_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self(tick, order, placed_at)
    }
}

/// Cancels entry orders still unfilled after `max_age`.
///
/// Age is measured against the tick timestamp so replayed data behaves
/// the same as a live feed.
#[derive(Debug, Clone)]
pub struct StaleEntryPolicy {
    max_age: Duration,
}

impl StaleEntryPolicy {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::seconds(secs as i64))
    }
}

impl CancelPolicy for StaleEntryPolicy {
    fn should_cancel(
        &self,
        tick: &Tick,
        order: &TrackedOrder,
        placed_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if order.role != OrderRole::Entry
            || !matches!(order.status, OrderStatus::Pending | OrderStatus::Submitted)
        {
            return Ok(false);
        }
        Ok(tick.time - placed_at >= self.max_age)
    }
}

/// Result of one monitoring pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickOutcome {
    pub evaluated: usize,
    pub cancelled: Vec<u64>,
    pub failures: usize,
}

impl<G: Gateway> OrderEngine<G> {
    /// Start monitoring every leg of a placed bracket.
    ///
    /// Subscribes to ticks for the symbol when a cancel policy is
    /// configured and no subscription exists yet. On subscription failure
    /// the legs are left unmonitored and the error is returned.
    pub async fn start_monitoring(&self, group: &BracketGroup) -> Result<(), MonitorError> {
        let mut book = self.book.lock().await;

        for order_id in group.order_ids() {
            let Some(placed_at) = book.orders.get(&order_id).map(|o| o.placed_at) else {
                continue;
            };
            book.monitoring.entry(order_id).or_insert(placed_at);
        }

        if self.policy.is_none() {
            debug!(symbol = %group.symbol, "No cancel policy, monitoring without tick subscription");
            return Ok(());
        }

        if let Err(e) = self.ensure_subscribed_locked(&mut book, &group.symbol).await {
            for order_id in group.order_ids() {
                book.monitoring.remove(&order_id);
            }
            error!(symbol = %group.symbol, error = %e, "Failed to start monitoring");
            return Err(e);
        }

        info!(
            symbol = %group.symbol,
            parent_id = group.parent_order_id,
            "Monitoring bracket"
        );
        Ok(())
    }

    /// Run one monitoring pass for `symbol`.
    ///
    /// Policy failures are isolated to the order being evaluated.
    #[instrument(skip(self, tick), fields(price = %tick.price))]
    pub async fn handle_tick(&self, symbol: &str, tick: &Tick) -> TickOutcome {
        let mut book = self.book.lock().await;
        let mut outcome = TickOutcome::default();

        if let Some(position) = book.positions.get_mut(symbol) {
            position.update_pnl(tick.price);
            if !position.exit_flagged {
                if let Some(role) = position.exit_condition(tick.price) {
                    position.exit_flagged = true;
                    warn!(
                        %symbol,
                        price = %tick.price,
                        level = role.as_str(),
                        "Price crossed exit level while bracket legs are open"
                    );
                }
            }
        }

        let Some(policy) = self.policy.clone() else {
            return outcome;
        };

        let mut queued = Vec::new();
        for (order_id, placed_at) in book.monitored_for(symbol) {
            if book.policy_cancelled.contains(&order_id) {
                continue;
            }
            let Some(order) = book.orders.get(&order_id) else {
                continue;
            };
            outcome.evaluated += 1;

            match policy.should_cancel(tick, order, placed_at) {
                Ok(true) => queued.push(order_id),
                Ok(false) => {}
                Err(e) => {
                    let err = MonitorError::PolicyEvaluation {
                        order_id,
                        reason: format!("{:#}", e),
                    };
                    error!(error = %err, "Skipping order");
                    outcome.failures += 1;
                }
            }
        }

        // cancelling a parent cancels its children at the gateway
        let (cascaded, queued): (Vec<u64>, Vec<u64>) = queued.iter().partition(|&&id| {
            book.orders
                .get(&id)
                .is_some_and(|o| o.parent_id != 0 && queued.contains(&o.parent_id))
        });

        for order_id in queued {
            match self.gateway.cancel(order_id).await {
                Ok(()) => {
                    let children = cascaded
                        .iter()
                        .copied()
                        .filter(|id| book.orders.get(id).is_some_and(|o| o.parent_id == order_id))
                        .collect::<Vec<_>>();
                    for id in std::iter::once(order_id).chain(children) {
                        book.monitoring.remove(&id);
                        book.policy_cancelled.insert(id);
                        outcome.cancelled.push(id);
                    }
                    info!(order_id, %symbol, price = %tick.price, "Cancel requested by policy");
                }
                Err(GatewayError::OrderNotOpen(_)) => {
                    debug!(order_id, "Order already closed at the gateway, skipping cancel");
                }
                Err(e) => error!(order_id, error = %e, "Policy cancel failed"),
            }
        }

        if !book.has_monitored(symbol) {
            self.teardown_locked(&mut book, symbol).await;
        }
        outcome
    }

    /// Stop monitoring every order for `symbol` and drop its tick
    /// subscription. Calling it with nothing monitored is a no-op.
    pub async fn stop_monitoring(&self, symbol: &str) {
        let mut book = self.book.lock().await;
        let ids: Vec<u64> = book
            .monitored_for(symbol)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        for id in &ids {
            book.monitoring.remove(id);
        }
        self.teardown_locked(&mut book, symbol).await;

        if ids.is_empty() {
            debug!(%symbol, "Nothing monitored");
        } else {
            info!(%symbol, orders = ids.len(), "Monitoring stopped");
        }
    }

    pub(super) async fn ensure_subscribed_locked(
        &self,
        book: &mut OrderBook,
        symbol: &str,
    ) -> Result<(), MonitorError> {
        if book.tick_subscriptions.contains(symbol) {
            debug!(%symbol, "Reusing tick subscription");
            return Ok(());
        }
        let instrument = book
            .instruments
            .get(symbol)
            .ok_or_else(|| MonitorError::NoContract {
                symbol: symbol.to_string(),
            })?;
        self.gateway.subscribe_ticks(instrument).await?;
        book.tick_subscriptions.insert(symbol.to_string());
        info!(%symbol, "Tick subscription started");
        Ok(())
    }

    /// Release the tick subscription for `symbol` if one is held.
    pub(super) async fn teardown_locked(&self, book: &mut OrderBook, symbol: &str) {
        if !book.tick_subscriptions.remove(symbol) {
            return;
        }
        match self.gateway.unsubscribe_ticks(symbol).await {
            Ok(()) => info!(%symbol, "Tick subscription released"),
            Err(e) => warn!(%symbol, error = %e, "Tick unsubscribe failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::*;
    use crate::execution::StrategyIdentity;
    use crate::gateway::PaperFaults;
    use crate::sinks::MockTradeLogSink;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn stale_after(secs: i64) -> Arc<dyn CancelPolicy> {
        Arc::new(StaleEntryPolicy::new(Duration::seconds(secs)))
    }

    #[test]
    fn test_stale_entry_policy() {
        let policy = StaleEntryPolicy::from_secs(300);
        let placed_at = Utc::now();
        let mut order = tracked_entry(1, placed_at);

        let early = Tick::new("ES", dec!(4150), placed_at + Duration::seconds(10));
        let late = Tick::new("ES", dec!(4150), placed_at + Duration::seconds(300));
        assert!(!policy.should_cancel(&early, &order, placed_at).unwrap());
        assert!(policy.should_cancel(&late, &order, placed_at).unwrap());

        order.status = OrderStatus::PartiallyFilled;
        assert!(!policy.should_cancel(&late, &order, placed_at).unwrap());

        order.status = OrderStatus::Submitted;
        order.role = OrderRole::StopLoss;
        assert!(!policy.should_cancel(&late, &order, placed_at).unwrap());
    }

    #[tokio::test]
    async fn test_start_monitoring_subscribes_once() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 2, Some(stale_after(300))).await;

        let first = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&first).await.unwrap();
        let second = engine
            .place_bracket(&long_signal(), &StrategyIdentity::new("other", "ES"))
            .await
            .unwrap();
        engine.start_monitoring(&second).await.unwrap();

        assert_eq!(gateway.subscribe_calls().await, 1);
        for id in first.order_ids() {
            assert!(engine.is_monitored(id).await);
        }
    }

    #[tokio::test]
    async fn test_start_monitoring_without_policy_skips_subscription() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, None).await;

        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        assert_eq!(gateway.subscribe_calls().await, 0);
        assert!(engine.is_monitored(group.parent_order_id).await);
    }

    #[tokio::test]
    async fn test_subscription_failure_leaves_orders_unmonitored() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, Some(stale_after(300))).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        gateway
            .set_faults(PaperFaults {
                fail_subscribe: true,
                ..Default::default()
            })
            .await;

        let err = engine.start_monitoring(&group).await.unwrap_err();

        assert!(matches!(err, MonitorError::Subscription(_)));
        assert!(!engine.is_monitored(group.parent_order_id).await);
        assert!(engine.tracked_order(group.parent_order_id).await.is_some());
    }

    #[tokio::test]
    async fn test_stale_entry_cancelled_once() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = Arc::new(engine_with(gateway.clone(), 1, Some(stale_after(0))).await);
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        let tick = Tick::new("ES", dec!(4151), Utc::now() + Duration::seconds(1));
        let (a, b) = tokio::join!(
            engine.handle_tick("ES", &tick),
            engine.handle_tick("ES", &tick)
        );

        assert_eq!(a.cancelled.len() + b.cancelled.len(), 1);
        let requests = gateway.cancel_requests().await;
        assert_eq!(
            requests.iter().filter(|id| **id == group.parent_order_id).count(),
            1
        );
        assert!(!engine.is_monitored(group.parent_order_id).await);
    }

    #[tokio::test]
    async fn test_tick_cancel_and_status_removal_are_exclusive() {
        let (gateway, _rx) = paper_gateway().await;
        let mut trade_log = MockTradeLogSink::new();
        trade_log.expect_order_placed().return_const(());
        trade_log
            .expect_order_cancelled()
            .withf(|r| r.order_purpose == "ENTRY" && r.reason == "strategy_cancel")
            .times(1)
            .return_const(());
        let engine = engine_with(gateway.clone(), 1, Some(stale_after(0)))
            .await
            .with_trade_log(Arc::new(trade_log));
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        let mut parent = gateway.order(group.parent_order_id).await.unwrap();
        parent.status = OrderStatus::Cancelled;
        let cancelled = update_for(&parent);
        let tick = Tick::new("ES", dec!(4151), Utc::now() + Duration::seconds(1));

        let (outcome, applied) = tokio::join!(
            engine.handle_tick("ES", &tick),
            engine.on_order_update(&cancelled)
        );

        assert!(applied);
        assert_eq!(outcome.cancelled, vec![group.parent_order_id]);
        assert_eq!(gateway.cancel_requests().await, vec![group.parent_order_id]);
        assert!(engine.tracked_order(group.parent_order_id).await.is_none());
        assert!(!engine.is_monitored(group.parent_order_id).await);

        // a late duplicate neither removes nor records again
        assert!(!engine.on_order_update(&cancelled).await);
    }

    #[tokio::test]
    async fn test_parent_cancel_covers_queued_children() {
        let (gateway, _rx) = paper_gateway().await;
        let policy: Arc<dyn CancelPolicy> = Arc::new(
            |_: &Tick, _: &TrackedOrder, _: DateTime<Utc>| -> anyhow::Result<bool> { Ok(true) },
        );
        let engine = engine_with(gateway.clone(), 1, Some(policy)).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        let outcome = engine
            .handle_tick("ES", &Tick::new("ES", dec!(4151), Utc::now()))
            .await;

        assert_eq!(gateway.cancel_requests().await, vec![group.parent_order_id]);
        assert_eq!(outcome.cancelled.len(), 3);
        assert_eq!(outcome.failures, 0);
        assert_eq!(engine.snapshot().await.monitored_orders, 0);
        for id in group.order_ids() {
            let order = gateway.order(id).await.unwrap();
            assert_eq!(order.status, OrderStatus::Cancelled);
        }
    }

    #[tokio::test]
    async fn test_policy_error_is_isolated() {
        let (gateway, _rx) = paper_gateway().await;
        let policy: Arc<dyn CancelPolicy> = Arc::new(
            |_: &Tick, order: &TrackedOrder, _: DateTime<Utc>| -> anyhow::Result<bool> {
                match order.role {
                    OrderRole::TakeProfit => anyhow::bail!("bad indicator"),
                    OrderRole::StopLoss => Ok(true),
                    OrderRole::Entry => Ok(false),
                }
            },
        );
        let engine = engine_with(gateway.clone(), 1, Some(policy)).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        let outcome = engine
            .handle_tick("ES", &Tick::new("ES", dec!(4151), Utc::now()))
            .await;

        assert_eq!(outcome.evaluated, 3);
        assert_eq!(outcome.failures, 1);
        assert_eq!(outcome.cancelled, vec![group.stop_loss_order_id]);
        assert!(engine.is_monitored(group.take_profit_order_id).await);
    }

    #[tokio::test]
    async fn test_failsafe_exit_condition_only_logs() {
        let (gateway, mut rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, None).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        gateway.fill(group.parent_order_id, dec!(4150.00)).await;
        deliver_order_events(&engine, &mut rx).await;

        let outcome = engine
            .handle_tick("ES", &Tick::new("ES", dec!(4140), Utc::now()))
            .await;

        assert!(outcome.cancelled.is_empty());
        let position = engine.position("ES").await.unwrap();
        assert!(position.exit_flagged);
        assert_eq!(position.unrealized_pnl, dec!(-10));
        assert!(gateway.cancel_requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_monitoring_is_idempotent() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, Some(stale_after(300))).await;

        engine.stop_monitoring("ES").await;
        assert_eq!(gateway.unsubscribe_calls().await, 0);

        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();
        engine.stop_monitoring("ES").await;
        engine.stop_monitoring("ES").await;

        assert_eq!(gateway.unsubscribe_calls().await, 1);
        assert!(!engine.is_monitored(group.parent_order_id).await);
        assert!(gateway.tick_subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_last_terminal_leg_tears_down_subscription() {
        let (gateway, mut rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, Some(stale_after(300))).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        gateway.fill(group.parent_order_id, dec!(4150.00)).await;
        gateway.fill(group.stop_loss_order_id, dec!(4145.25)).await;
        deliver_order_events(&engine, &mut rx).await;

        assert_eq!(engine.snapshot().await.monitored_orders, 0);
        assert_eq!(gateway.unsubscribe_calls().await, 1);
        assert!(engine.position("ES").await.is_none());
    }

    #[tokio::test]
    async fn test_filled_entry_with_both_exits_cancelled() {
        let (gateway, mut rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, Some(stale_after(300))).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.start_monitoring(&group).await.unwrap();

        gateway.fill(group.parent_order_id, dec!(4150.00)).await;
        deliver_order_events(&engine, &mut rx).await;
        assert!(engine.position("ES").await.is_some());

        gateway
            .emit_order_status(group.take_profit_order_id, OrderStatus::Cancelled)
            .await;
        gateway
            .emit_order_status(group.stop_loss_order_id, OrderStatus::Cancelled)
            .await;
        deliver_order_events(&engine, &mut rx).await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.tracked_orders, 0);
        assert_eq!(snapshot.monitored_orders, 0);
        assert!(snapshot.tick_subscriptions.is_empty());
        assert!(engine.position("ES").await.is_none());
        assert_eq!(gateway.unsubscribe_calls().await, 1);
    }
}
