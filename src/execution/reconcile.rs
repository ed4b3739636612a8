//! Reconciliation of local tracking against the gateway's open orders.

use super::book::{group_key, OrderBook, TrackedOrder};
use super::engine::{close_orphaned_position, OrderEngine};
use super::error::ReconciliationError;
use super::identity::StrategyIdentity;
use crate::gateway::{Gateway, GatewayOrder};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

/// Active trade count and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TradeCount {
    pub count: usize,
    /// False when the gateway query failed and local tracking was used
    pub authoritative: bool,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tracked locally but no longer open on the gateway
    pub dropped: Vec<u64>,
    /// Open on the gateway but previously untracked
    pub adopted: Vec<u64>,
    pub tracked: usize,
}

/// Gateway and local views of one identity's orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsolationSnapshot {
    pub identity: StrategyIdentity,
    pub tag: String,
    pub local_orders: BTreeSet<u64>,
    pub local_groups: usize,
    /// None if the gateway could not be queried
    pub gateway_groups: Option<usize>,
    pub consistent: bool,
}

/// Distinct active groups on the gateway owned by `identity`.
pub fn active_groups(orders: &[GatewayOrder], identity: &StrategyIdentity) -> BTreeSet<u64> {
    orders
        .iter()
        .filter(|o| o.status.is_active() && identity.owns(&o.order_ref))
        .map(|o| group_key(o.order_id, o.parent_id))
        .collect()
}

impl<G: Gateway> OrderEngine<G> {
    /// Number of distinct active brackets owned by `identity`.
    ///
    /// Falls back to local tracking when the gateway cannot be queried.
    pub async fn active_trade_count(&self, identity: &StrategyIdentity) -> TradeCount {
        let book = self.book.lock().await;
        self.trade_count_locked(&book, identity).await
    }

    pub(super) async fn trade_count_locked(
        &self,
        book: &OrderBook,
        identity: &StrategyIdentity,
    ) -> TradeCount {
        match self.gateway.list_orders().await {
            Ok(orders) => TradeCount {
                count: active_groups(&orders, identity).len(),
                authoritative: true,
            },
            Err(e) => {
                let count = book.active_groups_where(|tag| identity.owns(tag)).len();
                warn!(%identity, error = %e, count, "Order query failed, counting from local tracking");
                TradeCount {
                    count,
                    authoritative: false,
                }
            }
        }
    }

    /// Reconcile `identity`'s tracked orders with the gateway.
    ///
    /// Orders no longer open on the gateway are dropped. Open orders not
    /// tracked locally are adopted and monitored from now on.
    #[instrument(skip(self, identity), fields(tag = %identity.tag()))]
    pub async fn sync(&self, identity: &StrategyIdentity) -> Result<SyncReport, ReconciliationError> {
        let mut book = self.book.lock().await;

        let orders = self.gateway.list_orders().await.map_err(|e| {
            warn!(%identity, error = %e, "Sync skipped, order query failed");
            ReconciliationError::Query(e)
        })?;
        let remote: BTreeMap<u64, &GatewayOrder> = orders
            .iter()
            .filter(|o| o.status.is_active() && identity.owns(&o.order_ref))
            .map(|o| (o.order_id, o))
            .collect();
        let local = book.order_ids_where(|tag| identity.owns(tag));

        let mut report = SyncReport::default();
        let mut touched = BTreeSet::new();

        for order_id in local.iter().filter(|id| !remote.contains_key(*id)) {
            let Some(order) = book.remove_order(*order_id) else {
                continue;
            };
            info!(
                order_id,
                role = order.role.as_str(),
                status = %order.status,
                "Dropped order no longer open on gateway"
            );
            close_orphaned_position(&mut book, order.group_id());
            touched.insert(order.symbol);
            report.dropped.push(*order_id);
        }

        let now = Utc::now();
        for (order_id, order) in remote.iter().filter(|(id, _)| !local.contains(*id)) {
            let tracked = TrackedOrder::adopted(order, now);
            info!(
                order_id,
                role = tracked.role.as_str(),
                status = %tracked.status,
                "Adopted untracked order"
            );
            book.monitoring.insert(*order_id, now);
            touched.insert(tracked.symbol.clone());
            book.orders.insert(*order_id, tracked);
            report.adopted.push(*order_id);
        }

        for symbol in &touched {
            if book.has_monitored(symbol) {
                if self.policy.is_some() {
                    if let Err(e) = self.ensure_subscribed_locked(&mut book, symbol).await {
                        warn!(%symbol, error = %e, "Adopted orders left without tick subscription");
                    }
                }
            } else {
                self.teardown_locked(&mut book, symbol).await;
            }
        }

        report.tracked = book.order_ids_where(|tag| identity.owns(tag)).len();
        if report.dropped.is_empty() && report.adopted.is_empty() {
            debug!(%identity, tracked = report.tracked, "Sync: in agreement");
        } else {
            info!(
                %identity,
                dropped = report.dropped.len(),
                adopted = report.adopted.len(),
                tracked = report.tracked,
                "Sync complete"
            );
        }
        Ok(report)
    }

    /// Compare what the gateway and local tracking attribute to `identity`.
    pub async fn isolation_snapshot(&self, identity: &StrategyIdentity) -> IsolationSnapshot {
        let book = self.book.lock().await;
        let local_orders = book.order_ids_where(|tag| identity.owns(tag));
        let local_groups = book.active_groups_where(|tag| identity.owns(tag)).len();
        let gateway_groups = match self.gateway.list_orders().await {
            Ok(orders) => Some(active_groups(&orders, identity).len()),
            Err(e) => {
                warn!(%identity, error = %e, "Isolation check without gateway view");
                None
            }
        };

        IsolationSnapshot {
            identity: identity.clone(),
            tag: identity.tag(),
            local_orders,
            local_groups,
            gateway_groups,
            consistent: gateway_groups == Some(local_groups),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::monitor::StaleEntryPolicy;
    use crate::execution::test_support::*;
    use crate::gateway::{OrderAction, OrderKind, OrderStatus, PaperFaults};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn foreign_order(order_id: u64, tag: &str) -> GatewayOrder {
        GatewayOrder {
            order_id,
            parent_id: 0,
            symbol: "ES".to_string(),
            action: OrderAction::Buy,
            kind: OrderKind::Limit,
            quantity: dec!(1),
            price: dec!(4100.00),
            status: OrderStatus::Submitted,
            order_ref: tag.to_string(),
            filled: Decimal::ZERO,
            avg_fill_price: None,
        }
    }

    #[test]
    fn test_active_groups_counts_brackets_not_legs() {
        let identity = identity();
        let tag = identity.tag();
        let mut orders = vec![foreign_order(10, &tag)];
        let mut tp = foreign_order(11, &tag);
        tp.parent_id = 10;
        orders.push(tp);
        orders.push(foreign_order(20, "STRATEGY:other|SYMBOL:ES"));
        let mut done = foreign_order(30, &tag);
        done.status = OrderStatus::Filled;
        orders.push(done);

        assert_eq!(active_groups(&orders, &identity), BTreeSet::from([10]));
    }

    #[tokio::test]
    async fn test_count_falls_back_to_local_tracking() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 3, None).await;
        engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        gateway
            .set_faults(PaperFaults {
                fail_list_orders: true,
                ..Default::default()
            })
            .await;

        let count = engine.active_trade_count(&identity()).await;

        assert_eq!(count, TradeCount { count: 1, authoritative: false });
    }

    #[tokio::test]
    async fn test_sync_adopts_then_drops_external_order() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, Some(Arc::new(StaleEntryPolicy::from_secs(300))))
            .await;
        gateway.insert_order(foreign_order(501, &identity().tag())).await;

        let report = engine.sync(&identity()).await.unwrap();
        assert_eq!(report.adopted, vec![501]);
        assert!(engine.is_monitored(501).await);
        assert_eq!(gateway.subscribe_calls().await, 1);

        gateway.set_order_status(501, OrderStatus::Cancelled).await;
        let report = engine.sync(&identity()).await.unwrap();

        assert_eq!(report.dropped, vec![501]);
        assert_eq!(report.tracked, 0);
        assert!(engine.tracked_order(501).await.is_none());
        assert!(!engine.is_monitored(501).await);
        assert_eq!(gateway.unsubscribe_calls().await, 1);
    }

    #[tokio::test]
    async fn test_sync_ignores_other_strategies() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, None).await;
        gateway
            .insert_order(foreign_order(700, "STRATEGY:demo|SYMBOL:ESZ4"))
            .await;

        let report = engine.sync(&identity()).await.unwrap();

        assert!(report.adopted.is_empty());
        assert!(engine.tracked_order(700).await.is_none());
    }

    #[tokio::test]
    async fn test_sync_query_failure_changes_nothing() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, None).await;
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        gateway
            .set_faults(PaperFaults {
                fail_list_orders: true,
                ..Default::default()
            })
            .await;

        let result = engine.sync(&identity()).await;

        assert!(matches!(result, Err(ReconciliationError::Query(_))));
        assert!(engine.tracked_order(group.parent_order_id).await.is_some());
    }

    #[tokio::test]
    async fn test_isolation_snapshot_per_identity() {
        let (gateway, _rx) = paper_gateway().await;
        let engine = engine_with(gateway.clone(), 1, None).await;
        let other = StrategyIdentity::new("other", "ES");
        let group = engine.place_bracket(&long_signal(), &identity()).await.unwrap();
        engine.place_bracket(&long_signal(), &other).await.unwrap();

        let snapshot = engine.isolation_snapshot(&identity()).await;

        assert_eq!(snapshot.tag, "STRATEGY:demo|SYMBOL:ES");
        assert_eq!(snapshot.local_orders, BTreeSet::from(group.order_ids()));
        assert_eq!(snapshot.local_groups, 1);
        assert_eq!(snapshot.gateway_groups, Some(1));
        assert!(snapshot.consistent);
    }
}
