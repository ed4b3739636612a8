//! In-memory paper trading gateway.
//!
//! Simulates a brokerage session for paper trading and tests:
//! - Bracket submission with sequential order ids (parent, TP = parent+1, SL = parent+2)
//! - Limit/stop fills driven by ticks, with OCO sibling cancellation
//! - Parent cancellation cascading to its children
//! - Fault injection for connection, order queries, partial acceptance and history

use super::events::{EventSender, FillReport, GatewayEvent, OrderUpdate};
use super::traits::{Gateway, GatewayError};
use super::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Failures the paper session should simulate.
#[derive(Debug, Clone, Default)]
pub struct PaperFaults {
    pub fail_connect: bool,
    /// Accept only this many legs of the next brackets
    pub accepted_legs: Option<usize>,
    pub fail_list_orders: bool,
    /// Number of upcoming history requests that fail
    pub history_failures: u32,
    pub fail_cancel: bool,
    pub fail_subscribe: bool,
}

/// Simulated session state.
#[derive(Debug, Default)]
struct PaperState {
    orders: BTreeMap<u64, GatewayOrder>,
    tick_subscriptions: HashSet<String>,
    bar_subscriptions: HashSet<String>,
    history: HashMap<String, Vec<Bar>>,
    faults: PaperFaults,
    cancel_requests: Vec<u64>,
    subscribe_calls: u32,
    unsubscribe_calls: u32,
    history_calls: u32,
}

impl PaperState {
    fn open_children(&self, parent_id: u64) -> Vec<u64> {
        self.orders
            .values()
            .filter(|o| o.parent_id == parent_id && o.status.is_active())
            .map(|o| o.order_id)
            .collect()
    }

    /// Mark an order cancelled, cascading to children of a parent.
    fn cancel_order(&mut self, order_id: u64, time: DateTime<Utc>, events: &mut Vec<GatewayEvent>) {
        let mut targets = vec![order_id];
        if self
            .orders
            .get(&order_id)
            .is_some_and(|o| o.parent_id == 0)
        {
            targets.extend(self.open_children(order_id));
        }

        for id in targets {
            if let Some(order) = self.orders.get_mut(&id) {
                if order.status.is_active() {
                    order.status = OrderStatus::Cancelled;
                    events.push(GatewayEvent::Cancelled(OrderUpdate::from_order(order, time)));
                }
            }
        }
    }

    /// Fill an order completely and cancel its OCO siblings.
    fn fill_order(
        &mut self,
        order_id: u64,
        price: Decimal,
        time: DateTime<Utc>,
        events: &mut Vec<GatewayEvent>,
    ) {
        let Some(order) = self.orders.get_mut(&order_id) else {
            return;
        };
        if order.status.is_terminal() {
            return;
        }

        let quantity = order.remaining();
        order.filled = order.quantity;
        order.avg_fill_price = Some(price);
        order.status = OrderStatus::Filled;

        events.push(GatewayEvent::Fill(FillReport {
            order_id,
            parent_id: order.parent_id,
            symbol: order.symbol.clone(),
            action: order.action,
            quantity,
            price,
            order_ref: order.order_ref.clone(),
            time,
        }));
        events.push(GatewayEvent::OrderStatus(OrderUpdate::from_order(order, time)));

        info!(
            order_id,
            symbol = %order.symbol,
            action = %order.action,
            %quantity,
            %price,
            "Paper order filled"
        );

        let parent_id = order.parent_id;
        if parent_id != 0 {
            let siblings: Vec<u64> = self
                .open_children(parent_id)
                .into_iter()
                .filter(|id| *id != order_id)
                .collect();
            for sibling in siblings {
                debug!(order_id = sibling, "OCO sibling cancelled");
                self.cancel_order(sibling, time, events);
            }
        }
    }

    /// Orders whose trigger condition is met at `price`.
    fn triggered(&self, symbol: &str, price: Decimal) -> Vec<(u64, Decimal)> {
        self.orders
            .values()
            .filter(|o| o.symbol == symbol && o.status.is_active())
            .filter(|o| {
                // children only work once their parent has filled
                o.parent_id == 0
                    || self
                        .orders
                        .get(&o.parent_id)
                        .is_some_and(|p| p.status == OrderStatus::Filled)
            })
            .filter_map(|o| {
                let hit = match (o.kind, o.action) {
                    (OrderKind::Limit, OrderAction::Buy) => price <= o.price,
                    (OrderKind::Limit, OrderAction::Sell) => price >= o.price,
                    (OrderKind::Stop, OrderAction::Buy) => price >= o.price,
                    (OrderKind::Stop, OrderAction::Sell) => price <= o.price,
                };
                let fill_price = match o.kind {
                    OrderKind::Limit => o.price,
                    OrderKind::Stop => price,
                };
                hit.then_some((o.order_id, fill_price))
            })
            .collect()
    }
}

/// Paper gateway that posts events onto an engine channel.
pub struct PaperGateway {
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    contract_id_counter: AtomicU64,
    connected: AtomicBool,
    events: EventSender,
}

impl PaperGateway {
    /// Create a new paper session posting to `events`.
    pub fn new(events: EventSender) -> Self {
        Self {
            state: Arc::new(RwLock::new(PaperState::default())),
            order_id_counter: AtomicU64::new(1),
            contract_id_counter: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            events,
        }
    }

    fn emit_all(&self, events: Vec<GatewayEvent>) {
        for event in events {
            if self.events.send(event).is_err() {
                debug!("Event receiver dropped, discarding paper event");
                return;
            }
        }
    }

    /// Replace the active fault set.
    pub async fn set_faults(&self, faults: PaperFaults) {
        self.state.write().await.faults = faults;
    }

    /// Bars served by `historical_bars` for a symbol.
    pub async fn set_history(&self, symbol: &str, bars: Vec<Bar>) {
        self.state
            .write()
            .await
            .history
            .insert(symbol.to_string(), bars);
    }

    /// Feed a price into the simulation, filling any triggered orders.
    pub async fn push_tick(&self, symbol: &str, price: Decimal, time: DateTime<Utc>) {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            if state.tick_subscriptions.contains(symbol) {
                events.push(GatewayEvent::Tick(Tick::new(symbol, price, time)));
            }

            // a filled parent can activate children on the same tick
            loop {
                let triggered = state.triggered(symbol, price);
                if triggered.is_empty() {
                    break;
                }
                for (order_id, fill_price) in triggered {
                    state.fill_order(order_id, fill_price, time, &mut events);
                }
            }
        }
        self.emit_all(events);
    }

    /// Replay a bar as a tick path, then publish the bar itself.
    pub async fn push_bar(&self, symbol: &str, bar: Bar) {
        let path = if bar.close >= bar.open {
            [bar.open, bar.low, bar.high, bar.close]
        } else {
            [bar.open, bar.high, bar.low, bar.close]
        };
        for price in path {
            self.push_tick(symbol, price, bar.time).await;
        }

        let subscribed = self.state.read().await.bar_subscriptions.contains(symbol);
        if subscribed {
            self.emit_all(vec![GatewayEvent::Bar {
                symbol: symbol.to_string(),
                bar,
            }]);
        }
    }

    /// Fill an order at `price` regardless of its trigger.
    pub async fn fill(&self, order_id: u64, price: Decimal) {
        let mut events = Vec::new();
        self.state
            .write()
            .await
            .fill_order(order_id, price, Utc::now(), &mut events);
        self.emit_all(events);
    }

    /// Change an order's status without publishing an event.
    pub async fn set_order_status(&self, order_id: u64, status: OrderStatus) {
        if let Some(order) = self.state.write().await.orders.get_mut(&order_id) {
            order.status = status;
        }
    }

    /// Change an order's status and publish the matching event.
    pub async fn emit_order_status(&self, order_id: u64, status: OrderStatus) {
        let event = {
            let mut state = self.state.write().await;
            let Some(order) = state.orders.get_mut(&order_id) else {
                return;
            };
            order.status = status;
            let update = OrderUpdate::from_order(order, Utc::now());
            if status == OrderStatus::Cancelled {
                GatewayEvent::Cancelled(update)
            } else {
                GatewayEvent::OrderStatus(update)
            }
        };
        self.emit_all(vec![event]);
    }

    /// Register an order placed outside this process.
    pub async fn insert_order(&self, order: GatewayOrder) {
        self.state.write().await.orders.insert(order.order_id, order);
    }

    /// Simulate a dropped session.
    pub fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        warn!(%reason, "Paper session connection lost");
        self.emit_all(vec![GatewayEvent::ConnectionLost {
            reason: reason.to_string(),
        }]);
    }

    /// Simulate the session coming back.
    pub fn restore_connection(&self) {
        self.connected.store(true, Ordering::SeqCst);
        info!("Paper session connection restored");
        self.emit_all(vec![GatewayEvent::ConnectionRestored]);
    }

    pub async fn order(&self, order_id: u64) -> Option<GatewayOrder> {
        self.state.read().await.orders.get(&order_id).cloned()
    }

    /// Order ids passed to `cancel`, in call order.
    pub async fn cancel_requests(&self) -> Vec<u64> {
        self.state.read().await.cancel_requests.clone()
    }

    pub async fn tick_subscriptions(&self) -> HashSet<String> {
        self.state.read().await.tick_subscriptions.clone()
    }

    pub async fn subscribe_calls(&self) -> u32 {
        self.state.read().await.subscribe_calls
    }

    pub async fn unsubscribe_calls(&self) -> u32 {
        self.state.read().await.unsubscribe_calls
    }

    pub async fn history_calls(&self) -> u32 {
        self.state.read().await.history_calls
    }

    fn ensure_connected(&self) -> Result<(), GatewayError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }
}

#[async_trait]
impl Gateway for PaperGateway {
    async fn connect(&self) -> Result<(), GatewayError> {
        if self.state.read().await.faults.fail_connect {
            return Err(GatewayError::Connection(
                "paper session refused connection".to_string(),
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("Paper session connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), GatewayError> {
        self.connected.store(false, Ordering::SeqCst);
        info!("Paper session disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn qualify(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        exchange: &str,
    ) -> Result<Instrument, GatewayError> {
        self.ensure_connected()?;
        if symbol.trim().is_empty() {
            return Err(GatewayError::Qualification {
                symbol: symbol.to_string(),
                reason: "empty symbol".to_string(),
            });
        }
        let contract_id = self.contract_id_counter.fetch_add(1, Ordering::SeqCst);
        let instrument = Instrument::new(symbol, asset_class, exchange, contract_id);
        debug!(%symbol, %asset_class, tick_size = %instrument.tick_size, "Paper instrument qualified");
        Ok(instrument)
    }

    async fn submit_bracket(
        &self,
        instrument: &Instrument,
        request: &BracketRequest,
    ) -> Result<Vec<OrderHandle>, GatewayError> {
        self.ensure_connected()?;
        if request.quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected("quantity must be positive".to_string()));
        }

        let parent_id = self.order_id_counter.fetch_add(3, Ordering::SeqCst);
        let exit_action = request.action.opposite();
        let leg = |order_id: u64, parent_id: u64, action, kind, price| GatewayOrder {
            order_id,
            parent_id,
            symbol: instrument.symbol.clone(),
            action,
            kind,
            quantity: request.quantity,
            price,
            status: OrderStatus::Submitted,
            order_ref: request.tag.clone(),
            filled: Decimal::ZERO,
            avg_fill_price: None,
        };
        let legs = [
            leg(parent_id, 0, request.action, OrderKind::Limit, request.entry_price),
            leg(parent_id + 1, parent_id, exit_action, OrderKind::Limit, request.take_profit),
            leg(parent_id + 2, parent_id, exit_action, OrderKind::Stop, request.stop_loss),
        ];

        let now = Utc::now();
        let mut handles = Vec::with_capacity(3);
        let mut events = Vec::with_capacity(3);
        {
            let mut state = self.state.write().await;
            let accepted = state.faults.accepted_legs.unwrap_or(3).min(3);
            for order in legs.into_iter().take(accepted) {
                handles.push(order.handle());
                events.push(GatewayEvent::OrderStatus(OrderUpdate::from_order(&order, now)));
                state.orders.insert(order.order_id, order);
            }
        }

        info!(
            parent_id,
            symbol = %instrument.symbol,
            action = %request.action,
            quantity = %request.quantity,
            entry = %request.entry_price,
            take_profit = %request.take_profit,
            stop_loss = %request.stop_loss,
            accepted = handles.len(),
            "Paper bracket submitted"
        );

        self.emit_all(events);
        Ok(handles)
    }

    async fn cancel(&self, order_id: u64) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            state.cancel_requests.push(order_id);
            if state.faults.fail_cancel {
                return Err(GatewayError::Rejected(format!(
                    "cancel of {} refused",
                    order_id
                )));
            }
            match state.orders.get(&order_id) {
                None => return Err(GatewayError::UnknownOrder(order_id)),
                Some(order) if order.status.is_terminal() => {
                    return Err(GatewayError::OrderNotOpen(order_id))
                }
                Some(_) => {}
            }
            state.cancel_order(order_id, Utc::now(), &mut events);
        }
        debug!(order_id, "Paper order cancelled");
        self.emit_all(events);
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<GatewayOrder>, GatewayError> {
        self.ensure_connected()?;
        let state = self.state.read().await;
        if state.faults.fail_list_orders {
            return Err(GatewayError::Query("order list unavailable".to_string()));
        }
        Ok(state.orders.values().cloned().collect())
    }

    async fn subscribe_ticks(&self, instrument: &Instrument) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        let mut state = self.state.write().await;
        if state.faults.fail_subscribe {
            return Err(GatewayError::Subscription {
                symbol: instrument.symbol.clone(),
                reason: "market data farm unavailable".to_string(),
            });
        }
        state.subscribe_calls += 1;
        state.tick_subscriptions.insert(instrument.symbol.clone());
        Ok(())
    }

    async fn unsubscribe_ticks(&self, symbol: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        state.unsubscribe_calls += 1;
        state.tick_subscriptions.remove(symbol);
        Ok(())
    }

    async fn subscribe_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
    ) -> Result<(), GatewayError> {
        self.ensure_connected()?;
        debug!(symbol = %instrument.symbol, %timeframe, "Paper bar subscription");
        self.state
            .write()
            .await
            .bar_subscriptions
            .insert(instrument.symbol.clone());
        Ok(())
    }

    async fn historical_bars(
        &self,
        instrument: &Instrument,
        _timeframe: &str,
        count: usize,
    ) -> Result<Vec<Bar>, GatewayError> {
        self.ensure_connected()?;
        let mut state = self.state.write().await;
        state.history_calls += 1;
        if state.faults.history_failures > 0 {
            state.faults.history_failures -= 1;
            return Err(GatewayError::History("pacing violation".to_string()));
        }
        let bars = state
            .history
            .get(&instrument.symbol)
            .map(|bars| {
                let skip = bars.len().saturating_sub(count);
                bars[skip..].to_vec()
            })
            .unwrap_or_default();
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::{event_channel, EventReceiver};
    use rust_decimal_macros::dec;

    // =========================================================================
    // Helper functions
    // =========================================================================

    async fn connected_gateway() -> (PaperGateway, EventReceiver, Instrument) {
        let (tx, rx) = event_channel();
        let gateway = PaperGateway::new(tx);
        gateway.connect().await.unwrap();
        let instrument = gateway.qualify("ES", AssetClass::Future, "CME").await.unwrap();
        (gateway, rx, instrument)
    }

    fn long_request() -> BracketRequest {
        BracketRequest {
            action: OrderAction::Buy,
            quantity: dec!(1),
            entry_price: dec!(4150.00),
            take_profit: dec!(4155.25),
            stop_loss: dec!(4145.25),
            tag: "STRATEGY:demo|SYMBOL:ES".to_string(),
        }
    }

    fn drain(rx: &mut EventReceiver) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // =========================================================================
    // Bracket submission
    // =========================================================================

    #[tokio::test]
    async fn test_bracket_assigns_linked_ids() {
        let (gateway, mut rx, instrument) = connected_gateway().await;

        let handles = gateway.submit_bracket(&instrument, &long_request()).await.unwrap();

        assert_eq!(handles.len(), 3);
        assert_eq!(handles[0].parent_id, 0);
        assert_eq!(handles[1].parent_id, handles[0].order_id);
        assert_eq!(handles[2].kind, OrderKind::Stop);
        assert_eq!(handles[2].action, OrderAction::Sell);
        assert_eq!(drain(&mut rx).len(), 3);

        let order = gateway.order(handles[1].order_id).await.unwrap();
        assert_eq!(order.order_ref, "STRATEGY:demo|SYMBOL:ES");
    }

    #[tokio::test]
    async fn test_partial_acceptance_fault() {
        let (gateway, _rx, instrument) = connected_gateway().await;
        gateway
            .set_faults(PaperFaults {
                accepted_legs: Some(2),
                ..Default::default()
            })
            .await;

        let handles = gateway.submit_bracket(&instrument, &long_request()).await.unwrap();
        assert_eq!(handles.len(), 2);
    }

    #[tokio::test]
    async fn test_submit_requires_connection() {
        let (tx, _rx) = event_channel();
        let gateway = PaperGateway::new(tx);
        let instrument = Instrument::new("ES", AssetClass::Future, "CME", 1);

        let result = gateway.submit_bracket(&instrument, &long_request()).await;
        assert!(matches!(result, Err(GatewayError::NotConnected)));
    }

    // =========================================================================
    // Fill simulation
    // =========================================================================

    #[tokio::test]
    async fn test_take_profit_fill_cancels_stop_loss() {
        let (gateway, mut rx, instrument) = connected_gateway().await;
        let handles = gateway.submit_bracket(&instrument, &long_request()).await.unwrap();
        drain(&mut rx);

        let now = Utc::now();
        gateway.push_tick("ES", dec!(4150.00), now).await;
        gateway.push_tick("ES", dec!(4156.00), now).await;

        let parent = gateway.order(handles[0].order_id).await.unwrap();
        let tp = gateway.order(handles[1].order_id).await.unwrap();
        let sl = gateway.order(handles[2].order_id).await.unwrap();
        assert_eq!(parent.status, OrderStatus::Filled);
        assert_eq!(tp.status, OrderStatus::Filled);
        assert_eq!(tp.avg_fill_price, Some(dec!(4155.25)));
        assert_eq!(sl.status, OrderStatus::Cancelled);

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, GatewayEvent::Cancelled(u) if u.order_id == sl.order_id)));
    }

    #[tokio::test]
    async fn test_children_wait_for_parent_fill() {
        let (gateway, _rx, instrument) = connected_gateway().await;
        let handles = gateway.submit_bracket(&instrument, &long_request()).await.unwrap();

        // above TP but entry never touched
        gateway.push_tick("ES", dec!(4160.00), Utc::now()).await;

        let tp = gateway.order(handles[1].order_id).await.unwrap();
        assert_eq!(tp.status, OrderStatus::Submitted);
    }

    #[tokio::test]
    async fn test_cancel_parent_cascades() {
        let (gateway, _rx, instrument) = connected_gateway().await;
        let handles = gateway.submit_bracket(&instrument, &long_request()).await.unwrap();

        gateway.cancel(handles[0].order_id).await.unwrap();

        for handle in &handles {
            let order = gateway.order(handle.order_id).await.unwrap();
            assert_eq!(order.status, OrderStatus::Cancelled);
        }
        assert_eq!(gateway.cancel_requests().await, vec![handles[0].order_id]);

        let again = gateway.cancel(handles[0].order_id).await;
        assert!(matches!(again, Err(GatewayError::OrderNotOpen(_))));
    }

    #[tokio::test]
    async fn test_history_failures_then_success() {
        let (gateway, _rx, instrument) = connected_gateway().await;
        let bar = Bar {
            time: Utc::now(),
            open: dec!(1),
            high: dec!(2),
            low: dec!(0.5),
            close: dec!(1.5),
            volume: dec!(100),
        };
        gateway.set_history("ES", vec![bar.clone(), bar]).await;
        gateway
            .set_faults(PaperFaults {
                history_failures: 1,
                ..Default::default()
            })
            .await;

        assert!(gateway.historical_bars(&instrument, "5 mins", 10).await.is_err());
        let bars = gateway.historical_bars(&instrument, "5 mins", 1).await.unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(gateway.history_calls().await, 2);
    }
}
