//! Order execution engine.
//!
//! Turns trade signals into tagged three-leg brackets and applies
//! lifecycle events reported by the gateway. All shared state lives in one
//! [`OrderBook`] behind a single async mutex.

use super::book::{BracketGroup, OrderBook, OrderRole, Position, TrackedOrder};
use super::error::ExecutionError;
use super::identity::StrategyIdentity;
use super::lifecycle::{transition, Transition};
use super::monitor::CancelPolicy;
use crate::config::Config;
use crate::gateway::{
    AssetClass, BracketRequest, Direction, FillReport, Gateway, Instrument, OrderHandle,
    OrderStatus, OrderUpdate,
};
use crate::signal::TradeSignal;
use crate::sinks::{
    AlertLevel, ExecutedTradeRecord, NoopNotifier, NoopTradeLog, Notification, Notifier,
    OrderCancellationRecord, OrderPlacedRecord, TradeLogSink,
};
use crate::utils::decimal::{offset_ticks, round_to_tick};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Static engine parameters.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub bot_name: String,
    pub max_concurrent_trades: usize,
    /// Quantity per bracket
    pub quantity: Decimal,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bot_name: config.bot.name.clone(),
            max_concurrent_trades: config.bot.max_concurrent_trades,
            quantity: config.bot.default_quantity,
        }
    }
}

/// Point-in-time view of the book for status logging.
#[derive(Debug, Clone, Serialize)]
pub struct BookSnapshot {
    pub tracked_orders: usize,
    pub monitored_orders: usize,
    pub groups: usize,
    pub positions: Vec<Position>,
    pub tick_subscriptions: Vec<String>,
}

/// Execution engine owning one gateway session.
pub struct OrderEngine<G: Gateway> {
    pub(super) gateway: Arc<G>,
    pub(super) settings: EngineSettings,
    pub(super) book: Mutex<OrderBook>,
    pub(super) policy: Option<Arc<dyn CancelPolicy>>,
    pub(super) trade_log: Arc<dyn TradeLogSink>,
    pub(super) notifier: Arc<dyn Notifier>,
}

impl<G: Gateway> OrderEngine<G> {
    /// Create an engine with no cancel policy and silent sinks.
    pub fn new(gateway: Arc<G>, settings: EngineSettings) -> Self {
        Self {
            gateway,
            settings,
            book: Mutex::new(OrderBook::default()),
            policy: None,
            trade_log: Arc::new(NoopTradeLog),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_cancel_policy(mut self, policy: Arc<dyn CancelPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_trade_log(mut self, trade_log: Arc<dyn TradeLogSink>) -> Self {
        self.trade_log = trade_log;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn has_cancel_policy(&self) -> bool {
        self.policy.is_some()
    }

    /// Qualify a symbol and keep its definition for order placement.
    #[instrument(skip(self))]
    pub async fn resolve_instrument(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        exchange: &str,
    ) -> Result<Instrument, ExecutionError> {
        let instrument = self
            .gateway
            .qualify(symbol, asset_class, exchange)
            .await
            .map_err(|source| ExecutionError::ContractResolution {
                symbol: symbol.to_string(),
                source,
            })?;

        info!(
            %symbol,
            contract_id = instrument.contract_id,
            tick_size = %instrument.tick_size,
            "Instrument qualified"
        );
        self.register_instrument(instrument.clone()).await;
        Ok(instrument)
    }

    /// Store an already qualified instrument.
    pub async fn register_instrument(&self, instrument: Instrument) {
        self.book
            .lock()
            .await
            .instruments
            .insert(instrument.symbol.clone(), instrument);
    }

    /// Place a bracket for `signal` under `identity`.
    ///
    /// Preconditions are checked in order: instrument, open position,
    /// concurrency. Nothing is registered unless exactly three legs were
    /// accepted.
    #[instrument(
        skip(self, signal, identity),
        fields(symbol = %identity.symbol, direction = %signal.direction)
    )]
    pub async fn place_bracket(
        &self,
        signal: &TradeSignal,
        identity: &StrategyIdentity,
    ) -> Result<BracketGroup, ExecutionError> {
        let mut book = self.book.lock().await;
        let symbol = identity.symbol.as_str();

        let instrument = book
            .instruments
            .get(symbol)
            .cloned()
            .ok_or_else(|| ExecutionError::NoContract {
                symbol: symbol.to_string(),
            })?;

        if book.positions.contains_key(symbol) {
            info!(%symbol, "Position already open, signal dropped");
            return Err(ExecutionError::PositionExists {
                symbol: symbol.to_string(),
            });
        }

        let count = self.trade_count_locked(&book, identity).await;
        let max = self.settings.max_concurrent_trades;
        if count.count >= max {
            info!(
                %identity,
                current = count.count,
                max,
                authoritative = count.authoritative,
                "Concurrency limit reached, signal dropped"
            );
            return Err(ExecutionError::ConcurrencyLimitReached {
                current: count.count,
                max,
            });
        }

        let tick = instrument.tick_size;
        // one tick adverse: buy below, sell above
        let entry_offset = match signal.direction {
            Direction::Long => -1,
            Direction::Short => 1,
        };
        let tag = identity.tag();
        let request = BracketRequest {
            action: signal.direction.entry_action(),
            quantity: self.settings.quantity,
            entry_price: offset_ticks(signal.entry_price, tick, entry_offset),
            take_profit: round_to_tick(signal.take_profit, tick),
            stop_loss: round_to_tick(signal.stop_loss, tick),
            tag: tag.clone(),
        };

        let handles = match self.gateway.submit_bracket(&instrument, &request).await {
            Ok(handles) => handles,
            Err(e) => {
                error!(%identity, error = %e, "Bracket submission failed");
                return Err(ExecutionError::BracketPlacement {
                    accepted: 0,
                    reason: e.to_string(),
                });
            }
        };

        let Some([entry, take_profit, stop_loss]) = assign_legs(&handles) else {
            error!(
                %identity,
                accepted = handles.len(),
                "Bracket not accepted as three linked legs, cancelling accepted legs"
            );
            self.cancel_accepted(&handles).await;
            return Err(ExecutionError::BracketPlacement {
                accepted: handles.len(),
                reason: "gateway did not accept exactly three linked legs".to_string(),
            });
        };

        let now = Utc::now();
        let group = BracketGroup {
            parent_order_id: entry.order_id,
            take_profit_order_id: take_profit.order_id,
            stop_loss_order_id: stop_loss.order_id,
            symbol: symbol.to_string(),
            strategy_tag: tag.clone(),
            direction: signal.direction,
            quantity: request.quantity,
            entry_price: request.entry_price,
            take_profit: request.take_profit,
            stop_loss: request.stop_loss,
            created_at: now,
        };
        let legs = [entry, take_profit, stop_loss]
            .into_iter()
            .map(|h| TrackedOrder {
                order_id: h.order_id,
                parent_id: h.parent_id,
                role: OrderRole::infer(h.parent_id, h.kind),
                status: h.status,
                strategy_tag: tag.clone(),
                symbol: symbol.to_string(),
                action: h.action,
                kind: h.kind,
                quantity: h.quantity,
                price: h.price,
                filled: Decimal::ZERO,
                placed_at: now,
            })
            .collect();
        book.insert_group(group.clone(), legs);
        drop(book);

        info!(
            %identity,
            parent_id = group.parent_order_id,
            take_profit_id = group.take_profit_order_id,
            stop_loss_id = group.stop_loss_order_id,
            direction = %group.direction,
            entry = %group.entry_price,
            take_profit = %group.take_profit,
            stop_loss = %group.stop_loss,
            "Bracket placed"
        );

        self.trade_log.order_placed(OrderPlacedRecord {
            bot_name: self.settings.bot_name.clone(),
            symbol: group.symbol.clone(),
            strategy_name: identity.strategy_name.clone(),
            strategy_tag: tag,
            action: request.action.to_string(),
            quantity: group.quantity,
            entry_price: group.entry_price,
            take_profit: group.take_profit,
            stop_loss: group.stop_loss,
            parent_order_id: group.parent_order_id,
            take_profit_order_id: group.take_profit_order_id,
            stop_loss_order_id: group.stop_loss_order_id,
            placed_at: now,
        });

        Ok(group)
    }

    /// Best-effort cancel of legs from a rejected placement.
    async fn cancel_accepted(&self, handles: &[OrderHandle]) {
        for handle in handles {
            if let Err(e) = self.gateway.cancel(handle.order_id).await {
                debug!(order_id = handle.order_id, error = %e, "Rollback cancel skipped");
            }
        }
    }

    /// Apply a status or cancellation event.
    ///
    /// Returns false when the event was ignored (untracked order,
    /// duplicate or backwards transition).
    pub async fn on_order_update(&self, update: &OrderUpdate) -> bool {
        let mut book = self.book.lock().await;

        let Some(order) = book.orders.get_mut(&update.order_id) else {
            debug!(order_id = update.order_id, status = %update.status, "Update for untracked order");
            return false;
        };

        match transition(order.status, update.status) {
            Transition::Advance => {}
            Transition::Duplicate => return false,
            Transition::Invalid => {
                warn!(
                    order_id = update.order_id,
                    from = %order.status,
                    to = %update.status,
                    "Invalid status transition ignored"
                );
                return false;
            }
        }
        order.status = update.status;
        order.filled = update.filled;

        if !update.status.is_terminal() {
            debug!(order_id = update.order_id, status = %update.status, "Order status updated");
            return true;
        }

        let by_policy = book.policy_cancelled.contains(&update.order_id);
        let Some(order) = book.remove_order(update.order_id) else {
            return false;
        };

        match update.status {
            OrderStatus::Filled => self.on_leg_filled(&mut book, &order, update),
            OrderStatus::Cancelled => {
                info!(
                    order_id = order.order_id,
                    role = order.role.as_str(),
                    by_policy,
                    "Order cancelled"
                );
                self.trade_log.order_cancelled(OrderCancellationRecord {
                    bot_name: self.settings.bot_name.clone(),
                    symbol: order.symbol.clone(),
                    strategy_name: strategy_name_from_tag(&order.strategy_tag),
                    order_id: order.order_id,
                    parent_order_id: order.parent_id,
                    order_purpose: order.role.as_str().to_string(),
                    reason: if by_policy {
                        "strategy_cancel".to_string()
                    } else {
                        "broker_cancel".to_string()
                    },
                    status: update.status.to_string(),
                    cancelled_at: update.time,
                });
            }
            OrderStatus::Rejected => {
                error!(
                    order_id = order.order_id,
                    role = order.role.as_str(),
                    symbol = %order.symbol,
                    "Order rejected by gateway"
                );
            }
            _ => {}
        }

        close_orphaned_position(&mut book, order.group_id());

        if !book.has_monitored(&order.symbol) {
            self.teardown_locked(&mut book, &order.symbol).await;
        }
        true
    }

    fn on_leg_filled(&self, book: &mut OrderBook, order: &TrackedOrder, update: &OrderUpdate) {
        let fill_price = update.avg_fill_price.unwrap_or(order.price);
        let size = if update.filled > Decimal::ZERO {
            update.filled
        } else {
            order.quantity
        };

        let realized_pnl = match order.role {
            OrderRole::Entry => {
                let level = |role| {
                    book.children_of(order.order_id)
                        .find(|o| o.role == role)
                        .map(|o| o.price)
                };
                let position = Position {
                    symbol: order.symbol.clone(),
                    group_id: order.group_id(),
                    direction: order.action.direction(),
                    size,
                    entry_price: fill_price,
                    take_profit: level(OrderRole::TakeProfit),
                    stop_loss: level(OrderRole::StopLoss),
                    unrealized_pnl: Decimal::ZERO,
                    opened_at: update.time,
                    exit_flagged: false,
                };
                info!(
                    symbol = %position.symbol,
                    direction = %position.direction,
                    %size,
                    entry = %fill_price,
                    "Entry filled, position opened"
                );
                book.positions.insert(order.symbol.clone(), position);
                None
            }
            OrderRole::TakeProfit | OrderRole::StopLoss => {
                let owned = book
                    .positions
                    .get(&order.symbol)
                    .is_some_and(|p| p.group_id == order.group_id());
                let realized = if owned {
                    book.positions
                        .remove(&order.symbol)
                        .and_then(|p| p.pnl_at(fill_price))
                } else {
                    None
                };

                let (level, title) = if order.role == OrderRole::TakeProfit {
                    (AlertLevel::Info, "Take profit filled")
                } else {
                    (AlertLevel::Warning, "Stop loss filled")
                };
                info!(
                    order_id = order.order_id,
                    role = order.role.as_str(),
                    price = %fill_price,
                    pnl = ?realized,
                    "Exit leg filled"
                );
                self.notifier.notify(
                    Notification::new(level, title)
                        .with_symbol(&order.symbol)
                        .with_strategy(&strategy_name_from_tag(&order.strategy_tag))
                        .with_order(order.order_id, Some(fill_price), size)
                        .with_pnl(realized),
                );
                realized
            }
        };

        self.trade_log.executed_trade(ExecutedTradeRecord {
            bot_name: self.settings.bot_name.clone(),
            symbol: order.symbol.clone(),
            strategy_name: strategy_name_from_tag(&order.strategy_tag),
            order_id: order.order_id,
            parent_order_id: order.parent_id,
            order_purpose: order.role.as_str().to_string(),
            action: order.action.to_string(),
            quantity: size,
            fill_price: Some(fill_price),
            status: update.status.to_string(),
            realized_pnl,
            executed_at: update.time,
        });
    }

    /// Apply an execution report.
    pub async fn on_fill(&self, fill: &FillReport) -> bool {
        let mut book = self.book.lock().await;
        let Some(order) = book.orders.get_mut(&fill.order_id) else {
            return false;
        };

        order.filled = (order.filled + fill.quantity).min(order.quantity);
        if order.filled < order.quantity
            && transition(order.status, OrderStatus::PartiallyFilled) == Transition::Advance
        {
            order.status = OrderStatus::PartiallyFilled;
        }
        debug!(
            order_id = fill.order_id,
            quantity = %fill.quantity,
            price = %fill.price,
            filled = %order.filled,
            "Execution received"
        );
        true
    }

    pub async fn tracked_order(&self, order_id: u64) -> Option<TrackedOrder> {
        self.book.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn is_monitored(&self, order_id: u64) -> bool {
        self.book.lock().await.monitoring.contains_key(&order_id)
    }

    pub async fn position(&self, symbol: &str) -> Option<Position> {
        self.book.lock().await.positions.get(symbol).cloned()
    }

    pub async fn snapshot(&self) -> BookSnapshot {
        let book = self.book.lock().await;
        let mut tick_subscriptions: Vec<String> = book.tick_subscriptions.iter().cloned().collect();
        tick_subscriptions.sort();
        BookSnapshot {
            tracked_orders: book.orders.len(),
            monitored_orders: book.monitoring.len(),
            groups: book.groups.len(),
            positions: book.positions.values().cloned().collect(),
            tick_subscriptions,
        }
    }
}

/// Match handles to (entry, take-profit, stop-loss), requiring exactly
/// three distinct legs linked to one parent.
fn assign_legs(handles: &[OrderHandle]) -> Option<[&OrderHandle; 3]> {
    if handles.len() != 3 {
        return None;
    }
    let by_role = |role: OrderRole| {
        let mut matches = handles
            .iter()
            .filter(move |h| OrderRole::infer(h.parent_id, h.kind) == role);
        let first = matches.next()?;
        matches.next().is_none().then_some(first)
    };

    let entry = by_role(OrderRole::Entry)?;
    let take_profit = by_role(OrderRole::TakeProfit)?;
    let stop_loss = by_role(OrderRole::StopLoss)?;
    let linked = take_profit.parent_id == entry.order_id && stop_loss.parent_id == entry.order_id;
    linked.then_some([entry, take_profit, stop_loss])
}

/// Drop a position whose bracket has no legs left.
pub(super) fn close_orphaned_position(book: &mut OrderBook, group_id: u64) {
    if book.group_has_legs(group_id) {
        return;
    }
    let orphaned: Vec<String> = book
        .positions
        .values()
        .filter(|p| p.group_id == group_id)
        .map(|p| p.symbol.clone())
        .collect();
    for symbol in orphaned {
        warn!(%symbol, group_id, "Bracket closed without exit fill, dropping position");
        book.positions.remove(&symbol);
    }
}

/// Strategy name from a `STRATEGY:<name>|SYMBOL:<symbol>` tag.
fn strategy_name_from_tag(tag: &str) -> String {
    tag.split('|')
        .find_map(|field| field.strip_prefix("STRATEGY:"))
        .unwrap_or(tag)
        .to_string()
}
