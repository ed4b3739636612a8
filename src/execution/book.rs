//! Engine-owned order bookkeeping.
//!
//! Everything in [`OrderBook`] is guarded by the engine's single mutex;
//! tick-driven cancellation and status-driven removal both mutate it.

use crate::gateway::{Direction, GatewayOrder, Instrument, OrderAction, OrderKind, OrderStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Which leg of a bracket an order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderRole {
    Entry,
    TakeProfit,
    StopLoss,
}

impl OrderRole {
    /// Infer a leg's role from its parent link and order type.
    pub fn infer(parent_id: u64, kind: OrderKind) -> Self {
        match (parent_id, kind) {
            (0, _) => OrderRole::Entry,
            (_, OrderKind::Stop) => OrderRole::StopLoss,
            (_, OrderKind::Limit) => OrderRole::TakeProfit,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderRole::Entry => "ENTRY",
            OrderRole::TakeProfit => "TAKE_PROFIT",
            OrderRole::StopLoss => "STOP_LOSS",
        }
    }
}

/// Local view of one bracket leg.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
    pub order_id: u64,
    /// 0 if this is the parent
    pub parent_id: u64,
    pub role: OrderRole,
    pub status: OrderStatus,
    pub strategy_tag: String,
    pub symbol: String,
    pub action: OrderAction,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub price: Decimal,
    pub filled: Decimal,
    pub placed_at: DateTime<Utc>,
}

impl TrackedOrder {
    /// Id shared by every leg of the same bracket.
    pub fn group_id(&self) -> u64 {
        group_key(self.order_id, self.parent_id)
    }

    /// Adopt an order reported by the gateway.
    pub fn adopted(order: &GatewayOrder, observed_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order.order_id,
            parent_id: order.parent_id,
            role: OrderRole::infer(order.parent_id, order.kind),
            status: order.status,
            strategy_tag: order.order_ref.clone(),
            symbol: order.symbol.clone(),
            action: order.action,
            kind: order.kind,
            quantity: order.quantity,
            price: order.price,
            filled: order.filled,
            placed_at: observed_at,
        }
    }
}

/// Grouping key: the parent's id for children, the order's own id otherwise.
pub fn group_key(order_id: u64, parent_id: u64) -> u64 {
    if parent_id == 0 {
        order_id
    } else {
        parent_id
    }
}

/// A successfully placed three-leg bracket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BracketGroup {
    pub parent_order_id: u64,
    pub take_profit_order_id: u64,
    pub stop_loss_order_id: u64,
    pub symbol: String,
    pub strategy_tag: String,
    pub direction: Direction,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub created_at: DateTime<Utc>,
}

impl BracketGroup {
    pub fn order_ids(&self) -> [u64; 3] {
        [
            self.parent_order_id,
            self.take_profit_order_id,
            self.stop_loss_order_id,
        ]
    }
}

/// Best-effort position opened by a filled entry leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub group_id: u64,
    pub direction: Direction,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub unrealized_pnl: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Set once the price-based exit condition has been reported
    pub exit_flagged: bool,
}

impl Position {
    /// PnL of the position marked at `price`, `None` on overflow.
    pub fn pnl_at(&self, price: Decimal) -> Option<Decimal> {
        let move_per_unit = match self.direction {
            Direction::Long => price.checked_sub(self.entry_price),
            Direction::Short => self.entry_price.checked_sub(price),
        }?;
        move_per_unit.checked_mul(self.size)
    }

    /// Keeps the previous value when the mark overflows.
    pub fn update_pnl(&mut self, price: Decimal) {
        if let Some(pnl) = self.pnl_at(price) {
            self.unrealized_pnl = pnl;
        }
    }

    /// Whether `price` has crossed the take-profit or stop-loss level.
    pub fn exit_condition(&self, price: Decimal) -> Option<OrderRole> {
        let tp_hit = self.take_profit.is_some_and(|tp| match self.direction {
            Direction::Long => price >= tp,
            Direction::Short => price <= tp,
        });
        let sl_hit = self.stop_loss.is_some_and(|sl| match self.direction {
            Direction::Long => price <= sl,
            Direction::Short => price >= sl,
        });

        if sl_hit {
            Some(OrderRole::StopLoss)
        } else if tp_hit {
            Some(OrderRole::TakeProfit)
        } else {
            None
        }
    }
}

/// Shared maps owned by one engine instance.
#[derive(Debug, Default)]
pub struct OrderBook {
    pub instruments: HashMap<String, Instrument>,
    pub orders: BTreeMap<u64, TrackedOrder>,
    /// order id -> time the order was placed (or observed)
    pub monitoring: BTreeMap<u64, DateTime<Utc>>,
    pub groups: BTreeMap<u64, BracketGroup>,
    pub positions: HashMap<String, Position>,
    pub tick_subscriptions: HashSet<String>,
    /// Orders whose cancellation was requested by the cancel policy
    pub policy_cancelled: HashSet<u64>,
}

impl OrderBook {
    /// Register all three legs of a freshly placed bracket.
    pub fn insert_group(&mut self, group: BracketGroup, legs: Vec<TrackedOrder>) {
        for leg in legs {
            self.orders.insert(leg.order_id, leg);
        }
        self.groups.insert(group.parent_order_id, group);
    }

    /// Drop an order from tracking and monitoring.
    ///
    /// Also drops its group once no leg remains.
    pub fn remove_order(&mut self, order_id: u64) -> Option<TrackedOrder> {
        self.monitoring.remove(&order_id);
        self.policy_cancelled.remove(&order_id);
        let order = self.orders.remove(&order_id)?;

        let group_id = order.group_id();
        if !self.group_has_legs(group_id) {
            self.groups.remove(&group_id);
        }
        Some(order)
    }

    pub fn group_has_legs(&self, group_id: u64) -> bool {
        self.orders.values().any(|o| o.group_id() == group_id)
    }

    /// Open legs whose parent is `parent_id`.
    pub fn children_of(&self, parent_id: u64) -> impl Iterator<Item = &TrackedOrder> {
        self.orders.values().filter(move |o| o.parent_id == parent_id)
    }

    /// Monitored orders for a symbol, with their placement times.
    pub fn monitored_for(&self, symbol: &str) -> Vec<(u64, DateTime<Utc>)> {
        self.monitoring
            .iter()
            .filter(|(id, _)| self.orders.get(*id).is_some_and(|o| o.symbol == symbol))
            .map(|(id, placed_at)| (*id, *placed_at))
            .collect()
    }

    pub fn has_monitored(&self, symbol: &str) -> bool {
        self.monitoring
            .keys()
            .any(|id| self.orders.get(id).is_some_and(|o| o.symbol == symbol))
    }

    /// Tracked order ids carrying a tag accepted by `owns`.
    pub fn order_ids_where(&self, owns: impl Fn(&str) -> bool) -> BTreeSet<u64> {
        self.orders
            .values()
            .filter(|o| owns(&o.strategy_tag))
            .map(|o| o.order_id)
            .collect()
    }

    /// Distinct non-terminal groups carrying a tag accepted by `owns`.
    pub fn active_groups_where(&self, owns: impl Fn(&str) -> bool) -> BTreeSet<u64> {
        self.orders
            .values()
            .filter(|o| o.status.is_active() && owns(&o.strategy_tag))
            .map(|o| o.group_id())
            .collect()
    }
}
