//! Strategy identity used to tag and isolate orders on a shared session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// (strategy, symbol) pair owning a set of orders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyIdentity {
    pub strategy_name: String,
    pub symbol: String,
}

impl StrategyIdentity {
    pub fn new(strategy_name: &str, symbol: &str) -> Self {
        Self {
            strategy_name: strategy_name.to_string(),
            symbol: symbol.to_string(),
        }
    }

    /// Tag attached to every order, e.g. `STRATEGY:demo|SYMBOL:ES`.
    pub fn tag(&self) -> String {
        format!("STRATEGY:{}|SYMBOL:{}", self.strategy_name, self.symbol)
    }

    /// Whether an order reference belongs to this identity.
    ///
    /// The tag must match exactly or continue with a `|` separated field,
    /// so `SYMBOL:ES` never claims orders tagged `SYMBOL:ESZ4`.
    pub fn owns(&self, order_ref: &str) -> bool {
        let tag = self.tag();
        match order_ref.strip_prefix(tag.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('|'),
            None => false,
        }
    }
}

impl fmt::Display for StrategyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.strategy_name, self.symbol)
    }
}
