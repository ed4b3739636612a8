//! Error types for execution, monitoring and reconciliation.

use crate::gateway::GatewayError;
use thiserror::Error;

/// Errors returned at the signal-to-order boundary.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("No instrument definition for {symbol}")]
    NoContract { symbol: String },

    #[error("Failed to qualify instrument {symbol}: {source}")]
    ContractResolution {
        symbol: String,
        #[source]
        source: GatewayError,
    },

    #[error("Position already open for {symbol}")]
    PositionExists { symbol: String },

    #[error("Concurrency limit reached: {current}/{max} active trades")]
    ConcurrencyLimitReached { current: usize, max: usize },

    #[error("Bracket placement failed: {accepted} of 3 legs accepted ({reason})")]
    BracketPlacement { accepted: usize, reason: String },
}

impl ExecutionError {
    /// Routine rejections that drop the signal without alerting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ExecutionError::PositionExists { .. } | ExecutionError::ConcurrencyLimitReached { .. }
        )
    }

    /// Short reason string for trade log records.
    pub fn reason(&self) -> &'static str {
        match self {
            ExecutionError::NoContract { .. } => "no_contract",
            ExecutionError::ContractResolution { .. } => "contract_resolution",
            ExecutionError::PositionExists { .. } => "position_exists",
            ExecutionError::ConcurrencyLimitReached { .. } => "concurrency_limit",
            ExecutionError::BracketPlacement { .. } => "bracket_placement",
        }
    }
}

/// Errors raised while monitoring open brackets.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Isolated to one order; never aborts a monitoring pass.
    #[error("Cancel policy failed for order {order_id}: {reason}")]
    PolicyEvaluation { order_id: u64, reason: String },

    #[error("No instrument definition for {symbol}")]
    NoContract { symbol: String },

    #[error("Tick subscription failed: {0}")]
    Subscription(#[from] GatewayError),
}

/// Errors raised while reconciling against the gateway.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error("Gateway order query failed: {0}")]
    Query(#[source] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ExecutionError::PositionExists {
            symbol: "ES".to_string()
        }
        .is_recoverable());
        assert!(ExecutionError::ConcurrencyLimitReached { current: 1, max: 1 }.is_recoverable());
        assert!(!ExecutionError::BracketPlacement {
            accepted: 2,
            reason: "short handle count".to_string()
        }
        .is_recoverable());
        assert!(!ExecutionError::NoContract {
            symbol: "ES".to_string()
        }
        .is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ExecutionError::ConcurrencyLimitReached { current: 2, max: 2 };
        assert_eq!(err.to_string(), "Concurrency limit reached: 2/2 active trades");

        assert_eq!(err.reason(), "concurrency_limit");

        let err = ReconciliationError::Query(GatewayError::Query("timeout".to_string()));
        assert_eq!(
            err.to_string(),
            "Gateway order query failed: Order query failed: timeout"
        );
    }
}
