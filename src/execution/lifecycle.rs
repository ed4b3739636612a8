//! Order lifecycle state machine.
//!
//! PENDING -> SUBMITTED -> {PARTIALLY_FILLED -> FILLED, CANCELLED, REJECTED}

use crate::gateway::OrderStatus;

/// Outcome of applying a reported status to a tracked order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status moves the order forward.
    Advance,
    /// Same status reported again.
    Duplicate,
    /// Backwards or out-of-terminal move; ignored.
    Invalid,
}

/// Classify a status change from `from` to `to`.
pub fn transition(from: OrderStatus, to: OrderStatus) -> Transition {
    use OrderStatus::*;

    // repeated partial fills carry new quantities
    if from == to && from != PartiallyFilled {
        return Transition::Duplicate;
    }

    match (from, to) {
        (Pending, _) => Transition::Advance,
        (Submitted, PartiallyFilled | Filled | Cancelled | Rejected) => Transition::Advance,
        (PartiallyFilled, PartiallyFilled | Filled | Cancelled) => Transition::Advance,
        _ => Transition::Invalid,
    }
}
