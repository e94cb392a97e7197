//! Order state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Cart ──► Address ──► Delivery ──► Payment ──► Confirm ──► Complete ──┬──► Canceled
///   │         │           │            │           │                   └──► Returned
///   └─────────┴───────────┴────────────┴───────────┴──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Items are being added.
    #[default]
    Cart,

    /// Waiting for a ship address.
    Address,

    /// Waiting for shipments and shipping rates.
    Delivery,

    /// Waiting for payments covering the total.
    Payment,

    /// Ready to be completed.
    Confirm,

    /// Placed. Payments captured, stock committed.
    Complete,

    /// Terminal.
    Canceled,

    /// Terminal. Goods came back after completion.
    Returned,
}

impl OrderState {
    /// The state `advance` moves to, if the state can advance at all.
    pub fn next(&self) -> Option<OrderState> {
        match self {
            OrderState::Cart => Some(OrderState::Address),
            OrderState::Address => Some(OrderState::Delivery),
            OrderState::Delivery => Some(OrderState::Payment),
            OrderState::Payment => Some(OrderState::Confirm),
            _ => None,
        }
    }

    /// Line items, shipments and adjustments can be edited.
    pub fn can_modify(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, OrderState::Confirm)
    }

    pub fn can_cancel(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_return(&self) -> bool {
        matches!(self, OrderState::Complete)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, OrderState::Complete)
    }

    /// No further transitions or edits are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderState::Canceled | OrderState::Returned)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Cart => "cart",
            OrderState::Address => "address",
            OrderState::Delivery => "delivery",
            OrderState::Payment => "payment",
            OrderState::Confirm => "confirm",
            OrderState::Complete => "complete",
            OrderState::Canceled => "canceled",
            OrderState::Returned => "returned",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
