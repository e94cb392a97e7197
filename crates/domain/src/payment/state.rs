//! Payment state machine.

use serde::{Deserialize, Serialize};

/// The state of a payment.
///
/// ```text
/// Checkout ──► Pending ──┬──► Completed ──► Void
///    │            │      ├──► Failed
///    │            │      └──► Processing (gateway outcome unknown)
///    └────────────┴──► Void
/// ```
/// Credits keep a payment `Completed`; they accumulate until the captured
/// amount is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Created during checkout, nothing sent to the gateway.
    #[default]
    Checkout,

    /// Authorized, waiting for capture.
    Pending,

    /// A gateway call timed out; resolved only by reconciliation.
    Processing,

    Completed,

    Failed,

    Void,
}

impl PaymentState {
    pub fn can_authorize(&self) -> bool {
        matches!(self, PaymentState::Checkout)
    }

    pub fn can_capture(&self) -> bool {
        matches!(self, PaymentState::Pending | PaymentState::Checkout)
    }

    pub fn can_void(&self) -> bool {
        !matches!(self, PaymentState::Void)
    }

    /// Failed and voided payments never count toward an order's total.
    pub fn counts_toward_total(&self) -> bool {
        !matches!(self, PaymentState::Failed | PaymentState::Void)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Checkout => "checkout",
            PaymentState::Pending => "pending",
            PaymentState::Processing => "processing",
            PaymentState::Completed => "completed",
            PaymentState::Failed => "failed",
            PaymentState::Void => "void",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
