//! Payment sources and what they allow.

use serde::{Deserialize, Serialize};

use crate::card::CreditCard;

use super::{Payment, PaymentState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentAction {
    Capture,
    Void,
    Credit,
}

/// Capabilities every payment source exposes.
pub trait SourceCapabilities {
    /// Stable identity of the stored source.
    fn identity(&self) -> String;

    /// Masked, customer-facing rendering.
    fn display(&self) -> String;

    fn can_capture(&self, payment: &Payment) -> bool;

    fn can_void(&self, payment: &Payment) -> bool;

    fn can_credit(&self, payment: &Payment) -> bool;

    /// Actions this kind of source supports at all.
    fn actions(&self) -> &'static [PaymentAction];
}

/// A paper check. Carries nothing sensitive and cannot be refunded through
/// the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub payer: String,
    #[serde(default)]
    pub check_number: Option<String>,
}

impl SourceCapabilities for CreditCard {
    fn identity(&self) -> String {
        self.id.to_string()
    }

    fn display(&self) -> String {
        self.display_number()
    }

    fn can_capture(&self, payment: &Payment) -> bool {
        matches!(payment.state(), PaymentState::Pending | PaymentState::Checkout)
    }

    fn can_void(&self, payment: &Payment) -> bool {
        payment.state() != PaymentState::Void
    }

    fn can_credit(&self, payment: &Payment) -> bool {
        payment.state() == PaymentState::Completed && payment.credit_allowed().is_positive()
    }

    fn actions(&self) -> &'static [PaymentAction] {
        &[PaymentAction::Capture, PaymentAction::Void, PaymentAction::Credit]
    }
}

impl SourceCapabilities for Check {
    fn identity(&self) -> String {
        match &self.check_number {
            Some(number) => format!("check:{number}"),
            None => format!("check:{}", self.payer),
        }
    }

    fn display(&self) -> String {
        match &self.check_number {
            Some(number) => format!("Check #{number} from {}", self.payer),
            None => format!("Check from {}", self.payer),
        }
    }

    fn can_capture(&self, payment: &Payment) -> bool {
        matches!(payment.state(), PaymentState::Pending | PaymentState::Checkout)
    }

    fn can_void(&self, payment: &Payment) -> bool {
        payment.state() != PaymentState::Void
    }

    fn can_credit(&self, _payment: &Payment) -> bool {
        false
    }

    fn actions(&self) -> &'static [PaymentAction] {
        &[PaymentAction::Capture, PaymentAction::Void]
    }
}

/// The instrument a payment is drawn from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentSource {
    CreditCard(CreditCard),
    Check(Check),
}

impl PaymentSource {
    fn inner(&self) -> &dyn SourceCapabilities {
        match self {
            PaymentSource::CreditCard(card) => card,
            PaymentSource::Check(check) => check,
        }
    }

    pub fn as_credit_card(&self) -> Option<&CreditCard> {
        match self {
            PaymentSource::CreditCard(card) => Some(card),
            PaymentSource::Check(_) => None,
        }
    }
}

impl SourceCapabilities for PaymentSource {
    fn identity(&self) -> String {
        self.inner().identity()
    }

    fn display(&self) -> String {
        self.inner().display()
    }

    fn can_capture(&self, payment: &Payment) -> bool {
        self.inner().can_capture(payment)
    }

    fn can_void(&self, payment: &Payment) -> bool {
        self.inner().can_void(payment)
    }

    fn can_credit(&self, payment: &Payment) -> bool {
        self.inner().can_credit(payment)
    }

    fn actions(&self) -> &'static [PaymentAction] {
        self.inner().actions()
    }
}
