//! Payment aggregate: gateway transactions against one payment source.

mod aggregate;
mod commands;
mod events;
mod service;
mod source;
mod state;

pub use aggregate::{Credit, GatewayOperation, GatewayOutcome, GatewayRequest, Payment};
pub use commands::*;
pub use events::{
    GatewayCallFailedData, OutcomeRef, PaymentAuthorizedData, PaymentCapturedData,
    PaymentCreatedData, PaymentCreditedData, PaymentEvent, PaymentFailedData, PaymentVoidedData,
};
pub use service::PaymentService;
pub use source::{Check, PaymentAction, PaymentSource, SourceCapabilities};
pub use state::PaymentState;

use crate::order::Money;
use thiserror::Error;

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment already created")]
    AlreadyCreated,

    #[error("Payment has not been created")]
    NotCreated,

    /// The payment's state does not allow the operation.
    #[error("Cannot {action} a payment in {state} state")]
    IncompleteState {
        state: PaymentState,
        action: &'static str,
    },

    #[error("Cannot credit {requested}: only {allowed} is creditable")]
    OverCredit { requested: Money, allowed: Money },

    #[error("Nothing is due on the order; capture skipped")]
    NothingDue,

    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: Money },

    #[error("Gateway request {key} is still unresolved")]
    RequestInFlight { key: String },

    #[error("No outstanding gateway request with key {key}")]
    UnknownRequest { key: String },
}
