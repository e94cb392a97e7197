//! Checkout error types.

use common::AggregateId;
use domain::card::CardError;
use domain::order::{ReservationId, StockLocationId, VariantId};
use domain::{DomainError, GatewayOperation, OrderError, PaymentError};
use thiserror::Error;

/// Errors that can occur while orchestrating checkout.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(
        "Insufficient stock for {variant_id} at {stock_location}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        variant_id: VariantId,
        stock_location: StockLocationId,
        requested: u32,
        available: u32,
    },

    #[error("Reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// The gateway refused the call. The message is the gateway's own.
    #[error("{message}")]
    Gateway {
        operation: GatewayOperation,
        message: String,
    },

    /// The gateway did not answer in time; the payment is now `processing`.
    #[error("Gateway {operation} for payment {payment_id} timed out after {timeout_ms}ms")]
    GatewayTimeout {
        payment_id: AggregateId,
        operation: GatewayOperation,
        timeout_ms: u64,
    },

    /// Completion stopped because a payment could not be captured.
    #[error("Payment {payment_id} failed: {message}")]
    PaymentFailed {
        payment_id: AggregateId,
        message: String,
    },

    #[error("Payment {payment_id} does not belong to order {order_id}")]
    PaymentNotOnOrder {
        payment_id: AggregateId,
        order_id: AggregateId,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl CheckoutError {
    /// True when re-reading and retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckoutError::Domain(e) => e.is_conflict(),
            _ => false,
        }
    }
}

impl From<OrderError> for CheckoutError {
    fn from(e: OrderError) -> Self {
        CheckoutError::Domain(e.into())
    }
}

impl From<PaymentError> for CheckoutError {
    fn from(e: PaymentError) -> Self {
        CheckoutError::Domain(e.into())
    }
}

impl From<CardError> for CheckoutError {
    fn from(e: CardError) -> Self {
        CheckoutError::Domain(e.into())
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
