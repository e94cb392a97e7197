//! Domain error types.

use common::AggregateId;
use event_store::{EventStoreError, Version};
use thiserror::Error;

use crate::card::CardError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The record changed since it was read; re-read and retry.
    #[error("Conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    Conflict {
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    #[error("Card error: {0}")]
    Card(#[from] CardError),

    #[error("Aggregate not found: {aggregate_type} with id {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        aggregate_id: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn not_found(aggregate_type: &'static str, aggregate_id: AggregateId) -> Self {
        DomainError::AggregateNotFound {
            aggregate_type,
            aggregate_id: aggregate_id.to_string(),
        }
    }

    /// True when retrying after a fresh read may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::Conflict { .. })
    }
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => DomainError::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            EventStoreError::Serialization(e) => DomainError::Serialization(e),
            other => DomainError::EventStore(other),
        }
    }
}
