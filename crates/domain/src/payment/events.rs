//! Payment domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::order::Money;

use super::{GatewayOperation, GatewayRequest, PaymentSource, PaymentState};

/// Events that can occur on a payment aggregate.
///
/// Every gateway outcome carries the key of the request it resolves and
/// reports that key from [`DomainEvent::idempotency_key`], so the same
/// outcome can never be stored twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PaymentEvent {
    PaymentCreated(PaymentCreatedData),

    /// Written before the gateway is called.
    GatewayRequestRecorded(GatewayRequest),

    PaymentAuthorized(PaymentAuthorizedData),

    PaymentCaptured(PaymentCapturedData),

    PaymentVoided(PaymentVoidedData),

    PaymentCredited(PaymentCreditedData),

    /// Authorization or capture was declined.
    PaymentFailed(PaymentFailedData),

    /// A void or credit was refused; the payment keeps its state.
    GatewayCallFailed(GatewayCallFailedData),

    /// The gateway did not answer in time. The outcome is unknown.
    PaymentMarkedProcessing(OutcomeRef),
}

impl DomainEvent for PaymentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PaymentEvent::PaymentCreated(_) => "PaymentCreated",
            PaymentEvent::GatewayRequestRecorded(_) => "GatewayRequestRecorded",
            PaymentEvent::PaymentAuthorized(_) => "PaymentAuthorized",
            PaymentEvent::PaymentCaptured(_) => "PaymentCaptured",
            PaymentEvent::PaymentVoided(_) => "PaymentVoided",
            PaymentEvent::PaymentCredited(_) => "PaymentCredited",
            PaymentEvent::PaymentFailed(_) => "PaymentFailed",
            PaymentEvent::GatewayCallFailed(_) => "GatewayCallFailed",
            PaymentEvent::PaymentMarkedProcessing(_) => "PaymentMarkedProcessing",
        }
    }

    fn idempotency_key(&self) -> Option<&str> {
        match self {
            PaymentEvent::PaymentAuthorized(data) => Some(&data.idempotency_key),
            PaymentEvent::PaymentCaptured(data) => Some(&data.idempotency_key),
            PaymentEvent::PaymentVoided(data) => data.idempotency_key.as_deref(),
            PaymentEvent::PaymentCredited(data) => Some(&data.idempotency_key),
            PaymentEvent::PaymentFailed(data) => Some(&data.idempotency_key),
            PaymentEvent::GatewayCallFailed(data) => Some(&data.idempotency_key),
            PaymentEvent::PaymentCreated(_)
            | PaymentEvent::GatewayRequestRecorded(_)
            | PaymentEvent::PaymentMarkedProcessing(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCreatedData {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub source: PaymentSource,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAuthorizedData {
    pub idempotency_key: String,
    pub transaction_ref: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCapturedData {
    pub idempotency_key: String,
    pub amount: Money,
    pub transaction_ref: Option<String>,

    /// Authorized amount left uncaptured, held for manual review.
    pub surplus: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentVoidedData {
    /// None when the void never reached the gateway.
    pub idempotency_key: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCreditedData {
    pub idempotency_key: String,
    pub amount: Money,
    pub transaction_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailedData {
    pub idempotency_key: String,
    pub operation: GatewayOperation,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayCallFailedData {
    pub idempotency_key: String,
    pub operation: GatewayOperation,
    pub message: Option<String>,

    /// State the payment returns to.
    pub restored_state: PaymentState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRef {
    pub idempotency_key: String,
}
