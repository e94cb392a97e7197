//! Payment aggregate implementation.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::order::{Money, PaymentSummary};

use super::events::{
    GatewayCallFailedData, OutcomeRef, PaymentAuthorizedData, PaymentCapturedData,
    PaymentCreatedData, PaymentCreditedData, PaymentFailedData, PaymentVoidedData,
};
use super::{PaymentAction, PaymentError, PaymentEvent, PaymentSource, PaymentState, SourceCapabilities};

/// Kind of call made to the payment gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    Authorize,
    Capture,
    Void,
    Credit,
}

impl GatewayOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::Authorize => "authorize",
            GatewayOperation::Capture => "capture",
            GatewayOperation::Void => "void",
            GatewayOperation::Credit => "credit",
        }
    }
}

impl std::fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gateway call recorded before it is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub operation: GatewayOperation,

    /// `{payment_id}:{operation}:{attempt}`.
    pub idempotency_key: String,

    pub amount: Money,
    pub attempt: u32,

    /// State the payment was in when the request was made.
    pub previous_state: PaymentState,
}

/// What the gateway (or an operator, when reconciling) reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOutcome {
    pub success: bool,
    pub transaction_ref: Option<String>,
    pub message: Option<String>,
}

impl GatewayOutcome {
    pub fn success(transaction_ref: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_ref: Some(transaction_ref.into()),
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_ref: None,
            message: Some(message.into()),
        }
    }
}

/// A refund issued against captured funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub amount: Money,
    pub transaction_ref: Option<String>,
}

/// Payment aggregate.
///
/// Gateway interaction is split in two: a `begin_*` command records the
/// request (and its idempotency key) and [`Payment::record_outcome`] stores the
/// answer. The processor making the call sits between the two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    id: Option<AggregateId>,
    order_id: Option<AggregateId>,
    source: Option<PaymentSource>,
    amount: Money,
    state: PaymentState,
    transaction_ref: Option<String>,
    captured: Money,
    credits: Vec<Credit>,
    attempts: u32,
    pending_request: Option<GatewayRequest>,
    resolved_keys: HashSet<String>,
    message: Option<String>,
    surplus: Money,
    created_at: Option<DateTime<Utc>>,
    version: Version,
}

impl Aggregate for Payment {
    type Event = PaymentEvent;
    type Error = PaymentError;

    fn aggregate_type() -> &'static str {
        "Payment"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            PaymentEvent::PaymentCreated(data) => {
                self.id = Some(data.payment_id);
                self.order_id = Some(data.order_id);
                self.source = Some(data.source);
                self.amount = data.amount;
                self.created_at = Some(data.created_at);
                self.state = PaymentState::Checkout;
            }
            PaymentEvent::GatewayRequestRecorded(request) => {
                self.attempts = request.attempt;
                self.pending_request = Some(request);
            }
            PaymentEvent::PaymentAuthorized(data) => {
                self.resolve(data.idempotency_key);
                self.state = PaymentState::Pending;
                self.transaction_ref = data.transaction_ref;
                self.message = data.message;
            }
            PaymentEvent::PaymentCaptured(data) => {
                self.resolve(data.idempotency_key);
                self.state = PaymentState::Completed;
                self.captured += data.amount;
                self.surplus = data.surplus;
                if data.transaction_ref.is_some() {
                    self.transaction_ref = data.transaction_ref;
                }
            }
            PaymentEvent::PaymentVoided(data) => {
                if let Some(key) = data.idempotency_key {
                    self.resolve(key);
                }
                self.state = PaymentState::Void;
                self.message = data.message;
            }
            PaymentEvent::PaymentCredited(data) => {
                self.resolve(data.idempotency_key);
                self.state = PaymentState::Completed;
                self.credits.push(Credit {
                    amount: data.amount,
                    transaction_ref: data.transaction_ref,
                });
            }
            PaymentEvent::PaymentFailed(data) => {
                self.resolve(data.idempotency_key);
                self.state = PaymentState::Failed;
                self.message = data.message;
            }
            PaymentEvent::GatewayCallFailed(data) => {
                self.resolve(data.idempotency_key);
                self.state = data.restored_state;
                self.message = data.message;
            }
            PaymentEvent::PaymentMarkedProcessing(_) => {
                self.state = PaymentState::Processing;
            }
        }
    }
}

impl Payment {
    fn resolve(&mut self, key: String) {
        if self
            .pending_request
            .as_ref()
            .is_some_and(|request| request.idempotency_key == key)
        {
            self.pending_request = None;
        }
        self.resolved_keys.insert(key);
    }

    // Queries

    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    pub fn source(&self) -> Option<&PaymentSource> {
        self.source.as_ref()
    }

    pub fn amount(&self) -> Money {
        self.amount
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn transaction_ref(&self) -> Option<&str> {
        self.transaction_ref.as_deref()
    }

    pub fn captured(&self) -> Money {
        self.captured
    }

    pub fn credits(&self) -> &[Credit] {
        &self.credits
    }

    pub fn credited(&self) -> Money {
        self.credits.iter().map(|c| c.amount).sum()
    }

    /// Captured funds not yet refunded.
    pub fn credit_allowed(&self) -> Money {
        (self.captured - self.credited()).non_negative()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn pending_request(&self) -> Option<&GatewayRequest> {
        self.pending_request.as_ref()
    }

    pub fn is_resolved(&self, key: &str) -> bool {
        self.resolved_keys.contains(key)
    }

    /// Last message returned by the gateway.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Authorized but uncaptured amount flagged for manual review.
    pub fn surplus(&self) -> Money {
        self.surplus
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn can_capture(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.can_capture(self))
    }

    pub fn can_void(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.can_void(self))
    }

    pub fn can_credit(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.can_credit(self))
    }

    /// Actions currently available on this payment.
    pub fn actions(&self) -> Vec<PaymentAction> {
        let Some(source) = &self.source else {
            return Vec::new();
        };

        source
            .actions()
            .iter()
            .copied()
            .filter(|action| match action {
                PaymentAction::Capture => self.can_capture(),
                PaymentAction::Void => self.can_void(),
                PaymentAction::Credit => self.can_credit(),
            })
            .collect()
    }

    pub fn summary(&self) -> Option<PaymentSummary> {
        Some(PaymentSummary {
            payment_id: self.id?,
            state: self.state,
            amount: self.amount,
            captured: self.captured,
            credited: self.credited(),
        })
    }

    /// Key for the next gateway call of the given kind.
    pub fn next_key(&self, operation: GatewayOperation) -> Option<String> {
        self.id
            .map(|id| format!("{}:{}:{}", id, operation.as_str(), self.attempts + 1))
    }

    // Commands

    pub fn create(
        &self,
        payment_id: AggregateId,
        order_id: AggregateId,
        source: PaymentSource,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.id.is_some() {
            return Err(PaymentError::AlreadyCreated);
        }
        if amount.is_negative() {
            return Err(PaymentError::InvalidAmount { amount });
        }

        Ok(vec![PaymentEvent::PaymentCreated(PaymentCreatedData {
            payment_id,
            order_id,
            source,
            amount,
            created_at: now,
        })])
    }

    pub fn begin_authorize(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_idle()?;
        if !self.state.can_authorize() {
            return Err(self.incomplete("authorize"));
        }

        self.request(GatewayOperation::Authorize, self.amount)
    }

    /// Records a capture request. The payment must already be authorized.
    pub fn begin_capture(&self, amount: Money) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_idle()?;
        if !self.can_capture() || self.state != PaymentState::Pending {
            return Err(self.incomplete("capture"));
        }
        if !amount.is_positive() {
            return Err(PaymentError::NothingDue);
        }

        self.request(GatewayOperation::Capture, amount)
    }

    /// Voids the payment.
    ///
    /// A payment that never reached the gateway is voided locally, and
    /// voiding a void payment produces no events.
    pub fn begin_void(&self) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_idle()?;
        match self.state {
            PaymentState::Void => Ok(vec![]),
            PaymentState::Processing => Err(self.incomplete("void")),
            PaymentState::Checkout | PaymentState::Failed => {
                Ok(vec![PaymentEvent::PaymentVoided(PaymentVoidedData {
                    idempotency_key: None,
                    message: None,
                })])
            }
            PaymentState::Pending | PaymentState::Completed => {
                self.request(GatewayOperation::Void, self.amount)
            }
        }
    }

    /// Records a credit request. `None` credits everything still creditable.
    pub fn begin_credit(&self, amount: Option<Money>) -> Result<Vec<PaymentEvent>, PaymentError> {
        self.ensure_idle()?;
        if !self.can_credit() {
            return Err(self.incomplete("credit"));
        }

        let allowed = self.credit_allowed();
        let amount = amount.unwrap_or(allowed);
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount { amount });
        }
        if amount > allowed {
            return Err(PaymentError::OverCredit {
                requested: amount,
                allowed,
            });
        }

        self.request(GatewayOperation::Credit, amount)
    }

    /// Stores the outcome of a recorded request.
    ///
    /// An outcome for a key that was already resolved produces no events.
    pub fn record_outcome(
        &self,
        key: &str,
        outcome: GatewayOutcome,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.is_resolved(key) {
            return Ok(vec![]);
        }
        let request = self
            .pending_request
            .as_ref()
            .filter(|request| request.idempotency_key == key)
            .ok_or_else(|| PaymentError::UnknownRequest {
                key: key.to_string(),
            })?;

        let idempotency_key = key.to_string();
        let GatewayOutcome {
            success,
            transaction_ref,
            message,
        } = outcome;

        let event = match (request.operation, success) {
            (GatewayOperation::Authorize, true) => {
                PaymentEvent::PaymentAuthorized(PaymentAuthorizedData {
                    idempotency_key,
                    transaction_ref,
                    message,
                })
            }
            (GatewayOperation::Capture, true) => {
                PaymentEvent::PaymentCaptured(PaymentCapturedData {
                    idempotency_key,
                    amount: request.amount,
                    transaction_ref,
                    surplus: (self.amount - request.amount).non_negative(),
                })
            }
            (GatewayOperation::Void, true) => PaymentEvent::PaymentVoided(PaymentVoidedData {
                idempotency_key: Some(idempotency_key),
                message,
            }),
            (GatewayOperation::Credit, true) => {
                PaymentEvent::PaymentCredited(PaymentCreditedData {
                    idempotency_key,
                    amount: request.amount,
                    transaction_ref,
                })
            }
            (operation @ (GatewayOperation::Authorize | GatewayOperation::Capture), false) => {
                PaymentEvent::PaymentFailed(PaymentFailedData {
                    idempotency_key,
                    operation,
                    message,
                })
            }
            (operation @ (GatewayOperation::Void | GatewayOperation::Credit), false) => {
                PaymentEvent::GatewayCallFailed(GatewayCallFailedData {
                    idempotency_key,
                    operation,
                    message,
                    restored_state: request.previous_state,
                })
            }
        };

        Ok(vec![event])
    }

    /// The gateway did not answer in time; the outcome is unknown.
    pub fn mark_processing(&self, key: &str) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.is_resolved(key) || self.state == PaymentState::Processing {
            return Ok(vec![]);
        }
        match &self.pending_request {
            Some(request) if request.idempotency_key == key => {
                Ok(vec![PaymentEvent::PaymentMarkedProcessing(OutcomeRef {
                    idempotency_key: key.to_string(),
                })])
            }
            _ => Err(PaymentError::UnknownRequest {
                key: key.to_string(),
            }),
        }
    }

    /// Resolves a `processing` payment with an outcome learned afterwards.
    pub fn reconcile(&self, outcome: GatewayOutcome) -> Result<Vec<PaymentEvent>, PaymentError> {
        if self.state != PaymentState::Processing {
            return Err(self.incomplete("reconcile"));
        }
        let key = match &self.pending_request {
            Some(request) => request.idempotency_key.clone(),
            None => return Err(self.incomplete("reconcile")),
        };

        self.record_outcome(&key, outcome)
    }

    fn request(
        &self,
        operation: GatewayOperation,
        amount: Money,
    ) -> Result<Vec<PaymentEvent>, PaymentError> {
        let idempotency_key = self.next_key(operation).ok_or(PaymentError::NotCreated)?;

        Ok(vec![PaymentEvent::GatewayRequestRecorded(GatewayRequest {
            operation,
            idempotency_key,
            amount,
            attempt: self.attempts + 1,
            previous_state: self.state,
        })])
    }

    fn ensure_idle(&self) -> Result<(), PaymentError> {
        if self.id.is_none() {
            return Err(PaymentError::NotCreated);
        }
        match &self.pending_request {
            Some(request) if self.state != PaymentState::Processing => {
                Err(PaymentError::RequestInFlight {
                    key: request.idempotency_key.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn incomplete(&self, action: &'static str) -> PaymentError {
        PaymentError::IncompleteState {
            state: self.state,
            action,
        }
    }
}
