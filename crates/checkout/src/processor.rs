//! Drives payments through the gateway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AggregateId, Clock};
use domain::payment::{ReconcilePayment, RecordGatewayOutcome};
use domain::{
    GatewayOperation, GatewayOutcome, Money, Payment, PaymentError, PaymentService, PaymentState,
};
use event_store::EventStore;
use tokio::sync::Mutex;

use crate::error::{CheckoutError, Result};
use crate::services::PaymentGateway;

/// Runs authorize, capture, void and credit against the gateway.
///
/// Each operation holds a per-payment lock from the moment it reads the
/// payment until the outcome is stored, so a second operation on the same
/// payment waits and then sees the first one's result. The request and its
/// idempotency key are stored before the gateway is called; the answer is
/// stored exactly once afterwards.
pub struct PaymentProcessor<S: EventStore, G: PaymentGateway> {
    payments: PaymentService<S>,
    gateway: G,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    locks: Mutex<HashMap<AggregateId, Arc<Mutex<()>>>>,
}

impl<S: EventStore, G: PaymentGateway> PaymentProcessor<S, G> {
    pub fn new(store: S, gateway: G, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self {
            payments: PaymentService::with_clock(store, clock.clone()),
            gateway,
            clock,
            timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn payments(&self) -> &PaymentService<S> {
        &self.payments
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    async fn lock_for(&self, payment_id: AggregateId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(payment_id)
            .or_default()
            .clone()
    }

    /// Drops the map entry once nobody else holds or waits on the lock.
    /// Must be called after the guard is released.
    async fn release_lock(&self, payment_id: AggregateId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&payment_id);
        }
    }

    #[cfg(test)]
    async fn held_locks(&self) -> usize {
        self.locks.lock().await.len()
    }

    #[tracing::instrument(skip(self))]
    pub async fn authorize(&self, payment_id: AggregateId) -> Result<Payment> {
        let lock = self.lock_for(payment_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.authorize_locked(payment_id).await
        };
        self.release_lock(payment_id, lock).await;
        result
    }

    async fn authorize_locked(&self, payment_id: AggregateId) -> Result<Payment> {
        let payment = self.payments.load(payment_id).await?;
        if let Some(card) = payment.source().and_then(|s| s.as_credit_card()) {
            card.validate_expiry(&self.clock.now())?;
        }

        let result = self.payments.begin_authorize(payment_id).await?;
        self.call_gateway(payment_id, result.aggregate).await
    }

    /// Captures up to `due`, authorizing first when the payment is still in
    /// `checkout`.
    ///
    /// The amount is `min(requested or authorized amount, due)`. Anything
    /// authorized but left uncaptured is recorded as surplus for review.
    #[tracing::instrument(skip(self))]
    pub async fn capture(
        &self,
        payment_id: AggregateId,
        requested: Option<Money>,
        due: Money,
    ) -> Result<Payment> {
        let lock = self.lock_for(payment_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.capture_locked(payment_id, requested, due).await
        };
        self.release_lock(payment_id, lock).await;
        result
    }

    async fn capture_locked(
        &self,
        payment_id: AggregateId,
        requested: Option<Money>,
        due: Money,
    ) -> Result<Payment> {
        let payment = self.payments.load(payment_id).await?;
        if !payment.can_capture() {
            return Err(PaymentError::IncompleteState {
                state: payment.state(),
                action: "capture",
            }
            .into());
        }

        let authorized = payment.amount();
        let amount = requested.unwrap_or(authorized).min(authorized).min(due);
        if !amount.is_positive() {
            return Err(PaymentError::NothingDue.into());
        }

        if payment.state() == PaymentState::Checkout {
            self.authorize_locked(payment_id).await?;
        }
        if amount < authorized {
            tracing::warn!(
                %payment_id,
                %authorized,
                captured = %amount,
                surplus = %(authorized - amount),
                "capture clamped below authorized amount; surplus needs review"
            );
        }

        let result = self.payments.begin_capture(payment_id, amount).await?;
        let payment = self.call_gateway(payment_id, result.aggregate).await?;

        metrics::counter!("payments_captured_total").increment(1);
        Ok(payment)
    }

    /// Voids the payment; payments never sent to the gateway are voided
    /// without calling it.
    #[tracing::instrument(skip(self))]
    pub async fn void(&self, payment_id: AggregateId) -> Result<Payment> {
        let lock = self.lock_for(payment_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.void_locked(payment_id).await
        };
        self.release_lock(payment_id, lock).await;
        result
    }

    async fn void_locked(&self, payment_id: AggregateId) -> Result<Payment> {
        let result = self.payments.begin_void(payment_id).await?;
        self.call_gateway(payment_id, result.aggregate).await
    }

    /// Credits `amount`, or everything still creditable when `None`.
    #[tracing::instrument(skip(self))]
    pub async fn credit(&self, payment_id: AggregateId, amount: Option<Money>) -> Result<Payment> {
        let lock = self.lock_for(payment_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.credit_locked(payment_id, amount).await
        };
        self.release_lock(payment_id, lock).await;
        result
    }

    async fn credit_locked(
        &self,
        payment_id: AggregateId,
        amount: Option<Money>,
    ) -> Result<Payment> {
        let result = self.payments.begin_credit(payment_id, amount).await?;
        self.call_gateway(payment_id, result.aggregate).await
    }

    /// Resolves a `processing` payment with an outcome learned out of band.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(
        &self,
        payment_id: AggregateId,
        outcome: GatewayOutcome,
    ) -> Result<Payment> {
        let lock = self.lock_for(payment_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.payments
                .reconcile(ReconcilePayment {
                    payment_id,
                    outcome,
                })
                .await
        };
        self.release_lock(payment_id, lock).await;

        let result = result?;
        tracing::info!(%payment_id, state = %result.aggregate.state(), "payment reconciled");
        Ok(result.aggregate)
    }

    /// Makes the call recorded on `payment`, if any, and stores the answer.
    async fn call_gateway(&self, payment_id: AggregateId, payment: Payment) -> Result<Payment> {
        let Some(request) = payment.pending_request().cloned() else {
            return Ok(payment);
        };
        let operation = request.operation;
        let key = request.idempotency_key.as_str();
        let transaction_ref = payment.transaction_ref().unwrap_or_default();

        let source = payment.source().ok_or(PaymentError::NotCreated)?;

        let started = Instant::now();
        let call = async {
            match operation {
                GatewayOperation::Authorize => {
                    self.gateway.authorize(source, request.amount, key).await
                }
                GatewayOperation::Capture => {
                    self.gateway.capture(transaction_ref, request.amount, key).await
                }
                GatewayOperation::Void => self.gateway.void(transaction_ref, key).await,
                GatewayOperation::Credit => {
                    self.gateway.credit(transaction_ref, request.amount, key).await
                }
            }
        };
        let answer = tokio::time::timeout(self.timeout, call).await;
        metrics::histogram!("gateway_call_duration_seconds", "operation" => operation.as_str())
            .record(started.elapsed().as_secs_f64());

        let outcome = match answer {
            Ok(outcome) => outcome,
            Err(_) => {
                metrics::counter!("gateway_timeouts_total", "operation" => operation.as_str())
                    .increment(1);
                tracing::warn!(%payment_id, %operation, key, "gateway call timed out");
                self.payments.mark_processing(payment_id, key).await?;
                return Err(CheckoutError::GatewayTimeout {
                    payment_id,
                    operation,
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };

        let success = outcome.success;
        let message = outcome.message.clone();
        let result = self
            .payments
            .record_outcome(RecordGatewayOutcome {
                payment_id,
                idempotency_key: key.to_string(),
                outcome,
            })
            .await?;

        if success {
            tracing::info!(%payment_id, %operation, state = %result.aggregate.state(), "gateway call succeeded");
            Ok(result.aggregate)
        } else {
            let message = message.unwrap_or_else(|| format!("{operation} declined"));
            tracing::warn!(%payment_id, %operation, %message, "gateway call declined");
            Err(CheckoutError::Gateway { operation, message })
        }
    }
}
