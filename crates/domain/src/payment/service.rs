//! Payment service: persistence for the payment aggregate's commands.

use std::sync::Arc;

use common::{AggregateId, Clock, SystemClock};
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::order::Money;

use super::{CreatePayment, Payment, ReconcilePayment, RecordGatewayOutcome};

/// Service for managing payments.
///
/// Only records decisions; calling the gateway between a `begin_*` and the
/// matching [`PaymentService::record_outcome`] is the caller's job.
pub struct PaymentService<S: EventStore> {
    handler: CommandHandler<S, Payment>,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore> PaymentService<S> {
    pub fn new(store: S) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            handler: CommandHandler::new(store),
            clock,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Payment> {
        &self.handler
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_payment(
        &self,
        cmd: CreatePayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        let now = self.clock.now();
        self.handler
            .execute(cmd.payment_id, |payment| {
                payment.create(cmd.payment_id, cmd.order_id, cmd.source, cmd.amount, now)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn begin_authorize(
        &self,
        payment_id: AggregateId,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.require(payment_id).await?;
        self.handler
            .execute(payment_id, |payment| payment.begin_authorize())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn begin_capture(
        &self,
        payment_id: AggregateId,
        amount: Money,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.require(payment_id).await?;
        self.handler
            .execute(payment_id, |payment| payment.begin_capture(amount))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn begin_void(
        &self,
        payment_id: AggregateId,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.require(payment_id).await?;
        self.handler
            .execute(payment_id, |payment| payment.begin_void())
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn begin_credit(
        &self,
        payment_id: AggregateId,
        amount: Option<Money>,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.require(payment_id).await?;
        self.handler
            .execute(payment_id, |payment| payment.begin_credit(amount))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn record_outcome(
        &self,
        cmd: RecordGatewayOutcome,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(cmd.payment_id, |payment| {
                payment.record_outcome(&cmd.idempotency_key, cmd.outcome)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn mark_processing(
        &self,
        payment_id: AggregateId,
        idempotency_key: &str,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.handler
            .execute(payment_id, |payment| payment.mark_processing(idempotency_key))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile(
        &self,
        cmd: ReconcilePayment,
    ) -> Result<CommandResult<Payment>, DomainError> {
        self.require(cmd.payment_id).await?;
        self.handler
            .execute(cmd.payment_id, |payment| payment.reconcile(cmd.outcome))
            .await
    }

    pub async fn get_payment(&self, payment_id: AggregateId) -> Result<Option<Payment>, DomainError> {
        self.handler.load_existing(payment_id).await
    }

    /// Loads a payment that must exist.
    pub async fn load(&self, payment_id: AggregateId) -> Result<Payment, DomainError> {
        self.handler.load_required(payment_id).await
    }

    async fn require(&self, payment_id: AggregateId) -> Result<(), DomainError> {
        self.load(payment_id).await.map(|_| ())
    }
}
