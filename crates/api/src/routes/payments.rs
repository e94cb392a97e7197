//! Payment endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::card::CardDetails;
use domain::payment::{Check, PaymentAction, SourceCapabilities};
use domain::{Aggregate, GatewayOutcome, Money, Payment, PaymentSource};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_aggregate_id};
use crate::error::ApiError;

// -- Request types --

/// Payment source as submitted by the client. Card numbers only live for
/// the duration of the request.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRequest {
    CreditCard(CardDetails),
    Check(Check),
}

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub source: SourceRequest,
    /// Defaults to the order's outstanding balance.
    pub amount_cents: Option<i64>,
}

#[derive(Deserialize)]
pub struct AmountRequest {
    pub amount_cents: Option<i64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: Option<String>,
    pub state: String,
    pub source_type: &'static str,
    pub source: String,
    pub amount_cents: i64,
    pub captured_cents: i64,
    pub credited_cents: i64,
    pub credit_allowed_cents: i64,
    pub surplus_cents: i64,
    pub transaction_ref: Option<String>,
    pub message: Option<String>,
    pub pending_request: Option<String>,
    pub attempts: u32,
    pub actions: Vec<PaymentAction>,
}

impl From<&Payment> for PaymentResponse {
    fn from(payment: &Payment) -> Self {
        let (source_type, source) = match payment.source() {
            Some(s @ PaymentSource::CreditCard(_)) => ("credit_card", s.display()),
            Some(s @ PaymentSource::Check(_)) => ("check", s.display()),
            None => ("none", String::new()),
        };
        Self {
            id: payment.id().map(|id| id.to_string()).unwrap_or_default(),
            order_id: payment.order_id().map(|id| id.to_string()),
            state: payment.state().to_string(),
            source_type,
            source,
            amount_cents: payment.amount().cents(),
            captured_cents: payment.captured().cents(),
            credited_cents: payment.credited().cents(),
            credit_allowed_cents: payment.credit_allowed().cents(),
            surplus_cents: payment.surplus().cents(),
            transaction_ref: payment.transaction_ref().map(String::from),
            message: payment.message().map(String::from),
            pending_request: payment
                .pending_request()
                .map(|r| r.idempotency_key.clone()),
            attempts: payment.attempts(),
            actions: payment.actions(),
        }
    }
}

fn amount(req: Option<Json<AmountRequest>>) -> Option<Money> {
    req.and_then(|Json(req)| req.amount_cents)
        .map(Money::from_cents)
}

// -- Handlers --

/// POST /orders/:id/payments
#[tracing::instrument(skip(state, req))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let amount = req.amount_cents.map(Money::from_cents);

    let payment = match req.source {
        SourceRequest::CreditCard(details) => {
            state
                .coordinator
                .create_card_payment(order_id, details, amount)
                .await?
        }
        SourceRequest::Check(check) => {
            state
                .coordinator
                .create_payment(order_id, PaymentSource::Check(check), amount)
                .await?
        }
    };
    Ok((StatusCode::CREATED, Json(PaymentResponse::from(&payment))))
}

/// GET /payments/:id
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state
        .coordinator
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Payment {id} not found")))?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/:id/authorize
#[tracing::instrument(skip(state))]
pub async fn authorize<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state.coordinator.authorize_payment(payment_id).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/:id/capture: optional body `{"amount_cents": ..}`.
#[tracing::instrument(skip(state, req))]
pub async fn capture<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    req: Option<Json<AmountRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state
        .coordinator
        .capture_payment(payment_id, amount(req))
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/:id/void
#[tracing::instrument(skip(state))]
pub async fn void<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state.coordinator.void_payment(payment_id).await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/:id/credit: credits everything still creditable unless
/// an amount is given.
#[tracing::instrument(skip(state, req))]
pub async fn credit<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    req: Option<Json<AmountRequest>>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state
        .coordinator
        .credit_payment(payment_id, amount(req))
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}

/// POST /payments/:id/reconcile: settle a `processing` payment with the
/// outcome an operator confirmed with the gateway.
#[tracing::instrument(skip(state, outcome))]
pub async fn reconcile<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(outcome): Json<GatewayOutcome>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let payment_id = parse_aggregate_id(&id)?;
    let payment = state
        .coordinator
        .reconcile_payment(payment_id, outcome)
        .await?;
    Ok(Json(PaymentResponse::from(&payment)))
}
