//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use domain::card::CardError;
use domain::{DomainError, OrderError, PaymentError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Stock or gateway error raised while orchestrating checkout.
    Checkout(CheckoutError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => (domain_status(&err), err.to_string()),
            ApiError::Checkout(err) => (checkout_status(&err), err.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_status(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
        CheckoutError::Gateway { .. } | CheckoutError::PaymentFailed { .. } => {
            StatusCode::PAYMENT_REQUIRED
        }
        CheckoutError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CheckoutError::PaymentNotOnOrder { .. } => StatusCode::BAD_REQUEST,
        CheckoutError::Domain(e) => domain_status(e),
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::Order(e) => order_status(e),
        DomainError::Payment(e) => payment_status(e),
        DomainError::Card(e) => card_status(e),
        DomainError::AggregateNotFound { .. } => StatusCode::NOT_FOUND,
        DomainError::Conflict { .. } => StatusCode::CONFLICT,
        DomainError::EventStore(_) | DomainError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::InvalidStateTransition { .. }
        | OrderError::IncompleteState { .. }
        | OrderError::ShipmentNotOpen { .. }
        | OrderError::ShipmentNotReady { .. }
        | OrderError::ShipmentNotShipped { .. }
        | OrderError::PaymentAlreadyLinked { .. }
        | OrderError::AlreadyCreated => StatusCode::CONFLICT,
        OrderError::LineItemNotFound { .. }
        | OrderError::ShipmentNotFound { .. }
        | OrderError::AdjustmentNotFound { .. }
        | OrderError::NotCreated => StatusCode::NOT_FOUND,
        OrderError::InvalidQuantity { .. }
        | OrderError::InvalidPrice { .. }
        | OrderError::RateNotOffered { .. }
        | OrderError::QuantityBelowShipped { .. } => StatusCode::BAD_REQUEST,
    }
}

fn payment_status(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::IncompleteState { .. }
        | PaymentError::RequestInFlight { .. }
        | PaymentError::AlreadyCreated => StatusCode::CONFLICT,
        PaymentError::OverCredit { .. } | PaymentError::NothingDue => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PaymentError::InvalidAmount { .. } | PaymentError::UnknownRequest { .. } => {
            StatusCode::BAD_REQUEST
        }
        PaymentError::NotCreated => StatusCode::NOT_FOUND,
    }
}

fn card_status(_err: &CardError) -> StatusCode {
    StatusCode::BAD_REQUEST
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        match err {
            CheckoutError::Domain(e) => ApiError::Domain(e),
            other => ApiError::Checkout(other),
        }
    }
}
