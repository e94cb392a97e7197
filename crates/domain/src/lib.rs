//! Domain layer for the checkout core.
//!
//! This crate provides:
//! - Aggregate and DomainEvent traits for event-sourced entities
//! - Command trait and CommandHandler with optimistic concurrency
//! - Card validation and the stored `CreditCard` payment source
//! - Order aggregate: line item ledger, shipments and the checkout state machine
//! - Payment aggregate: authorize, capture, void and credit bookkeeping

pub mod aggregate;
pub mod card;
pub mod command;
pub mod error;
pub mod order;
pub mod payment;

pub use aggregate::{Aggregate, DomainEvent};
pub use card::{CardBrand, CardDetails, CardError, CardId, CreditCard, Expiry};
pub use command::{Command, CommandHandler, CommandResult};
pub use error::DomainError;
pub use order::{
    Address, Money, Order, OrderError, OrderEvent, OrderService, OrderState, PaymentSummary,
    Shipment, ShipmentId, ShipmentState, Variant, VariantId,
};
pub use payment::{
    GatewayOperation, GatewayOutcome, GatewayRequest, Payment, PaymentError, PaymentEvent,
    PaymentService, PaymentSource, PaymentState,
};
