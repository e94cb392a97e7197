//! Checkout orchestration for orders and payments.
//!
//! The coordinator keeps three things consistent:
//! 1. Stock reserved for the units an order's shipments hold
//! 2. Payments authorized, captured, voided and credited through the gateway
//! 3. The order's checkout state machine
//!
//! Orders and payments are event-sourced aggregates; stock and the gateway
//! sit behind traits with in-memory implementations.

pub mod coordinator;
pub mod error;
pub mod processor;
pub mod services;

pub use coordinator::{CheckoutCoordinator, CheckoutSettings};
pub use error::CheckoutError;
pub use processor::PaymentProcessor;
pub use services::{
    BogusGateway, CreditCardRegistry, InMemoryInventoryAllocator, InventoryAllocator,
    PaymentGateway, Reservation, ReservationStatus, StockItem,
};
