//! Order aggregate: line item ledger, shipments and the checkout state machine.

mod aggregate;
mod commands;
mod events;
mod line_item;
mod service;
mod shipment;
mod shipping;
mod state;
mod value_objects;

pub use aggregate::{Order, PaymentSummary, PlannedUnit, UnitPlacement, UnitRequest};
pub use commands::*;
pub use events::{
    AddressSetData, AdjustmentRemovedData, LineItemAddedData, LineItemQuantityChangedData,
    LineItemRemovedData, OrderCanceledData, OrderCompletedData, OrderCreatedData, OrderEvent,
    OrderReturnedData, PaymentLinkedData, ShipmentCreatedData, ShipmentRatesRefreshedData,
    ShipmentRefData, ShipmentShippedData, ShipmentTrackingSetData, ShipmentUnitsData,
    ShippingRateSelectedData, SpecialInstructionsSetData, StateAdvancedData,
};
pub use line_item::LineItem;
pub use service::OrderService;
pub use shipment::{Shipment, ShipmentState, ShipmentUnit, ShippingRate};
pub use shipping::{ShippingCalculator, ShippingMethod, ShippingTable};
pub use state::OrderState;
pub use value_objects::{
    Address, Adjustment, AdjustmentId, AdjustmentKind, LineItemId, Money, ReservationId,
    ShipmentId, StockLocationId, Variant, VariantId,
};

use common::AggregateId;
use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order already created")]
    AlreadyCreated,

    #[error("Order has not been created")]
    NotCreated,

    /// Order is not in a state that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderState,
        action: &'static str,
    },

    /// The current step's completion predicate does not hold.
    #[error("Cannot leave {state}: {unmet}")]
    IncompleteState {
        state: OrderState,
        unmet: &'static str,
    },

    #[error("Line item not found: {line_item_id}")]
    LineItemNotFound { line_item_id: LineItemId },

    #[error("Shipment not found: {shipment_id}")]
    ShipmentNotFound { shipment_id: ShipmentId },

    #[error("Adjustment not found: {adjustment_id}")]
    AdjustmentNotFound { adjustment_id: AdjustmentId },

    #[error("Invalid quantity: {quantity}")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid amount: {price} (must not be negative)")]
    InvalidPrice { price: i64 },

    #[error("Shipping method {method_id} is not offered for shipment {shipment_id}")]
    RateNotOffered {
        shipment_id: ShipmentId,
        method_id: String,
    },

    #[error("Shipment {shipment_id} is {state} and can no longer change")]
    ShipmentNotOpen {
        shipment_id: ShipmentId,
        state: ShipmentState,
    },

    #[error("Shipment {shipment_id} is {state}, not ready to ship")]
    ShipmentNotReady {
        shipment_id: ShipmentId,
        state: ShipmentState,
    },

    #[error("Shipment {shipment_id} is {state}; tracking is set after shipping")]
    ShipmentNotShipped {
        shipment_id: ShipmentId,
        state: ShipmentState,
    },

    #[error("Line item {line_item_id} already has {shipped} units shipped")]
    QuantityBelowShipped {
        line_item_id: LineItemId,
        shipped: u32,
    },

    #[error("Payment {payment_id} is already linked to this order")]
    PaymentAlreadyLinked { payment_id: AggregateId },
}
