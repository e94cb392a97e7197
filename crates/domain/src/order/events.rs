//! Order domain events.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{
    Address, Adjustment, AdjustmentId, LineItemId, Money, OrderState, ReservationId, ShipmentId,
    ShippingRate, StockLocationId, Variant, VariantId,
};

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderCreated(OrderCreatedData),

    AddressSet(AddressSetData),

    SpecialInstructionsSet(SpecialInstructionsSetData),

    LineItemAdded(LineItemAddedData),

    LineItemQuantityChanged(LineItemQuantityChangedData),

    LineItemRemoved(LineItemRemovedData),

    ShipmentCreated(ShipmentCreatedData),

    /// Units were placed in a shipment against a fresh reservation.
    ShipmentUnitsAdded(ShipmentUnitsData),

    /// Units were taken out of a shipment; their reservation must be
    /// reduced by the same quantity.
    ShipmentUnitsRemoved(ShipmentUnitsData),

    ShipmentRatesRefreshed(ShipmentRatesRefreshedData),

    ShippingRateSelected(ShippingRateSelectedData),

    ShipmentReady(ShipmentRefData),

    ShipmentShipped(ShipmentShippedData),

    ShipmentTrackingSet(ShipmentTrackingSetData),

    ShipmentCanceled(ShipmentRefData),

    AdjustmentAdded(Adjustment),

    AdjustmentRemoved(AdjustmentRemovedData),

    PaymentLinked(PaymentLinkedData),

    /// A checkout step was completed.
    StateAdvanced(StateAdvancedData),

    OrderCompleted(OrderCompletedData),

    OrderCanceled(OrderCanceledData),

    OrderReturned(OrderReturnedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::AddressSet(_) => "AddressSet",
            OrderEvent::SpecialInstructionsSet(_) => "SpecialInstructionsSet",
            OrderEvent::LineItemAdded(_) => "LineItemAdded",
            OrderEvent::LineItemQuantityChanged(_) => "LineItemQuantityChanged",
            OrderEvent::LineItemRemoved(_) => "LineItemRemoved",
            OrderEvent::ShipmentCreated(_) => "ShipmentCreated",
            OrderEvent::ShipmentUnitsAdded(_) => "ShipmentUnitsAdded",
            OrderEvent::ShipmentUnitsRemoved(_) => "ShipmentUnitsRemoved",
            OrderEvent::ShipmentRatesRefreshed(_) => "ShipmentRatesRefreshed",
            OrderEvent::ShippingRateSelected(_) => "ShippingRateSelected",
            OrderEvent::ShipmentReady(_) => "ShipmentReady",
            OrderEvent::ShipmentShipped(_) => "ShipmentShipped",
            OrderEvent::ShipmentTrackingSet(_) => "ShipmentTrackingSet",
            OrderEvent::ShipmentCanceled(_) => "ShipmentCanceled",
            OrderEvent::AdjustmentAdded(_) => "AdjustmentAdded",
            OrderEvent::AdjustmentRemoved(_) => "AdjustmentRemoved",
            OrderEvent::PaymentLinked(_) => "PaymentLinked",
            OrderEvent::StateAdvanced(_) => "StateAdvanced",
            OrderEvent::OrderCompleted(_) => "OrderCompleted",
            OrderEvent::OrderCanceled(_) => "OrderCanceled",
            OrderEvent::OrderReturned(_) => "OrderReturned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,

    /// Customer-facing reference, `R` followed by nine digits.
    pub number: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressSetData {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialInstructionsSetData {
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemAddedData {
    pub line_item_id: LineItemId,
    pub variant: Variant,
    pub quantity: u32,

    /// Unit price snapshot.
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemQuantityChangedData {
    pub line_item_id: LineItemId,
    pub old_quantity: u32,
    pub new_quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemRemovedData {
    pub line_item_id: LineItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentCreatedData {
    pub shipment_id: ShipmentId,

    /// `H` followed by nine digits.
    pub number: String,

    pub stock_location: StockLocationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentUnitsData {
    pub shipment_id: ShipmentId,
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub reservation_id: ReservationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRatesRefreshedData {
    pub shipment_id: ShipmentId,
    pub rates: Vec<ShippingRate>,

    /// Selection that survived the refresh.
    pub selected: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingRateSelectedData {
    pub shipment_id: ShipmentId,
    pub method_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRefData {
    pub shipment_id: ShipmentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentShippedData {
    pub shipment_id: ShipmentId,
    pub shipped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentTrackingSetData {
    pub shipment_id: ShipmentId,
    pub tracking: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRemovedData {
    pub adjustment_id: AdjustmentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLinkedData {
    pub payment_id: AggregateId,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAdvancedData {
    pub from: OrderState,
    pub to: OrderState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub completed_at: DateTime<Utc>,

    /// Total at the moment of completion.
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledData {
    pub canceled_at: DateTime<Utc>,

    /// State the order was in when it was canceled.
    pub previous_state: OrderState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReturnedData {
    pub returned_at: DateTime<Utc>,
}

// Convenience constructors for events
impl OrderEvent {
    pub fn order_created(order_id: AggregateId, number: String, created_at: DateTime<Utc>) -> Self {
        OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            number,
            created_at,
        })
    }

    pub fn line_item_quantity_changed(
        line_item_id: LineItemId,
        old_quantity: u32,
        new_quantity: u32,
    ) -> Self {
        OrderEvent::LineItemQuantityChanged(LineItemQuantityChangedData {
            line_item_id,
            old_quantity,
            new_quantity,
        })
    }

    pub fn shipment_ready(shipment_id: ShipmentId) -> Self {
        OrderEvent::ShipmentReady(ShipmentRefData { shipment_id })
    }

    pub fn shipment_canceled(shipment_id: ShipmentId) -> Self {
        OrderEvent::ShipmentCanceled(ShipmentRefData { shipment_id })
    }

    pub fn state_advanced(from: OrderState, to: OrderState) -> Self {
        OrderEvent::StateAdvanced(StateAdvancedData { from, to })
    }
}
