//! Order commands.

use common::AggregateId;

use crate::command::Command;

use super::{
    Address, AdjustmentId, AdjustmentKind, LineItemId, Money, Order, PaymentSummary, PlannedUnit,
    ShipmentId, StockLocationId, UnitPlacement, Variant,
};

/// Command to open a new cart.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: AggregateId,
}

impl CreateOrder {
    pub fn new(order_id: AggregateId) -> Self {
        Self { order_id }
    }

    /// Creates the command with a generated order ID.
    pub fn generate() -> Self {
        Self::new(AggregateId::new())
    }
}

#[derive(Debug, Clone)]
pub struct SetAddress {
    pub order_id: AggregateId,
    pub address: Address,
}

#[derive(Debug, Clone)]
pub struct SetSpecialInstructions {
    pub order_id: AggregateId,
    pub instructions: Option<String>,
}

/// Command to add units of a variant.
#[derive(Debug, Clone)]
pub struct AddLineItem {
    pub order_id: AggregateId,

    /// Used only when the variant is not already on the order.
    pub line_item_id: LineItemId,

    pub variant: Variant,
    pub quantity: u32,

    /// Reserved stock and target shipment for the new units, if any.
    pub placement: Option<UnitPlacement>,
}

impl AddLineItem {
    pub fn new(order_id: AggregateId, variant: Variant, quantity: u32) -> Self {
        Self {
            order_id,
            line_item_id: LineItemId::new(),
            variant,
            quantity,
            placement: None,
        }
    }

    pub fn placed(mut self, placement: Option<UnitPlacement>) -> Self {
        self.placement = placement;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpdateLineItemQuantity {
    pub order_id: AggregateId,
    pub line_item_id: LineItemId,
    pub quantity: u32,
    pub placement: Option<UnitPlacement>,
}

impl UpdateLineItemQuantity {
    pub fn new(order_id: AggregateId, line_item_id: LineItemId, quantity: u32) -> Self {
        Self {
            order_id,
            line_item_id,
            quantity,
            placement: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoveLineItem {
    pub order_id: AggregateId,
    pub line_item_id: LineItemId,
}

#[derive(Debug, Clone)]
pub struct CreateShipment {
    pub order_id: AggregateId,
    pub shipment_id: ShipmentId,
    pub stock_location: StockLocationId,

    /// Units moving into the shipment, each already reserved.
    pub units: Vec<PlannedUnit>,
}

#[derive(Debug, Clone)]
pub struct SelectShippingRate {
    pub order_id: AggregateId,
    pub shipment_id: ShipmentId,
    pub method_id: String,
}

#[derive(Debug, Clone)]
pub struct ShipShipment {
    pub order_id: AggregateId,
    pub shipment_id: ShipmentId,
}

#[derive(Debug, Clone)]
pub struct SetTracking {
    pub order_id: AggregateId,
    pub shipment_id: ShipmentId,
    pub tracking: String,
}

#[derive(Debug, Clone)]
pub struct AddAdjustment {
    pub order_id: AggregateId,
    pub adjustment_id: AdjustmentId,
    pub label: String,
    pub amount: Money,
    pub kind: AdjustmentKind,
}

#[derive(Debug, Clone)]
pub struct RemoveAdjustment {
    pub order_id: AggregateId,
    pub adjustment_id: AdjustmentId,
}

#[derive(Debug, Clone)]
pub struct LinkPayment {
    pub order_id: AggregateId,
    pub payment_id: AggregateId,
    pub amount: Money,
}

/// Command to move to the next checkout step.
#[derive(Debug, Clone)]
pub struct AdvanceOrder {
    pub order_id: AggregateId,

    /// Current view of the order's payments.
    pub payments: Vec<PaymentSummary>,
}

#[derive(Debug, Clone)]
pub struct CompleteOrder {
    pub order_id: AggregateId,
    pub payments: Vec<PaymentSummary>,
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub order_id: AggregateId,
    pub payments: Vec<PaymentSummary>,
}

#[derive(Debug, Clone)]
pub struct ReturnOrder {
    pub order_id: AggregateId,
}

macro_rules! order_commands {
    ($($command:ty),* $(,)?) => {
        $(
            impl Command for $command {
                type Aggregate = Order;

                fn aggregate_id(&self) -> AggregateId {
                    self.order_id
                }
            }
        )*
    };
}

order_commands!(
    CreateOrder,
    SetAddress,
    SetSpecialInstructions,
    AddLineItem,
    UpdateLineItemQuantity,
    RemoveLineItem,
    CreateShipment,
    SelectShippingRate,
    ShipShipment,
    SetTracking,
    AddAdjustment,
    RemoveAdjustment,
    LinkPayment,
    AdvanceOrder,
    CompleteOrder,
    CancelOrder,
    ReturnOrder,
);
