//! Order service providing a simplified API for order operations.

use std::sync::Arc;

use common::{AggregateId, Clock, SystemClock};
use event_store::EventStore;

use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;

use super::{
    AddAdjustment, AddLineItem, AdvanceOrder, CancelOrder, CompleteOrder, CreateOrder,
    CreateShipment, LinkPayment, Order, RemoveAdjustment, RemoveLineItem, ReturnOrder,
    SelectShippingRate, SetAddress, SetSpecialInstructions, SetTracking, ShipShipment,
    ShippingCalculator, ShippingTable, UpdateLineItemQuantity,
};

fn count(command: &'static str) {
    metrics::counter!("order_commands_total", "command" => command).increment(1);
}

/// Service for managing orders.
///
/// Wraps the command handler with the shipping calculator used to re-rate
/// shipments and the clock used to stamp lifecycle events.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
    rates: Arc<dyn ShippingCalculator>,
    clock: Arc<dyn Clock>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a service using the standard shipping table and system time.
    pub fn new(store: S) -> Self {
        Self::with_parts(store, Arc::new(ShippingTable::standard()), Arc::new(SystemClock))
    }

    pub fn with_parts(
        store: S,
        rates: Arc<dyn ShippingCalculator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            handler: CommandHandler::new(store),
            rates,
            clock,
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<CommandResult<Order>, DomainError> {
        count("create_order");
        let order_id = cmd.order_id;
        let number = order_id.reference_number('R');
        let now = self.clock.now();

        self.handler
            .execute(order_id, |order| order.create(order_id, number, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_address(&self, cmd: SetAddress) -> Result<CommandResult<Order>, DomainError> {
        count("set_address");
        self.handler
            .execute(cmd.order_id, |order| {
                order.set_address(cmd.address, &*self.rates)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_special_instructions(
        &self,
        cmd: SetSpecialInstructions,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("set_special_instructions");
        self.handler
            .execute(cmd.order_id, |order| {
                order.set_special_instructions(cmd.instructions)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_line_item(
        &self,
        cmd: AddLineItem,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("add_line_item");
        self.handler
            .execute(cmd.order_id, |order| {
                order.add_line_item(
                    cmd.line_item_id,
                    cmd.variant,
                    cmd.quantity,
                    cmd.placement,
                    &*self.rates,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn update_line_item_quantity(
        &self,
        cmd: UpdateLineItemQuantity,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("update_line_item_quantity");
        self.handler
            .execute(cmd.order_id, |order| {
                order.update_line_item_quantity(
                    cmd.line_item_id,
                    cmd.quantity,
                    cmd.placement,
                    &*self.rates,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_line_item(
        &self,
        cmd: RemoveLineItem,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("remove_line_item");
        self.handler
            .execute(cmd.order_id, |order| {
                order.remove_line_item(cmd.line_item_id, &*self.rates)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_shipment(
        &self,
        cmd: CreateShipment,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("create_shipment");
        let number = AggregateId::from_uuid(cmd.shipment_id.as_uuid()).reference_number('H');
        self.handler
            .execute(cmd.order_id, |order| {
                order.create_shipment(
                    cmd.shipment_id,
                    number,
                    cmd.stock_location,
                    cmd.units,
                    &*self.rates,
                )
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn select_rate(
        &self,
        cmd: SelectShippingRate,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("select_rate");
        self.handler
            .execute(cmd.order_id, |order| {
                order.select_rate(cmd.shipment_id, &cmd.method_id)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn ship(&self, cmd: ShipShipment) -> Result<CommandResult<Order>, DomainError> {
        count("ship");
        let now = self.clock.now();
        self.handler
            .execute(cmd.order_id, |order| order.ship(cmd.shipment_id, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_tracking(&self, cmd: SetTracking) -> Result<CommandResult<Order>, DomainError> {
        count("set_tracking");
        self.handler
            .execute(cmd.order_id, |order| {
                order.set_tracking(cmd.shipment_id, cmd.tracking)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_adjustment(
        &self,
        cmd: AddAdjustment,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("add_adjustment");
        self.handler
            .execute(cmd.order_id, |order| {
                order.add_adjustment(cmd.adjustment_id, cmd.label, cmd.amount, cmd.kind)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_adjustment(
        &self,
        cmd: RemoveAdjustment,
    ) -> Result<CommandResult<Order>, DomainError> {
        count("remove_adjustment");
        self.handler
            .execute(cmd.order_id, |order| order.remove_adjustment(cmd.adjustment_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn link_payment(&self, cmd: LinkPayment) -> Result<CommandResult<Order>, DomainError> {
        count("link_payment");
        self.handler
            .execute(cmd.order_id, |order| {
                order.link_payment(cmd.payment_id, cmd.amount)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, cmd: AdvanceOrder) -> Result<CommandResult<Order>, DomainError> {
        count("advance");
        self.handler
            .execute(cmd.order_id, |order| order.advance(&cmd.payments))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, cmd: CompleteOrder) -> Result<CommandResult<Order>, DomainError> {
        count("complete");
        let now = self.clock.now();
        self.handler
            .execute(cmd.order_id, |order| order.complete(&cmd.payments, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, cmd: CancelOrder) -> Result<CommandResult<Order>, DomainError> {
        count("cancel");
        let now = self.clock.now();
        self.handler
            .execute(cmd.order_id, |order| order.cancel(&cmd.payments, now))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn return_order(&self, cmd: ReturnOrder) -> Result<CommandResult<Order>, DomainError> {
        count("return_order");
        let now = self.clock.now();
        self.handler
            .execute(cmd.order_id, |order| order.return_order(now))
            .await
    }

    /// Loads an order by ID.
    ///
    /// Returns None if the order doesn't exist.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        self.handler.load_existing(order_id).await
    }

    /// Loads an order that must exist.
    pub async fn load(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.handler.load_required(order_id).await
    }
}
