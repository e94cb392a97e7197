//! Checkout coordinator: keeps orders, stock and payments in step.

use std::sync::Arc;
use std::time::Duration;

use common::{AggregateId, Clock, SystemClock};
use domain::card::CardDetails;
use domain::order::{
    AddAdjustment, AddLineItem, AdjustmentId, AdjustmentKind, AdvanceOrder, CancelOrder,
    CompleteOrder, CreateOrder, CreateShipment, LineItemId, LinkPayment, PlannedUnit,
    RemoveAdjustment, RemoveLineItem, ReservationId, ReturnOrder, SelectShippingRate, SetAddress,
    SetSpecialInstructions, SetTracking, ShipShipment, ShippingTable, StockLocationId,
    UnitPlacement, UpdateLineItemQuantity, VariantId,
};
use domain::payment::CreatePayment;
use domain::{
    Address, CommandResult, DomainError, GatewayOutcome, Money, Order, OrderError, OrderEvent,
    OrderService, Payment, PaymentSource, PaymentState, PaymentSummary, ShipmentId, Variant,
};
use event_store::EventStore;

use crate::error::{CheckoutError, Result};
use crate::processor::PaymentProcessor;
use crate::services::{CreditCardRegistry, InventoryAllocator, PaymentGateway, ReservationStatus};

/// Tunables for the checkout flow.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// Upper bound on every gateway call.
    pub gateway_timeout: Duration,

    /// Where shipments draw stock from unless told otherwise.
    pub stock_location: StockLocationId,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(5),
            stock_location: StockLocationId::new("default"),
        }
    }
}

/// Orchestrates checkout across orders, inventory and payments.
///
/// Stock is reserved before the order records the units that use it and
/// released again if the order refuses them. Completion captures payments
/// first and only marks the order complete once every capture succeeded;
/// cancellation voids or credits payments before the order is canceled.
pub struct CheckoutCoordinator<S, I, G>
where
    S: EventStore,
    I: InventoryAllocator,
    G: PaymentGateway,
{
    orders: OrderService<S>,
    processor: PaymentProcessor<S, G>,
    inventory: I,
    cards: CreditCardRegistry,
    settings: CheckoutSettings,
}

impl<S, I, G> CheckoutCoordinator<S, I, G>
where
    S: EventStore + Clone,
    I: InventoryAllocator,
    G: PaymentGateway,
{
    pub fn new(store: S, inventory: I, gateway: G) -> Self {
        Self::with_parts(
            store,
            inventory,
            gateway,
            Arc::new(SystemClock),
            CheckoutSettings::default(),
        )
    }

    pub fn with_parts(
        store: S,
        inventory: I,
        gateway: G,
        clock: Arc<dyn Clock>,
        settings: CheckoutSettings,
    ) -> Self {
        let orders = OrderService::with_parts(
            store.clone(),
            Arc::new(ShippingTable::standard()),
            clock.clone(),
        );
        let processor =
            PaymentProcessor::new(store, gateway, clock.clone(), settings.gateway_timeout);
        Self {
            orders,
            processor,
            inventory,
            cards: CreditCardRegistry::with_clock(clock),
            settings,
        }
    }

    pub fn orders(&self) -> &OrderService<S> {
        &self.orders
    }

    pub fn processor(&self) -> &PaymentProcessor<S, G> {
        &self.processor
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }

    pub fn cards(&self) -> &CreditCardRegistry {
        &self.cards
    }

    // Orders

    pub async fn create_order(&self) -> Result<Order> {
        let result = self.orders.create_order(CreateOrder::generate()).await?;
        tracing::info!(number = result.aggregate.number(), "order created");
        Ok(result.aggregate)
    }

    pub async fn get_order(&self, order_id: AggregateId) -> Result<Option<Order>> {
        Ok(self.orders.get_order(order_id).await?)
    }

    pub async fn load_order(&self, order_id: AggregateId) -> Result<Order> {
        Ok(self.orders.load(order_id).await?)
    }

    pub async fn set_address(&self, order_id: AggregateId, address: Address) -> Result<Order> {
        let result = self
            .orders
            .set_address(SetAddress { order_id, address })
            .await?;
        Ok(result.aggregate)
    }

    pub async fn set_special_instructions(
        &self,
        order_id: AggregateId,
        instructions: Option<String>,
    ) -> Result<Order> {
        let result = self
            .orders
            .set_special_instructions(SetSpecialInstructions {
                order_id,
                instructions,
            })
            .await?;
        Ok(result.aggregate)
    }

    // Line items

    /// Adds units of a variant. When the order has an open shipment (or
    /// `shipment_id` names one) the units are reserved and placed in it.
    #[tracing::instrument(skip(self, variant), fields(variant_id = %variant.id))]
    pub async fn add_line_item(
        &self,
        order_id: AggregateId,
        variant: Variant,
        quantity: u32,
        shipment_id: Option<ShipmentId>,
    ) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let placement = self
            .reserve_placement(&order, shipment_id, &variant.id, quantity)
            .await?;

        let cmd = AddLineItem::new(order_id, variant, quantity).placed(placement.clone());
        let result = self.orders.add_line_item(cmd).await;
        self.finish_placement(result, placement).await
    }

    /// Sets a line item's quantity; zero removes it. Growth is reserved and
    /// placed like [`CheckoutCoordinator::add_line_item`]; shrinkage frees
    /// stock from the oldest units first.
    #[tracing::instrument(skip(self))]
    pub async fn update_line_item_quantity(
        &self,
        order_id: AggregateId,
        line_item_id: LineItemId,
        quantity: u32,
        shipment_id: Option<ShipmentId>,
    ) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let placement = match order.line_item(line_item_id) {
            Some(item) if quantity > item.quantity => {
                self.reserve_placement(
                    &order,
                    shipment_id,
                    &item.variant.id,
                    quantity - item.quantity,
                )
                .await?
            }
            _ => None,
        };

        let mut cmd = UpdateLineItemQuantity::new(order_id, line_item_id, quantity);
        cmd.placement = placement.clone();
        let result = self.orders.update_line_item_quantity(cmd).await;
        self.finish_placement(result, placement).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_line_item(
        &self,
        order_id: AggregateId,
        line_item_id: LineItemId,
    ) -> Result<Order> {
        let result = self
            .orders
            .remove_line_item(RemoveLineItem {
                order_id,
                line_item_id,
            })
            .await?;
        self.free_removed_units(&result.events).await;
        Ok(result.aggregate)
    }

    async fn reserve_placement(
        &self,
        order: &Order,
        shipment_id: Option<ShipmentId>,
        variant_id: &VariantId,
        quantity: u32,
    ) -> Result<Option<UnitPlacement>> {
        if quantity == 0 {
            return Ok(None);
        }
        let Some(target) = order.placement_target(shipment_id)? else {
            return Ok(None);
        };

        let reservation_id = self
            .inventory
            .reserve(&target.stock_location, variant_id, quantity)
            .await?;
        Ok(Some(UnitPlacement {
            shipment_id: target.id,
            reservation_id,
        }))
    }

    async fn finish_placement(
        &self,
        result: std::result::Result<CommandResult<Order>, DomainError>,
        placement: Option<UnitPlacement>,
    ) -> Result<Order> {
        match result {
            Ok(result) => {
                if let Some(placement) = placement {
                    if result.aggregate.state().is_complete() {
                        self.inventory.commit(&placement.reservation_id).await?;
                    }
                }
                self.free_removed_units(&result.events).await;
                Ok(result.aggregate)
            }
            Err(e) => {
                if let Some(placement) = placement {
                    self.release_quietly(&placement.reservation_id).await;
                }
                Err(e.into())
            }
        }
    }

    /// Gives back the stock of units the order took out of its shipments.
    async fn free_removed_units(&self, events: &[OrderEvent]) {
        for event in events {
            if let OrderEvent::ShipmentUnitsRemoved(data) = event {
                if let Err(e) = self
                    .inventory
                    .reduce(&data.reservation_id, data.quantity)
                    .await
                {
                    tracing::warn!(reservation_id = %data.reservation_id, error = %e, "failed to free removed units");
                }
            }
        }
    }

    async fn release_quietly(&self, reservation_id: &ReservationId) {
        if let Err(e) = self.inventory.release(reservation_id).await {
            tracing::warn!(%reservation_id, error = %e, "failed to release reservation");
        }
    }

    /// Releases held stock and restocks committed stock.
    async fn return_stock(&self, reservations: &[ReservationId]) {
        for reservation_id in reservations {
            let outcome = match self.inventory.reservation(reservation_id).await {
                Some(r) if r.status == ReservationStatus::Committed => {
                    self.inventory.restock(reservation_id).await
                }
                Some(_) => self.inventory.release(reservation_id).await,
                None => continue,
            };
            if let Err(e) = outcome {
                tracing::warn!(%reservation_id, error = %e, "failed to return stock");
            }
        }
    }

    // Shipments

    /// Opens a shipment holding every unit not yet in a live shipment,
    /// reserving stock for them at `stock_location` (or the default location).
    #[tracing::instrument(skip(self))]
    pub async fn create_shipment(
        &self,
        order_id: AggregateId,
        stock_location: Option<StockLocationId>,
    ) -> Result<(Order, ShipmentId)> {
        let order = self.orders.load(order_id).await?;
        let stock_location =
            stock_location.unwrap_or_else(|| self.settings.stock_location.clone());

        let mut units: Vec<PlannedUnit> = Vec::new();
        for request in order.unassigned_units() {
            let reserved = self
                .inventory
                .reserve(&stock_location, &request.variant_id, request.quantity)
                .await;
            match reserved {
                Ok(reservation_id) => units.push(PlannedUnit {
                    line_item_id: request.line_item_id,
                    variant_id: request.variant_id,
                    quantity: request.quantity,
                    reservation_id,
                }),
                Err(e) => {
                    for unit in &units {
                        self.release_quietly(&unit.reservation_id).await;
                    }
                    return Err(e);
                }
            }
        }

        let reservations: Vec<ReservationId> =
            units.iter().map(|u| u.reservation_id.clone()).collect();
        let shipment_id = ShipmentId::new();
        let result = self
            .orders
            .create_shipment(CreateShipment {
                order_id,
                shipment_id,
                stock_location,
                units,
            })
            .await;

        match result {
            Ok(result) => {
                if result.aggregate.state().is_complete() {
                    for reservation_id in &reservations {
                        self.inventory.commit(reservation_id).await?;
                    }
                }
                Ok((result.aggregate, shipment_id))
            }
            Err(e) => {
                for reservation_id in &reservations {
                    self.release_quietly(reservation_id).await;
                }
                Err(e.into())
            }
        }
    }

    pub async fn select_rate(
        &self,
        order_id: AggregateId,
        shipment_id: ShipmentId,
        method_id: impl Into<String>,
    ) -> Result<Order> {
        let result = self
            .orders
            .select_rate(SelectShippingRate {
                order_id,
                shipment_id,
                method_id: method_id.into(),
            })
            .await?;
        Ok(result.aggregate)
    }

    pub async fn ship(&self, order_id: AggregateId, shipment_id: ShipmentId) -> Result<Order> {
        let result = self
            .orders
            .ship(ShipShipment {
                order_id,
                shipment_id,
            })
            .await?;
        Ok(result.aggregate)
    }

    pub async fn set_tracking(
        &self,
        order_id: AggregateId,
        shipment_id: ShipmentId,
        tracking: impl Into<String>,
    ) -> Result<Order> {
        let result = self
            .orders
            .set_tracking(SetTracking {
                order_id,
                shipment_id,
                tracking: tracking.into(),
            })
            .await?;
        Ok(result.aggregate)
    }

    // Adjustments

    pub async fn add_adjustment(
        &self,
        order_id: AggregateId,
        label: impl Into<String>,
        amount: Money,
        kind: AdjustmentKind,
    ) -> Result<Order> {
        let result = self
            .orders
            .add_adjustment(AddAdjustment {
                order_id,
                adjustment_id: AdjustmentId::new(),
                label: label.into(),
                amount,
                kind,
            })
            .await?;
        Ok(result.aggregate)
    }

    pub async fn remove_adjustment(
        &self,
        order_id: AggregateId,
        adjustment_id: AdjustmentId,
    ) -> Result<Order> {
        let result = self
            .orders
            .remove_adjustment(RemoveAdjustment {
                order_id,
                adjustment_id,
            })
            .await?;
        Ok(result.aggregate)
    }

    // Payments

    /// Current view of the order's payments.
    pub async fn payment_summaries(&self, order: &Order) -> Result<Vec<PaymentSummary>> {
        let mut summaries = Vec::with_capacity(order.payment_ids().len());
        for payment_id in order.payment_ids() {
            let payment = self.processor.payments().load(*payment_id).await?;
            summaries.extend(payment.summary());
        }
        Ok(summaries)
    }

    /// Registers a payment in `checkout` and links it to the order. Without
    /// an amount the payment covers the order's outstanding balance.
    #[tracing::instrument(skip(self, source))]
    pub async fn create_payment(
        &self,
        order_id: AggregateId,
        source: PaymentSource,
        amount: Option<Money>,
    ) -> Result<Payment> {
        let order = self.orders.load(order_id).await?;
        if !order.state().can_modify() {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.state(),
                action: "add payment",
            }
            .into());
        }
        let amount = match amount {
            Some(amount) => amount,
            None => {
                let payments = self.payment_summaries(&order).await?;
                order.outstanding_balance(&payments).non_negative()
            }
        };

        let cmd = CreatePayment::new(order_id, source, amount);
        let payment_id = cmd.payment_id;
        let result = self.processor.payments().create_payment(cmd).await?;
        self.orders
            .link_payment(LinkPayment {
                order_id,
                payment_id,
                amount,
            })
            .await?;

        tracing::info!(%payment_id, %amount, "payment created");
        Ok(result.aggregate)
    }

    /// Stores the card through the registry and pays with it.
    pub async fn create_card_payment(
        &self,
        order_id: AggregateId,
        details: CardDetails,
        amount: Option<Money>,
    ) -> Result<Payment> {
        let card = self.cards.register(details).await?;
        self.create_payment(order_id, PaymentSource::CreditCard(card), amount)
            .await
    }

    pub async fn get_payment(&self, payment_id: AggregateId) -> Result<Option<Payment>> {
        Ok(self.processor.payments().get_payment(payment_id).await?)
    }

    pub async fn authorize_payment(&self, payment_id: AggregateId) -> Result<Payment> {
        self.processor.authorize(payment_id).await
    }

    /// Captures a payment, never more than its order still owes.
    pub async fn capture_payment(
        &self,
        payment_id: AggregateId,
        amount: Option<Money>,
    ) -> Result<Payment> {
        let payment = self.processor.payments().load(payment_id).await?;
        let order_id = payment
            .order_id()
            .ok_or_else(|| DomainError::not_found("Payment", payment_id))?;
        let order = self.orders.load(order_id).await?;
        if !order.payment_ids().contains(&payment_id) {
            return Err(CheckoutError::PaymentNotOnOrder {
                payment_id,
                order_id,
            });
        }
        let due = order.outstanding_balance(&self.payment_summaries(&order).await?);

        self.processor.capture(payment_id, amount, due).await
    }

    pub async fn void_payment(&self, payment_id: AggregateId) -> Result<Payment> {
        self.processor.void(payment_id).await
    }

    pub async fn credit_payment(
        &self,
        payment_id: AggregateId,
        amount: Option<Money>,
    ) -> Result<Payment> {
        self.processor.credit(payment_id, amount).await
    }

    pub async fn reconcile_payment(
        &self,
        payment_id: AggregateId,
        outcome: GatewayOutcome,
    ) -> Result<Payment> {
        self.processor.reconcile(payment_id, outcome).await
    }

    // State machine

    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let payments = self.payment_summaries(&order).await?;
        let result = self
            .orders
            .advance(AdvanceOrder { order_id, payments })
            .await?;
        Ok(result.aggregate)
    }

    /// Captures outstanding payments, then completes the order and commits
    /// its stock.
    ///
    /// If a capture fails the order keeps its current state and the error
    /// names the payment.
    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let mut payments = self.payment_summaries(&order).await?;
        order.ensure_completable(&payments)?;

        let capturable: Vec<AggregateId> = payments
            .iter()
            .filter(|p| matches!(p.state, PaymentState::Checkout | PaymentState::Pending))
            .map(|p| p.payment_id)
            .collect();
        for payment_id in capturable {
            let due = order.outstanding_balance(&payments);
            if !due.is_positive() {
                break;
            }
            match self.processor.capture(payment_id, None, due).await {
                Ok(_) => {}
                Err(e @ CheckoutError::GatewayTimeout { .. }) => return Err(e),
                Err(e) => {
                    metrics::counter!("checkout_completion_failures_total").increment(1);
                    tracing::warn!(%order_id, %payment_id, error = %e, "capture failed; order not completed");
                    return Err(CheckoutError::PaymentFailed {
                        payment_id,
                        message: e.to_string(),
                    });
                }
            }
            payments = self.payment_summaries(&order).await?;
        }

        if order.outstanding_balance(&payments).is_positive() {
            metrics::counter!("checkout_completion_failures_total").increment(1);
            tracing::warn!(
                %order_id,
                due = %order.outstanding_balance(&payments),
                "captures left a balance; order not completed"
            );
            return Err(OrderError::IncompleteState {
                state: order.state(),
                unmet: "payments do not cover the order total",
            }
            .into());
        }

        let result = self
            .orders
            .complete(CompleteOrder { order_id, payments })
            .await?;
        for reservation_id in result.aggregate.reservation_ids() {
            if let Err(e) = self.inventory.commit(&reservation_id).await {
                tracing::warn!(%reservation_id, error = %e, "failed to commit stock");
            }
        }

        metrics::counter!("checkout_completed_total").increment(1);
        tracing::info!(%order_id, total = %result.aggregate.total(), "order completed");
        Ok(result.aggregate)
    }

    /// Cancels the order: uncaptured payments are voided, captured ones
    /// credited, and all of its stock goes back.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let payments = self.payment_summaries(&order).await?;
        order.ensure_cancelable(&payments)?;

        for payment in &payments {
            match payment.state {
                PaymentState::Completed if (payment.captured - payment.credited).is_positive() => {
                    self.processor.credit(payment.payment_id, None).await?;
                }
                PaymentState::Checkout | PaymentState::Pending | PaymentState::Failed => {
                    self.processor.void(payment.payment_id).await?;
                }
                _ => {}
            }
        }

        let reservations = order.reservation_ids();
        let payments = self.payment_summaries(&order).await?;
        let result = self
            .orders
            .cancel(CancelOrder { order_id, payments })
            .await?;
        self.return_stock(&reservations).await;

        metrics::counter!("checkout_canceled_total").increment(1);
        tracing::info!(%order_id, "order canceled");
        Ok(result.aggregate)
    }

    /// Marks a completed order returned and restocks its units.
    #[tracing::instrument(skip(self))]
    pub async fn return_order(&self, order_id: AggregateId) -> Result<Order> {
        let order = self.orders.load(order_id).await?;
        let reservations = order.reservation_ids();

        let result = self.orders.return_order(ReturnOrder { order_id }).await?;
        self.return_stock(&reservations).await;
        Ok(result.aggregate)
    }
}
