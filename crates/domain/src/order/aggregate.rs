//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::payment::PaymentState;

use super::{
    Address, Adjustment, AdjustmentId, AdjustmentKind, LineItem, LineItemId, Money, OrderError,
    OrderEvent, OrderState, ReservationId, Shipment, ShipmentId, ShipmentState, ShipmentUnit,
    ShippingCalculator, StockLocationId, Variant, VariantId,
    events::{
        AddressSetData, AdjustmentRemovedData, LineItemAddedData, LineItemRemovedData,
        OrderCanceledData, OrderCompletedData, OrderReturnedData, PaymentLinkedData,
        ShipmentCreatedData, ShipmentRatesRefreshedData, ShipmentShippedData,
        ShipmentTrackingSetData, ShipmentUnitsData, ShippingRateSelectedData,
        SpecialInstructionsSetData,
    },
};

/// What the order needs to know about one of its payments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub payment_id: AggregateId,
    pub state: PaymentState,
    pub amount: Money,
    pub captured: Money,
    pub credited: Money,
}

/// Units of a line item that should go into a shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// Units that already have a stock reservation and a destination shipment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUnit {
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub reservation_id: ReservationId,
}

/// Where newly added units of a line item go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPlacement {
    pub shipment_id: ShipmentId,
    pub reservation_id: ReservationId,
}

/// Order aggregate root.
///
/// Holds the line item ledger, shipments and adjustments. Totals are derived
/// from those on every applied event and never set directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    number: String,
    state: OrderState,
    created_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    ship_address: Option<Address>,
    special_instructions: Option<String>,
    line_items: Vec<LineItem>,
    shipments: Vec<Shipment>,
    adjustments: Vec<Adjustment>,
    payment_ids: Vec<AggregateId>,

    item_total: Money,
    shipment_total: Money,
    adjustment_total: Money,
    promotion_total: Money,
    total: Money,

    #[serde(skip)]
    next_unit_seq: u64,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            OrderEvent::OrderCreated(data) => {
                self.id = Some(data.order_id);
                self.number = data.number;
                self.created_at = Some(data.created_at);
                self.state = OrderState::Cart;
            }
            OrderEvent::AddressSet(data) => self.ship_address = Some(data.address),
            OrderEvent::SpecialInstructionsSet(data) => {
                self.special_instructions = data.instructions;
            }
            OrderEvent::LineItemAdded(data) => self.line_items.push(LineItem {
                id: data.line_item_id,
                variant: data.variant,
                quantity: data.quantity,
                price: data.price,
            }),
            OrderEvent::LineItemQuantityChanged(data) => {
                if let Some(item) = self.line_item_mut(data.line_item_id) {
                    item.quantity = data.new_quantity;
                }
            }
            OrderEvent::LineItemRemoved(data) => {
                self.line_items.retain(|i| i.id != data.line_item_id);
            }
            OrderEvent::ShipmentCreated(data) => self.shipments.push(Shipment::new(
                data.shipment_id,
                data.number,
                data.stock_location,
            )),
            OrderEvent::ShipmentUnitsAdded(data) => self.apply_units_added(data),
            OrderEvent::ShipmentUnitsRemoved(data) => {
                if let Some(shipment) = self.shipment_mut(data.shipment_id) {
                    shipment.remove_units(&data.reservation_id, data.quantity);
                }
            }
            OrderEvent::ShipmentRatesRefreshed(data) => {
                if let Some(shipment) = self.shipment_mut(data.shipment_id) {
                    shipment.set_rates(data.rates, data.selected);
                }
            }
            OrderEvent::ShippingRateSelected(data) => {
                if let Some(shipment) = self.shipment_mut(data.shipment_id) {
                    shipment.selected_method = Some(data.method_id);
                }
            }
            OrderEvent::ShipmentReady(data) => {
                self.set_shipment_state(data.shipment_id, ShipmentState::Ready);
            }
            OrderEvent::ShipmentShipped(data) => {
                if let Some(shipment) = self.shipment_mut(data.shipment_id) {
                    shipment.state = ShipmentState::Shipped;
                    shipment.shipped_at = Some(data.shipped_at);
                }
            }
            OrderEvent::ShipmentTrackingSet(data) => {
                if let Some(shipment) = self.shipment_mut(data.shipment_id) {
                    shipment.tracking = Some(data.tracking);
                }
            }
            OrderEvent::ShipmentCanceled(data) => {
                self.set_shipment_state(data.shipment_id, ShipmentState::Canceled);
            }
            OrderEvent::AdjustmentAdded(adjustment) => self.adjustments.push(adjustment),
            OrderEvent::AdjustmentRemoved(data) => {
                self.adjustments.retain(|a| a.id != data.adjustment_id);
            }
            OrderEvent::PaymentLinked(data) => self.payment_ids.push(data.payment_id),
            OrderEvent::StateAdvanced(data) => self.state = data.to,
            OrderEvent::OrderCompleted(data) => {
                self.state = OrderState::Complete;
                self.completed_at.get_or_insert(data.completed_at);
            }
            OrderEvent::OrderCanceled(_) => self.state = OrderState::Canceled,
            OrderEvent::OrderReturned(_) => self.state = OrderState::Returned,
        }
        self.recompute_totals();
    }
}

// Query methods
impl Order {
    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn ship_address(&self) -> Option<&Address> {
        self.ship_address.as_ref()
    }

    pub fn special_instructions(&self) -> Option<&str> {
        self.special_instructions.as_deref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn line_item(&self, line_item_id: LineItemId) -> Option<&LineItem> {
        self.line_items.iter().find(|i| i.id == line_item_id)
    }

    pub fn line_item_for_variant(&self, variant_id: &VariantId) -> Option<&LineItem> {
        self.line_items.iter().find(|i| &i.variant.id == variant_id)
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    pub fn shipment(&self, shipment_id: ShipmentId) -> Option<&Shipment> {
        self.shipments.iter().find(|s| s.id == shipment_id)
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn payment_ids(&self) -> &[AggregateId] {
        &self.payment_ids
    }

    pub fn item_total(&self) -> Money {
        self.item_total
    }

    pub fn shipment_total(&self) -> Money {
        self.shipment_total
    }

    pub fn adjustment_total(&self) -> Money {
        self.adjustment_total
    }

    pub fn promotion_total(&self) -> Money {
        self.promotion_total
    }

    pub fn total(&self) -> Money {
        self.total
    }

    /// Amount still owed: total minus what was captured, plus what was
    /// refunded.
    pub fn outstanding_balance(&self, payments: &[PaymentSummary]) -> Money {
        let captured: Money = payments.iter().map(|p| p.captured).sum();
        let credited: Money = payments.iter().map(|p| p.credited).sum();
        self.total - captured + credited
    }

    /// Quantities of each line item not yet placed in any live shipment.
    pub fn unassigned_units(&self) -> Vec<UnitRequest> {
        self.line_items
            .iter()
            .filter_map(|item| {
                let assigned = self.assigned_quantity(item.id);
                (item.quantity > assigned).then(|| UnitRequest {
                    line_item_id: item.id,
                    variant_id: item.variant.id.clone(),
                    quantity: item.quantity - assigned,
                })
            })
            .collect()
    }

    /// Shipment that receives new units: the requested one, or else the
    /// first open shipment. None when the order has no open shipment.
    pub fn placement_target(
        &self,
        requested: Option<ShipmentId>,
    ) -> Result<Option<&Shipment>, OrderError> {
        match requested {
            Some(shipment_id) => {
                let shipment = self.require_shipment(shipment_id)?;
                if !shipment.state.is_open() {
                    return Err(OrderError::ShipmentNotOpen {
                        shipment_id,
                        state: shipment.state,
                    });
                }
                Ok(Some(shipment))
            }
            None => Ok(self.shipments.iter().find(|s| s.state.is_open())),
        }
    }

    /// Reservations held by live (not canceled) shipments.
    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        self.shipments
            .iter()
            .filter(|s| s.state != ShipmentState::Canceled)
            .flat_map(|s| s.reservation_ids().cloned())
            .collect()
    }

    fn assigned_quantity(&self, line_item_id: LineItemId) -> u32 {
        self.shipments
            .iter()
            .filter(|s| s.state != ShipmentState::Canceled)
            .map(|s| s.quantity_for(line_item_id))
            .sum()
    }

    fn shipped_quantity(&self, line_item_id: LineItemId) -> u32 {
        self.shipments
            .iter()
            .filter(|s| s.state == ShipmentState::Shipped)
            .map(|s| s.quantity_for(line_item_id))
            .sum()
    }

    fn has_processing_payment(payments: &[PaymentSummary]) -> bool {
        payments
            .iter()
            .any(|p| p.state == PaymentState::Processing)
    }

    /// Checks the completion predicate of the current checkout step.
    fn unmet_predicate(&self, payments: &[PaymentSummary]) -> Option<&'static str> {
        match self.state {
            OrderState::Cart if self.line_items.is_empty() => Some("order has no line items"),
            OrderState::Address if self.ship_address.is_none() => Some("ship address is not set"),
            OrderState::Delivery => {
                let live: Vec<&Shipment> = self
                    .shipments
                    .iter()
                    .filter(|s| s.state != ShipmentState::Canceled)
                    .collect();
                if !live.iter().any(|s| s.selected_rate().is_some()) {
                    Some("no shipment has a selected shipping rate")
                } else if live
                    .iter()
                    .any(|s| s.has_units() && s.selected_rate().is_none())
                {
                    Some("a shipment holding units has no selected shipping rate")
                } else {
                    None
                }
            }
            OrderState::Payment => {
                if Self::has_processing_payment(payments) {
                    return Some("a payment is still processing");
                }
                if self.payments_cover_total(payments) {
                    None
                } else {
                    Some("payments do not cover the order total")
                }
            }
            _ => None,
        }
    }

    fn payments_cover_total(&self, payments: &[PaymentSummary]) -> bool {
        let covered: Money = payments
            .iter()
            .filter(|p| p.state.counts_toward_total())
            .map(|p| p.amount)
            .sum();
        self.total.is_zero() || covered >= self.total
    }
}

// Command methods (return events)
impl Order {
    pub fn create(
        &self,
        order_id: AggregateId,
        number: String,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }

        Ok(vec![OrderEvent::order_created(order_id, number, now)])
    }

    pub fn set_address(
        &self,
        address: Address,
        rates: &dyn ShippingCalculator,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("set address")?;
        let events = vec![OrderEvent::AddressSet(AddressSetData { address })];
        Ok(self.with_refreshed_rates(events, rates))
    }

    pub fn set_special_instructions(
        &self,
        instructions: Option<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("set special instructions")?;
        let instructions = instructions.filter(|i| !i.trim().is_empty());
        if instructions == self.special_instructions {
            return Ok(vec![]);
        }
        Ok(vec![OrderEvent::SpecialInstructionsSet(
            SpecialInstructionsSetData { instructions },
        )])
    }

    /// Adds units of a variant, merging into the existing line item for that
    /// variant. `placement` carries the reservation for the new units when
    /// the order has a shipment to put them in.
    pub fn add_line_item(
        &self,
        line_item_id: LineItemId,
        variant: Variant,
        quantity: u32,
        placement: Option<UnitPlacement>,
        rates: &dyn ShippingCalculator,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("add line item")?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        if variant.price.is_negative() {
            return Err(OrderError::InvalidPrice {
                price: variant.price.cents(),
            });
        }

        let mut events = Vec::new();
        let target_id = match self.line_item_for_variant(&variant.id) {
            Some(existing) => {
                let merged = existing
                    .quantity
                    .checked_add(quantity)
                    .ok_or(OrderError::InvalidQuantity { quantity })?;
                self.ensure_line_total_fits(existing, merged)?;
                events.push(OrderEvent::line_item_quantity_changed(
                    existing.id,
                    existing.quantity,
                    merged,
                ));
                existing.id
            }
            None => {
                self.ensure_fits(variant.price, quantity, Money::zero())?;
                events.push(OrderEvent::LineItemAdded(LineItemAddedData {
                    line_item_id,
                    price: variant.price,
                    variant: variant.clone(),
                    quantity,
                }));
                line_item_id
            }
        };

        if let Some(placement) = placement {
            events.push(self.units_added(target_id, variant.id, quantity, placement)?);
        }

        Ok(self.with_refreshed_rates(events, rates))
    }

    /// Sets a line item's quantity. Zero removes the line item. Excess units
    /// leave open shipments oldest first.
    pub fn update_line_item_quantity(
        &self,
        line_item_id: LineItemId,
        quantity: u32,
        placement: Option<UnitPlacement>,
        rates: &dyn ShippingCalculator,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if quantity == 0 {
            return self.remove_line_item(line_item_id, rates);
        }
        self.ensure_modifiable("update line item")?;
        let item = self.require_line_item(line_item_id)?;

        if quantity == item.quantity {
            return Ok(vec![]);
        }
        self.ensure_line_total_fits(item, quantity)?;

        let mut events = vec![OrderEvent::line_item_quantity_changed(
            line_item_id,
            item.quantity,
            quantity,
        )];

        if quantity < item.quantity {
            events.extend(self.unit_removals(line_item_id, quantity)?);
        } else if let Some(placement) = placement {
            events.push(self.units_added(
                line_item_id,
                item.variant.id.clone(),
                quantity - item.quantity,
                placement,
            )?);
        }

        Ok(self.with_refreshed_rates(events, rates))
    }

    /// Removes a line item and takes all of its units out of open shipments.
    pub fn remove_line_item(
        &self,
        line_item_id: LineItemId,
        rates: &dyn ShippingCalculator,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("remove line item")?;
        self.require_line_item(line_item_id)?;

        let mut events = self.unit_removals(line_item_id, 0)?;
        events.push(OrderEvent::LineItemRemoved(LineItemRemovedData {
            line_item_id,
        }));
        Ok(self.with_refreshed_rates(events, rates))
    }

    /// Opens a shipment from a stock location holding the given, already
    /// reserved, units.
    pub fn create_shipment(
        &self,
        shipment_id: ShipmentId,
        number: String,
        stock_location: StockLocationId,
        units: Vec<PlannedUnit>,
        rates: &dyn ShippingCalculator,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("create shipment")?;

        let mut events = vec![OrderEvent::ShipmentCreated(ShipmentCreatedData {
            shipment_id,
            number,
            stock_location,
        })];
        for unit in units {
            let item = self.require_line_item(unit.line_item_id)?;
            if unit.quantity == 0
                || self.assigned_quantity(item.id) + unit.quantity > item.quantity
            {
                return Err(OrderError::InvalidQuantity {
                    quantity: unit.quantity,
                });
            }
            events.push(OrderEvent::ShipmentUnitsAdded(ShipmentUnitsData {
                shipment_id,
                line_item_id: unit.line_item_id,
                variant_id: unit.variant_id,
                quantity: unit.quantity,
                reservation_id: unit.reservation_id,
            }));
        }
        Ok(self.with_refreshed_rates(events, rates))
    }

    pub fn select_rate(
        &self,
        shipment_id: ShipmentId,
        method_id: &str,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("select shipping rate")?;
        let shipment = self.require_open_shipment(shipment_id)?;

        if !shipment.rates.iter().any(|r| r.method_id == method_id) {
            return Err(OrderError::RateNotOffered {
                shipment_id,
                method_id: method_id.to_string(),
            });
        }
        if shipment.selected_method.as_deref() == Some(method_id) {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::ShippingRateSelected(
            ShippingRateSelectedData {
                shipment_id,
                method_id: method_id.to_string(),
            },
        )])
    }

    /// Ships a shipment that became ready when the order completed.
    pub fn ship(
        &self,
        shipment_id: ShipmentId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("ship")?;
        let shipment = self.require_shipment(shipment_id)?;
        if shipment.state != ShipmentState::Ready {
            return Err(OrderError::ShipmentNotReady {
                shipment_id,
                state: shipment.state,
            });
        }

        Ok(vec![OrderEvent::ShipmentShipped(ShipmentShippedData {
            shipment_id,
            shipped_at: now,
        })])
    }

    pub fn set_tracking(
        &self,
        shipment_id: ShipmentId,
        tracking: String,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("set tracking")?;
        let shipment = self.require_shipment(shipment_id)?;
        if shipment.state != ShipmentState::Shipped {
            return Err(OrderError::ShipmentNotShipped {
                shipment_id,
                state: shipment.state,
            });
        }

        Ok(vec![OrderEvent::ShipmentTrackingSet(
            ShipmentTrackingSetData {
                shipment_id,
                tracking,
            },
        )])
    }

    pub fn add_adjustment(
        &self,
        adjustment_id: AdjustmentId,
        label: String,
        amount: Money,
        kind: AdjustmentKind,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("add adjustment")?;
        if amount.is_negative() || self.total.checked_add(amount).is_none() {
            return Err(OrderError::InvalidPrice {
                price: amount.cents(),
            });
        }

        Ok(vec![OrderEvent::AdjustmentAdded(Adjustment {
            id: adjustment_id,
            label,
            amount,
            kind,
        })])
    }

    pub fn remove_adjustment(
        &self,
        adjustment_id: AdjustmentId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("remove adjustment")?;
        if !self.adjustments.iter().any(|a| a.id == adjustment_id) {
            return Err(OrderError::AdjustmentNotFound { adjustment_id });
        }

        Ok(vec![OrderEvent::AdjustmentRemoved(AdjustmentRemovedData {
            adjustment_id,
        })])
    }

    pub fn link_payment(
        &self,
        payment_id: AggregateId,
        amount: Money,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_modifiable("add payment")?;
        if self.payment_ids.contains(&payment_id) {
            return Err(OrderError::PaymentAlreadyLinked { payment_id });
        }

        Ok(vec![OrderEvent::PaymentLinked(PaymentLinkedData {
            payment_id,
            amount,
        })])
    }

    /// Moves to the next checkout step when the current step is satisfied.
    pub fn advance(&self, payments: &[PaymentSummary]) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        let Some(next) = self.state.next() else {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "advance",
            });
        };

        if let Some(unmet) = self.unmet_predicate(payments) {
            return Err(OrderError::IncompleteState {
                state: self.state,
                unmet,
            });
        }

        Ok(vec![OrderEvent::state_advanced(self.state, next)])
    }

    /// Marks a confirmed order complete. Payments must already be captured
    /// by the caller; shipments with units and a rate become ready.
    pub fn complete(
        &self,
        payments: &[PaymentSummary],
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_completable(payments)?;

        let mut events: Vec<OrderEvent> = self
            .shipments
            .iter()
            .filter(|s| {
                s.state == ShipmentState::Pending && s.has_units() && s.selected_rate().is_some()
            })
            .map(|s| OrderEvent::shipment_ready(s.id))
            .collect();
        events.push(OrderEvent::OrderCompleted(OrderCompletedData {
            completed_at: now,
            total: self.total,
        }));
        Ok(events)
    }

    /// Checks that `complete` may run, before any payment is touched.
    pub fn ensure_completable(&self, payments: &[PaymentSummary]) -> Result<(), OrderError> {
        self.ensure_created()?;
        if !self.state.can_complete() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "complete",
            });
        }
        if Self::has_processing_payment(payments) {
            return Err(OrderError::IncompleteState {
                state: self.state,
                unmet: "a payment is still processing",
            });
        }
        if !self.payments_cover_total(payments) {
            return Err(OrderError::IncompleteState {
                state: self.state,
                unmet: "payments do not cover the order total",
            });
        }
        Ok(())
    }

    /// Cancels the order. Shipments that have not left are canceled; the
    /// caller settles payments and stock.
    pub fn cancel(
        &self,
        payments: &[PaymentSummary],
        now: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_cancelable(payments)?;

        let mut events: Vec<OrderEvent> = self
            .shipments
            .iter()
            .filter(|s| s.state.is_open())
            .map(|s| OrderEvent::shipment_canceled(s.id))
            .collect();
        events.push(OrderEvent::OrderCanceled(OrderCanceledData {
            canceled_at: now,
            previous_state: self.state,
        }));
        Ok(events)
    }

    pub fn ensure_cancelable(&self, payments: &[PaymentSummary]) -> Result<(), OrderError> {
        self.ensure_created()?;
        if !self.state.can_cancel() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "cancel",
            });
        }
        if Self::has_processing_payment(payments) {
            return Err(OrderError::IncompleteState {
                state: self.state,
                unmet: "a payment is still processing",
            });
        }
        Ok(())
    }

    /// Records that a completed order came back. Shipments still waiting to
    /// leave are canceled.
    pub fn return_order(&self, now: DateTime<Utc>) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_created()?;
        if !self.state.can_return() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action: "return",
            });
        }

        let mut events: Vec<OrderEvent> = self
            .shipments
            .iter()
            .filter(|s| s.state.is_open())
            .map(|s| OrderEvent::shipment_canceled(s.id))
            .collect();
        events.push(OrderEvent::OrderReturned(OrderReturnedData {
            returned_at: now,
        }));
        Ok(events)
    }
}

// Helpers
impl Order {
    fn ensure_created(&self) -> Result<(), OrderError> {
        if self.id.is_none() {
            return Err(OrderError::NotCreated);
        }
        Ok(())
    }

    fn ensure_line_total_fits(&self, item: &LineItem, quantity: u32) -> Result<(), OrderError> {
        self.ensure_fits(item.price, quantity, item.total())
    }

    /// Rejects a line of `quantity` units at `price` whose amount, replacing
    /// `replaced` in the order total, cannot be represented.
    fn ensure_fits(&self, price: Money, quantity: u32, replaced: Money) -> Result<(), OrderError> {
        price
            .checked_multiply(quantity)
            .and_then(|line| (self.total - replaced).checked_add(line))
            .map(|_| ())
            .ok_or(OrderError::InvalidPrice {
                price: price.cents(),
            })
    }

    fn ensure_modifiable(&self, action: &'static str) -> Result<(), OrderError> {
        self.ensure_created()?;
        if !self.state.can_modify() {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.state,
                action,
            });
        }
        Ok(())
    }

    fn require_line_item(&self, line_item_id: LineItemId) -> Result<&LineItem, OrderError> {
        self.line_item(line_item_id)
            .ok_or(OrderError::LineItemNotFound { line_item_id })
    }

    fn require_shipment(&self, shipment_id: ShipmentId) -> Result<&Shipment, OrderError> {
        self.shipment(shipment_id)
            .ok_or(OrderError::ShipmentNotFound { shipment_id })
    }

    fn require_open_shipment(&self, shipment_id: ShipmentId) -> Result<&Shipment, OrderError> {
        let shipment = self.require_shipment(shipment_id)?;
        if !shipment.state.is_open() {
            return Err(OrderError::ShipmentNotOpen {
                shipment_id,
                state: shipment.state,
            });
        }
        Ok(shipment)
    }

    fn units_added(
        &self,
        line_item_id: LineItemId,
        variant_id: VariantId,
        quantity: u32,
        placement: UnitPlacement,
    ) -> Result<OrderEvent, OrderError> {
        self.require_open_shipment(placement.shipment_id)?;
        Ok(OrderEvent::ShipmentUnitsAdded(ShipmentUnitsData {
            shipment_id: placement.shipment_id,
            line_item_id,
            variant_id,
            quantity,
            reservation_id: placement.reservation_id,
        }))
    }

    /// Events that shrink a line item's shipped-or-open units down to
    /// `target`, taking from open shipments oldest unit first.
    fn unit_removals(
        &self,
        line_item_id: LineItemId,
        target: u32,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        let shipped = self.shipped_quantity(line_item_id);
        if target < shipped {
            return Err(OrderError::QuantityBelowShipped {
                line_item_id,
                shipped,
            });
        }

        let mut excess = self.assigned_quantity(line_item_id).saturating_sub(target);
        if excess == 0 {
            return Ok(vec![]);
        }

        let mut units: Vec<(&Shipment, &ShipmentUnit)> = self
            .shipments
            .iter()
            .filter(|s| s.state.is_open())
            .flat_map(|s| s.units.iter().map(move |u| (s, u)))
            .filter(|(_, u)| u.line_item_id == line_item_id)
            .collect();
        units.sort_by_key(|(_, u)| u.seq);

        let mut events = Vec::new();
        for (shipment, unit) in units {
            if excess == 0 {
                break;
            }
            let take = unit.quantity.min(excess);
            excess -= take;
            events.push(OrderEvent::ShipmentUnitsRemoved(ShipmentUnitsData {
                shipment_id: shipment.id,
                line_item_id,
                variant_id: unit.variant_id.clone(),
                quantity: take,
                reservation_id: unit.reservation_id.clone(),
            }));
        }
        Ok(events)
    }

    /// Appends rate refreshes for every open shipment whose quotes change
    /// once `events` are applied.
    fn with_refreshed_rates(
        &self,
        mut events: Vec<OrderEvent>,
        rates: &dyn ShippingCalculator,
    ) -> Vec<OrderEvent> {
        let mut projected = self.clone();
        projected.apply_events(events.iter().cloned());

        for shipment in projected.shipments.iter().filter(|s| s.state.is_open()) {
            let quoted = rates.rates_for(shipment.unit_count(), projected.ship_address.as_ref());
            let selected = shipment
                .selected_method
                .clone()
                .filter(|m| quoted.iter().any(|r| &r.method_id == m));
            if quoted != shipment.rates || selected != shipment.selected_method {
                events.push(OrderEvent::ShipmentRatesRefreshed(
                    ShipmentRatesRefreshedData {
                        shipment_id: shipment.id,
                        rates: quoted,
                        selected,
                    },
                ));
            }
        }
        events
    }
}

// Event application helpers
impl Order {
    fn line_item_mut(&mut self, line_item_id: LineItemId) -> Option<&mut LineItem> {
        self.line_items.iter_mut().find(|i| i.id == line_item_id)
    }

    fn shipment_mut(&mut self, shipment_id: ShipmentId) -> Option<&mut Shipment> {
        self.shipments.iter_mut().find(|s| s.id == shipment_id)
    }

    fn set_shipment_state(&mut self, shipment_id: ShipmentId, state: ShipmentState) {
        if let Some(shipment) = self.shipment_mut(shipment_id) {
            shipment.state = state;
        }
    }

    fn apply_units_added(&mut self, data: ShipmentUnitsData) {
        let seq = self.next_unit_seq;
        self.next_unit_seq += 1;
        if let Some(shipment) = self.shipment_mut(data.shipment_id) {
            shipment.add_unit(ShipmentUnit {
                line_item_id: data.line_item_id,
                variant_id: data.variant_id,
                quantity: data.quantity,
                reservation_id: data.reservation_id,
                seq,
            });
        }
    }

    fn recompute_totals(&mut self) {
        self.item_total = self.line_items.iter().map(LineItem::total).sum();
        self.shipment_total = self.shipments.iter().map(Shipment::cost).sum();
        self.adjustment_total = self
            .adjustments
            .iter()
            .filter(|a| a.kind == AdjustmentKind::Charge)
            .map(|a| a.amount)
            .sum();
        self.promotion_total = self
            .adjustments
            .iter()
            .filter(|a| a.kind == AdjustmentKind::Promotion)
            .map(|a| a.amount)
            .sum();
        self.total =
            self.item_total + self.shipment_total + self.adjustment_total - self.promotion_total;
    }
}
