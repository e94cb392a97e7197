//! Shipments and their manifests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LineItemId, Money, ReservationId, ShipmentId, StockLocationId, VariantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentState {
    #[default]
    Pending,
    /// Paid for and waiting to leave the stock location.
    Ready,
    Shipped,
    Canceled,
}

impl ShipmentState {
    /// Units and rates can still change.
    pub fn is_open(&self) -> bool {
        matches!(self, ShipmentState::Pending | ShipmentState::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentState::Pending => "pending",
            ShipmentState::Ready => "ready",
            ShipmentState::Shipped => "shipped",
            ShipmentState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for ShipmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Units of one line item placed in a shipment, backed by one stock
/// reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentUnit {
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub reservation_id: ReservationId,
    /// Order-wide insertion sequence, used to remove the oldest units first.
    pub seq: u64,
}

/// A shipping option quoted for a shipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingRate {
    pub method_id: String,
    pub name: String,
    pub cost: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub number: String,
    pub stock_location: StockLocationId,
    pub state: ShipmentState,
    pub units: Vec<ShipmentUnit>,
    pub rates: Vec<ShippingRate>,
    pub selected_method: Option<String>,
    pub tracking: Option<String>,
    pub shipped_at: Option<DateTime<Utc>>,
}

impl Shipment {
    pub fn new(id: ShipmentId, number: String, stock_location: StockLocationId) -> Self {
        Self {
            id,
            number,
            stock_location,
            state: ShipmentState::Pending,
            units: Vec::new(),
            rates: Vec::new(),
            selected_method: None,
            tracking: None,
            shipped_at: None,
        }
    }

    pub fn selected_rate(&self) -> Option<&ShippingRate> {
        let method = self.selected_method.as_deref()?;
        self.rates.iter().find(|r| r.method_id == method)
    }

    /// Cost counted toward the order's shipment total.
    pub fn cost(&self) -> Money {
        if self.state == ShipmentState::Canceled {
            return Money::zero();
        }
        self.selected_rate().map(|r| r.cost).unwrap_or_default()
    }

    pub fn unit_count(&self) -> u32 {
        self.units.iter().map(|u| u.quantity).sum()
    }

    pub fn has_units(&self) -> bool {
        self.unit_count() > 0
    }

    pub fn quantity_for(&self, line_item_id: LineItemId) -> u32 {
        self.units
            .iter()
            .filter(|u| u.line_item_id == line_item_id)
            .map(|u| u.quantity)
            .sum()
    }

    pub fn reservation_ids(&self) -> impl Iterator<Item = &ReservationId> {
        self.units.iter().map(|u| &u.reservation_id)
    }

    pub(crate) fn add_unit(&mut self, unit: ShipmentUnit) {
        self.units.push(unit);
    }

    /// Takes `quantity` off the unit backed by `reservation_id`, dropping the
    /// unit when it reaches zero.
    pub(crate) fn remove_units(&mut self, reservation_id: &ReservationId, quantity: u32) {
        if let Some(pos) = self
            .units
            .iter()
            .position(|u| &u.reservation_id == reservation_id)
        {
            let unit = &mut self.units[pos];
            unit.quantity = unit.quantity.saturating_sub(quantity);
            if unit.quantity == 0 {
                self.units.remove(pos);
            }
        }
    }

    /// Replaces the quoted rates, keeping `selected` only if it is among them.
    pub(crate) fn set_rates(&mut self, rates: Vec<ShippingRate>, selected: Option<String>) {
        self.selected_method = selected.filter(|m| rates.iter().any(|r| &r.method_id == m));
        self.rates = rates;
    }
}
