//! Shipping rate calculation.

use serde::{Deserialize, Serialize};

use super::{Address, Money, ShippingRate};

/// Quotes shipping rates for a shipment's contents and destination.
pub trait ShippingCalculator: Send + Sync {
    fn rates_for(&self, units: u32, destination: Option<&Address>) -> Vec<ShippingRate>;
}

/// A shipping method priced as a base cost plus a per-unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: String,
    pub name: String,
    pub base: Money,
    pub per_unit: Money,
    /// Largest shipment this method accepts.
    #[serde(default)]
    pub max_units: Option<u32>,
    /// Destination countries served; None serves every destination, including
    /// orders without an address yet.
    #[serde(default)]
    pub countries: Option<Vec<String>>,
}

impl ShippingMethod {
    pub fn offers(&self, units: u32, destination: Option<&Address>) -> bool {
        if units == 0 {
            return false;
        }
        if self.max_units.is_some_and(|max| units > max) {
            return false;
        }
        match (&self.countries, destination) {
            (None, _) => true,
            (Some(countries), Some(address)) => countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&address.country)),
            (Some(_), None) => false,
        }
    }

    pub fn cost(&self, units: u32) -> Money {
        self.base + self.per_unit.multiply(units)
    }
}

/// Fixed table of shipping methods.
#[derive(Debug, Clone, Default)]
pub struct ShippingTable {
    methods: Vec<ShippingMethod>,
}

impl ShippingTable {
    pub fn new(methods: Vec<ShippingMethod>) -> Self {
        Self { methods }
    }

    /// Ground for everyone, express for small US and Canadian shipments.
    pub fn standard() -> Self {
        Self::new(vec![
            ShippingMethod {
                id: "ground".to_string(),
                name: "Ground".to_string(),
                base: Money::from_cents(500),
                per_unit: Money::from_cents(100),
                max_units: None,
                countries: None,
            },
            ShippingMethod {
                id: "express".to_string(),
                name: "Express".to_string(),
                base: Money::from_cents(1500),
                per_unit: Money::from_cents(200),
                max_units: Some(10),
                countries: Some(vec!["US".to_string(), "CA".to_string()]),
            },
        ])
    }

    pub fn methods(&self) -> &[ShippingMethod] {
        &self.methods
    }
}

impl ShippingCalculator for ShippingTable {
    fn rates_for(&self, units: u32, destination: Option<&Address>) -> Vec<ShippingRate> {
        self.methods
            .iter()
            .filter(|m| m.offers(units, destination))
            .map(|m| ShippingRate {
                method_id: m.id.clone(),
                name: m.name.clone(),
                cost: m.cost(units),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(country: &str) -> Address {
        Address {
            firstname: "Grace".to_string(),
            lastname: "Hopper".to_string(),
            address1: "1 Navy Way".to_string(),
            city: "Arlington".to_string(),
            zipcode: "22201".to_string(),
            country: country.to_string(),
        }
    }

    #[test]
    fn ground_is_always_offered() {
        let rates = ShippingTable::standard().rates_for(2, None);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].method_id, "ground");
        assert_eq!(rates[0].cost, Money::from_cents(700));
    }

    #[test]
    fn express_needs_a_served_country() {
        let table = ShippingTable::standard();
        assert_eq!(table.rates_for(1, Some(&address("us"))).len(), 2);
        assert_eq!(table.rates_for(1, Some(&address("FR"))).len(), 1);
    }

    #[test]
    fn express_has_a_unit_limit() {
        let table = ShippingTable::standard();
        let rates = table.rates_for(11, Some(&address("US")));
        assert!(rates.iter().all(|r| r.method_id != "express"));
    }

    #[test]
    fn empty_shipments_get_no_rates() {
        assert!(ShippingTable::standard().rates_for(0, None).is_empty());
    }
}
