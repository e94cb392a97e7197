//! Line item ledger entries.

use serde::{Deserialize, Serialize};

use super::{LineItemId, Money, Variant};

/// A quantity of one variant on an order.
///
/// `price` is the unit price captured when the variant was first added and
/// does not follow later catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub variant: Variant,
    pub quantity: u32,
    pub price: Money,
}

impl LineItem {
    pub fn total(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_uses_the_price_snapshot() {
        let mut variant = crate::order::Variant::new("v-1", "MUG", "Mug", Money::from_dollars(20));
        let item = LineItem {
            id: LineItemId::new(),
            variant: variant.clone(),
            quantity: 2,
            price: variant.price,
        };
        variant.price = Money::from_dollars(25);

        assert_eq!(item.total(), Money::from_dollars(40));
    }
}
