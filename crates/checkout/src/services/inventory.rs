//! Stock allocation trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::order::{ReservationId, StockLocationId, VariantId};
use tokio::sync::Mutex;

use crate::error::CheckoutError;

/// Lifecycle of a stock reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    /// Counted against availability; on-hand stock is untouched.
    Held,

    /// On-hand stock was decremented when the order completed.
    Committed,
}

/// Units of one variant set aside at one stock location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub stock_location: StockLocationId,
    pub variant_id: VariantId,
    pub quantity: u32,
    pub status: ReservationStatus,
    /// False when the stock item did not track inventory at reservation
    /// time; such reservations never touch the counts.
    pub tracked: bool,
}

/// Trait for stock reservation operations.
///
/// Every stock mutation in the checkout core goes through an allocator.
/// Operations on the same `(stock_location, variant)` are linearized, so two
/// racing reservations can never oversell.
#[async_trait]
pub trait InventoryAllocator: Send + Sync {
    /// Sets units aside; fails with [`CheckoutError::InsufficientStock`] when
    /// fewer than `quantity` are available, unless the stock item is
    /// backorderable or does not track inventory.
    async fn reserve(
        &self,
        stock_location: &StockLocationId,
        variant_id: &VariantId,
        quantity: u32,
    ) -> Result<ReservationId, CheckoutError>;

    /// Returns a held reservation to availability.
    async fn release(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError>;

    /// Converts a held reservation into a decrement of on-hand stock.
    /// Committing twice is a no-op.
    async fn commit(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError>;

    /// Puts committed units back on hand.
    async fn restock(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError>;

    /// Shrinks a reservation by `quantity`, freeing (or restocking) those
    /// units. A reservation reduced to zero disappears.
    async fn reduce(
        &self,
        reservation_id: &ReservationId,
        quantity: u32,
    ) -> Result<(), CheckoutError>;

    async fn reservation(&self, reservation_id: &ReservationId) -> Option<Reservation>;

    /// On-hand units not held by any reservation.
    async fn available(&self, stock_location: &StockLocationId, variant_id: &VariantId) -> u32;
}

/// Stock of one variant at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockItem {
    pub count_on_hand: u32,
    /// Units set aside by held reservations.
    pub held: u32,
    /// Reservations may exceed what is available.
    pub backorderable: bool,
    /// When false, reservations always succeed and leave the counts alone.
    pub track_inventory: bool,
}

impl Default for StockItem {
    fn default() -> Self {
        Self {
            count_on_hand: 0,
            held: 0,
            backorderable: false,
            track_inventory: true,
        }
    }
}

impl StockItem {
    pub fn available(&self) -> u32 {
        self.count_on_hand.saturating_sub(self.held)
    }

    fn can_supply(&self, quantity: u32) -> bool {
        !self.track_inventory || self.backorderable || quantity <= self.available()
    }
}

#[derive(Debug, Default)]
struct InMemoryInventoryState {
    stock: HashMap<(StockLocationId, VariantId), StockItem>,
    reservations: HashMap<ReservationId, Reservation>,
    next_id: u32,
}

impl InMemoryInventoryState {
    fn item(&mut self, reservation: &Reservation) -> &mut StockItem {
        self.stock
            .entry((
                reservation.stock_location.clone(),
                reservation.variant_id.clone(),
            ))
            .or_default()
    }

    fn take(&mut self, reservation_id: &ReservationId) -> Result<Reservation, CheckoutError> {
        self.reservations
            .remove(reservation_id)
            .ok_or_else(|| CheckoutError::ReservationNotFound(reservation_id.clone()))
    }

    /// Gives `quantity` units of a reservation back to the stock item.
    fn give_back(&mut self, reservation: &Reservation, quantity: u32) {
        if !reservation.tracked {
            return;
        }
        let status = reservation.status;
        let item = self.item(reservation);
        match status {
            ReservationStatus::Held => item.held = item.held.saturating_sub(quantity),
            ReservationStatus::Committed => {
                item.count_on_hand = item.count_on_hand.saturating_add(quantity)
            }
        }
    }
}

/// In-memory allocator used by tests and the development server.
///
/// A single lock guards all stock items, which linearizes every
/// `(stock_location, variant)` pair.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryAllocator {
    state: Arc<Mutex<InMemoryInventoryState>>,
}

impl InMemoryInventoryAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the on-hand count for a variant at a location.
    pub async fn set_stock(
        &self,
        stock_location: &StockLocationId,
        variant_id: &VariantId,
        on_hand: u32,
    ) {
        let mut state = self.state.lock().await;
        state
            .stock
            .entry((stock_location.clone(), variant_id.clone()))
            .or_default()
            .count_on_hand = on_hand;
    }

    /// Sets whether a variant at a location may be backordered and whether
    /// its inventory is tracked at all.
    pub async fn set_stock_policy(
        &self,
        stock_location: &StockLocationId,
        variant_id: &VariantId,
        backorderable: bool,
        track_inventory: bool,
    ) {
        let mut state = self.state.lock().await;
        let item = state
            .stock
            .entry((stock_location.clone(), variant_id.clone()))
            .or_default();
        item.backorderable = backorderable;
        item.track_inventory = track_inventory;
    }

    /// The stock item, or an empty tracked one when nothing was stocked.
    pub async fn stock_item(
        &self,
        stock_location: &StockLocationId,
        variant_id: &VariantId,
    ) -> StockItem {
        let state = self.state.lock().await;
        state
            .stock
            .get(&(stock_location.clone(), variant_id.clone()))
            .copied()
            .unwrap_or_default()
    }

    pub async fn on_hand(&self, stock_location: &StockLocationId, variant_id: &VariantId) -> u32 {
        self.stock_item(stock_location, variant_id)
            .await
            .count_on_hand
    }

    /// Number of live reservations.
    pub async fn reservation_count(&self) -> usize {
        self.state.lock().await.reservations.len()
    }
}

#[async_trait]
impl InventoryAllocator for InMemoryInventoryAllocator {
    async fn reserve(
        &self,
        stock_location: &StockLocationId,
        variant_id: &VariantId,
        quantity: u32,
    ) -> Result<ReservationId, CheckoutError> {
        let mut state = self.state.lock().await;

        let item = state
            .stock
            .entry((stock_location.clone(), variant_id.clone()))
            .or_default();
        if !item.can_supply(quantity) {
            return Err(CheckoutError::InsufficientStock {
                variant_id: variant_id.clone(),
                stock_location: stock_location.clone(),
                requested: quantity,
                available: item.available(),
            });
        }
        let tracked = item.track_inventory;
        if tracked {
            item.held = item.held.saturating_add(quantity);
        }

        state.next_id += 1;
        let reservation_id = ReservationId::new(format!("RES-{:04}", state.next_id));
        state.reservations.insert(
            reservation_id.clone(),
            Reservation {
                id: reservation_id.clone(),
                stock_location: stock_location.clone(),
                variant_id: variant_id.clone(),
                quantity,
                status: ReservationStatus::Held,
                tracked,
            },
        );

        metrics::counter!("stock_reservations_total").increment(1);
        tracing::debug!(%reservation_id, %variant_id, quantity, "stock reserved");
        Ok(reservation_id)
    }

    async fn release(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError> {
        let mut state = self.state.lock().await;
        let reservation = state.take(reservation_id)?;
        if reservation.status == ReservationStatus::Committed {
            // Committed stock only comes back through restock.
            state.reservations.insert(reservation_id.clone(), reservation);
            return Ok(());
        }
        state.give_back(&reservation, reservation.quantity);
        Ok(())
    }

    async fn commit(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError> {
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .ok_or_else(|| CheckoutError::ReservationNotFound(reservation_id.clone()))?;
        if reservation.status == ReservationStatus::Committed {
            return Ok(());
        }
        reservation.status = ReservationStatus::Committed;
        let reservation = reservation.clone();
        if !reservation.tracked {
            return Ok(());
        }

        // Backordered units beyond what is on hand floor the count at zero.
        let item = state.item(&reservation);
        item.held = item.held.saturating_sub(reservation.quantity);
        item.count_on_hand = item.count_on_hand.saturating_sub(reservation.quantity);
        Ok(())
    }

    async fn restock(&self, reservation_id: &ReservationId) -> Result<(), CheckoutError> {
        let mut state = self.state.lock().await;
        let reservation = state.take(reservation_id)?;
        state.give_back(&reservation, reservation.quantity);
        tracing::debug!(%reservation_id, status = ?reservation.status, "stock returned");
        Ok(())
    }

    async fn reduce(
        &self,
        reservation_id: &ReservationId,
        quantity: u32,
    ) -> Result<(), CheckoutError> {
        let mut state = self.state.lock().await;
        let mut reservation = state.take(reservation_id)?;

        let quantity = quantity.min(reservation.quantity);
        state.give_back(&reservation, quantity);
        reservation.quantity -= quantity;

        if reservation.quantity > 0 {
            state.reservations.insert(reservation_id.clone(), reservation);
        }
        Ok(())
    }

    async fn reservation(&self, reservation_id: &ReservationId) -> Option<Reservation> {
        self.state
            .lock()
            .await
            .reservations
            .get(reservation_id)
            .cloned()
    }

    async fn available(&self, stock_location: &StockLocationId, variant_id: &VariantId) -> u32 {
        self.stock_item(stock_location, variant_id)
            .await
            .available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> StockLocationId {
        StockLocationId::new("default")
    }

    fn shirt() -> VariantId {
        VariantId::new("V-SHIRT")
    }

    async fn stocked(on_hand: u32) -> InMemoryInventoryAllocator {
        let allocator = InMemoryInventoryAllocator::new();
        allocator.set_stock(&location(), &shirt(), on_hand).await;
        allocator
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let allocator = stocked(5).await;

        let id = allocator.reserve(&location(), &shirt(), 2).await.unwrap();
        assert_eq!(id.as_str(), "RES-0001");
        assert_eq!(allocator.available(&location(), &shirt()).await, 3);
        assert_eq!(allocator.on_hand(&location(), &shirt()).await, 5);

        allocator.release(&id).await.unwrap();
        assert_eq!(allocator.available(&location(), &shirt()).await, 5);
        assert_eq!(allocator.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_insufficient_stock() {
        let allocator = stocked(1).await;

        let result = allocator.reserve(&location(), &shirt(), 2).await;
        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));
        assert_eq!(allocator.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_reserves_never_oversell() {
        let allocator = stocked(1).await;

        let (loc, sku) = (location(), shirt());
        let (a, b) = tokio::join!(
            allocator.reserve(&loc, &sku, 1),
            allocator.reserve(&loc, &sku, 1),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert_eq!(allocator.available(&location(), &shirt()).await, 0);
    }

    #[tokio::test]
    async fn test_commit_decrements_on_hand() {
        let allocator = stocked(4).await;
        let id = allocator.reserve(&location(), &shirt(), 3).await.unwrap();

        allocator.commit(&id).await.unwrap();
        allocator.commit(&id).await.unwrap();

        assert_eq!(allocator.on_hand(&location(), &shirt()).await, 1);
        assert_eq!(allocator.available(&location(), &shirt()).await, 1);
        assert_eq!(
            allocator.reservation(&id).await.unwrap().status,
            ReservationStatus::Committed
        );
    }

    #[tokio::test]
    async fn test_restock_returns_committed_units() {
        let allocator = stocked(4).await;
        let id = allocator.reserve(&location(), &shirt(), 3).await.unwrap();
        allocator.commit(&id).await.unwrap();

        allocator.restock(&id).await.unwrap();
        assert_eq!(allocator.on_hand(&location(), &shirt()).await, 4);
        assert!(allocator.reservation(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_release_leaves_committed_stock_alone() {
        let allocator = stocked(2).await;
        let id = allocator.reserve(&location(), &shirt(), 2).await.unwrap();
        allocator.commit(&id).await.unwrap();

        allocator.release(&id).await.unwrap();
        assert_eq!(allocator.on_hand(&location(), &shirt()).await, 0);
        assert!(allocator.reservation(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_reduce_frees_part_of_a_reservation() {
        let allocator = stocked(5).await;
        let id = allocator.reserve(&location(), &shirt(), 3).await.unwrap();

        allocator.reduce(&id, 1).await.unwrap();
        assert_eq!(allocator.reservation(&id).await.unwrap().quantity, 2);
        assert_eq!(allocator.available(&location(), &shirt()).await, 3);

        allocator.reduce(&id, 2).await.unwrap();
        assert!(allocator.reservation(&id).await.is_none());
        assert_eq!(allocator.available(&location(), &shirt()).await, 5);
    }

    #[tokio::test]
    async fn test_untracked_variant_reserves_without_stock() {
        let allocator = InMemoryInventoryAllocator::new();
        let gift_card = VariantId::new("V-GIFT-CARD");
        allocator
            .set_stock_policy(&location(), &gift_card, false, false)
            .await;

        let id = allocator.reserve(&location(), &gift_card, 3).await.unwrap();
        assert!(!allocator.reservation(&id).await.unwrap().tracked);

        allocator.commit(&id).await.unwrap();
        let item = allocator.stock_item(&location(), &gift_card).await;
        assert_eq!(item.count_on_hand, 0);
        assert_eq!(item.held, 0);

        allocator.restock(&id).await.unwrap();
        assert_eq!(allocator.on_hand(&location(), &gift_card).await, 0);
    }

    #[tokio::test]
    async fn test_backorderable_variant_reserves_past_zero() {
        let allocator = stocked(0).await;
        allocator
            .set_stock_policy(&location(), &shirt(), true, true)
            .await;

        let id = allocator.reserve(&location(), &shirt(), 2).await.unwrap();
        assert_eq!(allocator.stock_item(&location(), &shirt()).await.held, 2);
        assert_eq!(allocator.available(&location(), &shirt()).await, 0);

        allocator.release(&id).await.unwrap();
        assert_eq!(allocator.stock_item(&location(), &shirt()).await.held, 0);
    }

    #[tokio::test]
    async fn test_unstocked_variant_is_tracked_by_default() {
        let allocator = InMemoryInventoryAllocator::new();
        let item = allocator.stock_item(&location(), &shirt()).await;
        assert!(item.track_inventory);
        assert!(!item.backorderable);
        assert!(allocator.reserve(&location(), &shirt(), 1).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let allocator = InMemoryInventoryAllocator::new();
        let result = allocator.release(&ReservationId::new("RES-9999")).await;
        assert!(matches!(result, Err(CheckoutError::ReservationNotFound(_))));
    }
}
