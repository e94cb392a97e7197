//! Integration tests for the checkout coordinator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use checkout::{
    BogusGateway, CheckoutCoordinator, CheckoutError, CheckoutSettings, InMemoryInventoryAllocator,
    InventoryAllocator,
};
use common::{AggregateId, FixedClock};
use domain::card::CardDetails;
use domain::order::{StockLocationId, VariantId};
use domain::{
    Address, Aggregate, DomainError, GatewayOperation, GatewayOutcome, Money, OrderError,
    OrderState, PaymentError, PaymentState, ShipmentId, ShipmentState, Variant,
};
use event_store::InMemoryEventStore;

type TestCoordinator =
    CheckoutCoordinator<InMemoryEventStore, InMemoryInventoryAllocator, BogusGateway>;

struct TestHarness {
    coordinator: TestCoordinator,
    inventory: InMemoryInventoryAllocator,
    gateway: BogusGateway,
}

impl TestHarness {
    async fn new() -> Self {
        let inventory = InMemoryInventoryAllocator::new();
        inventory.set_stock(&location(), &shirt().id, 10).await;
        let gateway = BogusGateway::new();

        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap());
        let coordinator = CheckoutCoordinator::with_parts(
            InMemoryEventStore::new(),
            inventory.clone(),
            gateway.clone(),
            Arc::new(clock),
            CheckoutSettings {
                gateway_timeout: Duration::from_millis(200),
                stock_location: location(),
            },
        );

        Self {
            coordinator,
            inventory,
            gateway,
        }
    }

    async fn on_hand(&self) -> u32 {
        self.inventory.on_hand(&location(), &shirt().id).await
    }

    async fn available(&self) -> u32 {
        self.inventory.available(&location(), &shirt().id).await
    }

    /// Order with `quantity` shirts in a ground shipment, a card payment
    /// covering the total, sitting in `confirm`.
    async fn confirmed_order(&self, quantity: u32) -> (AggregateId, ShipmentId, AggregateId) {
        let c = &self.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        c.add_line_item(order_id, shirt(), quantity, None)
            .await
            .unwrap();
        c.set_address(order_id, address()).await.unwrap();
        let (_, shipment_id) = c.create_shipment(order_id, None).await.unwrap();
        c.select_rate(order_id, shipment_id, "ground").await.unwrap();
        for _ in 0..3 {
            c.advance(order_id).await.unwrap();
        }

        let payment = c
            .create_card_payment(order_id, card_details(), None)
            .await
            .unwrap();
        let order = c.advance(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Confirm);

        (order_id, shipment_id, payment.id().unwrap())
    }
}

fn location() -> StockLocationId {
    StockLocationId::new("default")
}

fn shirt() -> Variant {
    Variant::new("V-SHIRT", "SHIRT-001", "Shirt", Money::from_dollars(20))
}

fn address() -> Address {
    Address {
        firstname: "Ada".to_string(),
        lastname: "Lovelace".to_string(),
        address1: "12 St James's Square".to_string(),
        city: "London".to_string(),
        zipcode: "SW1Y 4JH".to_string(),
        country: "GB".to_string(),
    }
}

fn card_details() -> CardDetails {
    CardDetails {
        number: Some("4111111111111111".to_string()),
        verification_value: Some("123".to_string()),
        month: Some(4),
        year: Some(2030),
        name: Some("Ada Lovelace".to_string()),
        ..Default::default()
    }
}

mod line_items {
    use super::*;

    #[tokio::test]
    async fn test_quantity_changes_reprice_the_order() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();

        let order = c.add_line_item(order_id, shirt(), 2, None).await.unwrap();
        assert_eq!(order.item_total(), Money::from_dollars(40));

        let line_item_id = order.line_items()[0].id;
        let order = c
            .update_line_item_quantity(order_id, line_item_id, 1, None)
            .await
            .unwrap();
        assert_eq!(order.item_total(), Money::from_dollars(20));
        assert_eq!(order.line_items()[0].quantity, 1);
    }

    #[tokio::test]
    async fn test_added_units_are_reserved_in_open_shipment() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        c.add_line_item(order_id, shirt(), 1, None).await.unwrap();
        let (_, shipment_id) = c.create_shipment(order_id, None).await.unwrap();
        assert_eq!(h.available().await, 9);

        let order = c.add_line_item(order_id, shirt(), 2, None).await.unwrap();

        assert_eq!(order.line_items()[0].quantity, 3);
        assert_eq!(order.shipment(shipment_id).unwrap().unit_count(), 3);
        assert_eq!(h.available().await, 7);
        assert_eq!(h.on_hand().await, 10);
    }

    #[tokio::test]
    async fn test_removing_only_line_item_frees_its_stock() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        let order = c.add_line_item(order_id, shirt(), 2, None).await.unwrap();
        let line_item_id = order.line_items()[0].id;
        let (_, shipment_id) = c.create_shipment(order_id, None).await.unwrap();
        assert_eq!(h.available().await, 8);

        let order = c.remove_line_item(order_id, line_item_id).await.unwrap();

        assert!(order.line_items().is_empty());
        assert!(!order.shipment(shipment_id).unwrap().has_units());
        assert_eq!(h.available().await, 10);
        assert_eq!(h.inventory.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_shrinking_quantity_frees_part_of_the_reservation() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        let order = c.add_line_item(order_id, shirt(), 3, None).await.unwrap();
        let line_item_id = order.line_items()[0].id;
        c.create_shipment(order_id, None).await.unwrap();

        c.update_line_item_quantity(order_id, line_item_id, 1, None)
            .await
            .unwrap();

        assert_eq!(h.available().await, 9);
    }

    #[tokio::test]
    async fn test_out_of_stock_addition_leaves_order_untouched() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        c.add_line_item(order_id, shirt(), 1, None).await.unwrap();
        c.create_shipment(order_id, None).await.unwrap();

        let result = c.add_line_item(order_id, shirt(), 50, None).await;

        assert!(matches!(
            result,
            Err(CheckoutError::InsufficientStock {
                requested: 50,
                available: 9,
                ..
            })
        ));
        let order = c.load_order(order_id).await.unwrap();
        assert_eq!(order.line_items()[0].quantity, 1);
        assert_eq!(h.available().await, 9);
    }

    #[tokio::test]
    async fn test_rejected_addition_releases_its_reservation() {
        let h = TestHarness::new().await;
        let c = &h.coordinator;
        let order_id = c.create_order().await.unwrap().id().unwrap();
        c.add_line_item(order_id, shirt(), 1, None).await.unwrap();
        c.create_shipment(order_id, None).await.unwrap();

        let free = Variant::new("V-SHIRT", "SHIRT-001", "Shirt", Money::from_cents(-1));
        let result = c.add_line_item(order_id, free, 1, None).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Order(
                OrderError::InvalidPrice { .. }
            )))
        ));
        assert_eq!(h.available().await, 9);
        assert_eq!(h.inventory.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_orders_never_oversell() {
        let h = TestHarness::new().await;
        h.inventory.set_stock(&location(), &shirt().id, 1).await;
        let h = Arc::new(h);

        let mut handles = Vec::new();
        for _ in 0..2 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                let c = &h.coordinator;
                let order_id = c.create_order().await.unwrap().id().unwrap();
                c.add_line_item(order_id, shirt(), 1, None).await.unwrap();
                c.create_shipment(order_id, None).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert!(matches!(e, CheckoutError::InsufficientStock { .. })),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(h.available().await, 0);
    }
}

mod completion {
    use super::*;

    #[tokio::test]
    async fn test_complete_captures_and_commits_stock() {
        let h = TestHarness::new().await;
        let (order_id, shipment_id, payment_id) = h.confirmed_order(1).await;

        let order = h.coordinator.complete(order_id).await.unwrap();

        assert_eq!(order.state(), OrderState::Complete);
        assert_eq!(order.total(), Money::from_dollars(26));
        assert_eq!(
            order.shipment(shipment_id).unwrap().state,
            ShipmentState::Ready
        );

        let payment = h.coordinator.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.state(), PaymentState::Completed);
        assert_eq!(payment.captured(), Money::from_dollars(26));
        assert_eq!(h.gateway.calls(GatewayOperation::Authorize).await, 1);
        assert_eq!(h.gateway.calls(GatewayOperation::Capture).await, 1);

        assert_eq!(h.on_hand().await, 9);
        assert_eq!(h.available().await, 9);
    }

    #[tokio::test]
    async fn test_items_added_after_confirm_block_completion() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.coordinator
            .add_line_item(order_id, shirt(), 3, None)
            .await
            .unwrap();

        let result = h.coordinator.complete(order_id).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Order(
                OrderError::IncompleteState {
                    state: OrderState::Confirm,
                    unmet: "payments do not cover the order total"
                }
            )))
        ));
        let order = h.coordinator.load_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Confirm);
        let payment = h.coordinator.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.captured(), Money::zero());
        assert_eq!(h.gateway.calls(GatewayOperation::Capture).await, 0);
    }

    #[tokio::test]
    async fn test_credited_balance_blocks_completion() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.coordinator.capture_payment(payment_id, None).await.unwrap();
        h.coordinator
            .credit_payment(payment_id, Some(Money::from_dollars(5)))
            .await
            .unwrap();

        let result = h.coordinator.complete(order_id).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Order(
                OrderError::IncompleteState { .. }
            )))
        ));
        let order = h.coordinator.load_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Confirm);
        assert_eq!(h.on_hand().await, 10);
    }

    #[tokio::test]
    async fn test_failed_capture_blocks_completion() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.gateway.decline(GatewayOperation::Capture).await;

        let result = h.coordinator.complete(order_id).await;

        match result {
            Err(CheckoutError::PaymentFailed {
                payment_id: failed,
                message,
            }) => {
                assert_eq!(failed, payment_id);
                assert_eq!(message, "Bogus Gateway: Forced failure");
            }
            other => panic!("expected PaymentFailed, got {other:?}"),
        }
        let order = h.coordinator.load_order(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Confirm);
        assert_eq!(h.on_hand().await, 10);
    }

    #[tokio::test]
    async fn test_failed_payment_cannot_be_captured_again() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.gateway.decline(GatewayOperation::Capture).await;
        let _ = h.coordinator.complete(order_id).await;
        let calls = h.gateway.total_calls().await;

        let result = h.coordinator.capture_payment(payment_id, None).await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Payment(
                PaymentError::IncompleteState { .. }
            )))
        ));
        assert_eq!(h.gateway.total_calls().await, calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_payment_blocks_completion_until_reconciled() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.gateway.set_latency(Duration::from_secs(5)).await;

        let result = h.coordinator.authorize_payment(payment_id).await;
        assert!(matches!(result, Err(CheckoutError::GatewayTimeout { .. })));

        let result = h.coordinator.complete(order_id).await;
        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Order(
                OrderError::IncompleteState { .. }
            )))
        ));

        h.gateway.set_latency(Duration::ZERO).await;
        let payment = h
            .coordinator
            .reconcile_payment(payment_id, GatewayOutcome::success("BGS-777777"))
            .await
            .unwrap();
        assert_eq!(payment.state(), PaymentState::Pending);

        let order = h.coordinator.complete(order_id).await.unwrap();
        assert_eq!(order.state(), OrderState::Complete);
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancel_complete_order_credits_and_restocks() {
        let h = TestHarness::new().await;
        let (order_id, shipment_id, payment_id) = h.confirmed_order(2).await;
        h.coordinator.complete(order_id).await.unwrap();
        assert_eq!(h.on_hand().await, 8);

        let order = h.coordinator.cancel(order_id).await.unwrap();

        assert_eq!(order.state(), OrderState::Canceled);
        assert_eq!(
            order.shipment(shipment_id).unwrap().state,
            ShipmentState::Canceled
        );
        let payment = h.coordinator.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.credited(), payment.captured());
        assert!(payment.credit_allowed().is_zero());
        assert_eq!(h.gateway.calls(GatewayOperation::Credit).await, 1);
        assert_eq!(h.on_hand().await, 10);
        assert_eq!(h.available().await, 10);
    }

    #[tokio::test]
    async fn test_cancel_voids_uncaptured_payment_and_releases_stock() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.coordinator.authorize_payment(payment_id).await.unwrap();

        let order = h.coordinator.cancel(order_id).await.unwrap();

        assert_eq!(order.state(), OrderState::Canceled);
        let payment = h.coordinator.get_payment(payment_id).await.unwrap().unwrap();
        assert_eq!(payment.state(), PaymentState::Void);
        assert_eq!(h.gateway.calls(GatewayOperation::Void).await, 1);
        assert_eq!(h.gateway.calls(GatewayOperation::Capture).await, 0);
        assert_eq!(h.available().await, 10);
        assert_eq!(h.on_hand().await, 10);
    }

    #[tokio::test]
    async fn test_canceled_order_refuses_payments() {
        let h = TestHarness::new().await;
        let (order_id, _, _) = h.confirmed_order(1).await;
        h.coordinator.cancel(order_id).await.unwrap();

        let result = h
            .coordinator
            .create_card_payment(order_id, card_details(), None)
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Order(
                OrderError::InvalidStateTransition { .. }
            )))
        ));
    }

    #[tokio::test]
    async fn test_over_credit_is_refused_without_gateway_call() {
        let h = TestHarness::new().await;
        let (order_id, _, payment_id) = h.confirmed_order(1).await;
        h.coordinator.complete(order_id).await.unwrap();
        let calls = h.gateway.total_calls().await;

        let result = h
            .coordinator
            .credit_payment(payment_id, Some(Money::from_dollars(100)))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::Domain(DomainError::Payment(
                PaymentError::OverCredit { .. }
            )))
        ));
        assert_eq!(h.gateway.total_calls().await, calls);
    }

    #[tokio::test]
    async fn test_return_restocks_committed_units() {
        let h = TestHarness::new().await;
        let (order_id, shipment_id, _) = h.confirmed_order(1).await;
        h.coordinator.complete(order_id).await.unwrap();
        h.coordinator.ship(order_id, shipment_id).await.unwrap();
        assert_eq!(h.on_hand().await, 9);

        let order = h.coordinator.return_order(order_id).await.unwrap();

        assert_eq!(order.state(), OrderState::Returned);
        assert_eq!(h.on_hand().await, 10);
        assert_eq!(h.inventory.reservation_count().await, 0);
    }
}

#[tokio::test]
async fn test_unknown_variant_location_has_no_stock() {
    let h = TestHarness::new().await;
    let c = &h.coordinator;
    let order_id = c.create_order().await.unwrap().id().unwrap();
    let hat = Variant::new("V-HAT", "HAT-001", "Hat", Money::from_dollars(15));
    c.add_line_item(order_id, hat, 1, None).await.unwrap();

    let result = c
        .create_shipment(order_id, Some(StockLocationId::new("warehouse-2")))
        .await;

    assert!(matches!(
        result,
        Err(CheckoutError::InsufficientStock { available: 0, .. })
    ));
    assert_eq!(
        h.inventory
            .available(&StockLocationId::new("warehouse-2"), &VariantId::new("V-HAT"))
            .await,
        0
    );
}

#[tokio::test]
async fn test_untracked_variant_ships_without_stock() {
    let h = TestHarness::new().await;
    let c = &h.coordinator;
    let gift_card = Variant::new("V-GIFT", "GIFT-025", "Gift card", Money::from_dollars(25));
    h.inventory
        .set_stock_policy(&location(), &gift_card.id, false, false)
        .await;
    let order_id = c.create_order().await.unwrap().id().unwrap();
    c.add_line_item(order_id, gift_card.clone(), 2, None)
        .await
        .unwrap();

    let (order, shipment_id) = c.create_shipment(order_id, None).await.unwrap();

    assert_eq!(order.shipment(shipment_id).unwrap().unit_count(), 2);
    assert_eq!(h.inventory.on_hand(&location(), &gift_card.id).await, 0);
}

#[tokio::test]
async fn test_backorderable_variant_is_added_past_zero_stock() {
    let h = TestHarness::new().await;
    let c = &h.coordinator;
    h.inventory.set_stock(&location(), &shirt().id, 0).await;
    h.inventory
        .set_stock_policy(&location(), &shirt().id, true, true)
        .await;
    let order_id = c.create_order().await.unwrap().id().unwrap();
    c.add_line_item(order_id, shirt(), 1, None).await.unwrap();
    let (_, shipment_id) = c.create_shipment(order_id, None).await.unwrap();

    let order = c.add_line_item(order_id, shirt(), 2, None).await.unwrap();

    assert_eq!(order.shipment(shipment_id).unwrap().unit_count(), 3);
    assert_eq!(h.inventory.stock_item(&location(), &shirt().id).await.held, 3);
}

mod concurrency {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use event_store::{AppendOptions, EventEnvelope, EventStore, Version};
    use tokio::sync::Barrier;

    use super::*;

    /// Store whose reads, once paired, wait for each other so two commands
    /// observe the same version before either appends.
    #[derive(Clone)]
    struct PairedReadStore {
        inner: InMemoryEventStore,
        paired: Arc<AtomicBool>,
        barrier: Arc<Barrier>,
    }

    impl PairedReadStore {
        fn new() -> Self {
            Self {
                inner: InMemoryEventStore::new(),
                paired: Arc::new(AtomicBool::new(false)),
                barrier: Arc::new(Barrier::new(2)),
            }
        }

        fn pair_reads(&self, on: bool) {
            self.paired.store(on, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventStore for PairedReadStore {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            self.inner.append(events, options).await
        }

        async fn get_events_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            let events = self.inner.get_events_for_aggregate(aggregate_id).await;
            if self.paired.load(Ordering::SeqCst) {
                self.barrier.wait().await;
            }
            events
        }

        async fn get_events_by_type(
            &self,
            event_type: &str,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events_by_type(event_type).await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }

        async fn has_idempotency_key(
            &self,
            aggregate_id: AggregateId,
            key: &str,
        ) -> event_store::Result<bool> {
            self.inner.has_idempotency_key(aggregate_id, key).await
        }
    }

    #[tokio::test]
    async fn test_racing_edits_to_one_order_conflict_and_release_stock() {
        let store = PairedReadStore::new();
        let inventory = InMemoryInventoryAllocator::new();
        inventory.set_stock(&location(), &shirt().id, 10).await;
        let coordinator = CheckoutCoordinator::with_parts(
            store.clone(),
            inventory.clone(),
            BogusGateway::new(),
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap(),
            )),
            CheckoutSettings::default(),
        );

        let order_id = coordinator.create_order().await.unwrap().id().unwrap();
        coordinator
            .add_line_item(order_id, shirt(), 1, None)
            .await
            .unwrap();
        let (_, shipment_id) = coordinator.create_shipment(order_id, None).await.unwrap();
        assert_eq!(inventory.reservation_count().await, 1);

        store.pair_reads(true);
        let (a, b) = tokio::join!(
            coordinator.add_line_item(order_id, shirt(), 1, None),
            coordinator.add_line_item(order_id, shirt(), 1, None),
        );
        store.pair_reads(false);

        let conflicts = [&a, &b]
            .iter()
            .filter(|r| {
                matches!(
                    r,
                    Err(CheckoutError::Domain(DomainError::Conflict { .. }))
                )
            })
            .count();
        assert_eq!(conflicts, 1);
        assert_eq!([&a, &b].iter().filter(|r| r.is_ok()).count(), 1);

        let order = coordinator.load_order(order_id).await.unwrap();
        assert_eq!(order.line_items()[0].quantity, 2);
        assert_eq!(order.shipment(shipment_id).unwrap().unit_count(), 2);
        assert_eq!(inventory.reservation_count().await, 2);
        assert_eq!(inventory.available(&location(), &shirt().id).await, 8);
    }
}
