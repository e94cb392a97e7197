//! HTTP API for the order and payment processing core.
//!
//! Exposes orders, line items, shipments, payments and stock over REST,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post, put};
use checkout::{BogusGateway, CheckoutCoordinator, CheckoutSettings, InMemoryInventoryAllocator};
use common::SystemClock;
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{orders, payments, stock};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(orders::create::<S>))
        .route("/orders/{id}", get(orders::get::<S>))
        .route("/orders/{id}/address", put(orders::set_address::<S>))
        .route(
            "/orders/{id}/special_instructions",
            put(orders::set_special_instructions::<S>),
        )
        .route("/orders/{id}/line_items", post(orders::add_line_item::<S>))
        .route(
            "/orders/{id}/line_items/{line_item_id}",
            patch(orders::update_line_item::<S>)
                .delete(orders::remove_line_item::<S>),
        )
        .route("/orders/{id}/shipments", post(orders::create_shipment::<S>))
        .route(
            "/orders/{id}/shipments/{shipment_id}/rate",
            put(orders::select_rate::<S>),
        )
        .route(
            "/orders/{id}/shipments/{shipment_id}/ship",
            post(orders::ship::<S>),
        )
        .route(
            "/orders/{id}/shipments/{shipment_id}/tracking",
            put(orders::set_tracking::<S>),
        )
        .route("/orders/{id}/adjustments", post(orders::add_adjustment::<S>))
        .route(
            "/orders/{id}/adjustments/{adjustment_id}",
            delete(orders::remove_adjustment::<S>),
        )
        .route("/orders/{id}/advance", post(orders::advance::<S>))
        .route("/orders/{id}/complete", post(orders::complete::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/orders/{id}/return", post(orders::return_order::<S>))
        .route("/orders/{id}/events", get(orders::events::<S>))
        .route("/orders/{id}/payments", post(payments::create::<S>))
        .route("/payments/{id}", get(payments::get::<S>))
        .route("/payments/{id}/authorize", post(payments::authorize::<S>))
        .route("/payments/{id}/capture", post(payments::capture::<S>))
        .route("/payments/{id}/void", post(payments::void::<S>))
        .route("/payments/{id}/credit", post(payments::credit::<S>))
        .route("/payments/{id}/reconcile", post(payments::reconcile::<S>))
        .route(
            "/stock_locations/{location}/stock_items/{variant_id}",
            get(stock::get::<S>).put(stock::set::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around the in-memory allocator and the
/// bogus gateway.
pub fn create_state<S: EventStore + Clone + 'static>(
    event_store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    let inventory = InMemoryInventoryAllocator::new();
    let gateway = BogusGateway::new();
    let settings = CheckoutSettings {
        gateway_timeout: config.gateway_timeout,
        ..CheckoutSettings::default()
    };
    let coordinator = CheckoutCoordinator::with_parts(
        event_store.clone(),
        inventory.clone(),
        gateway.clone(),
        Arc::new(SystemClock),
        settings,
    );

    Arc::new(AppState {
        coordinator,
        inventory,
        gateway,
        event_store,
    })
}
