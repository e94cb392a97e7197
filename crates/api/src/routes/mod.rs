//! HTTP handlers and the state they share.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;
pub mod stock;

use checkout::{BogusGateway, CheckoutCoordinator, InMemoryInventoryAllocator};
use common::AggregateId;
use event_store::EventStore;
use uuid::Uuid;

use crate::error::ApiError;

pub type Coordinator<S> = CheckoutCoordinator<S, InMemoryInventoryAllocator, BogusGateway>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub coordinator: Coordinator<S>,
    pub inventory: InMemoryInventoryAllocator,
    pub gateway: BogusGateway,
    pub event_store: S,
}

fn parse_uuid(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}

fn parse_aggregate_id(id: &str) -> Result<AggregateId, ApiError> {
    Ok(AggregateId::from(parse_uuid(id)?))
}
