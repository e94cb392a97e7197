//! Stock item endpoints for the in-memory allocator.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::order::{StockLocationId, VariantId};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::error::ApiError;

/// Omitted policy flags keep their current values.
#[derive(Deserialize)]
pub struct StockItemRequest {
    pub count_on_hand: u32,
    pub backorderable: Option<bool>,
    pub track_inventory: Option<bool>,
}

#[derive(Serialize)]
pub struct StockItemResponse {
    pub stock_location: String,
    pub variant_id: String,
    pub count_on_hand: u32,
    pub available: u32,
    pub backorderable: bool,
    pub track_inventory: bool,
}

async fn stock_item<S: EventStore>(
    state: &AppState<S>,
    stock_location: StockLocationId,
    variant_id: VariantId,
) -> StockItemResponse {
    let item = state.inventory.stock_item(&stock_location, &variant_id).await;
    StockItemResponse {
        stock_location: stock_location.to_string(),
        variant_id: variant_id.to_string(),
        count_on_hand: item.count_on_hand,
        available: item.available(),
        backorderable: item.backorderable,
        track_inventory: item.track_inventory,
    }
}

/// GET /stock_locations/:location/stock_items/:variant_id
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((location, variant)): Path<(String, String)>,
) -> Result<Json<StockItemResponse>, ApiError> {
    let item = stock_item(
        &state,
        StockLocationId::new(location),
        VariantId::new(variant),
    )
    .await;
    Ok(Json(item))
}

/// PUT /stock_locations/:location/stock_items/:variant_id: sets on-hand
/// units and, optionally, the backorder and tracking flags.
#[tracing::instrument(skip(state, req))]
pub async fn set<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((location, variant)): Path<(String, String)>,
    Json(req): Json<StockItemRequest>,
) -> Result<Json<StockItemResponse>, ApiError> {
    let stock_location = StockLocationId::new(location);
    let variant_id = VariantId::new(variant);
    let inventory = &state.inventory;

    inventory
        .set_stock(&stock_location, &variant_id, req.count_on_hand)
        .await;
    if req.backorderable.is_some() || req.track_inventory.is_some() {
        let current = inventory.stock_item(&stock_location, &variant_id).await;
        inventory
            .set_stock_policy(
                &stock_location,
                &variant_id,
                req.backorderable.unwrap_or(current.backorderable),
                req.track_inventory.unwrap_or(current.track_inventory),
            )
            .await;
    }

    tracing::info!(%stock_location, %variant_id, count_on_hand = req.count_on_hand, "stock set");
    Ok(Json(stock_item(&state, stock_location, variant_id).await))
}
