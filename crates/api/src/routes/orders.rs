//! Order, line item, shipment and checkout endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use domain::order::{AdjustmentId, AdjustmentKind, LineItemId, StockLocationId};
use domain::{Address, Aggregate, Money, Order, ShipmentId, Variant};
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::{AppState, parse_aggregate_id, parse_uuid};
use crate::error::ApiError;

// -- Request types --

#[derive(Deserialize)]
pub struct SpecialInstructionsRequest {
    pub instructions: Option<String>,
}

#[derive(Deserialize)]
pub struct AddLineItemRequest {
    pub variant_id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub quantity: u32,
    pub shipment_id: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateLineItemRequest {
    pub quantity: u32,
    pub shipment_id: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateShipmentRequest {
    pub stock_location: Option<String>,
}

#[derive(Deserialize)]
pub struct SelectRateRequest {
    pub method_id: String,
}

#[derive(Deserialize)]
pub struct TrackingRequest {
    pub tracking: String,
}

#[derive(Deserialize)]
pub struct AdjustmentRequest {
    pub label: String,
    pub amount_cents: i64,
    pub kind: AdjustmentKind,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub number: String,
    pub state: String,
    pub ship_address: Option<Address>,
    pub special_instructions: Option<String>,
    pub line_items: Vec<LineItemResponse>,
    pub shipments: Vec<ShipmentResponse>,
    pub adjustments: Vec<AdjustmentResponse>,
    pub payment_ids: Vec<String>,
    pub item_total_cents: i64,
    pub shipment_total_cents: i64,
    pub adjustment_total_cents: i64,
    pub total_cents: i64,
    pub completed_at: Option<String>,
}

#[derive(Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub variant_id: String,
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub price_cents: i64,
    pub total_cents: i64,
}

#[derive(Serialize)]
pub struct ShipmentResponse {
    pub id: String,
    pub number: String,
    pub stock_location: String,
    pub state: String,
    pub units: Vec<ShipmentUnitResponse>,
    pub rates: Vec<RateResponse>,
    pub selected_method: Option<String>,
    pub cost_cents: i64,
    pub tracking: Option<String>,
}

#[derive(Serialize)]
pub struct ShipmentUnitResponse {
    pub line_item_id: String,
    pub variant_id: String,
    pub quantity: u32,
    pub reservation_id: String,
}

#[derive(Serialize)]
pub struct RateResponse {
    pub method_id: String,
    pub name: String,
    pub cost_cents: i64,
}

#[derive(Serialize)]
pub struct AdjustmentResponse {
    pub id: String,
    pub label: String,
    pub amount_cents: i64,
    pub kind: AdjustmentKind,
}

#[derive(Serialize)]
pub struct ShipmentCreatedResponse {
    pub shipment_id: String,
    pub order: OrderResponse,
}

/// Response type for event envelope data.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().map(|id| id.to_string()).unwrap_or_default(),
            number: order.number().to_string(),
            state: order.state().to_string(),
            ship_address: order.ship_address().cloned(),
            special_instructions: order.special_instructions().map(String::from),
            line_items: order
                .line_items()
                .iter()
                .map(|item| LineItemResponse {
                    id: item.id.to_string(),
                    variant_id: item.variant.id.to_string(),
                    sku: item.variant.sku.clone(),
                    name: item.variant.name.clone(),
                    quantity: item.quantity,
                    price_cents: item.price.cents(),
                    total_cents: item.total().cents(),
                })
                .collect(),
            shipments: order
                .shipments()
                .iter()
                .map(|s| ShipmentResponse {
                    id: s.id.to_string(),
                    number: s.number.clone(),
                    stock_location: s.stock_location.to_string(),
                    state: s.state.to_string(),
                    units: s
                        .units
                        .iter()
                        .map(|u| ShipmentUnitResponse {
                            line_item_id: u.line_item_id.to_string(),
                            variant_id: u.variant_id.to_string(),
                            quantity: u.quantity,
                            reservation_id: u.reservation_id.to_string(),
                        })
                        .collect(),
                    rates: s
                        .rates
                        .iter()
                        .map(|r| RateResponse {
                            method_id: r.method_id.clone(),
                            name: r.name.clone(),
                            cost_cents: r.cost.cents(),
                        })
                        .collect(),
                    selected_method: s.selected_method.clone(),
                    cost_cents: s.cost().cents(),
                    tracking: s.tracking.clone(),
                })
                .collect(),
            adjustments: order
                .adjustments()
                .iter()
                .map(|a| AdjustmentResponse {
                    id: a.id.to_string(),
                    label: a.label.clone(),
                    amount_cents: a.amount.cents(),
                    kind: a.kind,
                })
                .collect(),
            payment_ids: order.payment_ids().iter().map(|id| id.to_string()).collect(),
            item_total_cents: order.item_total().cents(),
            shipment_total_cents: order.shipment_total().cents(),
            adjustment_total_cents: order.adjustment_total().cents(),
            total_cents: order.total().cents(),
            completed_at: order.completed_at().map(|t| t.to_rfc3339()),
        }
    }
}

fn shipment_id(raw: &str) -> Result<ShipmentId, ApiError> {
    Ok(ShipmentId::from_uuid(parse_uuid(raw)?))
}

fn optional_shipment_id(raw: Option<&str>) -> Result<Option<ShipmentId>, ApiError> {
    raw.map(shipment_id).transpose()
}

fn line_item_id(raw: &str) -> Result<LineItemId, ApiError> {
    Ok(LineItemId::from_uuid(parse_uuid(raw)?))
}

// -- Handlers --

/// POST /orders: open an empty cart.
#[tracing::instrument(skip(state))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order = state.coordinator.create_order().await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders/:id: load an order aggregate by ID.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .coordinator
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/:id/address
#[tracing::instrument(skip(state, address))]
pub async fn set_address<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(address): Json<Address>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.set_address(order_id, address).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/:id/special_instructions
#[tracing::instrument(skip(state, req))]
pub async fn set_special_instructions<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SpecialInstructionsRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .coordinator
        .set_special_instructions(order_id, req.instructions)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/line_items
#[tracing::instrument(skip(state, req))]
pub async fn add_line_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AddLineItemRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let shipment_id = optional_shipment_id(req.shipment_id.as_deref())?;
    let variant = Variant::new(
        req.variant_id,
        req.sku,
        req.name,
        Money::from_cents(req.price_cents),
    );

    let order = state
        .coordinator
        .add_line_item(order_id, variant, req.quantity, shipment_id)
        .await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// PATCH /orders/:id/line_items/:line_item_id: zero removes the item.
#[tracing::instrument(skip(state, req))]
pub async fn update_line_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, line_item)): Path<(String, String)>,
    Json(req): Json<UpdateLineItemRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let line_item_id = line_item_id(&line_item)?;
    let shipment_id = optional_shipment_id(req.shipment_id.as_deref())?;

    let order = state
        .coordinator
        .update_line_item_quantity(order_id, line_item_id, req.quantity, shipment_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// DELETE /orders/:id/line_items/:line_item_id
#[tracing::instrument(skip(state))]
pub async fn remove_line_item<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, line_item)): Path<(String, String)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let line_item_id = line_item_id(&line_item)?;
    let order = state
        .coordinator
        .remove_line_item(order_id, line_item_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/shipments: packs every unassigned unit.
#[tracing::instrument(skip(state, req))]
pub async fn create_shipment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    req: Option<Json<CreateShipmentRequest>>,
) -> Result<(StatusCode, Json<ShipmentCreatedResponse>), ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let stock_location = req
        .and_then(|Json(req)| req.stock_location)
        .map(StockLocationId::new);

    let (order, shipment_id) = state
        .coordinator
        .create_shipment(order_id, stock_location)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ShipmentCreatedResponse {
            shipment_id: shipment_id.to_string(),
            order: OrderResponse::from(&order),
        }),
    ))
}

/// PUT /orders/:id/shipments/:shipment_id/rate
#[tracing::instrument(skip(state, req))]
pub async fn select_rate<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, shipment)): Path<(String, String)>,
    Json(req): Json<SelectRateRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let shipment_id = shipment_id(&shipment)?;
    let order = state
        .coordinator
        .select_rate(order_id, shipment_id, req.method_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/shipments/:shipment_id/ship
#[tracing::instrument(skip(state))]
pub async fn ship<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, shipment)): Path<(String, String)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let shipment_id = shipment_id(&shipment)?;
    let order = state.coordinator.ship(order_id, shipment_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// PUT /orders/:id/shipments/:shipment_id/tracking
#[tracing::instrument(skip(state, req))]
pub async fn set_tracking<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, shipment)): Path<(String, String)>,
    Json(req): Json<TrackingRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let shipment_id = shipment_id(&shipment)?;
    let order = state
        .coordinator
        .set_tracking(order_id, shipment_id, req.tracking)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/adjustments
#[tracing::instrument(skip(state, req))]
pub async fn add_adjustment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<AdjustmentRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state
        .coordinator
        .add_adjustment(
            order_id,
            req.label,
            Money::from_cents(req.amount_cents),
            req.kind,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// DELETE /orders/:id/adjustments/:adjustment_id
#[tracing::instrument(skip(state))]
pub async fn remove_adjustment<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, adjustment)): Path<(String, String)>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let adjustment_id = AdjustmentId::from_uuid(parse_uuid(&adjustment)?);
    let order = state
        .coordinator
        .remove_adjustment(order_id, adjustment_id)
        .await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/advance: move to the next checkout step.
#[tracing::instrument(skip(state))]
pub async fn advance<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.advance(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/complete: capture payments and place the order.
#[tracing::instrument(skip(state))]
pub async fn complete<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.complete(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/cancel
#[tracing::instrument(skip(state))]
pub async fn cancel<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.cancel(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/return
#[tracing::instrument(skip(state))]
pub async fn return_order<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_aggregate_id(&id)?;
    let order = state.coordinator.return_order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/:id/events: list all events for an order aggregate.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let aggregate_id = parse_aggregate_id(&id)?;

    let envelopes = state
        .event_store
        .get_events_for_aggregate(aggregate_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let responses: Vec<EventEnvelopeResponse> = envelopes
        .into_iter()
        .map(|e| EventEnvelopeResponse {
            event_id: e.event_id.to_string(),
            event_type: e.event_type,
            aggregate_id: e.aggregate_id.to_string(),
            version: e.version.as_i64(),
            timestamp: e.timestamp.to_rfc3339(),
            payload: e.payload,
        })
        .collect();

    Ok(Json(responses))
}
