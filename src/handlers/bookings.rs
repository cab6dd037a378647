// handlers/bookings.rs - /api/v1/bookings and the checkout webhook

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use super::factory::{self, parse_id, JsonBody, QueryPairs};
use super::origin;
use crate::app::AppState;
use crate::database::models::booking::Booking;
use crate::database::resource::Resource;
use crate::error::ApiError;
use crate::filter::QueryFeatures;
use crate::middleware::auth::AuthUser;
use crate::middleware::response::{ApiResponse, ApiResult};
use crate::payments::{PaymentError, CHECKOUT_COMPLETED};
use crate::services::checkout;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// GET /bookings/checkout-session/:tourId
pub async fn checkout_session(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tour_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Value> {
    let tour_id = parse_id(&tour_id)?;
    let session = checkout::create_session(
        &state.pool,
        state.payments.as_ref(),
        tour_id,
        &user,
        &origin(&headers),
        &state.config.payments.currency,
    )
    .await?;
    Ok(ApiResponse::success(json!({ "session": session })))
}

/// GET /bookings/my-tours
pub async fn my_tours(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Value> {
    let tours = checkout::booked_tours(&state.pool, user.id).await?;
    let tours = crate::database::models::Tour::populate(&state.pool, tours, None).await?;
    let count = tours.len();
    Ok(ApiResponse::success(json!({ "tours": tours })).results(count))
}

/// POST /webhook-checkout; the body must reach the signature check untouched
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<Response, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| PaymentError::Signature("Missing signature header".to_string()))?;

    let event = state.payments.construct_event(&body, signature)?;
    tracing::info!("Webhook event {}", event.kind);

    if event.kind == CHECKOUT_COMPLETED {
        match event.completed_checkout() {
            Some(completed) => {
                checkout::record_booking(&state.pool, &completed).await?;
            }
            None => tracing::warn!("Completed checkout without reference or email, ignored"),
        }
    }

    Ok(Json(json!({ "received": true })).into_response())
}

/// GET /bookings
pub async fn list(State(state): State<AppState>, QueryPairs(pairs): QueryPairs) -> ApiResult<Value> {
    factory::get_all::<Booking>(&state.pool, QueryFeatures::new(pairs), None).await
}

/// POST /bookings
pub async fn create(State(state): State<AppState>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::create_one::<Booking>(&state.pool, body).await
}

/// GET /bookings/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::get_one::<Booking>(&state.pool, parse_id(&id)?, None).await
}

/// PATCH /bookings/:id
pub async fn update(State(state): State<AppState>, Path(id): Path<String>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::update_one::<Booking>(&state.pool, parse_id(&id)?, body).await
}

/// DELETE /bookings/:id
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::delete_one::<Booking>(&state.pool, parse_id(&id)?).await
}
