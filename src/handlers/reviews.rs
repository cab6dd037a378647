// handlers/reviews.rs - /api/v1/reviews and /api/v1/tours/:tourId/reviews

use axum::extract::{Path, State};
use serde_json::{json, Value};
use uuid::Uuid;

use super::factory::{self, parse_id, JsonBody, QueryPairs};
use crate::app::AppState;
use crate::database::models::review::Review;
use crate::filter::QueryFeatures;
use crate::middleware::auth::AuthUser;
use crate::middleware::response::ApiResult;

/// Fills `tour` from the route and `user` from the acting user when the
/// body leaves them out.
fn with_defaults(mut body: Value, tour: Option<Uuid>, user: Uuid) -> Value {
    if !body.is_object() {
        return body;
    }
    if body.get("tour").map_or(true, Value::is_null) {
        if let Some(tour) = tour {
            body["tour"] = json!(tour);
        }
    }
    if body.get("user").map_or(true, Value::is_null) {
        body["user"] = json!(user);
    }
    body
}

/// GET /reviews
pub async fn list(State(state): State<AppState>, QueryPairs(pairs): QueryPairs) -> ApiResult<Value> {
    factory::get_all::<Review>(&state.pool, QueryFeatures::new(pairs), None).await
}

/// GET /tours/:tourId/reviews
pub async fn list_for_tour(
    State(state): State<AppState>,
    Path(tour_id): Path<String>,
    QueryPairs(pairs): QueryPairs,
) -> ApiResult<Value> {
    let tour_id = parse_id(&tour_id)?;
    let ambient = json!({ "tour": tour_id });
    factory::get_all::<Review>(&state.pool, QueryFeatures::new(pairs), Some(ambient)).await
}

/// POST /reviews
pub async fn create(State(state): State<AppState>, AuthUser(user): AuthUser, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::create_one::<Review>(&state.pool, with_defaults(body, None, user.id)).await
}

/// POST /tours/:tourId/reviews
pub async fn create_for_tour(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(tour_id): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Value> {
    let tour_id = parse_id(&tour_id)?;
    factory::create_one::<Review>(&state.pool, with_defaults(body, Some(tour_id), user.id)).await
}

/// GET /reviews/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::get_one::<Review>(&state.pool, parse_id(&id)?, None).await
}

/// PATCH /reviews/:id
pub async fn update(State(state): State<AppState>, Path(id): Path<String>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::update_one::<Review>(&state.pool, parse_id(&id)?, body).await
}

/// DELETE /reviews/:id
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::delete_one::<Review>(&state.pool, parse_id(&id)?).await
}
