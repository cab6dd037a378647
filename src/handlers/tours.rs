// handlers/tours.rs - /api/v1/tours

use axum::extract::{Path, Request, State};
use serde_json::{json, Value};
use std::path::Path as FsPath;

use super::factory::{self, json_or_multipart, parse_id, JsonBody, QueryPairs};
use crate::app::AppState;
use crate::database::models::tour::Tour;
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::error::ApiError;
use crate::filter::QueryFeatures;
use crate::middleware::response::{documents, ApiResponse, ApiResult};
use crate::services::tours::{self as tour_service, parse_latlng, DistanceUnit};
use crate::uploads::{process_tour_images, TOUR_IMAGE_FIELDS};

const MISSING_LOCATION: &str = "Please specify your location (latitude and longitude)";

/// GET /tours
pub async fn list(State(state): State<AppState>, QueryPairs(pairs): QueryPairs) -> ApiResult<Value> {
    factory::get_all::<Tour>(&state.pool, QueryFeatures::new(pairs), None).await
}

/// GET /tours/top-5-cheap
pub async fn top_cheap(State(state): State<AppState>, QueryPairs(pairs): QueryPairs) -> ApiResult<Value> {
    let features = QueryFeatures::new(pairs)
        .with_override("limit", "5")
        .with_override("sort", "-ratingsAverage,price")
        .with_override("fields", "name,price,ratingsAverage,summary,difficulty");
    factory::get_all::<Tour>(&state.pool, features, None).await
}

/// GET /tours/:id, with the tour's reviews embedded
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::get_one::<Tour>(&state.pool, parse_id(&id)?, Some("reviews")).await
}

/// POST /tours
pub async fn create(State(state): State<AppState>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::create_one::<Tour>(&state.pool, body).await
}

/// PATCH /tours/:id, JSON or multipart with `imageCover` and `images`
pub async fn update(State(state): State<AppState>, Path(id): Path<String>, request: Request) -> ApiResult<Value> {
    let id = parse_id(&id)?;
    let (mut body, form) = json_or_multipart(request, &state, TOUR_IMAGE_FIELDS).await?;
    let current = Repository::<Tour>::new(state.pool.clone()).select_404(id).await?;

    if let Some(form) = form {
        // Nothing is written to disk for a patch that would be refused
        factory::validated_update(&current, body.clone())?;
        let upload_dir = FsPath::new(&state.config.server.upload_dir);
        let stored = process_tour_images(&form, id, upload_dir).await?;
        if let Some(cover) = stored.image_cover {
            body["imageCover"] = json!(cover);
        }
        if let Some(images) = stored.images {
            body["images"] = json!(images);
        }
    }

    factory::replace_one(&state.pool, current, body).await
}

/// DELETE /tours/:id
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::delete_one::<Tour>(&state.pool, parse_id(&id)?).await
}

/// GET /tours/tour-stats
pub async fn stats(State(state): State<AppState>) -> ApiResult<Value> {
    let stats = tour_service::tour_stats(&state.pool).await?;
    Ok(ApiResponse::success(json!({ "stats": stats })))
}

/// GET /tours/monthly-plan/:year
pub async fn monthly_plan(State(state): State<AppState>, Path(year): Path<String>) -> ApiResult<Value> {
    let year: i32 = year.trim().parse().map_err(|_| ApiError::cast_error("year", year.clone()))?;
    let plan = tour_service::monthly_plan(&state.pool, year).await?;
    Ok(ApiResponse::success(json!({ "plan": plan })))
}

/// GET /tours/tours-within/:distance/center/:latlng/unit/:unit
pub async fn within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> ApiResult<Value> {
    let distance: f64 = distance
        .trim()
        .parse()
        .ok()
        .filter(|d: &f64| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ApiError::cast_error("distance", distance.clone()))?;
    let (lat, lng) = parse_latlng(&latlng).ok_or_else(|| ApiError::bad_request(MISSING_LOCATION))?;

    let tours = tour_service::tours_within(&state.pool, distance, lat, lng, DistanceUnit::parse(&unit)).await?;
    let docs = Tour::populate(&state.pool, tours, None).await?;
    let count = docs.len();
    Ok(ApiResponse::success(documents(Value::Array(docs))).results(count))
}

/// GET /tours/distances/:latlng/unit/:unit
pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult<Value> {
    let (lat, lng) = parse_latlng(&latlng).ok_or_else(|| ApiError::bad_request(MISSING_LOCATION))?;
    let distances = tour_service::distances(&state.pool, lat, lng, DistanceUnit::parse(&unit)).await?;
    let count = distances.len();
    Ok(ApiResponse::success(documents(json!(distances))).results(count))
}
