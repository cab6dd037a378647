// handlers/factory.rs - create / read / update / delete / list for any Resource
//
// The route modules wrap these with their own extractors and guards; the
// functions here only see a pool and already-extracted inputs.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Json, Multipart, Query, Request},
    http::{header, request::Parts},
};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::repository::Repository;
use crate::database::resource::{merge_patch, Resource};
use crate::error::ApiError;
use crate::filter::filter_where::merge_where;
use crate::filter::QueryFeatures;
use crate::middleware::response::{documents, ApiResponse, ApiResult};
use crate::types::Operation;
use crate::uploads::{read_multipart, MultipartForm};

/// JSON body whose rejections render through [`ApiError`]
pub struct JsonBody(pub Value);

#[async_trait]
impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::invalid_json(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// Raw query-string pairs whose rejections render through [`ApiError`]
pub struct QueryPairs(pub Vec<(String, String)>);

#[async_trait]
impl<S> FromRequestParts<S> for QueryPairs
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Ok(QueryPairs(pairs))
    }
}

/// A JSON or multipart body; multipart text fields become JSON values.
pub async fn json_or_multipart<S: Send + Sync>(
    request: Request,
    state: &S,
    file_fields: &[(&str, usize)],
) -> Result<(Value, Option<MultipartForm>), ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let JsonBody(body) = JsonBody::from_request(request, state).await?;
        return Ok((body, None));
    }

    let multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let form = read_multipart(multipart, file_fields).await?;
    let body: Map<String, Value> = form
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), form_value(v)))
        .collect();
    Ok((Value::Object(body), Some(form)))
}

/// Numbers and booleans sent as form text keep their JSON type
fn form_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Number(_) | Value::Bool(_))) => v,
        _ => Value::String(raw.to_string()),
    }
}

pub fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::cast_error("id", raw))
}

async fn populate_one<T: Resource>(pool: &PgPool, doc: T, include: Option<&str>) -> Result<Value, ApiError> {
    let mut populated = T::populate(pool, vec![doc], include).await?;
    Ok(populated.pop().unwrap_or(Value::Null))
}

pub async fn create_one<T: Resource>(pool: &PgPool, body: Value) -> ApiResult<Value> {
    let draft: T::Draft = serde_json::from_value(body)?;
    let valid = T::validate(draft, Operation::Create)?;
    let doc = T::insert(pool, valid).await?;
    tracing::debug!("Created {} {}", T::TABLE, doc.id());

    Ok(ApiResponse::created(documents(populate_one(pool, doc, None).await?)))
}

pub async fn get_one<T: Resource>(pool: &PgPool, id: Uuid, include: Option<&str>) -> ApiResult<Value> {
    let doc = Repository::<T>::new(pool.clone()).select_404(id).await?;
    Ok(ApiResponse::success(documents(populate_one(pool, doc, include).await?)))
}

/// Merges the patch over the current document and validates the result
/// as a whole.
pub fn validated_update<T: Resource>(current: &T, patch: Value) -> Result<T::Valid, ApiError> {
    let mut merged = serde_json::to_value(current.to_draft())?;
    merge_patch(&mut merged, patch);
    let draft: T::Draft = serde_json::from_value(merged)?;
    Ok(T::validate(draft, Operation::Update)?)
}

pub async fn update_one<T: Resource>(pool: &PgPool, id: Uuid, patch: Value) -> ApiResult<Value> {
    let current = Repository::<T>::new(pool.clone()).select_404(id).await?;
    replace_one(pool, current, patch).await
}

/// Writes `patch` over a document the caller already resolved
pub async fn replace_one<T: Resource>(pool: &PgPool, current: T, patch: Value) -> ApiResult<Value> {
    let valid = validated_update(&current, patch)?;
    let doc = T::replace(pool, &current, valid).await?;
    tracing::debug!("Updated {} {}", T::TABLE, doc.id());

    Ok(ApiResponse::success(documents(populate_one(pool, doc, None).await?)))
}

pub async fn delete_one<T: Resource>(pool: &PgPool, id: Uuid) -> ApiResult<Value> {
    let current = Repository::<T>::new(pool.clone()).select_404(id).await?;
    T::remove(pool, current).await?;
    tracing::debug!("Deleted {} {}", T::TABLE, id);
    Ok(ApiResponse::no_content())
}

/// Lists documents matching the query string, ANDed with `ambient`
pub async fn get_all<T: Resource>(pool: &PgPool, features: QueryFeatures, ambient: Option<Value>) -> ApiResult<Value> {
    let mut filter_data = features.build(T::FIELDS)?;
    filter_data.where_clause = merge_where(ambient, filter_data.where_clause.take());
    let select = filter_data.select.clone();

    let docs = Repository::<T>::new(pool.clone()).select_any(filter_data).await?;
    let populated = T::populate(pool, docs, None).await?;
    let projected = QueryFeatures::project(populated, select.as_deref());

    let count = projected.len();
    Ok(ApiResponse::success(documents(Value::Array(projected))).results(count))
}
