// handlers/users.rs - /api/v1/users (authentication, self-service, admin)

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
};
use serde_json::{json, Value};
use std::path::Path as FsPath;

use super::factory::{self, json_or_multipart, parse_id, JsonBody, QueryPairs};
use super::origin;
use crate::app::AppState;
use crate::auth::{logout_cookie, sign_token, token_cookie};
use crate::database::models::user::{User, UserDraft};
use crate::error::ApiError;
use crate::filter::QueryFeatures;
use crate::middleware::auth::AuthUser;
use crate::middleware::response::{ApiResponse, ApiResult};
use crate::services::accounts::{LoginRequest, NewPassword, PasswordChange, ProfileUpdate};
use crate::uploads::{process_user_photo, USER_PHOTO_FIELDS};

/// Issues a token for `user` in the body and the `jwt` cookie
fn send_token(state: &AppState, user: &User, status: StatusCode) -> ApiResult<Value> {
    let security = &state.config.security;
    let token = sign_token(user.id, security)?;
    let cookie = token_cookie(&token, security);
    Ok(ApiResponse::with_status(json!({ "user": user }), status).token(token, cookie))
}

/// POST /users/signup
pub async fn signup(State(state): State<AppState>, headers: HeaderMap, JsonBody(body): JsonBody) -> ApiResult<Value> {
    let draft: UserDraft = serde_json::from_value(body)?;
    let user = state.accounts().signup(draft, &origin(&headers)).await?;
    send_token(&state, &user, StatusCode::CREATED)
}

/// POST /users/login
pub async fn login(State(state): State<AppState>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    let request: LoginRequest = serde_json::from_value(body).unwrap_or_default();
    let user = state.accounts().login(request).await?;
    send_token(&state, &user, StatusCode::OK)
}

/// GET /users/logout
pub async fn logout(State(state): State<AppState>) -> ApiResult<Value> {
    Ok(ApiResponse::ok().cookie(logout_cookie(&state.config.security)))
}

/// POST /users/forgotPassword
pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    JsonBody(body): JsonBody,
) -> ApiResult<Value> {
    let email = body.get("email").and_then(Value::as_str).map(str::to_string);
    state.accounts().forgot_password(email, &origin(&headers)).await?;
    Ok(ApiResponse::message("Token sent to email"))
}

/// PATCH /users/resetPassword/:token
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    JsonBody(body): JsonBody,
) -> ApiResult<Value> {
    let body: NewPassword = serde_json::from_value(body)?;
    let user = state.accounts().reset_password(&token, body).await?;
    send_token(&state, &user, StatusCode::OK)
}

/// PATCH /users/updateMyPassword
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(body): JsonBody,
) -> ApiResult<Value> {
    let body: PasswordChange = serde_json::from_value(body)?;
    let user = state.accounts().update_password(&user, body).await?;
    send_token(&state, &user, StatusCode::OK)
}

/// GET /users/me
pub async fn me(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Value> {
    factory::get_one::<User>(&state.pool, user.id, None).await
}

/// PATCH /users/updateMe, JSON or multipart with a `photo` file
pub async fn update_me(State(state): State<AppState>, AuthUser(user): AuthUser, request: Request) -> ApiResult<Value> {
    let (body, form) = json_or_multipart(request, &state, USER_PHOTO_FIELDS).await?;
    let body: ProfileUpdate = serde_json::from_value(body)?;
    body.reject_password()?;

    let photo = match form {
        Some(form) => process_user_photo(&form, user.id, FsPath::new(&state.config.server.upload_dir)).await?,
        None => None,
    };
    let updated = state.accounts().update_me(&user, body, photo).await?;
    Ok(ApiResponse::success(json!({ "user": updated })))
}

/// DELETE /users/deleteMe
pub async fn delete_me(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Value> {
    state.accounts().delete_me(&user).await?;
    Ok(ApiResponse::no_content())
}

/// GET /users
pub async fn list(State(state): State<AppState>, QueryPairs(pairs): QueryPairs) -> ApiResult<Value> {
    factory::get_all::<User>(&state.pool, QueryFeatures::new(pairs), None).await
}

/// POST /users; accounts are only created through sign-up
pub async fn create() -> ApiResult<Value> {
    Err(ApiError::not_found("Path not defined, please use sign up instead."))
}

/// GET /users/:id
pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::get_one::<User>(&state.pool, parse_id(&id)?, None).await
}

/// PATCH /users/:id; passwords are not changed here
pub async fn update(State(state): State<AppState>, Path(id): Path<String>, JsonBody(body): JsonBody) -> ApiResult<Value> {
    factory::update_one::<User>(&state.pool, parse_id(&id)?, body).await
}

/// DELETE /users/:id
pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    factory::delete_one::<User>(&state.pool, parse_id(&id)?).await
}
