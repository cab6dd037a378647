use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;

use crate::app::AppState;
use crate::auth::{extract_token, verify_jwt};
use crate::config::SecurityConfig;
use crate::database::models::user::{Role, User};
use crate::database::repository::Repository;
use crate::error::ApiError;

pub const NOT_LOGGED_IN: &str = "You are not logged in, please log in to get access";
const USER_GONE: &str = "The user does no longer exist";
const PASSWORD_CHANGED: &str = "User recently changed password, please log in again!";
const NO_PERMISSION: &str = "You do not have permission to perform this action";

/// The user acting on a protected request
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

/// Resolves the bearer token (header or `jwt` cookie) into an active user
/// and attaches it to the request as [`AuthUser`].
pub async fn protect(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_token(request.headers()).ok_or_else(|| ApiError::unauthorized(NOT_LOGGED_IN))?;
    let user = authenticate(&state.pool, &token, &state.config.security).await?;

    tracing::debug!("Authenticated {} as {}", user.id, user.role);
    request.extensions_mut().insert(AuthUser(user));
    Ok(next.run(request).await)
}

/// Verifies the token signature and expiry before touching the database,
/// then requires the user to still be active and the token to postdate
/// the last password change.
pub async fn authenticate(pool: &PgPool, token: &str, security: &SecurityConfig) -> Result<User, ApiError> {
    let claims = verify_jwt(token, &security.jwt_secret)?;

    let user = Repository::<User>::new(pool.clone())
        .select_by_id(claims.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized(USER_GONE))?;

    if user.changed_password_after(claims.iat) {
        return Err(ApiError::unauthorized(PASSWORD_CHANGED));
    }
    Ok(user)
}

pub fn authorize(user: &User, roles: &[Role]) -> Result<(), ApiError> {
    if roles.contains(&user.role) {
        Ok(())
    } else {
        Err(ApiError::forbidden(NO_PERMISSION))
    }
}

/// Role gate; must run inside [`protect`].
pub async fn restrict_to(roles: &'static [Role], request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .ok_or_else(|| ApiError::unauthorized(NOT_LOGGED_IN))?;
    authorize(&user.0, roles)?;
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized(NOT_LOGGED_IN))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Leo Gillespie".into(),
            email: "leo@example.io".into(),
            photo: "default.jpg".into(),
            role,
            password: String::new(),
            password_changed_at: None,
            password_reset_token: None,
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn admin_only_rejects_regular_user() {
        let err = authorize(&user(Role::User), &[Role::Admin]).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.message(), NO_PERMISSION);
    }

    #[test]
    fn listed_roles_pass() {
        assert!(authorize(&user(Role::LeadGuide), &[Role::Admin, Role::LeadGuide]).is_ok());
        assert!(authorize(&user(Role::Guide), &[Role::Admin, Role::LeadGuide, Role::Guide]).is_ok());
    }

    #[test]
    fn token_older_than_password_change_is_stale() {
        let mut u = user(Role::User);
        let changed = Utc::now();
        u.password_changed_at = Some(changed);
        assert!(u.changed_password_after(changed.timestamp() - 1));
        assert!(!u.changed_password_after(changed.timestamp()));
        assert!(!u.changed_password_after(changed.timestamp() + 1));
    }
}
