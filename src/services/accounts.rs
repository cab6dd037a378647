use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

use crate::auth::{self, digest_token, ResetToken};
use crate::database::models::user::{validate_new_password, User, UserDraft};
use crate::database::repository::Repository;
use crate::database::resource::Resource;
use crate::database::validation::ValidationErrors;
use crate::error::ApiError;
use crate::mail::Mailer;
use crate::types::Operation;

const MISSING_CREDENTIALS: &str = "Please provide valid email and password, or sign up.";
const BAD_CREDENTIALS: &str = "Please check user name or password";
const WRONG_PASSWORD: &str = "Please check password and try again";
const NO_SUCH_EMAIL: &str = "No user with that email";
const MAIL_FAILED: &str = "There was an error sending the email, try again later";
const BAD_RESET_TOKEN: &str = "Token is invalid or has expired";
const PASSWORD_NOT_HERE: &str = "You cannot change your password here, please use /update password";

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPassword {
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub password_current: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

/// Self-service profile fields; password fields are only present so the
/// request can be refused.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

impl ProfileUpdate {
    /// Profile updates never carry a password
    pub fn reject_password(&self) -> Result<(), ApiError> {
        if self.password.is_some() || self.confirm_password.is_some() {
            return Err(ApiError::bad_request(PASSWORD_NOT_HERE));
        }
        Ok(())
    }
}

/// Sign-up, login, password recovery and self-service account changes
pub struct AccountService {
    pool: PgPool,
    mailer: Arc<dyn Mailer>,
}

impl AccountService {
    pub fn new(pool: PgPool, mailer: Arc<dyn Mailer>) -> Self {
        Self { pool, mailer }
    }

    fn users(&self) -> Repository<User> {
        Repository::new(self.pool.clone())
    }

    /// Creates a regular user whatever role the body asks for
    pub async fn signup(&self, mut draft: UserDraft, origin: &str) -> Result<User, ApiError> {
        draft.role = None;
        let valid = User::validate(draft, Operation::Create)?;
        let user = User::insert(&self.pool, valid).await?;
        tracing::info!("New account {} ({})", user.id, user.email);

        let url = format!("{}/me", origin);
        if let Err(e) = self.mailer.send_welcome(&user.email, &user.name, &url).await {
            tracing::warn!("Welcome mail to {} failed: {}", user.email, e);
        }
        Ok(user)
    }

    pub async fn login(&self, request: LoginRequest) -> Result<User, ApiError> {
        let (email, password) = match (request.email, request.password) {
            (Some(e), Some(p)) if !e.trim().is_empty() && !p.is_empty() => (e.trim().to_lowercase(), p),
            _ => return Err(ApiError::bad_request(MISSING_CREDENTIALS)),
        };

        let user = self
            .users()
            .select_one_where(json!({ "email": email }))
            .await?
            .ok_or_else(|| ApiError::unauthorized(BAD_CREDENTIALS))?;
        if !auth::verify_password(&password, &user.password).await? {
            return Err(ApiError::unauthorized(BAD_CREDENTIALS));
        }
        Ok(user)
    }

    /// Stores a reset digest and mails the raw token; a failed delivery
    /// withdraws the token again.
    pub async fn forgot_password(&self, email: Option<String>, origin: &str) -> Result<(), ApiError> {
        let email = email.map(|e| e.trim().to_lowercase()).unwrap_or_default();
        let user = self
            .users()
            .select_one_where(json!({ "email": email }))
            .await?
            .ok_or_else(|| ApiError::not_found(NO_SUCH_EMAIL))?;

        let token = ResetToken::generate();
        User::set_reset_token(&self.pool, user.id, Some(&token.digest), Some(token.expires_at)).await?;

        let url = format!("{}/api/v1/users/resetPassword/{}", origin, token.raw);
        if let Err(e) = self.mailer.send_password_reset(&user.email, &user.name, &url).await {
            tracing::error!("Password reset mail to {} failed: {}", user.email, e);
            User::set_reset_token(&self.pool, user.id, None, None).await?;
            return Err(ApiError::internal_server_error(MAIL_FAILED));
        }
        Ok(())
    }

    pub async fn reset_password(&self, raw_token: &str, body: NewPassword) -> Result<User, ApiError> {
        let user = User::find_by_reset_digest(&self.pool, &digest_token(raw_token))
            .await?
            .ok_or_else(|| ApiError::bad_request(BAD_RESET_TOKEN))?;

        let password = checked_password(body.password, body.confirm_password)?;
        let hash = auth::hash_password(&password).await?;
        Ok(User::set_password(&self.pool, user.id, &hash).await?)
    }

    pub async fn update_password(&self, user: &User, body: PasswordChange) -> Result<User, ApiError> {
        let current = body.password_current.unwrap_or_default();
        if current.is_empty() || !auth::verify_password(&current, &user.password).await? {
            return Err(ApiError::unauthorized(WRONG_PASSWORD));
        }

        let password = checked_password(body.password, body.confirm_password)?;
        let hash = auth::hash_password(&password).await?;
        Ok(User::set_password(&self.pool, user.id, &hash).await?)
    }

    /// Changes name, email and (uploaded) photo only
    pub async fn update_me(&self, user: &User, body: ProfileUpdate, photo: Option<String>) -> Result<User, ApiError> {
        body.reject_password()?;

        let mut draft = user.to_draft();
        if body.name.is_some() {
            draft.name = body.name;
        }
        if body.email.is_some() {
            draft.email = body.email;
        }
        if photo.is_some() {
            draft.photo = photo;
        }
        let valid = User::validate(draft, Operation::Update)?;
        Ok(User::update_profile(&self.pool, user.id, &valid.name, &valid.email, &valid.photo).await?)
    }

    pub async fn delete_me(&self, user: &User) -> Result<(), ApiError> {
        User::deactivate(&self.pool, user.id).await?;
        tracing::info!("Account {} deactivated", user.id);
        Ok(())
    }
}

fn checked_password(password: Option<String>, confirm: Option<String>) -> Result<String, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let password = validate_new_password(&mut errors, password, confirm);
    errors.finish(|| password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_password_must_match_confirmation() {
        assert_eq!(
            checked_password(Some("pass1234".into()), Some("pass1234".into())).unwrap(),
            "pass1234"
        );
        assert!(checked_password(Some("pass1234".into()), Some("pass4321".into()))
            .unwrap_err()
            .has("confirmPassword"));
        assert!(checked_password(Some("short".into()), Some("short".into()))
            .unwrap_err()
            .has("password"));
        assert!(checked_password(None, None).is_err());
    }

    #[test]
    fn profile_update_reads_camel_case() {
        let body: ProfileUpdate =
            serde_json::from_value(json!({ "name": "Ann", "confirmPassword": "x" })).unwrap();
        assert_eq!(body.name.as_deref(), Some("Ann"));
        assert!(body.confirm_password.is_some());
    }
}
