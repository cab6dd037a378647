use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::auth;
use crate::database::manager::DatabaseError;
use crate::database::resource::Resource;
use crate::database::validation::ValidationErrors;
use crate::filter::types::{Field, FieldKind};
use crate::types::Operation;

pub const DEFAULT_PHOTO: &str = "default.jpg";
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

#[derive(Debug, Error)]
#[error("Unknown role: {0}")]
pub struct RoleParseError(pub String);

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "guide" => Some(Role::Guide),
            "lead-guide" => Some(Role::LeadGuide),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl TryFrom<String> for Role {
    type Error = RoleParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Role::parse(&value).ok_or(RoleParseError(value))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account row. Credentials and the soft-delete flag never leave the server.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub photo: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_changed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub password_reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub password_reset_expires: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub active: bool,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDraft {
    pub name: Option<String>,
    pub email: Option<String>,
    pub photo: Option<String>,
    pub role: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing)]
    pub confirm_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidUser {
    pub name: String,
    pub email: String,
    pub photo: String,
    pub role: Role,
    /// Plain password, only present on create
    pub password: Option<String>,
}

const USER_FIELDS: &[Field] = &[
    Field::new("id", "id", FieldKind::Uuid),
    Field::new("name", "name", FieldKind::Text),
    Field::new("email", "email", FieldKind::Text),
    Field::new("photo", "photo", FieldKind::Text),
    Field::new("role", "role", FieldKind::Text),
    Field::new("passwordChangedAt", "password_changed_at", FieldKind::Timestamp),
    Field::new("active", "active", FieldKind::Bool),
    Field::new("createdAt", "created_at", FieldKind::Timestamp),
];

/// Checks a new password and its confirmation, returning the password.
pub fn validate_new_password(
    errors: &mut ValidationErrors,
    password: Option<String>,
    confirm_password: Option<String>,
) -> Option<String> {
    let password = errors.require("password", password, "Please enter a valid password");
    let confirm = errors.require("confirmPassword", confirm_password, "Please confirm your password");

    if let Some(ref p) = password {
        if p.chars().count() < MIN_PASSWORD_LEN {
            errors.add("password", "Password must have at least 8 characters");
        }
    }
    if let (Some(p), Some(c)) = (&password, &confirm) {
        if p != c {
            errors.add("confirmPassword", "Passwords are not the same!");
        }
    }
    password
}

impl User {
    /// True when the password changed after a token issued at `iat`
    pub fn changed_password_after(&self, iat: i64) -> bool {
        match self.password_changed_at {
            Some(changed_at) => iat < changed_at.timestamp(),
            None => false,
        }
    }

    /// Public card embedded in other documents
    pub fn summary(&self, with_contact: bool) -> Value {
        if with_contact {
            json!({
                "id": self.id,
                "name": self.name,
                "email": self.email,
                "photo": self.photo,
                "role": self.role,
            })
        } else {
            json!({ "id": self.id, "name": self.name, "photo": self.photo })
        }
    }

    /// Stores a new password hash, stamps the change and clears any pending
    /// reset. Tokens have to be issued after this returns.
    pub async fn set_password(pool: &PgPool, id: Uuid, hash: &str) -> Result<User, DatabaseError> {
        let changed_at = Utc::now();
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET password = $2, password_changed_at = $3, \
             password_reset_token = NULL, password_reset_expires = NULL \
             WHERE id = $1 AND active RETURNING *",
        )
        .bind(id)
        .bind(hash)
        .bind(changed_at)
        .fetch_one(pool)
        .await?;
        Ok(user)
    }

    pub async fn set_reset_token(
        pool: &PgPool,
        id: Uuid,
        digest: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE users SET password_reset_token = $2, password_reset_expires = $3 WHERE id = $1")
            .bind(id)
            .bind(digest)
            .bind(expires_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Active user holding an unexpired reset digest
    pub async fn find_by_reset_digest(pool: &PgPool, digest: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE password_reset_token = $1 \
             AND password_reset_expires > NOW() AND active",
        )
        .bind(digest)
        .fetch_optional(pool)
        .await?;
        Ok(user)
    }

    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        name: &str,
        email: &str,
        photo: &str,
    ) -> Result<User, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET name = $2, email = $3, photo = $4 WHERE id = $1 AND active RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(photo)
        .fetch_one(pool)
        .await?;
        Ok(user)
    }

    pub async fn deactivate(pool: &PgPool, id: Uuid) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE users SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Role change used by the command line; ignores the active scope.
    pub async fn set_role(pool: &PgPool, email: &str, role: Role) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>("UPDATE users SET role = $2 WHERE email = $1 RETURNING *")
            .bind(email.trim().to_lowercase())
            .bind(role.as_str())
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl Resource for User {
    const TABLE: &'static str = "users";
    const FIELDS: &'static [Field] = USER_FIELDS;

    type Draft = UserDraft;
    type Valid = ValidUser;

    fn id(&self) -> Uuid {
        self.id
    }

    fn default_scope() -> Option<Value> {
        Some(json!({ "active": { "$ne": false } }))
    }

    fn to_draft(&self) -> UserDraft {
        UserDraft {
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
            photo: Some(self.photo.clone()),
            role: Some(self.role.as_str().to_string()),
            password: None,
            confirm_password: None,
        }
    }

    fn validate(draft: UserDraft, op: Operation) -> Result<ValidUser, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let name = errors.require_text("name", draft.name, "Name must be filled out");
        let email = errors
            .require_text("email", draft.email, "You must have a valid email address")
            .map(|e| e.to_lowercase());
        if let Some(ref e) = email {
            errors.email("email", e, "Please use a valid email");
        }
        let photo = draft
            .photo
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PHOTO.to_string());
        let role = match draft.role.as_deref() {
            None => Some(Role::User),
            Some(raw) => {
                let role = Role::parse(raw);
                if role.is_none() {
                    errors.add("role", "Role is either: user, guide, lead-guide or admin");
                }
                role
            }
        };

        // Passwords only change through the dedicated password flows
        let password = match op {
            Operation::Create => validate_new_password(&mut errors, draft.password, draft.confirm_password),
            Operation::Update => None,
        };

        errors.finish(|| {
            Some(ValidUser {
                name: name?,
                email: email?,
                photo,
                role: role?,
                password: if op == Operation::Create { Some(password?) } else { None },
            })
        })
    }

    async fn insert(pool: &PgPool, valid: ValidUser) -> Result<Self, DatabaseError> {
        let plain = valid.password.unwrap_or_default();
        let hash = auth::hash_password(&plain).await?;
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (id, name, email, photo, role, password) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&valid.name)
        .bind(&valid.email)
        .bind(&valid.photo)
        .bind(valid.role.as_str())
        .bind(hash)
        .fetch_one(pool)
        .await?;
        Ok(user)
    }

    async fn replace(pool: &PgPool, current: &Self, valid: ValidUser) -> Result<Self, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "UPDATE users SET name = $2, email = $3, photo = $4, role = $5 WHERE id = $1 RETURNING *",
        )
        .bind(current.id)
        .bind(&valid.name)
        .bind(&valid.email)
        .bind(&valid.photo)
        .bind(valid.role.as_str())
        .fetch_one(pool)
        .await?;
        Ok(user)
    }

    async fn remove(pool: &PgPool, current: Self) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(current.id)
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup_draft() -> UserDraft {
        UserDraft {
            name: Some("Laura Wilson".into()),
            email: Some("  Laura@Example.COM ".into()),
            password: Some("pass1234".into()),
            confirm_password: Some("pass1234".into()),
            ..Default::default()
        }
    }

    fn user_with_change(changed_at: Option<DateTime<Utc>>) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Laura".into(),
            email: "laura@example.com".into(),
            photo: DEFAULT_PHOTO.into(),
            role: Role::User,
            password: "hash".into(),
            password_changed_at: changed_at,
            password_reset_token: Some("digest".into()),
            password_reset_expires: None,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_applies_defaults_and_normalizes_email() {
        let valid = User::validate(signup_draft(), Operation::Create).unwrap();
        assert_eq!(valid.email, "laura@example.com");
        assert_eq!(valid.photo, DEFAULT_PHOTO);
        assert_eq!(valid.role, Role::User);
        assert_eq!(valid.password.as_deref(), Some("pass1234"));
    }

    #[test]
    fn create_checks_password_confirmation() {
        let mut draft = signup_draft();
        draft.confirm_password = Some("pass12345".into());
        let errors = User::validate(draft, Operation::Create).unwrap_err();
        assert!(errors.has("confirmPassword"));

        let mut draft = signup_draft();
        draft.password = Some("short".into());
        draft.confirm_password = Some("short".into());
        let errors = User::validate(draft, Operation::Create).unwrap_err();
        assert!(errors.has("password"));
    }

    #[test]
    fn update_ignores_password_fields() {
        let mut draft = signup_draft();
        draft.password = None;
        draft.confirm_password = None;
        let valid = User::validate(draft, Operation::Update).unwrap();
        assert!(valid.password.is_none());
    }

    #[test]
    fn rejects_bad_email_and_role() {
        let mut draft = signup_draft();
        draft.email = Some("not-an-email".into());
        draft.role = Some("boss".into());
        let errors = User::validate(draft, Operation::Create).unwrap_err();
        assert!(errors.has("email"));
        assert!(errors.has("role"));
    }

    #[test]
    fn password_change_invalidates_older_tokens() {
        let changed = Utc::now();
        let user = user_with_change(Some(changed));
        assert!(user.changed_password_after(changed.timestamp() - 1));
        assert!(!user.changed_password_after(changed.timestamp()));
        assert!(!user_with_change(None).changed_password_after(0));

        // Issued at T, changed at T+1
        let issued = Utc::now().timestamp();
        let user = user_with_change(DateTime::from_timestamp(issued + 1, 250_000_000));
        assert!(user.changed_password_after(issued));
        assert!(!user.changed_password_after(issued + 1));
    }

    #[test]
    fn serialization_hides_credentials() {
        let value = serde_json::to_value(user_with_change(None)).unwrap();
        assert!(value.get("password").is_none());
        assert!(value.get("passwordResetToken").is_none());
        assert!(value.get("active").is_none());
        assert_eq!(value["role"], "user");
        assert_eq!(value["photo"], DEFAULT_PHOTO);
    }

    #[test]
    fn parses_roles() {
        assert_eq!(Role::try_from("lead-guide".to_string()).unwrap(), Role::LeadGuide);
        assert!(Role::try_from("root".to_string()).is_err());
        assert_eq!(serde_json::to_value(Role::LeadGuide).unwrap(), "lead-guide");
    }
}
