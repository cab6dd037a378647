// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::config::Environment;

const GENERIC_MESSAGE: &str = "Something went very wrong!";

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    CastError {
        field: String,
        value: String,
    },
    Duplicate(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 429 Too Many Requests
    TooManyRequests(String),

    // 500 Internal Server Error, anticipated (e.g. mail delivery failed)
    InternalServerError(String),

    // 500 Internal Server Error, programming or infrastructure defect
    Unexpected(String),

    // 502 Bad Gateway (payment provider issues)
    BadGateway(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::CastError { .. } => 400,
            ApiError::Duplicate(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::TooManyRequests(_) => 429,
            ApiError::InternalServerError(_) => 500,
            ApiError::Unexpected(_) => 500,
            ApiError::BadGateway(_) => 502,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// `fail` for client errors, `error` for server errors
    pub fn status(&self) -> &'static str {
        if self.status_code() < 500 {
            "fail"
        } else {
            "error"
        }
    }

    /// Operational errors are anticipated failures whose message is safe to
    /// show in production.
    pub fn is_operational(&self) -> bool {
        !matches!(self, ApiError::Unexpected(_))
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::ValidationError { message, .. } => message.clone(),
            ApiError::CastError { field, value } => format!("Invalid {}: {}.", field, value),
            ApiError::Duplicate(msg) => msg.clone(),
            ApiError::InvalidJson(msg) => msg.clone(),
            ApiError::Unauthorized(msg) => msg.clone(),
            ApiError::Forbidden(msg) => msg.clone(),
            ApiError::NotFound(msg) => msg.clone(),
            ApiError::TooManyRequests(msg) => msg.clone(),
            ApiError::InternalServerError(msg) => msg.clone(),
            ApiError::Unexpected(msg) => msg.clone(),
            ApiError::BadGateway(msg) => msg.clone(),
            ApiError::ServiceUnavailable(msg) => msg.clone(),
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::CastError { .. } => "CAST_ERROR",
            ApiError::Duplicate(_) => "DUPLICATE_FIELD",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::TooManyRequests(_) => "TOO_MANY_REQUESTS",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::Unexpected(_) => "INTERNAL_SERVER_ERROR",
            ApiError::BadGateway(_) => "BAD_GATEWAY",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body for the given environment.
    ///
    /// Development exposes code and debug detail; production only exposes
    /// the message of operational errors.
    pub fn to_json(&self, environment: Environment) -> Value {
        if environment == Environment::Production && !self.is_operational() {
            return json!({
                "status": self.status(),
                "message": GENERIC_MESSAGE
            });
        }

        let mut response = json!({
            "status": self.status(),
            "message": self.message()
        });

        if let ApiError::ValidationError { field_errors: Some(field_errors), .. } = self {
            response["fieldErrors"] = json!(field_errors);
        }

        if environment == Environment::Development {
            response["code"] = json!(self.error_code());
            response["error"] = json!(format!("{:?}", self));
        }

        response
    }

    pub fn render(&self, environment: Environment) -> (StatusCode, Value) {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_json(environment))
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn cast_error(field: impl Into<String>, value: impl Into<String>) -> Self {
        ApiError::CastError {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        ApiError::TooManyRequests(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn unexpected(detail: impl Into<String>) -> Self {
        ApiError::Unexpected(detail.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError::BadGateway(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }

    pub fn document_not_found() -> Self {
        ApiError::not_found("No document found with that ID")
    }
}

static DUPLICATE_DETAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Key \((?P<key>.+)\)=\((?P<value>.*)\) already exists").unwrap());

/// Builds the duplicate-key message from a Postgres `23505` detail line.
pub fn duplicate_message(detail: Option<&str>) -> String {
    let value = detail
        .and_then(|d| DUPLICATE_DETAIL.captures(d))
        .map(|caps| caps["value"].to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("Duplicate field value: \"{}\". Please use another value!", value)
}

fn from_sqlx(err: sqlx::Error) -> ApiError {
    match err {
        sqlx::Error::RowNotFound => ApiError::document_not_found(),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            tracing::error!("Database unavailable: {}", err);
            ApiError::service_unavailable("Database temporarily unavailable")
        }
        sqlx::Error::Database(db_err) => {
            let detail = db_err
                .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .map(str::to_string);
            match db_err.code().as_deref() {
                Some("23505") => ApiError::Duplicate(duplicate_message(detail.as_deref())),
                Some("23503") => ApiError::bad_request("Referenced document does not exist"),
                Some("23514") => ApiError::validation_error(
                    format!("Invalid data input: {}.", db_err.message()),
                    None,
                ),
                Some("22P02") => ApiError::bad_request(format!("Invalid input: {}.", db_err.message())),
                _ => {
                    tracing::error!("Database error: {}", db_err);
                    ApiError::unexpected(db_err.to_string())
                }
            }
        }
        other => {
            tracing::error!("SQLx error: {}", other);
            ApiError::unexpected(other.to_string())
        }
    }
}

// Convert other error types to ApiError
impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        use crate::database::manager::DatabaseError;
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::Filter(filter_err) => filter_err.into(),
            DatabaseError::Sqlx(sqlx_err) => from_sqlx(sqlx_err),
            DatabaseError::Password(password_err) => password_err.into(),
            DatabaseError::Migration(migrate_err) => {
                tracing::error!("Migration error: {}", migrate_err);
                ApiError::service_unavailable("Service is being updated, please try again later")
            }
            DatabaseError::InvalidDatabaseUrl | DatabaseError::Serialization(_) => {
                tracing::error!("Database layer error: {}", err);
                ApiError::unexpected(err.to_string())
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        from_sqlx(err)
    }
}

impl From<crate::filter::FilterError> for ApiError {
    fn from(err: crate::filter::FilterError) -> Self {
        use crate::filter::FilterError;
        match err {
            FilterError::Cast { field, value } => ApiError::cast_error(field, value),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

impl From<crate::database::validation::ValidationErrors> for ApiError {
    fn from(errors: crate::database::validation::ValidationErrors) -> Self {
        ApiError::validation_error(errors.message(), Some(errors.into_map()))
    }
}

impl From<crate::auth::JwtError> for ApiError {
    fn from(err: crate::auth::JwtError) -> Self {
        use crate::auth::JwtError;
        match err {
            JwtError::Expired => ApiError::unauthorized("Your token has expired! Please log in again"),
            JwtError::Invalid(_) => ApiError::unauthorized("Invalid token, please log in again"),
            JwtError::InvalidSecret | JwtError::TokenGeneration(_) => {
                tracing::error!("JWT configuration error: {}", err);
                ApiError::unexpected(err.to_string())
            }
        }
    }
}

impl From<crate::auth::PasswordError> for ApiError {
    fn from(err: crate::auth::PasswordError) -> Self {
        tracing::error!("Password hashing error: {}", err);
        ApiError::unexpected(err.to_string())
    }
}

impl From<crate::payments::PaymentError> for ApiError {
    fn from(err: crate::payments::PaymentError) -> Self {
        use crate::payments::PaymentError;
        match err {
            PaymentError::Signature(msg) => ApiError::bad_request(format!("Webhook error: {}", msg)),
            PaymentError::NotConfigured => {
                ApiError::service_unavailable("Payments are not configured on this server")
            }
            PaymentError::Provider { status, message } => {
                tracing::error!("Payment provider returned {}: {}", status, message);
                ApiError::bad_gateway("Payment provider rejected the request")
            }
            PaymentError::Http(e) => {
                tracing::error!("Payment provider unreachable: {}", e);
                ApiError::bad_gateway("Payment provider is unavailable")
            }
        }
    }
}

impl From<crate::uploads::UploadError> for ApiError {
    fn from(err: crate::uploads::UploadError) -> Self {
        use crate::uploads::UploadError;
        match err {
            UploadError::NotAnImage => ApiError::bad_request("Not an image, please upload only images"),
            UploadError::TooManyFiles(field) => {
                ApiError::bad_request(format!("Too many files for field '{}'", field))
            }
            UploadError::Multipart(msg) => ApiError::bad_request(msg),
            other => {
                tracing::error!("Image processing error: {}", other);
                ApiError::unexpected(other.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(format!("Invalid data input: {}.", err))
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        if !self.is_operational() {
            tracing::error!("ERROR: {:?}", self);
        }
        let (status, body) = self.render(crate::config::config().environment);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_fail_server_errors_error() {
        assert_eq!(ApiError::bad_request("x").status(), "fail");
        assert_eq!(ApiError::forbidden("x").status(), "fail");
        assert_eq!(ApiError::internal_server_error("x").status(), "error");
        assert_eq!(ApiError::unexpected("x").status(), "error");
    }

    #[test]
    fn production_hides_unexpected_errors() {
        let (status, body) = ApiError::unexpected("relation \"tours\" does not exist").render(Environment::Production);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "status": "error", "message": "Something went very wrong!" }));
    }

    #[test]
    fn production_shows_operational_messages() {
        let (status, body) = ApiError::document_not_found().render(Environment::Production);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "status": "fail", "message": "No document found with that ID" }));

        let (_, body) = ApiError::internal_server_error("There was an error sending the email, try again later")
            .render(Environment::Production);
        assert_eq!(body["message"], "There was an error sending the email, try again later");
    }

    #[test]
    fn development_exposes_detail() {
        let (_, body) = ApiError::unexpected("boom").render(Environment::Development);
        assert_eq!(body["message"], "boom");
        assert_eq!(body["code"], "INTERNAL_SERVER_ERROR");
        assert!(body["error"].as_str().unwrap().contains("Unexpected"));
    }

    #[test]
    fn cast_error_message() {
        let err = ApiError::cast_error("id", "abc");
        assert_eq!(err.message(), "Invalid id: abc.");
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn duplicate_message_extracts_value() {
        assert_eq!(
            duplicate_message(Some("Key (name)=(The Forest Hiker) already exists.")),
            "Duplicate field value: \"The Forest Hiker\". Please use another value!"
        );
        assert_eq!(
            duplicate_message(None),
            "Duplicate field value: \"unknown\". Please use another value!"
        );
    }
}
