use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Success envelope: `{status: "success", results?, token?, message?, data?}`
#[derive(Debug)]
pub struct ApiResponse<T: Serialize> {
    pub data: Option<T>,
    pub results: Option<usize>,
    pub token: Option<String>,
    pub message: Option<String>,
    pub cookie: Option<String>,
    pub status_code: Option<StatusCode>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful API response with default 200 status
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            results: None,
            token: None,
            message: None,
            cookie: None,
            status_code: None, // Default to 200 OK
        }
    }

    /// Create an API response with custom status code
    pub fn with_status(data: T, status_code: StatusCode) -> Self {
        Self {
            status_code: Some(status_code),
            ..Self::success(data)
        }
    }

    /// Create a 201 Created response
    pub fn created(data: T) -> Self {
        Self::with_status(data, StatusCode::CREATED)
    }

    pub fn results(mut self, count: usize) -> Self {
        self.results = Some(count);
        self
    }

    /// Token in the body plus the matching `Set-Cookie`
    pub fn token(mut self, token: String, cookie: String) -> Self {
        self.token = Some(token);
        self.cookie = Some(cookie);
        self
    }

    pub fn cookie(mut self, cookie: String) -> Self {
        self.cookie = Some(cookie);
        self
    }
}

impl ApiResponse<Value> {
    /// Bare `{status: "success"}`
    pub fn ok() -> Self {
        Self {
            data: None,
            results: None,
            token: None,
            message: None,
            cookie: None,
            status_code: None,
        }
    }

    /// Envelope carrying only a message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    /// Create a 204 No Content response
    pub fn no_content() -> Self {
        Self {
            status_code: Some(StatusCode::NO_CONTENT),
            ..Self::ok()
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status_code.unwrap_or(StatusCode::OK);
        let cookie = self.cookie.as_deref().and_then(crate::auth::set_cookie_header);

        // For 204 No Content, return empty response
        if status == StatusCode::NO_CONTENT {
            return match cookie {
                Some(header) => (status, [header]).into_response(),
                None => status.into_response(),
            };
        }

        let mut envelope = Map::new();
        envelope.insert("status".to_string(), json!("success"));
        if let Some(results) = self.results {
            envelope.insert("results".to_string(), json!(results));
        }
        if let Some(token) = self.token {
            envelope.insert("token".to_string(), json!(token));
        }
        if let Some(message) = self.message {
            envelope.insert("message".to_string(), json!(message));
        }
        if let Some(data) = self.data {
            match serde_json::to_value(&data) {
                Ok(value) => {
                    envelope.insert("data".to_string(), value);
                }
                Err(e) => {
                    tracing::error!("Failed to serialize response data: {}", e);
                    return crate::error::ApiError::unexpected(e.to_string()).into_response();
                }
            }
        }

        match cookie {
            Some(header) => (status, [header], Json(Value::Object(envelope))).into_response(),
            None => (status, Json(Value::Object(envelope))).into_response(),
        }
    }
}

/// `{data: <doc or docs>}`, the payload shape of the generic handlers
pub fn documents(value: Value) -> Value {
    json!({ "data": value })
}

pub type ApiResult<T> = Result<ApiResponse<T>, crate::error::ApiError>;
