pub mod stripe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use stripe::StripeGateway;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Signature(String),

    #[error("Payment provider is not configured")]
    NotConfigured,

    #[error("Payment provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// One-item hosted checkout for a tour
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: String,
    pub client_reference_id: String,
    pub product_name: String,
    pub description: String,
    pub images: Vec<String>,
    /// Smallest currency unit (cents)
    pub unit_amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: Value,
}

/// The parts of a completed checkout needed to record a booking
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedCheckout {
    pub client_reference_id: String,
    pub customer_email: String,
    pub amount_total: i64,
}

impl WebhookEvent {
    /// `None` unless this is a completed checkout carrying a reference,
    /// an email and an amount.
    pub fn completed_checkout(&self) -> Option<CompletedCheckout> {
        if self.kind != CHECKOUT_COMPLETED {
            return None;
        }
        let object = &self.data.object;
        let email = object
            .get("customer_email")
            .and_then(Value::as_str)
            .or_else(|| object.pointer("/customer_details/email").and_then(Value::as_str))?;
        Some(CompletedCheckout {
            client_reference_id: object.get("client_reference_id")?.as_str()?.to_string(),
            customer_email: email.to_string(),
            amount_total: object.get("amount_total")?.as_i64()?,
        })
    }
}

/// Hosted checkout provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError>;

    /// Authenticates a webhook payload against its signature header and
    /// parses the event.
    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, PaymentError>;
}
