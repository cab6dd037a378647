use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use super::{CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway, WebhookEvent};
use crate::config::PaymentsConfig;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a signed webhook stays acceptable
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe Checkout over its REST API
pub struct StripeGateway {
    client: reqwest::Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeGateway {
    pub fn new(config: &PaymentsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            secret_key: config.stripe_secret_key.clone(),
            webhook_secret: config.stripe_webhook_secret.clone(),
            api_base: config.api_base.clone(),
        }
    }

    fn form(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("client_reference_id".to_string(), request.client_reference_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), request.currency.clone()),
            ("line_items[0][price_data][unit_amount]".to_string(), request.unit_amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.product_name.clone(),
            ),
        ];
        if !request.description.is_empty() {
            form.push((
                "line_items[0][price_data][product_data][description]".to_string(),
                request.description.clone(),
            ));
        }
        for (i, image) in request.images.iter().enumerate() {
            form.push((format!("line_items[0][price_data][product_data][images][{}]", i), image.clone()));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        if self.secret_key.is_empty() {
            return Err(PaymentError::NotConfigured);
        }

        let url = format!("{}/v1/checkout/sessions", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(&Self::form(&request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(PaymentError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let session: CheckoutSession = response.json().await?;
        tracing::info!("Created checkout session {} for tour {}", session.id, request.client_reference_id);
        Ok(session)
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, PaymentError> {
        if self.webhook_secret.is_empty() {
            return Err(PaymentError::NotConfigured);
        }
        verify_signature(payload, signature, &self.webhook_secret, chrono::Utc::now().timestamp())?;
        serde_json::from_slice(payload).map_err(|e| PaymentError::Signature(format!("Invalid payload: {}", e)))
    }
}

/// Checks a `t=<unix>,v1=<hex>[,v1=...]` header: one `v1` must equal
/// HMAC-SHA256(secret, "<t>.<payload>") and `t` must be within the
/// tolerance of `now`.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), PaymentError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::Signature("Unable to extract timestamp and signatures from header".into()))?;
    if signatures.is_empty() {
        return Err(PaymentError::Signature("No signatures found with expected scheme".into()));
    }

    let matched = signatures.iter().filter_map(|s| from_hex(s)).any(|expected| {
        let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return false,
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    });
    if !matched {
        return Err(PaymentError::Signature(
            "No signatures found matching the expected signature for payload".into(),
        ));
    }

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(PaymentError::Signature("Timestamp outside the tolerance zone".into()));
    }
    Ok(())
}

/// `t=<now>,v1=<hex>` for a payload; what the provider sends
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, crate::auth::to_hex(&mac.finalize().into_bytes()))
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}
