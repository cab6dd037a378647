#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use tourbook::app::{router, AppState};
use tourbook::config::AppConfig;
use tourbook::database::models::user::{Role, User};
use tourbook::database::DatabaseManager;
use tourbook::mail::{MailError, Mailer};
use tourbook::payments::{
    CheckoutRequest, CheckoutSession, PaymentError, PaymentGateway, StripeGateway, WebhookEvent,
};

pub const WEBHOOK_SECRET: &str = "whsec_integration";
pub const PASSWORD: &str = "test1234";
pub const JWT_SECRET: &str = "integration-test-secret";

/// One in-process server per test; each `#[tokio::test]` owns its runtime
pub struct TestServer {
    pub base_url: String,
    pub client: Client,
    pub pool: PgPool,
    pub mailer: Arc<RecordingMailer>,
    pub payments: Arc<RecordingGateway>,
}

/// Keeps (recipient, url) of every mail instead of sending it
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    pub fn last_url_for(&self, to: &str) -> Option<String> {
        let sent = self.sent.lock().ok()?;
        sent.iter().rev().find(|(rcpt, _)| rcpt == to).map(|(_, url)| url.clone())
    }

    fn record(&self, to: &str, url: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((to.to_string(), url.to_string()));
        }
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send_welcome(&self, to: &str, _name: &str, url: &str) -> Result<(), MailError> {
        self.record(to, url);
        Ok(())
    }

    async fn send_password_reset(&self, to: &str, _name: &str, url: &str) -> Result<(), MailError> {
        self.record(to, url);
        Ok(())
    }
}

/// Answers checkouts locally and keeps the last request; webhooks are
/// verified with the configured secret as in production
pub struct RecordingGateway {
    webhooks: StripeGateway,
    last: Mutex<Option<CheckoutRequest>>,
}

impl RecordingGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            webhooks: StripeGateway::new(&config.payments),
            last: Mutex::new(None),
        }
    }

    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.last.lock().ok()?.clone()
    }
}

#[async_trait::async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let session = CheckoutSession {
            id: "cs_test_recorded".to_string(),
            url: Some("https://checkout.stripe.test/pay/cs_test_recorded".to_string()),
            client_reference_id: Some(request.client_reference_id.clone()),
            customer_email: Some(request.customer_email.clone()),
            amount_total: Some(request.unit_amount),
        };
        if let Ok(mut last) = self.last.lock() {
            *last = Some(request);
        }
        Ok(session)
    }

    fn construct_event(&self, payload: &[u8], signature: &str) -> Result<WebhookEvent, PaymentError> {
        self.webhooks.construct_event(payload, signature)
    }
}

/// Config pointing at `TEST_DATABASE_URL` (or an unreachable address when unset)
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::development();
    config.database.url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://tourbook@127.0.0.1:1/tourbook_unreachable".to_string());
    config.database.max_connections = 5;
    config.database.connection_timeout = 2;
    config.api.enable_rate_limiting = false;
    config.api.enable_request_logging = false;
    config.security.jwt_secret = JWT_SECRET.to_string();
    config.payments.stripe_webhook_secret = WEBHOOK_SECRET.to_string();
    config.server.upload_dir = std::env::temp_dir().join("tourbook-tests").to_string_lossy().into_owned();
    config
}

pub fn unique_email() -> String {
    format!("{}@tourbook.test", Uuid::new_v4().simple())
}

pub fn has_database() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Returns early from a test when no database is configured
#[macro_export]
macro_rules! require_database {
    () => {
        if !common::has_database() {
            eprintln!("TEST_DATABASE_URL not set, skipping");
            return Ok(());
        }
    };
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: AppConfig) -> Result<Self> {
        let pool = DatabaseManager::connect_lazy(&config.database)?;
        if has_database() {
            DatabaseManager::migrate(&pool).await?;
        }

        let mailer = Arc::new(RecordingMailer::default());
        let payments = Arc::new(RecordingGateway::new(&config));
        let state = AppState::new(pool.clone(), config)
            .with_mailer(mailer.clone())
            .with_payments(payments.clone());
        let app = router(state);
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client,
            pool,
            mailer,
            payments,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Signs up a fresh account and returns (id, token)
    pub async fn signup(&self, name: &str) -> Result<(Uuid, String)> {
        self.signup_with_email(name, &unique_email()).await
    }

    pub async fn signup_with_email(&self, name: &str, email: &str) -> Result<(Uuid, String)> {
        let res = self
            .client
            .post(self.url("/api/v1/users/signup"))
            .json(&json!({
                "name": name,
                "email": email,
                "password": PASSWORD,
                "confirmPassword": PASSWORD,
            }))
            .send()
            .await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "signup failed: {}", res.status());

        let body: Value = res.json().await?;
        let id = body["data"]["user"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .context("signup response without user id")?;
        let token = body["token"].as_str().context("signup response without token")?.to_string();
        Ok((id, token))
    }

    /// Signs up an account and promotes it to `role`
    pub async fn signup_as(&self, name: &str, role: Role) -> Result<(Uuid, String)> {
        let (id, token) = self.signup(name).await?;
        let email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        User::set_role(&self.pool, &email, role).await?;
        Ok((id, token))
    }

    /// Creates a tour as the given staff token and returns its id
    pub async fn create_tour(&self, token: &str) -> Result<Uuid> {
        let name = format!("Test Tour {}", &Uuid::new_v4().simple().to_string()[..12]);
        let res = self
            .client
            .post(self.url("/api/v1/tours"))
            .bearer_auth(token)
            .json(&json!({
                "name": name,
                "duration": 5,
                "maxGroupSize": 10,
                "difficulty": "easy",
                "price": 497,
                "summary": "Breathtaking hike through the Canadian Banff National Park",
                "imageCover": "tour-1-cover.jpg",
                "startDates": ["2031-04-25T09:00:00Z", "2031-07-20T09:00:00Z"],
            }))
            .send()
            .await?;
        anyhow::ensure!(res.status() == StatusCode::CREATED, "tour creation failed: {}", res.status());

        let body: Value = res.json().await?;
        body["data"]["data"]["id"]
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .context("tour response without id")
    }
}
