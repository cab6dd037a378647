mod common;

use std::net::IpAddr;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::TestServer;
use tourbook::payments::stripe::sign_payload;

#[tokio::test]
async fn unknown_route_is_404_with_path() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/api/v1/nowhere")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let body: Value = res.json().await?;
    assert_eq!(body["status"], "fail");
    assert_eq!(body["message"], "Can't find /api/v1/nowhere on this server!");
    Ok(())
}

#[tokio::test]
async fn responses_carry_security_headers() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/api/v1/nowhere")).send().await?;
    assert_eq!(res.headers()["x-content-type-options"], "nosniff");
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    Ok(())
}

#[tokio::test]
async fn health_reports_database_state() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/health")).send().await?;
    if common::has_database() {
        assert_eq!(res.status(), StatusCode::OK);
    } else {
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
    let body: Value = res.json().await?;
    assert!(body["data"]["timestamp"].is_string());
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let server = TestServer::start().await?;

    for path in ["/api/v1/users/me", "/api/v1/reviews", "/api/v1/bookings/my-tours"] {
        let res = server.client.get(server.url(path)).send().await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED, "{}", path);
        let body: Value = res.json().await?;
        assert_eq!(body["message"], "You are not logged in, please log in to get access");
    }
    Ok(())
}

#[tokio::test]
async fn forged_token_is_rejected_before_lookup() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server
        .client
        .get(server.url("/api/v1/users/me"))
        .bearer_auth("not.a.jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "Invalid token, please log in again");

    // Same token through the cookie
    let res = server
        .client
        .get(server.url("/api/v1/users/me"))
        .header("Cookie", "jwt=not.a.jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn login_requires_email_and_password() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server
        .client
        .post(server.url("/api/v1/users/login"))
        .json(&json!({ "email": "ann@example.io" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "Please provide valid email and password, or sign up.");
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server
        .client
        .post(server.url("/api/v1/users/login"))
        .header("Content-Type", "application/json")
        .body("{\"email\": ")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn logout_overwrites_cookie() -> Result<()> {
    let server = TestServer::start().await?;

    let res = server.client.get(server.url("/api/v1/users/logout")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers()["set-cookie"].to_str()?.to_string();
    assert!(cookie.starts_with("jwt=loggedout"), "{}", cookie);
    assert!(cookie.contains("HttpOnly"));

    let body: Value = res.json().await?;
    assert_eq!(body, json!({ "status": "success" }));
    Ok(())
}

#[tokio::test]
async fn webhook_rejects_bad_signatures() -> Result<()> {
    let server = TestServer::start().await?;
    let payload = json!({ "type": "checkout.session.completed", "data": { "object": {} } }).to_string();

    let res = server
        .client
        .post(server.url("/webhook-checkout"))
        .body(payload.clone())
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server
        .client
        .post(server.url("/webhook-checkout"))
        .header("Stripe-Signature", "t=1,v1=deadbeef")
        .body(payload)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert!(body["message"].as_str().unwrap_or("").starts_with("Webhook error:"));
    Ok(())
}

#[tokio::test]
async fn webhook_acknowledges_other_events() -> Result<()> {
    let server = TestServer::start().await?;
    let payload = json!({ "type": "payment_intent.created", "data": { "object": {} } }).to_string();
    let signature = sign_payload(payload.as_bytes(), common::WEBHOOK_SECRET, chrono::Utc::now().timestamp());

    let res = server
        .client
        .post(server.url("/webhook-checkout"))
        .header("Stripe-Signature", signature)
        .header("Content-Type", "application/json")
        .body(payload)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body, json!({ "received": true }));
    Ok(())
}

#[tokio::test]
async fn api_is_rate_limited_per_ip() -> Result<()> {
    let mut config = common::test_config();
    config.api.enable_rate_limiting = true;
    config.api.rate_limit_requests = 3;
    let server = TestServer::start_with(config).await?;

    // A fresh X-Forwarded-For per request does not buy a fresh quota
    for hop in 0..3 {
        let res = server
            .client
            .get(server.url("/api/v1/users/logout"))
            .header("X-Forwarded-For", format!("203.0.113.{}", hop))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let res = server
        .client
        .get(server.url("/api/v1/users/logout"))
        .header("X-Forwarded-For", "203.0.113.99")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));
    let body: Value = res.json().await?;
    assert_eq!(body["message"], "Too many requests from this IP, please try again in an hour!");

    // Outside /api the limiter does not apply
    let res = server.client.get(server.url("/nowhere")).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn each_client_address_has_its_own_quota() -> Result<()> {
    let mut config = common::test_config();
    config.api.enable_rate_limiting = true;
    config.api.rate_limit_requests = 2;
    let server = TestServer::start_with(config).await?;

    let other = reqwest::Client::builder()
        .local_address(IpAddr::from([127, 0, 0, 2]))
        .build()?;

    for _ in 0..2 {
        let res = server.client.get(server.url("/api/v1/users/logout")).send().await?;
        assert_eq!(res.status(), StatusCode::OK);
    }
    let res = server.client.get(server.url("/api/v1/users/logout")).send().await?;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let res = other.get(server.url("/api/v1/users/logout")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}
