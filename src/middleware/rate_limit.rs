use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::app::AppState;
use crate::error::ApiError;

pub const LIMIT_MESSAGE: &str = "Too many requests from this IP, please try again in an hour!";

/// Per-IP sliding window limiter.
///
/// Each IP keeps the instants of its requests inside the window; a request
/// is refused once the window already holds `max_requests` of them.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<IpAddr, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    /// Records the request, or returns the seconds until the oldest one
    /// leaves the window.
    pub async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        let history = requests.entry(ip).or_default();
        history.retain(|at| now.duration_since(*at) < self.window);

        if history.len() >= self.max_requests {
            let retry_after = history
                .first()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)).as_secs())
                .unwrap_or(1)
                .max(1);
            return Err(retry_after);
        }

        history.push(now);
        Ok(())
    }

    /// Drops IPs with no request inside the window
    pub async fn cleanup_expired(&self) {
        let mut requests = self.requests.write().await;
        let now = Instant::now();
        requests.retain(|_, history| {
            history.retain(|at| now.duration_since(*at) < self.window);
            !history.is_empty()
        });
    }

    pub async fn tracked_ips(&self) -> usize {
        self.requests.read().await.len()
    }

    /// Sweeps the bookkeeping every `every` on a background task
    pub fn spawn_cleanup(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                limiter.cleanup_expired().await;
            }
        })
    }
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, state.config.api.trust_proxy);
    match state.limiter.check(ip).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!("Rate limit exceeded for {}", ip);
            let mut response = ApiError::too_many_requests(LIMIT_MESSAGE).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
    }
}

/// Peer address of the connection; behind a trusted proxy the first
/// `X-Forwarded-For` hop, then `X-Real-IP`, win over it.
fn client_ip(request: &Request, trust_proxy: bool) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));
    if !trust_proxy {
        return peer;
    }
    forwarded_ip(request.headers()).unwrap_or(peer)
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("X-Real-IP")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}
