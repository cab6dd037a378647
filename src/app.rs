// app.rs - shared state and the HTTP router

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json},
    routing::{delete, get, patch, post, MethodRouter},
    Router,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::database::models::user::Role;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::handlers::{bookings, reviews, tours, users};
use crate::mail::{LogMailer, Mailer};
use crate::middleware::{protect, rate_limit, restrict_to, security_headers, RateLimiter};
use crate::payments::{PaymentGateway, StripeGateway};
use crate::services::AccountService;

const ADMIN: &[Role] = &[Role::Admin];
const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];
const GUIDES: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];
const REVIEWERS: &[Role] = &[Role::User];
const REVIEW_EDITORS: &[Role] = &[Role::User, Role::Admin];

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub payments: Arc<dyn PaymentGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub limiter: RateLimiter,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let payments = Arc::new(StripeGateway::new(&config.payments));
        let limiter = RateLimiter::new(config.api.rate_limit_requests, config.api.rate_limit_window_secs);
        let mailer = Arc::new(LogMailer::new(!config.is_production()));
        Self {
            pool,
            config: Arc::new(config),
            payments,
            mailer,
            limiter,
        }
    }

    pub fn with_payments(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn accounts(&self) -> AccountService {
        AccountService::new(self.pool.clone(), self.mailer.clone())
    }
}

/// Requires a logged-in user
fn protected(route: MethodRouter<AppState>, state: &AppState) -> MethodRouter<AppState> {
    route.route_layer(middleware::from_fn_with_state(state.clone(), protect))
}

/// Requires a logged-in user holding one of `roles`
fn restricted(route: MethodRouter<AppState>, state: &AppState, roles: &'static [Role]) -> MethodRouter<AppState> {
    let route = route.route_layer(middleware::from_fn(move |request: Request, next: Next| {
        restrict_to(roles, request, next)
    }));
    protected(route, state)
}

fn tour_routes(state: &AppState) -> Router<AppState> {
    let upload_limit = DefaultBodyLimit::max(state.config.server.upload_limit_bytes);

    Router::new()
        .route("/", get(tours::list).merge(restricted(post(tours::create), state, STAFF)))
        .route("/top-5-cheap", get(tours::top_cheap))
        .route("/tour-stats", get(tours::stats))
        .route("/monthly-plan/:year", restricted(get(tours::monthly_plan), state, GUIDES))
        .route("/tours-within/:distance/center/:latlng/unit/:unit", get(tours::within))
        .route("/distances/:latlng/unit/:unit", get(tours::distances))
        .route(
            "/:id",
            get(tours::get)
                .merge(restricted(patch(tours::update).delete(tours::delete), state, STAFF))
                .layer(upload_limit),
        )
        .route(
            "/:id/reviews",
            protected(get(reviews::list_for_tour), state)
                .merge(restricted(post(reviews::create_for_tour), state, REVIEWERS)),
        )
}

fn user_routes(state: &AppState) -> Router<AppState> {
    let upload_limit = DefaultBodyLimit::max(state.config.server.upload_limit_bytes);

    Router::new()
        .route("/signup", post(users::signup))
        .route("/login", post(users::login))
        .route("/logout", get(users::logout))
        .route("/forgotPassword", post(users::forgot_password))
        .route("/resetPassword/:token", patch(users::reset_password))
        .route("/me", protected(get(users::me), state))
        .route("/updateMe", protected(patch(users::update_me), state).layer(upload_limit))
        .route("/updateMyPassword", protected(patch(users::update_password), state))
        .route("/deleteMe", protected(delete(users::delete_me), state))
        .route("/", restricted(get(users::list).post(users::create), state, ADMIN))
        .route(
            "/:id",
            restricted(get(users::get).patch(users::update).delete(users::delete), state, ADMIN),
        )
}

fn review_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            protected(get(reviews::list), state).merge(restricted(post(reviews::create), state, REVIEWERS)),
        )
        .route(
            "/:id",
            protected(get(reviews::get), state)
                .merge(restricted(patch(reviews::update).delete(reviews::delete), state, REVIEW_EDITORS)),
        )
}

fn booking_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/checkout-session/:tourId", protected(get(bookings::checkout_session), state))
        .route("/my-tours", protected(get(bookings::my_tours), state))
        .route("/", restricted(get(bookings::list).post(bookings::create), state, STAFF))
        .route(
            "/:id",
            restricted(get(bookings::get).patch(bookings::update).delete(bookings::delete), state, STAFF),
        )
}

pub fn router(state: AppState) -> Router {
    let config = state.config.clone();

    let mut api = Router::new()
        .nest("/api/v1/tours", tour_routes(&state))
        .nest("/api/v1/users", user_routes(&state))
        .nest("/api/v1/reviews", review_routes(&state))
        .nest("/api/v1/bookings", booking_routes(&state));
    if config.api.enable_rate_limiting {
        api = api.layer(middleware::from_fn_with_state(state.clone(), rate_limit));
    }

    let mut app = Router::new()
        .route("/health", get(health))
        .route(
            "/webhook-checkout",
            post(bookings::webhook).layer(DefaultBodyLimit::max(config.server.upload_limit_bytes)),
        )
        .merge(api)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.server.json_limit_bytes));

    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    if config.api.enable_response_compression {
        app = app.layer(CompressionLayer::new());
    }
    if config.security.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app.layer(middleware::from_fn(security_headers)).with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or_else(|| uri.path());
    ApiError::not_found(format!("Can't find {} on this server!", path))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "data": { "status": "degraded", "timestamp": now, "database": "unavailable" }
                })),
            )
        }
    }
}
