// handlers/mod.rs - route handlers, one module per resource
//
// factory holds the generic CRUD bodies; the resource modules add the
// extractors, defaults and custom endpoints around them.

pub mod bookings;
pub mod factory;
pub mod reviews;
pub mod tours;
pub mod users;

use axum::http::{header, HeaderMap};

/// `<proto>://<host>` of the incoming request, for links in mail and checkout
pub fn origin(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or("http");
    format!("{}://{}", proto, host)
}
