pub mod auth;
pub mod rate_limit;
pub mod response;
pub mod security;

pub use auth::{protect, restrict_to, AuthUser};
pub use rate_limit::{rate_limit, RateLimiter};
pub use response::{documents, ApiResponse, ApiResult};
pub use security::security_headers;
