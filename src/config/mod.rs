use once_cell::sync::Lazy;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub payments: PaymentsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub json_limit_bytes: usize,
    pub upload_limit_bytes: usize,
    /// Root under which resized images are written (`img/users`, `img/tours`)
    pub upload_dir: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: usize,
    pub rate_limit_window_secs: u64,
    /// Key the limiter on `X-Forwarded-For`/`X-Real-IP` instead of the peer
    pub trust_proxy: bool,
    pub enable_request_logging: bool,
    pub enable_response_compression: bool,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub jwt_secret: String,
    pub jwt_expires_in_secs: i64,
    pub jwt_cookie_expires_days: i64,
    pub secure_cookies: bool,
}

#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub api_base: String,
    pub currency: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")).as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            _ => Environment::Development,
        };

        match environment {
            Environment::Production => Self::production(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("PORT") {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }
        if let Ok(v) = env::var("UPLOAD_DIR") {
            self.server.upload_dir = v;
        }
        if let Ok(v) = env::var("UPLOAD_LIMIT_BYTES") {
            self.server.upload_limit_bytes = v.parse().unwrap_or(self.server.upload_limit_bytes);
        }

        // Database overrides
        if let Some(url) = resolve_database_url(
            env::var("DATABASE").ok(),
            env::var("DATABASE_PASSWORD").ok(),
            env::var("DATABASE_URL").ok(),
        ) {
            self.database.url = url;
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_REQUESTS") {
            self.api.rate_limit_requests = v.parse().unwrap_or(self.api.rate_limit_requests);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_WINDOW_SECS") {
            self.api.rate_limit_window_secs = v.parse().unwrap_or(self.api.rate_limit_window_secs);
        }
        if let Ok(v) = env::var("API_TRUST_PROXY") {
            self.api.trust_proxy = v.parse().unwrap_or(self.api.trust_proxy);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_ENABLE_RESPONSE_COMPRESSION") {
            self.api.enable_response_compression = v.parse().unwrap_or(self.api.enable_response_compression);
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_EXPIRES_IN") {
            self.security.jwt_expires_in_secs = parse_duration_secs(&v).unwrap_or(self.security.jwt_expires_in_secs);
        }
        if let Ok(v) = env::var("JWT_COOKIE_EXPIRES_IN") {
            self.security.jwt_cookie_expires_days = v.parse().unwrap_or(self.security.jwt_cookie_expires_days);
        }

        // Payment provider overrides
        if let Ok(v) = env::var("STRIPE_SECRET_KEY") {
            self.payments.stripe_secret_key = v;
        }
        if let Ok(v) = env::var("STRIPE_WEBHOOK_SECRET") {
            self.payments.stripe_webhook_secret = v;
        }
        if let Ok(v) = env::var("STRIPE_API_BASE") {
            self.payments.api_base = v.trim_end_matches('/').to_string();
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                port: 3000,
                json_limit_bytes: 10 * 1024, // 10kb
                upload_limit_bytes: 10 * 1024 * 1024, // 10MB
                upload_dir: "public".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost:5432/tourbook".to_string(),
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                enable_rate_limiting: true,
                rate_limit_requests: 100,
                rate_limit_window_secs: 60 * 60,
                trust_proxy: false,
                enable_request_logging: true,
                enable_response_compression: true,
            },
            security: SecurityConfig {
                enable_cors: true,
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_expires_in_secs: 90 * 24 * 60 * 60, // 90 days
                jwt_cookie_expires_days: 90,
                secure_cookies: false,
            },
            payments: PaymentsConfig {
                stripe_secret_key: String::new(),
                stripe_webhook_secret: String::new(),
                api_base: "https://api.stripe.com".to_string(),
                currency: "usd".to_string(),
            },
        }
    }

    pub fn production() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Production;
        config.database.max_connections = 50;
        config.database.connection_timeout = 5;
        config.api.enable_request_logging = false;
        // The production secret must come from JWT_SECRET
        config.security.jwt_secret = String::new();
        config.security.secure_cookies = true;
        config
    }
}

/// `DATABASE` may carry a `<PASSWORD>` placeholder filled from
/// `DATABASE_PASSWORD`; `DATABASE_URL` is used verbatim when `DATABASE` is unset.
pub fn resolve_database_url(
    template: Option<String>,
    password: Option<String>,
    fallback: Option<String>,
) -> Option<String> {
    match template {
        Some(template) => Some(template.replace("<PASSWORD>", password.as_deref().unwrap_or(""))),
        None => fallback,
    }
}

/// Parses `90d`, `12h`, `30m`, `45s` or a bare number of seconds.
pub fn parse_duration_secs(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.chars().last()? {
        'd' => (&value[..value.len() - 1], 24 * 60 * 60),
        'h' => (&value[..value.len() - 1], 60 * 60),
        'm' => (&value[..value.len() - 1], 60),
        's' => (&value[..value.len() - 1], 1),
        _ => (value, 1),
    };
    digits.trim().parse::<i64>().ok().filter(|n| *n > 0).map(|n| n * multiplier)
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
