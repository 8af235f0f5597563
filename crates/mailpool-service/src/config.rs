//! Service configuration.

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string.
    pub database_url: String,

    /// HS256 secret for issuing and validating user JWTs.
    pub jwt_secret: String,

    /// How long issued tokens stay valid, in days.
    pub jwt_ttl_days: i64,

    /// Admin API key for inventory import.
    pub admin_api_key: Option<String>,

    /// Shared secret for payment-callback signatures. When unset, callbacks
    /// are accepted unsigned (development only).
    pub payment_callback_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/mailpool".into()),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".into()),
            jwt_ttl_days: std::env::var("JWT_TTL_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            payment_callback_secret: std::env::var("PAYMENT_CALLBACK_SECRET").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: "postgres://localhost/mailpool".into(),
            jwt_secret: "dev-secret".into(),
            jwt_ttl_days: 7,
            admin_api_key: None,
            payment_callback_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
