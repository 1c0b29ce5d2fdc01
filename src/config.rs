use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration for the mailroom service.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub tracking: TrackingConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Access token lifetime in minutes
    #[serde(default = "default_token_ttl")]
    pub token_ttl_minutes: i64,
}

/// Settings for open-tracking beacon construction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackingConfig {
    /// Public base URL of this service, used to build beacon URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

/// Settings for the outbound dispatch pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Total attempts per send, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts, in seconds. Deliberately flat rather
    /// than exponential: this is a low-volume transactional path.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Upper bound on a single provider call, in seconds
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            tracking: TrackingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            token_ttl_minutes: default_token_ttl(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay(),
            provider_timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/mailroom".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_jwt_secret() -> String {
    "change-this-to-a-secure-random-key-in-production".to_string()
}

fn default_token_ttl() -> i64 {
    30
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    30
}

fn default_provider_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

impl DispatchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database.url = url.into();
        self
    }

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.jwt_secret = secret.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.tracking.base_url = url.into();
        self
    }

    pub fn with_retry_delay(mut self, secs: u64) -> Self {
        self.config.dispatch.retry_delay_secs = secs;
        self
    }

    /// Overlay `MAILROOM_*` environment variables onto the current values.
    pub fn from_env(mut self) -> Self {
        if let Some(host) = env_var("MAILROOM_HOST") {
            self.config.server.host = host;
        }
        if let Some(port) = env_var("MAILROOM_PORT").and_then(|v| v.parse().ok()) {
            self.config.server.port = port;
        }
        if let Some(level) = env_var("MAILROOM_LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = env_var("MAILROOM_LOG_JSON") {
            self.config.logging.json = json == "true" || json == "1";
        }
        if let Some(url) = env_var("MAILROOM_DATABASE_URL").or_else(|| env_var("DATABASE_URL")) {
            self.config.database.url = url;
        }
        if let Some(n) = env_var("MAILROOM_DB_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.config.database.max_connections = n;
        }
        if let Some(secret) = env_var("MAILROOM_JWT_SECRET") {
            self.config.auth.jwt_secret = secret;
        }
        if let Some(ttl) = env_var("MAILROOM_TOKEN_TTL_MINUTES").and_then(|v| v.parse().ok()) {
            self.config.auth.token_ttl_minutes = ttl;
        }
        if let Some(url) = env_var("MAILROOM_BASE_URL") {
            self.config.tracking.base_url = url;
        }
        if let Some(n) = env_var("MAILROOM_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.config.dispatch.max_attempts = n;
        }
        if let Some(n) = env_var("MAILROOM_RETRY_DELAY_SECS").and_then(|v| v.parse().ok()) {
            self.config.dispatch.retry_delay_secs = n;
        }
        if let Some(n) = env_var("MAILROOM_PROVIDER_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.config.dispatch.provider_timeout_secs = n;
        }
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
