use serde::Deserialize;
use shared::jwt::{JwtConfig, JwtError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub jwt: JwtAuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub frontend: FrontendConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// RSA private key in PEM format for signing tokens
    #[serde(default)]
    pub private_key: String,

    /// RSA public key in PEM format for verifying tokens
    #[serde(default)]
    pub public_key: String,

    /// HS256 shared secret, used when no RSA key pair is configured
    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    #[serde(default = "default_refresh_token_expiry")]
    pub refresh_token_expiry_secs: i64,

    /// Clock skew tolerance
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

impl JwtAuthConfig {
    /// Builds the signing configuration, preferring the RSA key pair.
    pub fn build(&self) -> Result<JwtConfig, JwtError> {
        if !self.private_key.is_empty() && !self.public_key.is_empty() {
            JwtConfig::from_rsa_pem(
                &self.private_key,
                &self.public_key,
                self.access_token_expiry_secs,
                self.refresh_token_expiry_secs,
                self.leeway_secs,
            )
        } else {
            JwtConfig::from_secret(
                &self.secret,
                self.access_token_expiry_secs,
                self.refresh_token_expiry_secs,
                self.leeway_secs,
            )
        }
    }
}

/// Pin store tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Upper bound on a single pin write or delete
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Events queued per subscriber before it is considered slow
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,

    /// Changes retained per project for lagging subscribers
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// SSE keep-alive interval
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl StoreConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: default_write_timeout_ms(),
            subscription_buffer: default_subscription_buffer(),
            feed_capacity: default_feed_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrontendConfig {
    /// Directory holding the built single-page app (`index.html` and assets)
    #[serde(default = "default_frontend_dir")]
    pub base_dir: PathBuf,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            base_dir: default_frontend_dir(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    2
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_access_token_expiry() -> i64 {
    3600
}
fn default_refresh_token_expiry() -> i64 {
    2_592_000
}
fn default_jwt_leeway() -> u64 {
    30
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_subscription_buffer() -> usize {
    64
}
fn default_feed_capacity() -> usize {
    256
}
fn default_keep_alive_secs() -> u64 {
    15
}
fn default_frontend_dir() -> PathBuf {
    PathBuf::from("frontend/dist")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml
    /// 2. config/local.toml (optional, not in git)
    /// 3. Environment variables with GM__ prefix, e.g. `GM__DATABASE__URL`
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("GM").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Configuration built from embedded defaults plus `overrides`, without
    /// touching the file system. Not validated.
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "127.0.0.1"
            port = 8080
            request_timeout_secs = 30

            [database]
            url = ""
            max_connections = 5
            min_connections = 0
            connect_timeout_secs = 2
            idle_timeout_secs = 60

            [logging]
            level = "info"
            format = "pretty"

            [security]
            cors_origins = []

            [jwt]
            secret = "test-secret-at-least-16-bytes"
            access_token_expiry_secs = 900
            refresh_token_expiry_secs = 86400
            leeway_secs = 0

            [store]
            write_timeout_ms = 2000
            subscription_buffer = 16
            feed_capacity = 64
            keep_alive_secs = 15

            [frontend]
            base_dir = "frontend/dist"
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "GM__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.store.subscription_buffer == 0 || self.store.feed_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "store.subscription_buffer and store.feed_capacity must be positive".to_string(),
            ));
        }

        if self.store.write_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "store.write_timeout_ms must be positive".to_string(),
            ));
        }

        if let Err(e) = self.jwt.build() {
            return Err(ConfigValidationError::InvalidValue(format!(
                "jwt: {} (set GM__JWT__PRIVATE_KEY/PUBLIC_KEY or GM__JWT__SECRET)",
                e
            )));
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigValidationError::InvalidValue(format!(
                    "Invalid listen address {}:{}",
                    self.server.host, self.server.port
                ))
            })
    }
}
