//! # Configuration Module
//!
//! Process-level settings for the gateway: where to listen, how to verify tokens, where the
//! policy file and the ownership database live, and how long to wait on upstreams.
//!
//! ## Sources, in order of precedence
//! 1. Environment variables (`GATEWAY_<SECTION>_<FIELD>`, plus the short secrets
//!    `GATEWAY_JWT_SECRET` and `GATEWAY_DATABASE_URL`)
//! 2. A YAML file (path from `GATEWAY_CONFIG_PATH`)
//! 3. Built-in defaults
//!
//! Durations are written in humantime form (`5s`, `250ms`). The configuration is validated
//! once at startup and is read-only afterwards.

use crate::core::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main gateway configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// Token verification settings
    pub auth: AuthConfig,

    /// Location of the policy file
    pub policies_path: PathBuf,

    /// Ownership database used for enrichment lookups
    pub database: DatabaseConfig,

    /// Upstream and lookup timeouts
    pub timeouts: TimeoutConfig,

    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            policies_path: PathBuf::from("config/policies.yaml"),
            database: DatabaseConfig::default(),
            timeouts: TimeoutConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from an optional YAML file, apply environment overrides and validate
    pub async fn load(path: Option<&Path>) -> GatewayResult<Self> {
        match path {
            Some(path) => Self::load_from_file(path).await,
            None => {
                let mut config = Self::default();
                config.apply_env_overrides()?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a YAML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file: {}", e)))?;

        let mut config: GatewayConfig = serde_yaml::from_str(&content)
            .map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_HTTP_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source
    pub fn apply_overrides<F>(&mut self, lookup: F) -> GatewayResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> GatewayResult<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid {}: {}", key, e)))
        }

        fn duration(key: &str, value: &str) -> GatewayResult<Duration> {
            humantime::parse_duration(value).map_err(|e| GatewayError::config(format!("Invalid {}: {}", key, e)))
        }

        // Server configuration overrides
        if let Some(addr) = lookup("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Some(port) = lookup("GATEWAY_SERVER_HTTP_PORT") {
            self.server.http_port = parse("GATEWAY_SERVER_HTTP_PORT", &port)?;
        }
        if let Some(size) = lookup("GATEWAY_SERVER_MAX_JSON_BODY_SIZE") {
            self.server.max_json_body_size = parse("GATEWAY_SERVER_MAX_JSON_BODY_SIZE", &size)?;
        }

        // Secrets and locations
        if let Some(secret) = lookup("GATEWAY_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(audience) = lookup("GATEWAY_AUTH_AUDIENCE") {
            self.auth.audience = audience;
        }
        if let Some(path) = lookup("GATEWAY_POLICIES_PATH") {
            self.policies_path = PathBuf::from(path);
        }
        if let Some(url) = lookup("GATEWAY_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(size) = lookup("GATEWAY_DATABASE_POOL_SIZE") {
            self.database.pool_size = parse("GATEWAY_DATABASE_POOL_SIZE", &size)?;
        }

        // Timeout overrides
        if let Some(timeout) = lookup("GATEWAY_TIMEOUTS_UPSTREAM_CONNECT") {
            self.timeouts.upstream_connect = duration("GATEWAY_TIMEOUTS_UPSTREAM_CONNECT", &timeout)?;
        }
        if let Some(timeout) = lookup("GATEWAY_TIMEOUTS_UPSTREAM_REQUEST") {
            self.timeouts.upstream_request = duration("GATEWAY_TIMEOUTS_UPSTREAM_REQUEST", &timeout)?;
        }
        if let Some(timeout) = lookup("GATEWAY_TIMEOUTS_ENRICHMENT") {
            self.timeouts.enrichment = duration("GATEWAY_TIMEOUTS_ENRICHMENT", &timeout)?;
        }

        // Logging configuration overrides
        if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
            self.observability.logging.level = level;
        }
        if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
            self.observability.logging.format = format;
        }

        // Metrics configuration overrides
        if let Some(enabled) = lookup("GATEWAY_METRICS_ENABLED") {
            self.observability.metrics.enabled = parse("GATEWAY_METRICS_ENABLED", &enabled)?;
        }
        if let Some(addr) = lookup("GATEWAY_METRICS_LISTEN_ADDRESS") {
            self.observability.metrics.listen_address = parse("GATEWAY_METRICS_LISTEN_ADDRESS", &addr)?;
        }

        Ok(())
    }

    /// Configuration validation with all problems reported at once
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }
        if self.server.max_json_body_size == 0 {
            errors.push("max_json_body_size must be greater than 0".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            errors.push("JWT secret cannot be empty (set GATEWAY_JWT_SECRET)".to_string());
        }
        if self.auth.audience.is_empty() {
            errors.push("JWT audience cannot be empty".to_string());
        }

        if self.policies_path.as_os_str().is_empty() {
            errors.push("policies_path cannot be empty".to_string());
        }

        if self.database.url.is_empty() {
            errors.push("database url cannot be empty (set GATEWAY_DATABASE_URL)".to_string());
        }
        if self.database.pool_size == 0 {
            errors.push("database pool_size must be greater than 0".to_string());
        }

        for (name, value) in [
            ("upstream_connect", self.timeouts.upstream_connect),
            ("upstream_request", self.timeouts.upstream_request),
            ("enrichment", self.timeouts.enrichment),
            ("database connect_timeout", self.database.connect_timeout),
        ] {
            if value.is_zero() {
                errors.push(format!("{} timeout must be greater than 0", name));
            }
        }

        match self.observability.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.observability.logging.level)),
        }

        match self.observability.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.observability.logging.format)),
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }

    /// Socket address of the public listener
    pub fn listen_address(&self) -> GatewayResult<SocketAddr> {
        format!("{}:{}", self.server.bind_address, self.server.http_port)
            .parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub http_port: u16,

    /// Largest JSON body buffered for rule evaluation
    pub max_json_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            http_port: 8080,
            max_json_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Token verification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret shared with the user service
    pub jwt_secret: String,

    /// Required `aud` claim
    pub audience: String,

    /// Clock skew tolerated on `exp`/`nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            audience: "fastapi-users:auth".to_string(),
            leeway: Duration::from_secs(0),
        }
    }
}

/// Ownership database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL
    pub url: String,

    /// Maximum pooled connections
    pub pool_size: u32,

    /// Time to wait for a pooled connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection timeout (HTTP and WebSocket)
    #[serde(with = "humantime_serde")]
    pub upstream_connect: Duration,

    /// Time until upstream response headers arrive
    #[serde(with = "humantime_serde")]
    pub upstream_request: Duration,

    /// Per-lookup enrichment timeout
    #[serde(with = "humantime_serde")]
    pub enrichment: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_connect: Duration::from_secs(5),
            upstream_request: Duration::from_secs(30),
            enrichment: Duration::from_secs(3),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    pub enabled: bool,

    /// Address the exporter listens on
    pub listen_address: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_address: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}
