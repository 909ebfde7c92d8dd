//! # Error Handling Module
//!
//! Every fallible operation in the gateway returns [`GatewayResult`]. Errors are plain
//! data: they carry enough context for the logs, while the HTTP rendering in
//! [`IntoResponse`] only ever exposes a generic, non-descriptive message to callers.
//!
//! ## Error Categories
//! - **Startup errors** (`Configuration`, `Yaml`, `Io`): fatal, the process refuses to serve.
//! - **Denials** (`AccessDenied`): rendered as `404 Content not found` with type `not_found`,
//!   so a denied resource is indistinguishable from a missing one.
//! - **Enrichment failures**: the ownership store could not answer. Treated as a deny with an
//!   error (`503`), never as "proceed with empty attributes".
//! - **Upstream failures** (`UpstreamUnavailable`, `UpstreamTimeout`): surfaced as `502`/`504`.
//!   Nothing is retried automatically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Message returned to callers for every denial.
pub const DENIED_MESSAGE: &str = "Content not found";

/// Error types for the access-control gateway
///
/// The `#[error("...")]` strings are meant for logs. Clients see [`GatewayError::public_message`].
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Invalid or missing configuration (gateway settings or policy file)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The request was evaluated and denied
    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    /// An ownership lookup failed or timed out
    #[error("Enrichment lookup '{lookup}' failed: {reason}")]
    Enrichment { lookup: String, reason: String },

    /// Upstream service is unavailable or unreachable
    #[error("Service unavailable: {service} - {reason}")]
    UpstreamUnavailable { service: String, reason: String },

    /// Upstream did not answer in time
    #[error("Upstream timeout after {timeout_ms}ms")]
    UpstreamTimeout { timeout_ms: u64 },

    /// Protocol-specific errors (bad upgrade, broken WebSocket frames, etc.)
    #[error("Protocol error ({protocol}): {message}")]
    Protocol { protocol: String, message: String },

    /// JSON request body larger than the configured buffering limit
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (file operations, socket binding, etc.)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// HTTP client errors when talking to upstream services
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Ownership database errors
    #[error("Database error: {message}")]
    Database { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an access-denied error with a custom reason
    pub fn denied<S: Into<String>>(reason: S) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create an enrichment error for a named lookup
    pub fn enrichment<L: Into<String>, R: Into<String>>(lookup: L, reason: R) -> Self {
        Self::Enrichment {
            lookup: lookup.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream unavailable error
    pub fn upstream_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::UpstreamUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol<P: Into<String>, M: Into<String>>(protocol: P, message: M) -> Self {
        Self::Protocol {
            protocol: protocol.into(),
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied { .. } => StatusCode::NOT_FOUND,
            Self::Enrichment { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::HttpClient { .. } => StatusCode::BAD_GATEWAY,
            Self::Protocol { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Json { .. } => StatusCode::BAD_REQUEST,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to the client
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => DENIED_MESSAGE,
            Self::Enrichment { .. } => "Service temporarily unavailable",
            Self::UpstreamUnavailable { .. } | Self::HttpClient { .. } => "Upstream service unavailable",
            Self::UpstreamTimeout { .. } => "Upstream service timed out",
            Self::Protocol { .. } | Self::Json { .. } => "Bad request",
            Self::PayloadTooLarge { .. } => "Payload too large",
            _ => "Internal server error",
        }
    }

    /// Error type sent to the client. Denials pose as a missing resource.
    pub fn public_type(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "not_found",
            other => other.error_type(),
        }
    }

    /// Get a string representation of the error type for logs and metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::AccessDenied { .. } => "access_denied",
            Self::Enrichment { .. } => "enrichment_error",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::Protocol { .. } => "protocol_error",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Database { .. } => "database_error",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

impl From<sqlx_core::Error> for GatewayError {
    fn from(err: sqlx_core::Error) -> Self {
        Self::Database {
            message: err.to_string(),
        }
    }
}

impl From<regex::Error> for GatewayError {
    fn from(err: regex::Error) -> Self {
        Self::Configuration {
            message: format!("invalid regular expression: {err}"),
        }
    }
}

/// Render errors as `{"error": {"code": .., "message": .., "type": ..}}` with the public message and type.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.public_message(),
                "type": self.public_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
