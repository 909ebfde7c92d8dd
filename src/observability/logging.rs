//! # Structured Logging
//!
//! Subscriber setup and the access-decision audit record.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured level applied to
//! this crate and `tower_http`. Output is JSON by default, `text` for local runs.
//!
//! Every enforcement outcome is written once to the `policy_gateway::audit` target with the
//! subject, method, path, outcome and resolved service. Tokens and query strings are never
//! logged.

use crate::core::config::LoggingConfig;
use crate::core::error::{GatewayError, GatewayResult};
use axum::http::Method;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;
use uuid::Uuid;

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingConfig) -> GatewayResult<()> {
    let level = config.level.to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("policy_gateway={level},tower_http={level}")));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format.to_lowercase().as_str() {
        "text" => registry.with(fmt::layer().with_target(true)).try_init(),
        _ => registry
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
    };

    result.map_err(|e| GatewayError::config(format!("Failed to initialize logging: {}", e)))
}

/// One enforcement outcome, as written to the audit log
#[derive(Debug, Clone)]
pub struct DecisionRecord<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub subject: Option<Uuid>,
    pub outcome: &'a str,
    pub service: Option<&'a Url>,
}

pub fn log_decision(record: &DecisionRecord<'_>) {
    info!(
        target: "policy_gateway::audit",
        method = %record.method,
        path = record.path,
        subject = ?record.subject,
        outcome = record.outcome,
        service = record.service.map(Url::as_str),
        "Access decision"
    );
}
