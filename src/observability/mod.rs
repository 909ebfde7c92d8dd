//! # Observability
//!
//! Structured logging (with the access-decision audit record) and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, log_decision, DecisionRecord};
pub use self::metrics::install_exporter;
