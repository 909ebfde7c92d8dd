//! # Policy Gateway - Core Library Crate
//!
//! An attribute-based access-control gateway for a medical-records platform. Every inbound
//! HTTP request or WebSocket handshake is checked against a declarative policy file before
//! it is proxied to the owning backend service.
//!
//! ## Request Flow
//!
//! 1. [`routing`] matches the path against the whitelist, then the enforcing policies
//! 2. [`auth`] verifies the bearer token and drives the decision
//! 3. [`enrichment`] adds ownership facts (pages, cards, chats, ...) about the subject
//! 4. [`policy`] evaluates the matched rules against subject, resource and action
//! 5. [`protocols`] forwards allowed traffic; [`gateway`] hosts it all in one axum app

/// Configuration, policy file, error type and shared data structures
pub mod core;

/// Rule engine: model definitions and the matcher expression language
pub mod policy;

/// Token verification and the access enforcer
pub mod auth;

/// Path and method matching against the policy list
pub mod routing;

/// Ownership lookups that extend the subject before rule evaluation
pub mod enrichment;

/// HTTP proxying and WebSocket tunnelling
pub mod protocols;

/// axum server, catch-all routes and the OpenAPI aggregate
pub mod gateway;

/// Structured logging, audit records and Prometheus metrics
pub mod observability;

pub use auth::{AccessEnforcer, AccessRequest, TokenVerifier};
pub use core::config::GatewayConfig;
pub use core::error::{GatewayError, GatewayResult};
pub use core::policies::PoliciesConfig;
pub use core::types::{Decision, StreamDecision};
pub use gateway::{build_router, GatewayServer, ServerState};
