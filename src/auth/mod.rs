//! # Authentication and Access Enforcement
//!
//! - [`token`] verifies HS256 access tokens
//! - [`enforcer`] runs the full allow/deny decision for HTTP and WebSocket requests

pub mod enforcer;
pub mod token;

pub use enforcer::{AccessEnforcer, AccessRequest, DenyReason, Outcome};
pub use token::TokenVerifier;
