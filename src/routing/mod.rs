//! # Resource Routing
//!
//! Maps a request path and method onto the policy list: whitelist scan, enforcing scan with
//! parameter extraction, and service resolution for allowed requests.

pub mod matcher;

pub use matcher::{CompiledPolicy, ResourceMatch, ResourceMatcher};
