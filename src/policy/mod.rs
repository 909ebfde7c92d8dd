//! # Policy Rule Engine
//!
//! A small interpreter for request/policy/matcher model definitions:
//!
//! - [`model`] parses the model sections
//! - [`expr`] implements the matcher expression language
//! - [`engine`] compiles the model plus the enforcing policies into a [`RuleEngine`]

pub mod engine;
pub mod expr;
pub mod model;

pub use engine::RuleEngine;
pub use model::{Effect, ModelDefinition};
