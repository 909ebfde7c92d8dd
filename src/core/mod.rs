pub mod config;
pub mod error;
pub mod policies;
pub mod types;
