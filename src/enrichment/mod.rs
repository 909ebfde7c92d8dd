//! # Subject Enrichment
//!
//! Ownership facts computed per request from the platform database and attached to the
//! subject before rules are evaluated.

pub mod enricher;
pub mod stores;

pub use enricher::{ContextEnricher, EnrichmentRule, Lookup, ENRICHMENT_TABLE};
pub use stores::{InMemoryOwnershipStore, OwnershipStore, PgOwnershipStore};
