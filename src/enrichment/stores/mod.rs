//! # Ownership Stores
//!
//! Read-only lookups answering "what does this user own or take part in?". The enricher
//! talks to a store only through [`OwnershipStore`], so the Postgres implementation can be
//! swapped for the in-memory one in tests.
//!
//! Identifiers are returned as strings, ready to be compared against path parameters.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryOwnershipStore;
pub use postgres::PgOwnershipStore;

use crate::core::error::GatewayResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Ownership facts needed by access rules
#[async_trait]
pub trait OwnershipStore: Send + Sync {
    /// Medical-card page ids authored by the doctor
    async fn medical_card_pages_of_doctor(&self, doctor_id: Uuid) -> GatewayResult<Vec<String>>;

    /// Health-diary page ids owned by the user
    async fn health_diary_pages_of_user(&self, user_id: Uuid) -> GatewayResult<Vec<String>>;

    /// Owner of a medical card. `None` when the card does not exist.
    async fn card_owner(&self, card_id: &str) -> GatewayResult<Option<String>>;

    /// Chat ids where the user is the doctor or the patient
    async fn chats_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>>;

    /// Message ids sent by the user
    async fn messages_sent_by(&self, user_id: Uuid) -> GatewayResult<Vec<String>>;

    /// Appointment record ids where the user is the doctor or the patient
    async fn records_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>>;

    /// Record linked to a meeting. `None` when the meeting does not exist.
    async fn meeting_record(&self, meeting_id: &str) -> GatewayResult<Option<String>>;

    /// Perform health check
    async fn health_check(&self) -> GatewayResult<bool>;
}
