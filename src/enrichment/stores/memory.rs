//! In-memory ownership store.
//!
//! Holds a fixed snapshot of ownership facts. Used by tests and by local runs without a
//! database. Built with chained `with_*` calls:
//!
//! ```
//! use policy_gateway::enrichment::InMemoryOwnershipStore;
//! use uuid::Uuid;
//!
//! let doctor = Uuid::new_v4();
//! let store = InMemoryOwnershipStore::new()
//!     .with_medical_card_page(doctor, "17")
//!     .with_chat(doctor, "4");
//! ```

use super::OwnershipStore;
use crate::core::error::GatewayResult;
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct InMemoryOwnershipStore {
    medical_card_pages: HashMap<Uuid, Vec<String>>,
    health_diary_pages: HashMap<Uuid, Vec<String>>,
    card_owners: HashMap<String, String>,
    chats: HashMap<Uuid, Vec<String>>,
    messages: HashMap<Uuid, Vec<String>>,
    records: HashMap<Uuid, Vec<String>>,
    meetings: HashMap<String, String>,
}

impl InMemoryOwnershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_medical_card_page(mut self, doctor_id: Uuid, page_id: impl Into<String>) -> Self {
        self.medical_card_pages.entry(doctor_id).or_default().push(page_id.into());
        self
    }

    pub fn with_health_diary_page(mut self, user_id: Uuid, page_id: impl Into<String>) -> Self {
        self.health_diary_pages.entry(user_id).or_default().push(page_id.into());
        self
    }

    pub fn with_card(mut self, card_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        self.card_owners.insert(card_id.into(), owner_id.into());
        self
    }

    /// Register `user_id` as a participant (doctor or patient) of the chat
    pub fn with_chat(mut self, user_id: Uuid, chat_id: impl Into<String>) -> Self {
        self.chats.entry(user_id).or_default().push(chat_id.into());
        self
    }

    pub fn with_message(mut self, sender_id: Uuid, message_id: impl Into<String>) -> Self {
        self.messages.entry(sender_id).or_default().push(message_id.into());
        self
    }

    /// Register `user_id` as a participant (doctor or patient) of the record
    pub fn with_record(mut self, user_id: Uuid, record_id: impl Into<String>) -> Self {
        self.records.entry(user_id).or_default().push(record_id.into());
        self
    }

    pub fn with_meeting(mut self, meeting_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        self.meetings.insert(meeting_id.into(), record_id.into());
        self
    }

    fn ids(map: &HashMap<Uuid, Vec<String>>, user_id: Uuid) -> Vec<String> {
        map.get(&user_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl OwnershipStore for InMemoryOwnershipStore {
    async fn medical_card_pages_of_doctor(&self, doctor_id: Uuid) -> GatewayResult<Vec<String>> {
        Ok(Self::ids(&self.medical_card_pages, doctor_id))
    }

    async fn health_diary_pages_of_user(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        Ok(Self::ids(&self.health_diary_pages, user_id))
    }

    async fn card_owner(&self, card_id: &str) -> GatewayResult<Option<String>> {
        Ok(self.card_owners.get(card_id).cloned())
    }

    async fn chats_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        Ok(Self::ids(&self.chats, user_id))
    }

    async fn messages_sent_by(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        Ok(Self::ids(&self.messages, user_id))
    }

    async fn records_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        Ok(Self::ids(&self.records, user_id))
    }

    async fn meeting_record(&self, meeting_id: &str) -> GatewayResult<Option<String>> {
        Ok(self.meetings.get(meeting_id).cloned())
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        Ok(true)
    }
}
