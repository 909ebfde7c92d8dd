//! # Context Enricher
//!
//! Adds ownership facts to an authenticated subject before rule evaluation. Which facts are
//! fetched depends on which path parameters the matched policy extracted, as listed in
//! [`ENRICHMENT_TABLE`]:
//!
//! | trigger param   | lookup                    | target attribute                  |
//! |-----------------|---------------------------|-----------------------------------|
//! | `page_id`       | doctor's medical-card pages | `available_pages_of_medical_card` |
//! | `card_id`       | card owner                | `card_owner_id`                   |
//! | `page_diary_id` | user's health-diary pages | `available_pages_of_health_diary` |
//! | `chat_id`       | chats with the user       | `available_chats`                 |
//! | `message_id`    | messages sent by the user | `available_messages`              |
//! | `meeting_id`    | records with the user     | `available_records`               |
//! | `meeting_id`    | meeting's record          | `record_id`                       |
//!
//! Triggered lookups run concurrently, each bounded by the configured timeout. Any failure
//! fails the whole enrichment: a subject is never evaluated with silently missing facts.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{AttributeValue, EnrichedSubject, ResourceContext, SubjectAttribute, SubjectClaims};
use crate::enrichment::stores::OwnershipStore;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

/// Ownership queries the enricher can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    DoctorMedicalCardPages,
    CardOwner,
    UserHealthDiaryPages,
    ParticipantChats,
    SentMessages,
    ParticipantRecords,
    MeetingRecord,
}

impl Lookup {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DoctorMedicalCardPages => "doctor_medical_card_pages",
            Self::CardOwner => "card_owner",
            Self::UserHealthDiaryPages => "user_health_diary_pages",
            Self::ParticipantChats => "participant_chats",
            Self::SentMessages => "sent_messages",
            Self::ParticipantRecords => "participant_records",
            Self::MeetingRecord => "meeting_record",
        }
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the enrichment table
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentRule {
    pub trigger_param: &'static str,
    pub lookup: Lookup,
    pub target: SubjectAttribute,
}

pub const ENRICHMENT_TABLE: &[EnrichmentRule] = &[
    EnrichmentRule {
        trigger_param: "page_id",
        lookup: Lookup::DoctorMedicalCardPages,
        target: SubjectAttribute::AvailablePagesOfMedicalCard,
    },
    EnrichmentRule {
        trigger_param: "card_id",
        lookup: Lookup::CardOwner,
        target: SubjectAttribute::CardOwnerId,
    },
    EnrichmentRule {
        trigger_param: "page_diary_id",
        lookup: Lookup::UserHealthDiaryPages,
        target: SubjectAttribute::AvailablePagesOfHealthDiary,
    },
    EnrichmentRule {
        trigger_param: "chat_id",
        lookup: Lookup::ParticipantChats,
        target: SubjectAttribute::AvailableChats,
    },
    EnrichmentRule {
        trigger_param: "message_id",
        lookup: Lookup::SentMessages,
        target: SubjectAttribute::AvailableMessages,
    },
    EnrichmentRule {
        trigger_param: "meeting_id",
        lookup: Lookup::ParticipantRecords,
        target: SubjectAttribute::AvailableRecords,
    },
    EnrichmentRule {
        trigger_param: "meeting_id",
        lookup: Lookup::MeetingRecord,
        target: SubjectAttribute::RecordId,
    },
];

/// Table-driven subject enrichment
#[derive(Clone)]
pub struct ContextEnricher {
    store: Arc<dyn OwnershipStore>,
    lookup_timeout: Duration,
}

impl ContextEnricher {
    pub fn new(store: Arc<dyn OwnershipStore>, lookup_timeout: Duration) -> Self {
        Self { store, lookup_timeout }
    }

    pub fn store(&self) -> &Arc<dyn OwnershipStore> {
        &self.store
    }

    /// Build the enriched subject for `claims` acting on `context`.
    ///
    /// All five collections are present in the result even when nothing triggered.
    pub async fn enrich(&self, claims: SubjectClaims, context: &ResourceContext) -> GatewayResult<EnrichedSubject> {
        let user_id = claims.sub;
        let triggered: Vec<(&EnrichmentRule, &str)> = ENRICHMENT_TABLE
            .iter()
            .filter_map(|rule| {
                context
                    .params
                    .get(rule.trigger_param)
                    .filter(|value| !value.is_empty())
                    .map(|value| (rule, value.as_str()))
            })
            .collect();

        let values = try_join_all(triggered.iter().map(|(rule, param)| self.run(rule.lookup, user_id, param))).await?;

        let mut subject = EnrichedSubject::new(claims);
        for ((rule, _), value) in triggered.iter().zip(values) {
            subject.apply(rule.target, value);
        }

        debug!(
            %user_id,
            lookups = triggered.len(),
            "Subject enriched"
        );
        Ok(subject)
    }

    async fn run(&self, lookup: Lookup, user_id: Uuid, param: &str) -> GatewayResult<AttributeValue> {
        let store = self.store.as_ref();
        let query = async {
            match lookup {
                Lookup::DoctorMedicalCardPages => store.medical_card_pages_of_doctor(user_id).await.map(AttributeValue::Set),
                Lookup::CardOwner => store.card_owner(param).await.map(AttributeValue::Scalar),
                Lookup::UserHealthDiaryPages => store.health_diary_pages_of_user(user_id).await.map(AttributeValue::Set),
                Lookup::ParticipantChats => store.chats_of_participant(user_id).await.map(AttributeValue::Set),
                Lookup::SentMessages => store.messages_sent_by(user_id).await.map(AttributeValue::Set),
                Lookup::ParticipantRecords => store.records_of_participant(user_id).await.map(AttributeValue::Set),
                Lookup::MeetingRecord => store.meeting_record(param).await.map(AttributeValue::Scalar),
            }
        };

        match tokio::time::timeout(self.lookup_timeout, query).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(lookup = %lookup, error = %e, "Ownership lookup failed");
                Err(GatewayError::enrichment(lookup.name(), e.to_string()))
            }
            Err(_) => {
                error!(lookup = %lookup, timeout_ms = self.lookup_timeout.as_millis() as u64, "Ownership lookup timed out");
                Err(GatewayError::enrichment(lookup.name(), "timed out"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::stores::InMemoryOwnershipStore;
    use async_trait::async_trait;
    use serde_json::Map;

    fn claims(sub: Uuid) -> SubjectClaims {
        SubjectClaims {
            sub,
            group_id: 2,
            aud: None,
            extra: Map::new(),
        }
    }

    fn context(params: &[(&str, &str)]) -> ResourceContext {
        let mut context = ResourceContext::new("/resource");
        for (k, v) in params {
            context.params.insert(k.to_string(), v.to_string());
        }
        context
    }

    fn enricher(store: InMemoryOwnershipStore) -> ContextEnricher {
        ContextEnricher::new(Arc::new(store), Duration::from_secs(1))
    }

    struct BrokenStore;

    #[async_trait]
    impl OwnershipStore for BrokenStore {
        async fn medical_card_pages_of_doctor(&self, _: Uuid) -> GatewayResult<Vec<String>> {
            Err(GatewayError::Database { message: "connection refused".into() })
        }
        async fn health_diary_pages_of_user(&self, _: Uuid) -> GatewayResult<Vec<String>> {
            Ok(vec![])
        }
        async fn card_owner(&self, _: &str) -> GatewayResult<Option<String>> {
            Ok(None)
        }
        async fn chats_of_participant(&self, _: Uuid) -> GatewayResult<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
        async fn messages_sent_by(&self, _: Uuid) -> GatewayResult<Vec<String>> {
            Ok(vec![])
        }
        async fn records_of_participant(&self, _: Uuid) -> GatewayResult<Vec<String>> {
            Ok(vec![])
        }
        async fn meeting_record(&self, _: &str) -> GatewayResult<Option<String>> {
            Ok(None)
        }
        async fn health_check(&self) -> GatewayResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_no_params_no_lookups() {
        let user = Uuid::new_v4();
        let store = InMemoryOwnershipStore::new().with_chat(user, "4");
        let subject = enricher(store).enrich(claims(user), &context(&[])).await.unwrap();
        assert!(subject.available_chats.is_empty());
        assert!(subject.available_pages_of_medical_card.is_empty());
        assert_eq!(subject.card_owner_id, None);
    }

    #[tokio::test]
    async fn test_page_id_triggers_doctor_pages() {
        let doctor = Uuid::new_v4();
        let store = InMemoryOwnershipStore::new()
            .with_medical_card_page(doctor, "7")
            .with_chat(doctor, "4");
        let subject = enricher(store)
            .enrich(claims(doctor), &context(&[("page_id", "7")]))
            .await
            .unwrap();
        assert_eq!(subject.available_pages_of_medical_card, vec!["7"]);
        // only the triggered lookup ran
        assert!(subject.available_chats.is_empty());
    }

    #[tokio::test]
    async fn test_meeting_id_triggers_two_lookups() {
        let user = Uuid::new_v4();
        let store = InMemoryOwnershipStore::new()
            .with_record(user, "5")
            .with_meeting("31", "5");
        let subject = enricher(store)
            .enrich(claims(user), &context(&[("meeting_id", "31")]))
            .await
            .unwrap();
        assert_eq!(subject.available_records, vec!["5"]);
        assert_eq!(subject.record_id.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_unknown_card_leaves_owner_unset() {
        let user = Uuid::new_v4();
        let subject = enricher(InMemoryOwnershipStore::new())
            .enrich(claims(user), &context(&[("card_id", "404")]))
            .await
            .unwrap();
        assert_eq!(subject.card_owner_id, None);
    }

    #[tokio::test]
    async fn test_empty_param_does_not_trigger() {
        let subject = ContextEnricher::new(Arc::new(BrokenStore), Duration::from_secs(1))
            .enrich(claims(Uuid::new_v4()), &context(&[("page_id", "")]))
            .await
            .unwrap();
        assert!(subject.available_pages_of_medical_card.is_empty());
    }

    #[tokio::test]
    async fn test_store_error_fails_enrichment() {
        let err = ContextEnricher::new(Arc::new(BrokenStore), Duration::from_secs(1))
            .enrich(claims(Uuid::new_v4()), &context(&[("page_id", "7")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Enrichment { ref lookup, .. } if lookup == "doctor_medical_card_pages"));
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out() {
        let err = ContextEnricher::new(Arc::new(BrokenStore), Duration::from_millis(50))
            .enrich(claims(Uuid::new_v4()), &context(&[("chat_id", "4")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
