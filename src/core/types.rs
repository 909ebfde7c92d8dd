//! # Core Types Module
//!
//! Data structures that flow through enforcement: the decoded token claims, the per-request
//! resource context, the enriched subject the rule engine sees, and the final [`Decision`].
//!
//! The rule engine works on `serde_json::Value` attribute trees, so the subject and resource
//! types expose `to_attributes()` to render themselves as `r.sub` / `r.obj`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use url::Url;
use uuid::Uuid;

/// Final result of enforcement, the only thing callers act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub access_allowed: bool,
    /// Entrypoint of the backend that should receive the request
    pub redirect_service: Option<Url>,
}

impl Decision {
    pub fn allow(service: Url) -> Self {
        Self {
            access_allowed: true,
            redirect_service: Some(service),
        }
    }

    pub fn deny() -> Self {
        Self {
            access_allowed: false,
            redirect_service: None,
        }
    }
}

/// Decision for a WebSocket handshake plus the tunnel target identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDecision {
    pub decision: Decision,
    pub chat_id: Option<i64>,
    pub client_id: Option<Uuid>,
}

impl StreamDecision {
    pub fn deny() -> Self {
        Self {
            decision: Decision::deny(),
            chat_id: None,
            client_id: None,
        }
    }
}

/// Claims carried by a verified access token
///
/// `sub` and `group_id` are mandatory. Anything else in the payload is kept in `extra`
/// and is reachable from rules as `r.sub.<claim>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectClaims {
    pub sub: Uuid,
    pub group_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What is being accessed: path, extracted path parameters and JSON body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceContext {
    pub resource: String,
    pub params: HashMap<String, String>,
    pub body: Map<String, Value>,
}

impl ResourceContext {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Render as `{"resource": .., "params": {..}, "body": {..}}`
    pub fn to_attributes(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut attributes = Map::new();
        attributes.insert("resource".to_string(), Value::String(self.resource.clone()));
        attributes.insert("params".to_string(), Value::Object(params));
        attributes.insert("body".to_string(), Value::Object(self.body.clone()));
        Value::Object(attributes)
    }
}

/// Attributes the enricher can compute for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectAttribute {
    AvailablePagesOfMedicalCard,
    AvailablePagesOfHealthDiary,
    AvailableChats,
    AvailableMessages,
    AvailableRecords,
    CardOwnerId,
    RecordId,
}

impl SubjectAttribute {
    /// Attribute name as seen by rules (`r.sub.<name>`)
    pub fn name(&self) -> &'static str {
        match self {
            Self::AvailablePagesOfMedicalCard => "available_pages_of_medical_card",
            Self::AvailablePagesOfHealthDiary => "available_pages_of_health_diary",
            Self::AvailableChats => "available_chats",
            Self::AvailableMessages => "available_messages",
            Self::AvailableRecords => "available_records",
            Self::CardOwnerId => "card_owner_id",
            Self::RecordId => "record_id",
        }
    }
}

impl fmt::Display for SubjectAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value produced by one ownership lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Set(Vec<String>),
    Scalar(Option<String>),
}

/// Subject claims plus ownership facts computed for this request
///
/// The five collections are always present, empty unless a lookup filled them.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedSubject {
    pub claims: SubjectClaims,
    pub available_pages_of_medical_card: Vec<String>,
    pub available_pages_of_health_diary: Vec<String>,
    pub available_chats: Vec<String>,
    pub available_messages: Vec<String>,
    pub available_records: Vec<String>,
    pub card_owner_id: Option<String>,
    pub record_id: Option<String>,
}

impl EnrichedSubject {
    pub fn new(claims: SubjectClaims) -> Self {
        Self {
            claims,
            available_pages_of_medical_card: Vec::new(),
            available_pages_of_health_diary: Vec::new(),
            available_chats: Vec::new(),
            available_messages: Vec::new(),
            available_records: Vec::new(),
            card_owner_id: None,
            record_id: None,
        }
    }

    /// Store a lookup result under its target attribute.
    ///
    /// A set value for a scalar attribute (or the reverse) is ignored.
    pub fn apply(&mut self, attribute: SubjectAttribute, value: AttributeValue) {
        match (attribute, value) {
            (SubjectAttribute::AvailablePagesOfMedicalCard, AttributeValue::Set(ids)) => {
                self.available_pages_of_medical_card.extend(ids)
            }
            (SubjectAttribute::AvailablePagesOfHealthDiary, AttributeValue::Set(ids)) => {
                self.available_pages_of_health_diary.extend(ids)
            }
            (SubjectAttribute::AvailableChats, AttributeValue::Set(ids)) => self.available_chats.extend(ids),
            (SubjectAttribute::AvailableMessages, AttributeValue::Set(ids)) => {
                self.available_messages.extend(ids)
            }
            (SubjectAttribute::AvailableRecords, AttributeValue::Set(ids)) => self.available_records.extend(ids),
            (SubjectAttribute::CardOwnerId, AttributeValue::Scalar(id)) => self.card_owner_id = id,
            (SubjectAttribute::RecordId, AttributeValue::Scalar(id)) => self.record_id = id,
            _ => {}
        }
    }

    /// Render as the `r.sub` attribute tree: claims plus the computed attributes.
    pub fn to_attributes(&self) -> Value {
        let mut attributes = match serde_json::to_value(&self.claims) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        let collections = [
            (SubjectAttribute::AvailablePagesOfMedicalCard, &self.available_pages_of_medical_card),
            (SubjectAttribute::AvailablePagesOfHealthDiary, &self.available_pages_of_health_diary),
            (SubjectAttribute::AvailableChats, &self.available_chats),
            (SubjectAttribute::AvailableMessages, &self.available_messages),
            (SubjectAttribute::AvailableRecords, &self.available_records),
        ];
        for (attribute, ids) in collections {
            let values = ids.iter().cloned().map(Value::String).collect();
            attributes.insert(attribute.name().to_string(), Value::Array(values));
        }

        if let Some(owner) = &self.card_owner_id {
            attributes.insert(SubjectAttribute::CardOwnerId.name().to_string(), Value::String(owner.clone()));
        }
        if let Some(record) = &self.record_id {
            attributes.insert(SubjectAttribute::RecordId.name().to_string(), Value::String(record.clone()));
        }

        Value::Object(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims() -> SubjectClaims {
        serde_json::from_value(json!({
            "sub": "7f1c2a54-3c2e-4f0e-9d9a-2b0c1d8e6f11",
            "group_id": 2,
            "aud": ["fastapi-users:auth"],
            "email": "doctor@clinic.test"
        }))
        .unwrap()
    }

    #[test]
    fn test_claims_keep_extra_fields() {
        let claims = claims();
        assert_eq!(claims.group_id, 2);
        assert_eq!(claims.extra.get("email"), Some(&json!("doctor@clinic.test")));
    }

    #[test]
    fn test_enriched_subject_always_has_collections() {
        let attributes = EnrichedSubject::new(claims()).to_attributes();
        for name in [
            "available_pages_of_medical_card",
            "available_pages_of_health_diary",
            "available_chats",
            "available_messages",
            "available_records",
        ] {
            assert_eq!(attributes[name], json!([]), "missing {name}");
        }
        assert!(attributes.get("card_owner_id").is_none());
        assert_eq!(attributes["sub"], json!("7f1c2a54-3c2e-4f0e-9d9a-2b0c1d8e6f11"));
    }

    #[test]
    fn test_apply_routes_values_to_attributes() {
        let mut subject = EnrichedSubject::new(claims());
        subject.apply(
            SubjectAttribute::AvailableChats,
            AttributeValue::Set(vec!["4".into(), "9".into()]),
        );
        subject.apply(SubjectAttribute::CardOwnerId, AttributeValue::Scalar(Some("abc".into())));
        // mismatched shape is dropped
        subject.apply(SubjectAttribute::RecordId, AttributeValue::Set(vec!["1".into()]));

        assert_eq!(subject.available_chats, vec!["4", "9"]);
        assert_eq!(subject.card_owner_id.as_deref(), Some("abc"));
        assert_eq!(subject.record_id, None);
    }

    #[test]
    fn test_resource_context_attributes() {
        let mut context = ResourceContext::new("/pages/7");
        context.params.insert("page_id".into(), "7".into());
        let attributes = context.to_attributes();
        assert_eq!(attributes["resource"], json!("/pages/7"));
        assert_eq!(attributes["params"]["page_id"], json!("7"));
        assert_eq!(attributes["body"], json!({}));
    }
}
