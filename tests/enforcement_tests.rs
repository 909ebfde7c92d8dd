//! # Enforcement Integration Tests
//!
//! Drives the access enforcer over the fixture policy file:
//! - the role scenarios (admin templates, doctor pages, patient cards, whitelist)
//! - the fail-closed properties (no token, bad token, no matching policy)
//! - ownership, idempotence and policy round-trip behavior

mod common;

use axum::http::Method;
use common::*;
use policy_gateway::auth::{AccessEnforcer, AccessRequest};
use policy_gateway::core::policies::PoliciesConfig;
use policy_gateway::core::types::Decision;
use policy_gateway::enrichment::InMemoryOwnershipStore;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

async fn decide(enforcer: &AccessEnforcer, method: Method, path: &str, token: Option<&str>) -> Decision {
    decide_with_body(enforcer, method, path, token, Map::new()).await
}

async fn decide_with_body(
    enforcer: &AccessEnforcer,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Map<String, Value>,
) -> Decision {
    enforcer
        .enforce(AccessRequest {
            method: &method,
            path,
            token,
            body,
        })
        .await
        .unwrap()
}

fn assert_allowed(decision: &Decision, service: &str) {
    assert!(decision.access_allowed, "expected allow to {service}");
    assert_eq!(decision.redirect_service.as_ref().map(|u| u.as_str()), Some(service));
}

fn empty_store_enforcer() -> AccessEnforcer {
    enforcer(&fixture_policies(), Arc::new(InMemoryOwnershipStore::new()))
}

#[tokio::test]
async fn test_admin_and_doctor_manage_templates() {
    let enforcer = empty_store_enforcer();
    let user = Uuid::new_v4();

    for group in [ADMIN, DOCTOR] {
        let token = mint_token(user, group);
        for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE] {
            let decision = decide(&enforcer, method, "/templates", Some(&token)).await;
            assert_allowed(&decision, "http://template-service:5000/");
        }
    }

    let patient = mint_token(user, PATIENT);
    for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE] {
        let decision = decide(&enforcer, method, "/templates", Some(&patient)).await;
        assert_eq!(decision, Decision::deny());
    }
}

#[tokio::test]
async fn test_groups_are_admin_only() {
    let enforcer = empty_store_enforcer();
    let user = Uuid::new_v4();

    let admin = mint_token(user, ADMIN);
    assert_allowed(
        &decide(&enforcer, Method::DELETE, "/groups", Some(&admin)).await,
        "http://user-service:5000/",
    );

    for group in [DOCTOR, PATIENT] {
        let token = mint_token(user, group);
        assert!(!decide(&enforcer, Method::GET, "/groups", Some(&token)).await.access_allowed);
    }
}

#[tokio::test]
async fn test_doctor_pages_follow_ownership() {
    let doctor = Uuid::new_v4();
    let store = InMemoryOwnershipStore::new()
        .with_medical_card_page(doctor, "11")
        .with_medical_card_page(doctor, "12");
    let enforcer = enforcer(&fixture_policies(), Arc::new(store));
    let token = mint_token(doctor, DOCTOR);

    for page in ["11", "12"] {
        let decision = decide(&enforcer, Method::PUT, &format!("/pages/{page}"), Some(&token)).await;
        assert_allowed(&decision, "http://medical-card-service:5000/");
    }

    // page 13 belongs to someone else
    let decision = decide(&enforcer, Method::PUT, "/pages/13", Some(&token)).await;
    assert_eq!(decision, Decision::deny());

    // another doctor owns nothing
    let other = mint_token(Uuid::new_v4(), DOCTOR);
    assert!(!decide(&enforcer, Method::DELETE, "/pages/11", Some(&other)).await.access_allowed);

    // admins bypass ownership
    let admin = mint_token(Uuid::new_v4(), ADMIN);
    assert!(decide(&enforcer, Method::DELETE, "/pages/13", Some(&admin)).await.access_allowed);
}

#[tokio::test]
async fn test_patient_reads_own_card_only() {
    let patient = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let store = InMemoryOwnershipStore::new()
        .with_card("5", patient.to_string())
        .with_card("6", stranger.to_string());
    let enforcer = enforcer(&fixture_policies(), Arc::new(store));
    let token = mint_token(patient, PATIENT);

    let own = decide(&enforcer, Method::GET, &format!("/cards/me/{patient}"), Some(&token)).await;
    assert_allowed(&own, "http://medical-card-service:5000/");

    let foreign = decide(&enforcer, Method::GET, &format!("/cards/me/{stranger}"), Some(&token)).await;
    assert_eq!(foreign, Decision::deny());

    assert!(decide(&enforcer, Method::GET, "/cards/5", Some(&token)).await.access_allowed);
    assert!(!decide(&enforcer, Method::GET, "/cards/6", Some(&token)).await.access_allowed);
    // unknown card leaves the owner unset
    assert!(!decide(&enforcer, Method::GET, "/cards/7", Some(&token)).await.access_allowed);
}

#[tokio::test]
async fn test_whitelist_allows_regardless_of_token() {
    let enforcer = empty_store_enforcer();
    let valid = mint_token(Uuid::new_v4(), PATIENT);
    let expired = expired_token(Uuid::new_v4(), PATIENT);

    for token in [None, Some("garbage"), Some(expired.as_str()), Some(valid.as_str())] {
        for path in ["/auth/", "/auth/jwt/login", "/auth/register"] {
            let decision = decide(&enforcer, Method::POST, path, token).await;
            assert_allowed(&decision, "http://user-service:5000/");
        }
    }

    // whitelisting is per method
    assert!(!decide(&enforcer, Method::GET, "/auth/jwt/login", None).await.access_allowed);
}

#[tokio::test]
async fn test_missing_or_invalid_token_denies() {
    let enforcer = empty_store_enforcer();
    let user = Uuid::new_v4();

    let wrong_secret = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({"sub": user, "group_id": ADMIN, "aud": [AUDIENCE]}),
        &jsonwebtoken::EncodingKey::from_secret(b"another-secret"),
    )
    .unwrap();
    let wrong_audience = sign(json!({"sub": user, "group_id": ADMIN, "aud": ["other"]}));
    let no_group = sign(json!({"sub": user, "aud": [AUDIENCE]}));
    let bad_subject = sign(json!({"sub": "21", "group_id": ADMIN, "aud": [AUDIENCE]}));
    let expired = expired_token(user, ADMIN);

    let tokens = [
        None,
        Some(""),
        Some("not-a-jwt"),
        Some(wrong_secret.as_str()),
        Some(wrong_audience.as_str()),
        Some(no_group.as_str()),
        Some(bad_subject.as_str()),
        Some(expired.as_str()),
    ];
    for token in tokens {
        let decision = decide(&enforcer, Method::GET, "/templates", token).await;
        assert_eq!(decision, Decision::deny(), "token {token:?}");
    }
}

#[tokio::test]
async fn test_unmatched_resources_fail_closed() {
    let enforcer = empty_store_enforcer();
    let admin = mint_token(Uuid::new_v4(), ADMIN);

    let requests = [
        (Method::GET, "/unknown"),
        (Method::GET, "/templates/extra"),
        (Method::PATCH, "/templates"),
        (Method::POST, "/groups/1"),
        (Method::GET, "/"),
    ];
    for (method, path) in requests {
        let decision = decide(&enforcer, method.clone(), path, Some(&admin)).await;
        assert_eq!(decision, Decision::deny(), "{method} {path}");
    }
}

#[tokio::test]
async fn test_body_attributes_gate_record_creation() {
    let doctor = Uuid::new_v4();
    let enforcer = empty_store_enforcer();
    let token = mint_token(doctor, DOCTOR);

    let mut body = Map::new();
    body.insert("doctor_id".to_string(), json!(doctor.to_string()));
    body.insert("patient_id".to_string(), json!(Uuid::new_v4().to_string()));
    let own = decide_with_body(&enforcer, Method::POST, "/records", Some(&token), body).await;
    assert_allowed(&own, "http://record-service:5000/");

    let mut body = Map::new();
    body.insert("doctor_id".to_string(), json!(Uuid::new_v4().to_string()));
    let forged = decide_with_body(&enforcer, Method::POST, "/records", Some(&token), body).await;
    assert!(!forged.access_allowed);

    let missing = decide(&enforcer, Method::POST, "/records", Some(&token)).await;
    assert!(!missing.access_allowed);
}

#[tokio::test]
async fn test_chat_messages_and_meetings() {
    let user = Uuid::new_v4();
    let store = InMemoryOwnershipStore::new()
        .with_chat(user, "3")
        .with_message(user, "40")
        .with_record(user, "9")
        .with_meeting("100", "9")
        .with_meeting("101", "10");
    let enforcer = enforcer(&fixture_policies(), Arc::new(store));
    let token = mint_token(user, PATIENT);

    assert!(decide(&enforcer, Method::GET, "/messages/last/3", Some(&token)).await.access_allowed);
    assert!(!decide(&enforcer, Method::GET, "/messages/last/4", Some(&token)).await.access_allowed);

    assert!(decide(&enforcer, Method::PUT, "/messages/40", Some(&token)).await.access_allowed);
    assert!(!decide(&enforcer, Method::DELETE, "/messages/41", Some(&token)).await.access_allowed);

    let meeting = decide(&enforcer, Method::GET, "/meetings/100", Some(&token)).await;
    assert_allowed(&meeting, "http://record-service:5000/");
    assert!(!decide(&enforcer, Method::GET, "/meetings/101", Some(&token)).await.access_allowed);
    assert!(!decide(&enforcer, Method::GET, "/meetings/102", Some(&token)).await.access_allowed);
}

#[tokio::test]
async fn test_repeated_enforcement_is_stable() {
    let doctor = Uuid::new_v4();
    let store = InMemoryOwnershipStore::new().with_medical_card_page(doctor, "1");
    let enforcer = enforcer(&fixture_policies(), Arc::new(store));
    let token = mint_token(doctor, DOCTOR);

    let first_allow = decide(&enforcer, Method::PUT, "/pages/1", Some(&token)).await;
    let first_deny = decide(&enforcer, Method::PUT, "/pages/2", Some(&token)).await;
    for _ in 0..5 {
        assert_eq!(decide(&enforcer, Method::PUT, "/pages/1", Some(&token)).await, first_allow);
        assert_eq!(decide(&enforcer, Method::PUT, "/pages/2", Some(&token)).await, first_deny);
    }
}

#[tokio::test]
async fn test_policy_round_trip_preserves_decisions() {
    let user = Uuid::new_v4();
    let store = Arc::new(
        InMemoryOwnershipStore::new()
            .with_medical_card_page(user, "1")
            .with_card("5", user.to_string())
            .with_chat(user, "3"),
    );

    let original = fixture_policies();
    let reloaded = PoliciesConfig::from_yaml_str(&original.to_yaml().unwrap()).unwrap();
    assert_eq!(original, reloaded);

    let before = enforcer(&original, store.clone());
    let after = enforcer(&reloaded, store);

    let corpus = [
        (Method::POST, "/auth/jwt/login".to_string()),
        (Method::GET, "/templates".to_string()),
        (Method::DELETE, "/groups".to_string()),
        (Method::GET, "/users/".to_string()),
        (Method::PUT, "/users/me".to_string()),
        (Method::GET, format!("/cards/me/{user}")),
        (Method::GET, "/cards/5".to_string()),
        (Method::PUT, "/pages/1".to_string()),
        (Method::PUT, "/pages/2".to_string()),
        (Method::GET, "/messages/last/3".to_string()),
        (Method::GET, "/nowhere".to_string()),
    ];

    for group in [ADMIN, DOCTOR, PATIENT] {
        let token = mint_token(user, group);
        for (method, path) in &corpus {
            assert_eq!(
                decide(&before, method.clone(), path, Some(&token)).await,
                decide(&after, method.clone(), path, Some(&token)).await,
                "group {group}: {method} {path}"
            );
        }
    }
}
