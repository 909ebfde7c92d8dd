//! Shared helpers for the integration tests

#![allow(dead_code)]

use axum::Router;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use policy_gateway::auth::{AccessEnforcer, TokenVerifier};
use policy_gateway::core::config::GatewayConfig;
use policy_gateway::core::policies::PoliciesConfig;
use policy_gateway::enrichment::{ContextEnricher, OwnershipStore};
use policy_gateway::gateway::{build_router, ServerState};
use regex::Regex;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const SECRET: &str = "4e7c09ff-f69e-45f0-8285-99f80a289320";
pub const AUDIENCE: &str = "fastapi-users:auth";

pub const ADMIN: i64 = 1;
pub const DOCTOR: i64 = 2;
pub const PATIENT: i64 = 3;

pub fn mint_token(sub: Uuid, group_id: i64) -> String {
    sign(json!({
        "sub": sub,
        "group_id": group_id,
        "aud": [AUDIENCE],
        "exp": chrono::Utc::now().timestamp() + 3600,
    }))
}

pub fn expired_token(sub: Uuid, group_id: i64) -> String {
    sign(json!({
        "sub": sub,
        "group_id": group_id,
        "aud": [AUDIENCE],
        "exp": chrono::Utc::now().timestamp() - 3600,
    }))
}

pub fn sign(claims: serde_json::Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

pub fn fixture_yaml() -> String {
    std::fs::read_to_string(fixture_path("policies.yaml")).unwrap()
}

pub fn fixture_policies() -> PoliciesConfig {
    PoliciesConfig::from_yaml_str(&fixture_yaml()).unwrap()
}

/// Fixture with every service pointed at `base` (e.g. a wiremock URI)
pub fn fixture_with_upstream(base: &str) -> PoliciesConfig {
    let hosts = Regex::new(r"http://[a-z-]+:5000").unwrap();
    let yaml = hosts.replace_all(&fixture_yaml(), base.trim_end_matches('/')).into_owned();
    PoliciesConfig::from_yaml_str(&yaml).unwrap()
}

pub fn gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = SECRET.to_string();
    config.auth.audience = AUDIENCE.to_string();
    config.timeouts.upstream_connect = Duration::from_millis(500);
    config.timeouts.upstream_request = Duration::from_secs(2);
    config.timeouts.enrichment = Duration::from_millis(500);
    config.server.max_json_body_size = 64 * 1024;
    config
}

pub fn enforcer(policies: &PoliciesConfig, store: Arc<dyn OwnershipStore>) -> AccessEnforcer {
    AccessEnforcer::new(
        policies,
        TokenVerifier::new(SECRET, AUDIENCE, 0),
        ContextEnricher::new(store, Duration::from_millis(500)),
    )
    .unwrap()
}

pub fn router(policies: &PoliciesConfig, store: Arc<dyn OwnershipStore>) -> Router {
    let state = ServerState::new(&gateway_config(), policies, store).unwrap();
    build_router(state)
}
