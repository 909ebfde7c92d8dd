//! # OpenAPI Aggregation Tests
//!
//! `GET /openapi.json` through the full router, with service documents served by `wiremock`.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use policy_gateway::core::policies::PoliciesConfig;
use policy_gateway::enrichment::InMemoryOwnershipStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const POLICIES: &str = r#"
model: |
  [request_definition]
  r = sub, obj, act

  [policy_definition]
  p = sub_rule, obj, act

  [policy_effect]
  e = some(where (p.eft == allow))

  [matchers]
  m = eval(p.sub_rule) && regexMatch(r.obj.resource, p.obj) && regexMatch(r.act, p.act)
services:
  - name: medical-card-service
    entrypoint: UPSTREAM/
    openapi_scheme: UPSTREAM/cards/openapi.json
    inject_token_in_swagger: true
  - name: user-service
    entrypoint: UPSTREAM/
    openapi_scheme: UPSTREAM/users/openapi.json
  - name: health-diary-service
    entrypoint: UPSTREAM/
    openapi_scheme: UPSTREAM/missing/openapi.json
policies:
  - rule: r.sub.group_id == 1
    resource: /cards
    methods: [GET]
    service: medical-card-service
"#;

#[tokio::test]
async fn test_documents_are_merged() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cards/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "openapi": "3.1.0",
            "paths": {"/cards/{card_id}": {"get": {"operationId": "get_card"}}},
            "components": {"schemas": {"Card": {"type": "object"}}}
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/openapi.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "openapi": "3.1.0",
            "paths": {"/users/me": {"get": {"operationId": "me"}, "put": {"operationId": "update_me"}}},
            "components": {"schemas": {"User": {"type": "object"}}}
        })))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing/openapi.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let policies = PoliciesConfig::from_yaml_str(&POLICIES.replace("UPSTREAM", &upstream.uri())).unwrap();
    let response = router(&policies, Arc::new(InMemoryOwnershipStore::new()))
        .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let document: Value = serde_json::from_slice(&bytes).unwrap();

    let paths = document["paths"].as_object().unwrap();
    assert_eq!(paths.len(), 2);
    assert_eq!(
        document["paths"]["/cards/{card_id}"]["get"]["security"],
        json!([{"BearerAuth": []}])
    );
    assert!(document["paths"]["/users/me"]["put"].get("security").is_none());

    let schemas = document["components"]["schemas"].as_object().unwrap();
    assert!(schemas.contains_key("Card") && schemas.contains_key("User"));
    assert_eq!(document["components"]["securitySchemes"]["BearerAuth"]["type"], "http");
}
