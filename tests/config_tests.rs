//! # Configuration Loading Tests
//!
//! Loads the shipped sample files and temporary documents through the public loaders.

mod common;

use common::*;
use policy_gateway::core::config::GatewayConfig;
use policy_gateway::core::error::GatewayError;
use policy_gateway::core::policies::PoliciesConfig;
use policy_gateway::policy::RuleEngine;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

#[tokio::test]
async fn test_sample_gateway_config_loads() {
    let config = GatewayConfig::load_from_file(sample("gateway.yaml")).await.unwrap();
    assert_eq!(config.timeouts.enrichment, Duration::from_secs(3));
    assert_eq!(config.auth.audience, "fastapi-users:auth");
    assert_eq!(config.policies_path, PathBuf::from("config/policies.yaml"));
}

#[tokio::test]
async fn test_sample_policies_compile() {
    let policies = PoliciesConfig::load(sample("policies.yaml")).await.unwrap();
    let engine = RuleEngine::build(&policies.model, &policies.policies).unwrap();
    assert_eq!(engine.rule_count(), policies.enforcing_policies().count());
    assert_eq!(policies.whitelist_policies().count(), 1);
}

#[tokio::test]
async fn test_fixture_loads_from_disk() {
    let policies = PoliciesConfig::load(fixture_path("policies.yaml")).await.unwrap();
    assert_eq!(policies, fixture_policies());
    assert_eq!(policies.services.len(), 6);
}

#[tokio::test]
async fn test_partial_gateway_config_uses_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
auth:
  jwt_secret: from-file
database:
  url: postgres://gateway@localhost/medical
timeouts:
  upstream_request: 250ms
"#
    )
    .unwrap();

    let config = GatewayConfig::load_from_file(file.path()).await.unwrap();
    assert_eq!(config.timeouts.upstream_request, Duration::from_millis(250));
    assert_eq!(config.timeouts.upstream_connect, Duration::from_secs(5));
    assert_eq!(config.server.http_port, 8080);
    assert_eq!(config.database.pool_size, 10);
}

#[tokio::test]
async fn test_broken_policy_file_is_fatal() {
    let mut file = NamedTempFile::new().unwrap();
    let broken = fixture_yaml().replace("service: chat-service", "service: pager-service");
    write!(file, "{broken}").unwrap();

    let err = PoliciesConfig::load(file.path()).await.unwrap_err();
    assert!(matches!(err, GatewayError::Configuration { .. }));
    assert!(err.to_string().contains("pager-service"));
}

#[tokio::test]
async fn test_unparseable_rule_is_fatal() {
    let broken = fixture_yaml().replace("r.sub.group_id == 1 || r.sub.group_id == 2", "r.sub.group_id == ");
    let policies = PoliciesConfig::from_yaml_str(&broken).unwrap();
    assert!(RuleEngine::build(&policies.model, &policies.policies).is_err());
}
