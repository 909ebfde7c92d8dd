//! # Policy Configuration
//!
//! The policy file is the gateway's authorization source of truth. It is loaded once at
//! startup and never reloaded:
//!
//! ```yaml
//! model: |
//!   [request_definition]
//!   r = sub, obj, act
//!   ...
//! services:
//!   - name: template-service
//!     entrypoint: http://template-service:5000/
//!     openapi_scheme: http://template-service:5000/openapi.json
//!     inject_token_in_swagger: true
//! policies:
//!   - rule: r.sub.group_id == 1
//!     resource: /templates
//!     methods: [GET, POST]
//!     service: template-service
//! ```
//!
//! Policy order matters: the first matching policy wins both for whitelist bypass and
//! for service resolution.

use crate::core::error::{GatewayError, GatewayResult};
use axum::http::Method;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};
use url::Url;

/// Verbs accepted in a policy's `methods` list
pub const SUPPORTED_METHODS: [Method; 9] = [
    Method::GET,
    Method::DELETE,
    Method::PATCH,
    Method::POST,
    Method::PUT,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

/// One backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    /// Base URL allowed requests are proxied to
    pub entrypoint: Url,
    /// Where the service publishes its OpenAPI document
    pub openapi_scheme: Url,
    #[serde(default)]
    pub inject_token_in_swagger: bool,
}

/// One access policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Subject-matching expression, evaluated by the rule engine.
    /// Ignored for whitelist policies.
    #[serde(default)]
    pub rule: String,

    /// Regex matched against the request path
    pub resource: String,

    #[serde(with = "method_serde")]
    pub methods: Vec<Method>,

    /// Name of the service receiving allowed requests
    pub service: String,

    #[serde(default)]
    pub white_list: bool,

    /// Secondary regex with named groups, used to extract path parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pattern: Option<String>,
}

impl Policy {
    pub fn allows_method(&self, method: &Method) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Custom serialization for HTTP methods, case-insensitive on input
mod method_serde {
    use axum::http::Method;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(methods: &[Method], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let method_strings: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
        method_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Method>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let method_strings: Vec<String> = Vec::deserialize(deserializer)?;
        method_strings
            .into_iter()
            .map(|s| Method::from_bytes(s.trim().to_uppercase().as_bytes()).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// The whole policy file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoliciesConfig {
    /// Rule model definition text
    pub model: String,
    pub policies: Vec<Policy>,
    pub services: Vec<Service>,
}

impl PoliciesConfig {
    /// Load and validate the policy file. Any failure here is fatal for startup.
    pub async fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::config(format!("Failed to read policy file {}: {}", path.display(), e))
        })?;

        let config = Self::from_yaml_str(&content)?;
        info!(
            path = %path.display(),
            policies = config.policies.len(),
            services = config.services.len(),
            "Loaded policy configuration"
        );
        Ok(config)
    }

    /// Parse and validate a policy document
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| GatewayError::config(format!("Invalid policy document: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> GatewayResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate cross references and patterns
    ///
    /// All problems are collected into one configuration error.
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.model.trim().is_empty() {
            errors.push("model must not be empty".to_string());
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                errors.push(format!("service '{}' is declared more than once", service.name));
            }
        }

        for (index, policy) in self.policies.iter().enumerate() {
            let label = format!("policy #{} ({})", index, policy.resource);

            if self.service(&policy.service).is_none() {
                errors.push(format!("{}: unknown service '{}'", label, policy.service));
            }
            if policy.methods.is_empty() {
                errors.push(format!("{}: methods must not be empty", label));
            }
            for method in &policy.methods {
                if !SUPPORTED_METHODS.contains(method) {
                    errors.push(format!("{}: unsupported method '{}'", label, method));
                }
            }
            if let Err(e) = Regex::new(&policy.resource) {
                errors.push(format!("{}: invalid resource regex: {}", label, e));
            }
            if let Some(pattern) = &policy.resource_pattern {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(format!("{}: invalid resource_pattern: {}", label, e));
                }
            }
            if !policy.white_list && policy.rule.trim().is_empty() {
                errors.push(format!("{}: enforcing policy needs a rule", label));
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Policy validation failed: {}",
                errors.join(", ")
            )));
        }

        debug!("Policy configuration validated");
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn whitelist_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(|p| p.white_list)
    }

    pub fn enforcing_policies(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter().filter(|p| !p.white_list)
    }
}
