//! # Resource Matcher
//!
//! Matches an inbound path and method against the ordered policy list. Three scans exist,
//! each with its own regex semantics:
//!
//! | Scan                         | Policies   | `resource` semantics           |
//! |------------------------------|------------|--------------------------------|
//! | [`ResourceMatcher::match_whitelist`] | whitelist  | prefix (`^(?:resource)`)       |
//! | [`ResourceMatcher::match_resource`]  | enforcing  | full match (`^(?:resource)$`)  |
//! | [`ResourceMatcher::resolve_service`] | enforcing  | prefix (`^(?:resource)`)       |
//!
//! When the full-match scan hits a policy with a `resource_pattern`, that pattern is searched
//! anywhere in the path and its named groups become the request's path parameters.
//!
//! All regexes are compiled once in [`ResourceMatcher::new`].
//!
//! Paths with `.` or `..` segments are never matched against anything: the upstream URL
//! would collapse them, so the forwarded path would differ from the one that was checked.
//! [`has_dot_segments`] detects them.

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::policies::{PoliciesConfig, Policy};
use axum::http::Method;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// A policy with its regexes compiled and its service resolved
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    pub policy: Policy,
    /// Entrypoint of the policy's service
    pub entrypoint: Url,
    prefix: Regex,
    full: Regex,
    pattern: Option<Regex>,
}

impl CompiledPolicy {
    fn new(policy: &Policy, config: &PoliciesConfig) -> GatewayResult<Self> {
        let service = config.service(&policy.service).ok_or_else(|| {
            GatewayError::config(format!(
                "Policy for '{}' references unknown service '{}'",
                policy.resource, policy.service
            ))
        })?;

        Ok(Self {
            policy: policy.clone(),
            entrypoint: service.entrypoint.clone(),
            prefix: Regex::new(&format!("^(?:{})", policy.resource))?,
            full: Regex::new(&format!("^(?:{})$", policy.resource))?,
            pattern: policy.resource_pattern.as_deref().map(Regex::new).transpose()?,
        })
    }

    /// Named groups of `resource_pattern` found in `path`
    fn extract_params(&self, path: &str) -> HashMap<String, String> {
        let mut params = HashMap::new();
        let Some(pattern) = &self.pattern else {
            return params;
        };
        let Some(captures) = pattern.captures(path) else {
            return params;
        };
        for name in pattern.capture_names().flatten() {
            if let Some(value) = captures.name(name) {
                params.insert(name.to_string(), value.as_str().to_string());
            }
        }
        params
    }
}

/// Result of the enforcing scan
#[derive(Debug, Clone, Default)]
pub struct ResourceMatch<'a> {
    pub policy: Option<&'a CompiledPolicy>,
    pub params: HashMap<String, String>,
}

/// Ordered, precompiled view of the policy list
#[derive(Debug, Clone)]
pub struct ResourceMatcher {
    whitelist: Vec<CompiledPolicy>,
    enforcing: Vec<CompiledPolicy>,
}

impl ResourceMatcher {
    pub fn new(config: &PoliciesConfig) -> GatewayResult<Self> {
        let whitelist = config
            .whitelist_policies()
            .map(|p| CompiledPolicy::new(p, config))
            .collect::<GatewayResult<Vec<_>>>()?;
        let enforcing = config
            .enforcing_policies()
            .map(|p| CompiledPolicy::new(p, config))
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(Self { whitelist, enforcing })
    }

    /// First whitelist policy whose resource matches the start of `path` and allows `method`
    pub fn match_whitelist(&self, path: &str, method: &Method) -> Option<&CompiledPolicy> {
        let hit = self
            .whitelist
            .iter()
            .find(|p| p.policy.allows_method(method) && p.prefix.is_match(path));
        if let Some(policy) = hit {
            debug!(path, %method, resource = %policy.policy.resource, "Whitelist policy matched");
        }
        hit
    }

    /// First enforcing policy whose resource matches the whole `path` and allows `method`,
    /// together with the parameters extracted by its `resource_pattern`.
    pub fn match_resource(&self, path: &str, method: &Method) -> ResourceMatch<'_> {
        let Some(policy) = self
            .enforcing
            .iter()
            .find(|p| p.policy.allows_method(method) && p.full.is_match(path))
        else {
            return ResourceMatch::default();
        };

        let params = policy.extract_params(path);
        debug!(path, %method, resource = %policy.policy.resource, params = ?params, "Resource matched");
        ResourceMatch {
            policy: Some(policy),
            params,
        }
    }

    /// Service for a request the rule engine has already allowed
    pub fn resolve_service(&self, path: &str, method: &Method) -> Option<&CompiledPolicy> {
        self.enforcing
            .iter()
            .find(|p| p.policy.allows_method(method) && p.prefix.is_match(path))
    }
}

/// Whether the decoded path has a `.` or `..` segment. Backslashes count as separators.
pub fn has_dot_segments(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "." || segment == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
model: "[request_definition]"
services:
  - name: user-service
    entrypoint: http://user-service:5000/
    openapi_scheme: http://user-service:5000/openapi.json
  - name: medical-card-service
    entrypoint: http://medical-card-service:5000/
    openapi_scheme: http://medical-card-service:5000/openapi.json
policies:
  - resource: /auth/
    methods: [POST]
    service: user-service
    white_list: true
  - rule: r.sub.group_id == 1
    resource: /pages
    methods: [GET]
    service: medical-card-service
  - rule: r.sub.group_id == 2
    resource: /pages/\d+
    resource_pattern: /pages/(?P<page_id>\d+)
    methods: [PUT, DELETE]
    service: medical-card-service
  - rule: r.sub.group_id == 3
    resource: /ws/\d+/[0-9a-f-]+
    resource_pattern: /ws/(?P<chat_id>\d+)/(?P<user_id>[0-9a-f-]+)
    methods: [GET]
    service: medical-card-service
"#;

    fn matcher() -> ResourceMatcher {
        ResourceMatcher::new(&PoliciesConfig::from_yaml_str(CONFIG).unwrap()).unwrap()
    }

    #[test]
    fn test_whitelist_uses_prefix_semantics() {
        let matcher = matcher();
        assert!(matcher.match_whitelist("/auth/", &Method::POST).is_some());
        assert!(matcher.match_whitelist("/auth/jwt/login", &Method::POST).is_some());
        assert!(matcher.match_whitelist("/auth/jwt/login", &Method::GET).is_none());
        assert!(matcher.match_whitelist("/v1/auth/", &Method::POST).is_none());
    }

    #[test]
    fn test_enforcing_uses_full_match() {
        let matcher = matcher();
        assert!(matcher.match_resource("/pages", &Method::GET).policy.is_some());
        assert!(matcher.match_resource("/pages/", &Method::GET).policy.is_none());
        assert!(matcher.match_resource("/pages/12", &Method::GET).policy.is_none());
        assert!(matcher.match_resource("/auth/", &Method::POST).policy.is_none());
    }

    #[test]
    fn test_params_extracted() {
        let matcher = matcher();
        let found = matcher.match_resource("/pages/12", &Method::PUT);
        assert_eq!(found.params.get("page_id").map(String::as_str), Some("12"));

        let found = matcher.match_resource("/ws/5/6f1c2a54-3c2e-4f0e-9d9a-2b0c1d8e6f11", &Method::GET);
        assert_eq!(found.params.get("chat_id").map(String::as_str), Some("5"));
        assert_eq!(
            found.params.get("user_id").map(String::as_str),
            Some("6f1c2a54-3c2e-4f0e-9d9a-2b0c1d8e6f11")
        );
    }

    #[test]
    fn test_no_pattern_means_no_params() {
        let matcher = matcher();
        let found = matcher.match_resource("/pages", &Method::GET);
        assert!(found.params.is_empty());
        assert!(matcher.match_resource("/unknown", &Method::GET).params.is_empty());
    }

    #[test]
    fn test_resolve_service_uses_prefix() {
        let matcher = matcher();
        let policy = matcher.resolve_service("/pages/12", &Method::GET).unwrap();
        assert_eq!(policy.entrypoint.as_str(), "http://medical-card-service:5000/");
        assert!(matcher.resolve_service("/auth/", &Method::POST).is_none());
    }

    #[test]
    fn test_dot_segments() {
        for path in ["/auth/../groups", "/auth/./jwt", "/auth/..", "/auth/..\\groups", "/.."] {
            assert!(has_dot_segments(path), "{path}");
        }
        for path in ["/auth/jwt/login", "/files/a..b", "/.well-known/x", "/pages/1", "/"] {
            assert!(!has_dot_segments(path), "{path}");
        }
    }
}
