//! # OpenAPI Aggregation
//!
//! Serves one OpenAPI document for the whole gateway by merging the `paths` and
//! `components` of every registered service's document. Services flagged with
//! `inject_token_in_swagger` get a bearer security scheme and a `security` requirement on
//! each of their operations, so the docs UI sends the token through the gateway.
//!
//! Documents are fetched concurrently on every request; an unreachable or malformed
//! document is skipped with a warning.

use crate::core::config::TimeoutConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::policies::Service;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, instrument, warn};
use url::Url;

const SECURITY_SCHEME: &str = "BearerAuth";
const OPERATION_KEYS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// The parts of a service document that are merged
#[derive(Debug, Default, Deserialize)]
struct ServiceDocument {
    #[serde(default)]
    paths: Map<String, Value>,
    #[serde(default)]
    components: BTreeMap<String, Map<String, Value>>,
}

/// Gateway-wide OpenAPI document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedSchema {
    pub openapi: String,
    pub info: Value,
    pub paths: Map<String, Value>,
    pub components: BTreeMap<String, Map<String, Value>>,
}

impl Default for AggregatedSchema {
    fn default() -> Self {
        Self {
            openapi: "3.1.0".to_string(),
            info: json!({
                "title": "Policy Gateway",
                "version": env!("CARGO_PKG_VERSION"),
            }),
            paths: Map::new(),
            components: BTreeMap::new(),
        }
    }
}

impl AggregatedSchema {
    /// Merge one service document. Paths and component names already present are kept.
    pub fn merge(&mut self, document: Value, inject_token: bool) -> GatewayResult<()> {
        let document: ServiceDocument = serde_json::from_value(document)?;

        for (path, mut item) in document.paths {
            if inject_token {
                require_bearer(&mut item);
            }
            if self.paths.contains_key(&path) {
                debug!(path = %path, "Duplicate path in service documents, keeping the first");
                continue;
            }
            self.paths.insert(path, item);
        }

        for (section, definitions) in document.components {
            let target = self.components.entry(section).or_default();
            for (name, definition) in definitions {
                target.entry(name).or_insert(definition);
            }
        }

        if inject_token {
            self.components.entry("securitySchemes".to_string()).or_default().insert(
                SECURITY_SCHEME.to_string(),
                json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}),
            );
        }
        Ok(())
    }
}

fn require_bearer(item: &mut Value) {
    let Value::Object(operations) = item else {
        return;
    };
    for (method, operation) in operations.iter_mut() {
        if !OPERATION_KEYS.contains(&method.as_str()) {
            continue;
        }
        if let Value::Object(operation) = operation {
            operation.insert("security".to_string(), json!([{ SECURITY_SCHEME: [] }]));
        }
    }
}

#[derive(Debug, Clone)]
struct SchemaSource {
    name: String,
    url: Url,
    inject_token: bool,
}

/// Fetches and merges service documents
#[derive(Debug, Clone)]
pub struct SchemaAggregator {
    client: reqwest::Client,
    sources: Vec<SchemaSource>,
}

impl SchemaAggregator {
    pub fn new(services: &[Service], timeouts: &TimeoutConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.upstream_connect)
            .timeout(timeouts.upstream_request)
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build HTTP client: {}", e)))?;

        let sources = services
            .iter()
            .map(|s| SchemaSource {
                name: s.name.clone(),
                url: s.openapi_scheme.clone(),
                inject_token: s.inject_token_in_swagger,
            })
            .collect();

        Ok(Self { client, sources })
    }

    /// Build the merged document from whatever services answer
    #[instrument(skip(self), fields(services = self.sources.len()))]
    pub async fn aggregate(&self) -> AggregatedSchema {
        let documents = join_all(self.sources.iter().map(|source| self.fetch(source))).await;

        let mut schema = AggregatedSchema::default();
        for (source, document) in self.sources.iter().zip(documents) {
            let Some(document) = document else {
                continue;
            };
            if let Err(e) = schema.merge(document, source.inject_token) {
                warn!(service = %source.name, error = %e, "Skipping malformed OpenAPI document");
            }
        }
        schema
    }

    async fn fetch(&self, source: &SchemaSource) -> Option<Value> {
        let result = async {
            self.client
                .get(source.url.clone())
                .send()
                .await?
                .error_for_status()?
                .json::<Value>()
                .await
        }
        .await;

        match result {
            Ok(document) => Some(document),
            Err(e) => {
                warn!(service = %source.name, url = %source.url, error = %e, "Failed to fetch OpenAPI document");
                None
            }
        }
    }
}
