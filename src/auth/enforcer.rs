//! # Access Enforcer
//!
//! Runs every inbound request through the enforcement state machine:
//!
//! ```text
//! START ─┬─▶ DENY_DOT_SEGMENT
//!        └─▶ WHITELIST_CHECK ─┬─▶ ALLOW_WHITELIST
//!                             └─▶ AUTH_CHECK ─┬─▶ DENY_NO_TOKEN / DENY_INVALID_TOKEN
//!                                             └─▶ RESOURCE_MATCH ─┬─▶ DENY_NO_MATCH
//!                                                                 └─▶ ENRICH ─▶ ABAC_EVAL ─┬─▶ DENY_RULE
//!                                                                                          ├─▶ DENY_NO_SERVICE
//!                                                                                          └─▶ ALLOW
//! ```
//!
//! Each terminal state collapses into a [`Decision`]. The only error leaving the machine is an
//! enrichment failure, which callers must treat as a deny.
//!
//! WebSocket handshakes go through [`AccessEnforcer::enforce_stream`]: method fixed to `GET`,
//! token taken from the query string, no whitelist bypass, and an allow additionally requires
//! the `chat_id` and `user_id` path parameters that address the backend tunnel.

use crate::auth::token::TokenVerifier;
use crate::core::error::GatewayResult;
use crate::core::policies::PoliciesConfig;
use crate::core::types::{Decision, ResourceContext, StreamDecision};
use crate::enrichment::ContextEnricher;
use crate::observability::logging::{log_decision, DecisionRecord};
use crate::observability::metrics::record_decision;
use crate::policy::RuleEngine;
use crate::routing::matcher::{has_dot_segments, ResourceMatcher};
use axum::http::Method;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{error, instrument};
use url::Url;
use uuid::Uuid;

/// Why a request was denied. Internal only, never sent to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Path holds `.` or `..` segments
    DotSegment,
    NoToken,
    InvalidToken,
    NoResourceMatch,
    RuleRejected,
    NoServiceResolved,
    MissingStreamTarget,
}

/// Terminal state of the enforcement machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    AllowWhitelist(Url),
    Allow(Url),
    Deny(DenyReason),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::AllowWhitelist(_) => "allow_whitelist",
            Self::Allow(_) => "allow",
            Self::Deny(DenyReason::DotSegment) => "deny_dot_segment",
            Self::Deny(DenyReason::NoToken) => "deny_no_token",
            Self::Deny(DenyReason::InvalidToken) => "deny_invalid_token",
            Self::Deny(DenyReason::NoResourceMatch) => "deny_no_match",
            Self::Deny(DenyReason::RuleRejected) => "deny_rule",
            Self::Deny(DenyReason::NoServiceResolved) => "deny_no_service",
            Self::Deny(DenyReason::MissingStreamTarget) => "deny_no_stream_target",
        }
    }

    pub fn service(&self) -> Option<&Url> {
        match self {
            Self::AllowWhitelist(url) | Self::Allow(url) => Some(url),
            Self::Deny(_) => None,
        }
    }

    pub fn into_decision(self) -> Decision {
        match self {
            Self::AllowWhitelist(url) | Self::Allow(url) => Decision::allow(url),
            Self::Deny(_) => Decision::deny(),
        }
    }
}

/// Inputs of one HTTP enforcement
#[derive(Debug, Clone)]
pub struct AccessRequest<'a> {
    pub method: &'a Method,
    /// Decoded request path, starting with `/`
    pub path: &'a str,
    /// Bearer token, if the caller sent one
    pub token: Option<&'a str>,
    /// Parsed JSON body, empty when there is none
    pub body: Map<String, Value>,
}

/// Machine result plus what callers need beyond the decision
#[derive(Debug, Clone)]
struct Evaluation {
    outcome: Outcome,
    subject: Option<Uuid>,
    params: HashMap<String, String>,
}

impl Evaluation {
    fn terminal(outcome: Outcome, subject: Option<Uuid>) -> Self {
        Self {
            outcome,
            subject,
            params: HashMap::new(),
        }
    }
}

/// Orchestrates matching, authentication, enrichment and rule evaluation
pub struct AccessEnforcer {
    matcher: ResourceMatcher,
    engine: RuleEngine,
    verifier: TokenVerifier,
    enricher: ContextEnricher,
}

impl AccessEnforcer {
    /// Compile the policy file into an enforcer. Fails on any invalid policy or rule.
    pub fn new(policies: &PoliciesConfig, verifier: TokenVerifier, enricher: ContextEnricher) -> GatewayResult<Self> {
        Ok(Self {
            matcher: ResourceMatcher::new(policies)?,
            engine: RuleEngine::build(&policies.model, &policies.policies)?,
            verifier,
            enricher,
        })
    }

    pub fn enricher(&self) -> &ContextEnricher {
        &self.enricher
    }

    /// Decide an HTTP request
    #[instrument(skip(self, request), fields(method = %request.method, path = request.path))]
    pub async fn enforce(&self, request: AccessRequest<'_>) -> GatewayResult<Decision> {
        let started = Instant::now();
        let AccessRequest {
            method,
            path,
            token,
            body,
        } = request;

        let evaluation = self.evaluate(method, path, token, body, true).await;
        let evaluation = self.finish(method, path, started, evaluation)?;
        Ok(evaluation.outcome.into_decision())
    }

    /// Decide a WebSocket handshake
    #[instrument(skip(self, token), fields(path = path))]
    pub async fn enforce_stream(&self, path: &str, token: Option<&str>) -> GatewayResult<StreamDecision> {
        let started = Instant::now();
        let method = Method::GET;

        let evaluation = self
            .evaluate(&method, path, token, Map::new(), false)
            .await
            .map(|mut evaluation| {
                if let Outcome::Allow(_) = evaluation.outcome {
                    let chat_id = evaluation.params.get("chat_id").and_then(|v| v.parse::<i64>().ok());
                    let client_id = evaluation.params.get("user_id").and_then(|v| Uuid::parse_str(v).ok());
                    if chat_id.is_none() || client_id.is_none() {
                        evaluation.outcome = Outcome::Deny(DenyReason::MissingStreamTarget);
                    }
                }
                evaluation
            });
        let evaluation = self.finish(&method, path, started, evaluation)?;

        let decision = match evaluation.outcome {
            Outcome::Allow(url) => StreamDecision {
                decision: Decision::allow(url),
                chat_id: evaluation.params.get("chat_id").and_then(|v| v.parse().ok()),
                client_id: evaluation.params.get("user_id").and_then(|v| Uuid::parse_str(v).ok()),
            },
            _ => StreamDecision::deny(),
        };
        Ok(decision)
    }

    async fn evaluate(
        &self,
        method: &Method,
        path: &str,
        token: Option<&str>,
        body: Map<String, Value>,
        check_whitelist: bool,
    ) -> GatewayResult<Evaluation> {
        if has_dot_segments(path) {
            return Ok(Evaluation::terminal(Outcome::Deny(DenyReason::DotSegment), None));
        }

        // WHITELIST_CHECK
        if check_whitelist {
            if let Some(policy) = self.matcher.match_whitelist(path, method) {
                return Ok(Evaluation::terminal(Outcome::AllowWhitelist(policy.entrypoint.clone()), None));
            }
        }

        // AUTH_CHECK
        let Some(token) = token else {
            return Ok(Evaluation::terminal(Outcome::Deny(DenyReason::NoToken), None));
        };
        let Some(claims) = self.verifier.verify(token) else {
            return Ok(Evaluation::terminal(Outcome::Deny(DenyReason::InvalidToken), None));
        };
        let subject = Some(claims.sub);

        // RESOURCE_MATCH
        let found = self.matcher.match_resource(path, method);
        if found.policy.is_none() {
            return Ok(Evaluation::terminal(Outcome::Deny(DenyReason::NoResourceMatch), subject));
        }
        let context = ResourceContext {
            resource: path.to_string(),
            params: found.params,
            body,
        };

        // ENRICH
        let enriched = self.enricher.enrich(claims, &context).await?;

        // ABAC_EVAL
        let allowed = self
            .engine
            .evaluate(&enriched.to_attributes(), &context.to_attributes(), method.as_str());
        let outcome = if !allowed {
            Outcome::Deny(DenyReason::RuleRejected)
        } else {
            match self.matcher.resolve_service(path, method) {
                Some(policy) => Outcome::Allow(policy.entrypoint.clone()),
                None => Outcome::Deny(DenyReason::NoServiceResolved),
            }
        };

        Ok(Evaluation {
            outcome,
            subject,
            params: context.params,
        })
    }

    /// Audit and measure a finished evaluation
    fn finish(
        &self,
        method: &Method,
        path: &str,
        started: Instant,
        evaluation: GatewayResult<Evaluation>,
    ) -> GatewayResult<Evaluation> {
        match evaluation {
            Ok(evaluation) => {
                record_decision(evaluation.outcome.label(), started.elapsed());
                log_decision(&DecisionRecord {
                    method,
                    path,
                    subject: evaluation.subject,
                    outcome: evaluation.outcome.label(),
                    service: evaluation.outcome.service(),
                });
                Ok(evaluation)
            }
            Err(e) => {
                record_decision("enrichment_error", started.elapsed());
                error!(%method, path, error = %e, "Enforcement aborted");
                Err(e)
            }
        }
    }
}
