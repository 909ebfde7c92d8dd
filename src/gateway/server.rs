//! # Gateway Server
//!
//! The axum application. Two routes belong to the gateway itself:
//!
//! - `GET /openapi.json`: merged OpenAPI document of all services
//! - `GET /gateway/health`: liveness with the ownership store status
//!
//! Every other path and method lands in [`gateway_entry`], which enforces access and then
//! either proxies the request or opens a WebSocket tunnel. Denials never reveal why: HTTP
//! gets 404 "Content not found", WebSocket gets close code 1008.

use crate::auth::{AccessEnforcer, AccessRequest, TokenVerifier};
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult, DENIED_MESSAGE};
use crate::core::policies::PoliciesConfig;
use crate::core::types::StreamDecision;
use crate::enrichment::{ContextEnricher, OwnershipStore};
use crate::gateway::openapi::{AggregatedSchema, SchemaAggregator};
use crate::observability::metrics::record_tunnel;
use crate::protocols::http::{ForwardBody, ForwardRequest, ProxyForwarder};
use crate::protocols::websocket::{close_with, tunnel_url, StreamForwarder};
use axum::{
    body::Body,
    extract::{ws::close_code, Request, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::borrow::Cow;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, instrument, warn, Span};

/// Shared state for all handlers
#[derive(Clone)]
pub struct ServerState {
    pub enforcer: Arc<AccessEnforcer>,
    pub proxy: ProxyForwarder,
    pub streams: StreamForwarder,
    pub schemas: Arc<SchemaAggregator>,
    /// Largest JSON body buffered for rule evaluation
    pub max_json_body_size: usize,
}

impl ServerState {
    /// Wire every component from the gateway settings and the policy file
    pub fn new(
        config: &GatewayConfig,
        policies: &PoliciesConfig,
        store: Arc<dyn OwnershipStore>,
    ) -> GatewayResult<Self> {
        let verifier = TokenVerifier::from_config(&config.auth);
        let enricher = ContextEnricher::new(store, config.timeouts.enrichment);
        let enforcer = AccessEnforcer::new(policies, verifier, enricher)?;

        Ok(Self {
            enforcer: Arc::new(enforcer),
            proxy: ProxyForwarder::new(&config.timeouts)?,
            streams: StreamForwarder::new(&config.timeouts),
            schemas: Arc::new(SchemaAggregator::new(&policies.services, &config.timeouts)?),
            max_json_body_size: config.server.max_json_body_size,
        })
    }
}

/// Build the gateway application
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/openapi.json", get(openapi_document))
        .route("/gateway/health", get(health_check))
        .route("/", any(gateway_entry))
        .route("/*path", any(gateway_entry))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span with method and path only. Query strings may carry tokens.
fn request_span(request: &Request) -> Span {
    info_span!("request", method = %request.method(), path = request.uri().path())
}

/// Main gateway server
pub struct GatewayServer {
    router: Router,
    bind_addr: SocketAddr,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, state: ServerState) -> GatewayResult<Self> {
        Ok(Self {
            router: build_router(state),
            bind_addr: config.listen_address()?,
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind the configured address and serve until `shutdown` resolves
    #[instrument(skip(self, shutdown), fields(bind_addr = %self.bind_addr))]
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", self.bind_addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        info!("Gateway listening on {}", local);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Catch-all: enforce, then proxy or tunnel
async fn gateway_entry(
    State(state): State<ServerState>,
    ws: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let raw_path = parts.uri.path();
    let path = decode_path(raw_path);
    let query = parts.uri.query();

    if let Some(ws) = ws {
        return stream_entry(state, ws, &path, query).await;
    }

    let (body_attributes, forward_body) = match read_body(&parts.headers, body, state.max_json_body_size).await {
        Ok(read) => read,
        Err(e) => return e.into_response(),
    };

    let decision = state
        .enforcer
        .enforce(AccessRequest {
            method: &parts.method,
            path: &path,
            token: TokenVerifier::bearer_token(&parts.headers),
            body: body_attributes,
        })
        .await;

    let service = match decision {
        Ok(decision) if decision.access_allowed => decision.redirect_service,
        Ok(_) => None,
        // enrichment failure: deny with a transient error instead of a 404
        Err(e) => return e.into_response(),
    };
    let Some(service) = service else {
        return GatewayError::denied(format!("{} {}", parts.method, path)).into_response();
    };

    state
        .proxy
        .forward(
            &service,
            ForwardRequest {
                method: &parts.method,
                path: raw_path,
                query,
                headers: &parts.headers,
                body: forward_body,
            },
        )
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

async fn stream_entry(state: ServerState, ws: WebSocketUpgrade, path: &str, query: Option<&str>) -> Response {
    let token = query.and_then(query_token);
    let decision = state.enforcer.enforce_stream(path, token.as_deref()).await;

    match decision {
        Ok(StreamDecision {
            decision,
            chat_id: Some(chat_id),
            client_id: Some(client_id),
        }) if decision.access_allowed => {
            let Some(entrypoint) = decision.redirect_service else {
                return reject(ws, close_code::POLICY, DENIED_MESSAGE);
            };
            match tunnel_url(&entrypoint, chat_id, client_id) {
                Ok(backend) => {
                    let streams = state.streams.clone();
                    ws.on_upgrade(move |socket| async move { streams.tunnel(socket, backend).await })
                }
                Err(e) => {
                    warn!(error = %e, "Cannot build tunnel address");
                    reject(ws, close_code::ERROR, "Service temporarily unavailable")
                }
            }
        }
        Ok(_) => reject(ws, close_code::POLICY, DENIED_MESSAGE),
        Err(_) => reject(ws, close_code::ERROR, "Service temporarily unavailable"),
    }
}

/// Accept the upgrade only to close it right away
fn reject(ws: WebSocketUpgrade, code: u16, reason: &'static str) -> Response {
    record_tunnel("denied");
    ws.on_upgrade(move |socket| close_with(socket, code, reason))
}

/// Rule-visible body attributes plus the body to forward.
///
/// Only JSON bodies within `limit` are read; everything else streams through untouched.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> GatewayResult<(Map<String, Value>, ForwardBody)> {
    if !is_json(headers) {
        return Ok((Map::new(), ForwardBody::Streaming(body)));
    }

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if matches!(declared, Some(length) if length > limit) {
        return Ok((Map::new(), ForwardBody::Streaming(body)));
    }

    // undeclared length over the limit, or a broken client body
    let bytes: Bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| GatewayError::PayloadTooLarge { limit })?;

    let attributes = match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Ok((attributes, ForwardBody::Buffered(bytes)))
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn decode_path(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

fn query_token(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

async fn openapi_document(State(state): State<ServerState>) -> Json<AggregatedSchema> {
    Json(state.schemas.aggregate().await)
}

async fn health_check(State(state): State<ServerState>) -> impl IntoResponse {
    let database = match state.enforcer.enricher().store().health_check().await {
        Ok(true) => "ok",
        Ok(false) => "unavailable",
        Err(e) => {
            warn!(error = %e, "Ownership store health check failed");
            "unavailable"
        }
    };

    let health_info = json!({
        "status": "healthy",
        "service": "policy-gateway",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": database,
        }
    });

    (StatusCode::OK, Json(health_info))
}
