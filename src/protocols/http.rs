//! # HTTP Proxy Forwarder
//!
//! Forwards an allowed request to the resolved service entrypoint and streams the response
//! back. The path and query are preserved verbatim and appended to the entrypoint path;
//! request headers are passed through except for hop-by-hop headers and `Host`.
//!
//! Request bodies are either already buffered (JSON bodies the enforcer had to read) or
//! streamed straight from the client. Response bodies are always streamed.
//!
//! The request timeout bounds the wait for response headers and then every gap between
//! response body chunks. A stalled body ends the response with an error.

use crate::core::config::TimeoutConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::observability::metrics::record_upstream_error;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, warn};
use url::Url;

/// Headers that describe a single connection and never cross the proxy
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Chunks buffered between the client body and the upstream request
const STREAM_BUFFER: usize = 16;

/// Body to send upstream
#[derive(Debug)]
pub enum ForwardBody {
    /// Body already read by the gateway
    Buffered(Bytes),
    /// Body still on the wire, piped chunk by chunk
    Streaming(Body),
}

impl ForwardBody {
    pub fn empty() -> Self {
        Self::Buffered(Bytes::new())
    }
}

/// One request to forward
pub struct ForwardRequest<'a> {
    pub method: &'a Method,
    /// Raw request path, as received
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: ForwardBody,
}

/// Streaming HTTP client shared by all requests
#[derive(Debug, Clone)]
pub struct ProxyForwarder {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl ProxyForwarder {
    pub fn new(timeouts: &TimeoutConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.upstream_connect)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout: timeouts.upstream_request,
        })
    }

    /// Send `request` to `entrypoint` and relay the upstream response.
    ///
    /// Any upstream status is relayed unchanged. Connection failures become
    /// [`GatewayError::UpstreamUnavailable`] and a missed header deadline
    /// [`GatewayError::UpstreamTimeout`].
    #[instrument(skip(self, request), fields(service = %entrypoint, method = %request.method, path = request.path))]
    pub async fn forward(&self, entrypoint: &Url, request: ForwardRequest<'_>) -> GatewayResult<Response> {
        let url = upstream_url(entrypoint, request.path, request.query);
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| GatewayError::protocol("http", format!("Unsupported method: {}", e)))?;

        let mut builder = self.client.request(method, url.clone());
        for (name, value) in request.headers {
            if is_forwardable_request_header(name) {
                builder = builder.header(name.as_str(), value.as_bytes());
            }
        }

        builder = match request.body {
            ForwardBody::Buffered(bytes) if bytes.is_empty() => builder,
            ForwardBody::Buffered(bytes) => builder.body(bytes),
            ForwardBody::Streaming(body) => builder.body(stream_body(body)),
        };

        debug!(upstream = %url, "Forwarding request");

        let upstream = match timeout(self.request_timeout, builder.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                record_upstream_error("unavailable");
                warn!(upstream = %url, error = %e, "Upstream request failed");
                return Err(GatewayError::upstream_unavailable(entrypoint.as_str(), e.to_string()));
            }
            Err(_) => {
                record_upstream_error("timeout");
                warn!(upstream = %url, timeout_ms = self.request_timeout.as_millis() as u64, "Upstream request timed out");
                return Err(GatewayError::UpstreamTimeout {
                    timeout_ms: self.request_timeout.as_millis() as u64,
                });
            }
        };

        relay_response(upstream, self.request_timeout)
    }
}

/// Entrypoint with the request path appended to its own path and the query preserved
pub fn upstream_url(entrypoint: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = entrypoint.clone();
    let base = entrypoint.path().trim_end_matches('/');
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    url.set_path(&format!("{}{}", base, path));
    url.set_query(query.filter(|q| !q.is_empty()));
    url
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_forwardable_request_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    // the client sets both for the outgoing body
    !is_hop_by_hop(name) && name != "host" && name != "content-length"
}

/// Pipe a client body into a `Send + Sync` stream for the upstream request
fn stream_body(body: Body) -> reqwest::Body {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(STREAM_BUFFER);
    tokio::spawn(async move {
        let mut chunks = body.into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
            let failed = chunk.is_err();
            if tx.send(chunk).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(ReceiverStream::new(rx))
}

/// Upstream body that fails once no chunk arrives within `idle_timeout`
fn bounded_body(
    upstream: reqwest::Response,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    tokio_stream::StreamExt::timeout(upstream.bytes_stream(), idle_timeout).map(move |chunk| match chunk {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
        Err(_) => {
            record_upstream_error("body_timeout");
            warn!(timeout_ms = idle_timeout.as_millis() as u64, "Upstream body stalled");
            Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream body stalled"))
        }
    })
}

fn relay_response(upstream: reqwest::Response, idle_timeout: Duration) -> GatewayResult<Response> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| GatewayError::protocol("http", format!("Invalid upstream status: {}", e)))?;

    let mut headers = HeaderMap::with_capacity(upstream.headers().len());
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    let mut response = Response::new(Body::from_stream(bounded_body(upstream, idle_timeout)));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
