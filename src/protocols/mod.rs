//! # Protocol Forwarders
//!
//! - [`http`]: streaming reverse proxy for allowed HTTP requests
//! - [`websocket`]: bidirectional tunnel for allowed WebSocket handshakes

pub mod http;
pub mod websocket;

pub use http::{ForwardBody, ForwardRequest, ProxyForwarder};
pub use websocket::StreamForwarder;
