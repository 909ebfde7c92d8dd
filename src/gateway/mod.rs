pub mod openapi;
pub mod server;

pub use openapi::{AggregatedSchema, SchemaAggregator};
pub use server::{build_router, GatewayServer, ServerState};
