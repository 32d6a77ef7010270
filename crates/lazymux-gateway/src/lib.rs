//! Lazymux Gateway
//!
//! MCP aggregator that exposes many backend servers through two tools:
//! - Hierarchical browsing of a pre-generated tool catalog
//! - Path-addressed execution, routed to the owning backend
//! - Background warm-up of eager backends with fast-fail, lazy connect for the rest
//! - stdio, SSE and streamable HTTP backend transports

pub mod logging;
pub mod mcp;
pub mod pool;
pub mod router;
pub mod server;

pub use mcp::LazymuxHandler;
pub use pool::{
    BackendCapabilities, BackendClient, BackendStatus, ClientError, ClientFactory, ConnectionPool,
    ConnectionState, ConnectionStatus, PoolConfig, PreloadHandle, PreloadReport, ReadyBackend,
    TransportFactory,
};
pub use router::{CategoryListing, DispatchRouter, WrapCache, WrapDecision};
pub use server::{load_catalog, GatewayServer, HealthResponse};
