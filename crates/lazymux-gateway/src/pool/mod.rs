//! Backend pool - MCP connection management
//!
//! - **transport**: one `BackendClient` per transport kind (stdio, SSE, streamable HTTP)
//! - **connection**: per-backend `Cold -> Connecting -> Ready | Failed` state machine
//! - **service**: `ConnectionPool` with concurrent preload and single-flight acquire

mod connection;
mod service;
pub mod transport;

pub use connection::{
    ConnectFailure, Connection, ConnectionState, ConnectionStatus, FailureKind, ReadyBackend,
    WaitOutcome,
};
pub use service::{BackendStatus, ConnectionPool, PoolConfig, PreloadHandle, PreloadReport};
pub use transport::{
    BackendCapabilities, BackendClient, ClientError, ClientFactory, TransportFactory,
};
