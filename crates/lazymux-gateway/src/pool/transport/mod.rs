//! Transport Clients for backend MCP servers
//!
//! One `BackendClient` implementation per transport kind, chosen by the
//! descriptor's transport discriminator in [`TransportFactory`]. Every
//! implementation reports failures as a [`ClientError`]; raw transport errors
//! never leave this module uninterpreted.

mod http;
mod session;
mod sse;
mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use lazymux_core::{BackendDescriptor, ToolDescriptor, TransportSpec, TransportType};
use rmcp::model::{CallToolResult, ErrorCode, JsonObject};
use rmcp::service::ServiceError;
use serde::Serialize;
use thiserror::Error;

pub use http::StreamableHttpTransport;
pub use session::{BackendSession, LazymuxClientHandler};
pub use sse::{SseEvent, SseParser, SseTransport};
pub use stdio::{validate_stdio_command, StdioTransport, ALLOWED_BARE_COMMANDS};

/// Default bound on a tool call round trip
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on connect + protocol handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Rejected at construction; never reaches connect
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("connect failed: {0}")]
    Connect(String),

    /// Protocol handshake failed or the server answered nonsense
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// JSON-RPC error answered by the backend for a request
    #[error("backend error {code}: {message}")]
    Tool {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Whether a `Tool` error is a JSON-RPC invalid-params rejection
    pub fn is_invalid_params(&self) -> bool {
        matches!(self, Self::Tool { code, .. } if *code == ErrorCode::INVALID_PARAMS.0)
    }
}

impl From<ServiceError> for ClientError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => Self::Tool {
                code: data.code.0,
                message: data.message.to_string(),
                data: data.data,
            },
            ServiceError::Timeout { timeout } => Self::Timeout(timeout),
            ServiceError::TransportClosed => Self::Connect("transport closed".to_string()),
            ServiceError::TransportSend(e) => Self::Connect(format!("transport send failed: {}", e)),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// What the backend announced during the handshake
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendCapabilities {
    pub server_name: String,
    pub server_version: String,
    pub protocol_version: String,
    pub tools: bool,
}

/// Uniform session interface over one wire transport.
///
/// `connect` and `initialize` run once, before the client is shared; calls
/// after that take `&self`. rmcp sessions multiplex requests by id, so
/// concurrent `call_tool`s on one client are safe.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Establish the underlying channel (spawn the process, open the stream)
    async fn connect(&mut self) -> Result<(), ClientError>;

    /// Perform the MCP handshake
    async fn initialize(&mut self) -> Result<BackendCapabilities, ClientError>;

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError>;

    /// Application-level failures come back as `Ok` with `is_error` set
    async fn call_tool(&self, name: &str, arguments: JsonObject)
        -> Result<CallToolResult, ClientError>;

    async fn close(&self);

    fn transport_type(&self) -> TransportType;

    /// Get a description for logging
    fn description(&self) -> String;
}

/// Creates transport clients for descriptors. Construction is where
/// configuration is validated.
pub trait ClientFactory: Send + Sync {
    fn create(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn BackendClient>, ClientError>;
}

/// Production factory: one client type per transport kind
#[derive(Debug, Clone)]
pub struct TransportFactory {
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl Default for TransportFactory {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl TransportFactory {
    pub fn new(handshake_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            handshake_timeout,
            call_timeout,
        }
    }
}

impl ClientFactory for TransportFactory {
    fn create(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn BackendClient>, ClientError> {
        let call_timeout = descriptor.call_timeout.unwrap_or(self.call_timeout);
        let name = descriptor.name.clone();
        Ok(match &descriptor.transport {
            TransportSpec::Stdio { command, args, env } => Box::new(StdioTransport::new(
                name,
                command.clone(),
                args.clone(),
                env.clone(),
                self.handshake_timeout,
                call_timeout,
            )?),
            TransportSpec::Sse { url, headers } => Box::new(SseTransport::new(
                name,
                url,
                headers.clone(),
                self.handshake_timeout,
                call_timeout,
            )?),
            TransportSpec::StreamableHttp { url, headers } => {
                Box::new(StreamableHttpTransport::new(
                    name,
                    url,
                    headers.clone(),
                    self.handshake_timeout,
                    call_timeout,
                )?)
            }
        })
    }
}

/// Parse and check a stream endpoint URL
pub(crate) fn parse_endpoint(url: &str) -> Result<url::Url, ClientError> {
    if url.trim().is_empty() {
        return Err(ClientError::Misconfigured("endpoint URL is empty".to_string()));
    }
    let parsed = url::Url::parse(url.trim())
        .map_err(|e| ClientError::Misconfigured(format!("invalid endpoint URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ClientError::Misconfigured(format!(
            "unsupported URL scheme '{}' in '{}'",
            other, url
        ))),
    }
}

/// Build the default header map sent on every request
pub(crate) fn build_header_map(
    headers: &std::collections::HashMap<String, String>,
) -> Result<reqwest::header::HeaderMap, ClientError> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ClientError::Misconfigured(format!("invalid header name '{}': {}", key, e)))?;
        let header_value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
            ClientError::Misconfigured(format!("invalid value for header '{}': {}", key, e))
        })?;
        header_map.insert(header_name, header_value);
    }
    Ok(header_map)
}
