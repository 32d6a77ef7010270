//! Streamable HTTP transport for remote MCP servers
//!
//! A single endpoint receives every JSON-RPC POST; responses come back as
//! JSON or as an SSE-upgraded body, handled by rmcp's client transport.
//! Configured headers are baked into the reqwest client as default headers
//! so they're sent on every request.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lazymux_core::{ToolDescriptor, TransportType};
use reqwest::header::HeaderMap;
use rmcp::model::{CallToolResult, JsonObject};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use tracing::{debug, info};

use super::{
    build_header_map, parse_endpoint, BackendCapabilities, BackendClient, BackendSession,
    ClientError,
};

pub struct StreamableHttpTransport {
    backend: String,
    url: url::Url,
    headers: HeaderMap,
    handshake_timeout: Duration,
    call_timeout: Duration,
    client: Option<reqwest::Client>,
    session: Option<BackendSession>,
}

impl StreamableHttpTransport {
    pub fn new(
        backend: String,
        url: &str,
        headers: HashMap<String, String>,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let url = parse_endpoint(url)?;
        let headers = build_header_map(&headers)?;
        Ok(Self {
            backend,
            url,
            headers,
            handshake_timeout,
            call_timeout,
            client: None,
            session: None,
        })
    }

    fn session(&self) -> Result<&BackendSession, ClientError> {
        self.session
            .as_ref()
            .ok_or_else(|| ClientError::Connect("session not initialized".to_string()))
    }
}

#[async_trait]
impl BackendClient for StreamableHttpTransport {
    async fn connect(&mut self) -> Result<(), ClientError> {
        info!(backend = %self.backend, url = %self.url, "Connecting to streamable HTTP server");
        let client = reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .connect_timeout(self.handshake_timeout)
            .build()
            .map_err(|e| ClientError::Connect(format!("failed to build HTTP client: {}", e)))?;
        debug!(
            backend = %self.backend,
            header_count = self.headers.len(),
            "HTTP client ready"
        );
        self.client = Some(client);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<BackendCapabilities, ClientError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| ClientError::Connect("HTTP client not built".to_string()))?;
        let config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, config);

        let (session, capabilities) = BackendSession::start(
            &self.backend,
            transport,
            self.handshake_timeout,
            self.call_timeout,
        )
        .await?;
        self.session = Some(session);
        Ok(capabilities)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.session()?.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ClientError> {
        self.session()?.call_tool(name, arguments).await
    }

    async fn close(&self) {
        if let Some(session) = &self.session {
            session.close().await;
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn description(&self) -> String {
        format!("streamable-http:{}", self.url)
    }
}
