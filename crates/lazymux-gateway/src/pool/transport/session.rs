//! Live MCP session shared by every transport kind
//!
//! Each transport prepares its own wire channel, then hands it to
//! [`BackendSession::start`], which runs the rmcp client handshake and keeps
//! the running service for list/call/close.

use std::time::Duration;

use lazymux_core::ToolDescriptor;
use parking_lot::Mutex;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
    JsonObject, LoggingLevel, LoggingMessageNotificationParam,
};
use rmcp::service::{NotificationContext, Peer, RunningService};
use rmcp::transport::IntoTransport;
use rmcp::{RoleClient, ServiceExt};
use tracing::{debug, info, warn};

use super::{BackendCapabilities, ClientError};

/// Type alias for the MCP client service
pub type McpClient = RunningService<RoleClient, LazymuxClientHandler>;

/// Client handler announced to backends
#[derive(Debug, Clone)]
pub struct LazymuxClientHandler {
    info: ClientInfo,
    backend: String,
}

impl LazymuxClientHandler {
    pub fn new(backend: &str) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("lazymux-{}", backend),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("Lazymux Gateway".to_string()),
                    icons: None,
                    website_url: None,
                    ..Default::default()
                },
                meta: None,
            },
            backend: backend.to_string(),
        }
    }
}

impl rmcp::ClientHandler for LazymuxClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    // The catalog is fixed for the process lifetime; a changed tool list only
    // takes effect after the catalog is regenerated.
    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let backend = self.backend.clone();
        async move {
            warn!(backend = %backend, "Backend tool list changed; catalog not updated until regenerated");
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let backend = self.backend.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match params.level {
                LoggingLevel::Debug | LoggingLevel::Info | LoggingLevel::Notice => {
                    debug!(backend = %backend, logger = ?params.logger, "Backend log: {}", message)
                }
                LoggingLevel::Warning => {
                    warn!(backend = %backend, logger = ?params.logger, "Backend log: {}", message)
                }
                _ => warn!(backend = %backend, level = ?params.level, logger = ?params.logger, "Backend log: {}", message),
            }
        }
    }
}

/// Running rmcp client plus the timeouts that bound its calls
pub struct BackendSession {
    backend: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpClient>>,
    call_timeout: Duration,
}

impl BackendSession {
    /// Run the MCP handshake over `transport`, bounded by `handshake_timeout`.
    pub async fn start<T, E, A>(
        backend: &str,
        transport: T,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<(Self, BackendCapabilities), ClientError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let handler = LazymuxClientHandler::new(backend);
        let client = match tokio::time::timeout(handshake_timeout, handler.serve(transport)).await {
            Ok(Ok(client)) => client,
            Ok(Err(e)) => return Err(ClientError::Handshake(e.to_string())),
            Err(_) => return Err(ClientError::Timeout(handshake_timeout)),
        };

        let capabilities = match client.peer_info() {
            Some(server) => BackendCapabilities {
                server_name: server.server_info.name.clone(),
                server_version: server.server_info.version.clone(),
                protocol_version: server.protocol_version.to_string(),
                tools: server.capabilities.tools.is_some(),
            },
            None => BackendCapabilities::default(),
        };
        info!(
            backend = %backend,
            server = %capabilities.server_name,
            version = %capabilities.server_version,
            "MCP handshake complete"
        );

        let session = Self {
            backend: backend.to_string(),
            peer: client.peer().clone(),
            service: Mutex::new(Some(client)),
            call_timeout,
        };
        Ok((session, capabilities))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        let tools = tokio::time::timeout(self.call_timeout, self.peer.list_all_tools())
            .await
            .map_err(|_| ClientError::Timeout(self.call_timeout))??;

        Ok(tools
            .into_iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.map(|d| d.to_string()),
                input_schema: serde_json::Value::Object((*tool.input_schema).clone()),
            })
            .collect())
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ClientError> {
        debug!(backend = %self.backend, tool = %name, "Calling backend tool");
        let params = CallToolRequestParams {
            name: name.to_string().into(),
            arguments: Some(arguments),
            task: None,
            meta: None,
        };
        tokio::time::timeout(self.call_timeout, self.peer.call_tool(params))
            .await
            .map_err(|_| ClientError::Timeout(self.call_timeout))?
            .map_err(ClientError::from)
    }

    /// Cancel the running service. Later calls fail with a connect error.
    pub async fn close(&self) {
        let service = self.service.lock().take();
        if let Some(service) = service {
            if let Err(e) = service.cancel().await {
                debug!(backend = %self.backend, error = %e, "Error while closing session");
            }
            info!(backend = %self.backend, "Backend session closed");
        }
    }
}
