//! Dispatch Router
//!
//! The two public operations. Paths resolve through the catalog; calls reach
//! backends only through the connection pool.

mod envelope;

use std::sync::Arc;

use lazymux_core::catalog::normalize_path;
use lazymux_core::{Catalog, ChildEntry, GatewayError, GatewayResult, NodeKind, ToolTarget};
use rmcp::model::{CallToolResult, JsonObject};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::pool::{ClientError, ConnectionPool};

pub use envelope::{
    detect_missing_field, envelope_field, result_text, schema_declares_object, ArgumentAdapter,
    MissingField, WrapCache, WrapDecision,
};

/// Response of `get_tools_in_category`; `kind` tells the two shapes apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CategoryListing {
    /// Immediate children with one-line summaries, no schemas
    Category {
        path: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        description: String,
        children: Vec<ChildEntry>,
    },
    /// Drill-down on a single tool
    Tool {
        path: String,
        description: String,
        backend: String,
        tool: String,
        #[serde(rename = "inputSchema")]
        input_schema: Value,
    },
}

pub struct DispatchRouter {
    catalog: Arc<Catalog>,
    pool: Arc<ConnectionPool>,
    adapter: ArgumentAdapter,
}

impl DispatchRouter {
    pub fn new(catalog: Arc<Catalog>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            catalog,
            pool,
            adapter: ArgumentAdapter::new(),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn wrap_cache(&self) -> &WrapCache {
        self.adapter.cache()
    }

    /// List a category's children, or describe a tool in full.
    pub fn get_tools_in_category(&self, path: &str) -> GatewayResult<CategoryListing> {
        let path = normalize_path(path);
        let node = self
            .catalog
            .lookup(path)
            .ok_or_else(|| GatewayError::not_found(path))?;

        match (node.kind, &node.target) {
            (NodeKind::Tool, Some(target)) => Ok(CategoryListing::Tool {
                path: node.path.clone(),
                description: node.description.clone(),
                backend: target.backend.clone(),
                tool: target.tool.clone(),
                input_schema: node
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
            }),
            _ => {
                let children = self
                    .catalog
                    .children(path)
                    .map_err(|_| GatewayError::not_found(path))?;
                let description = if path.is_empty() {
                    self.catalog.overview().unwrap_or_default().to_string()
                } else {
                    node.description.clone()
                };
                debug!(path = %path, children = children.len(), "Listed category");
                Ok(CategoryListing::Category {
                    path: node.path.clone(),
                    description,
                    children,
                })
            }
        }
    }

    /// Run a tool on its backend. A backend's own `is_error` result is
    /// returned as `Ok`, untouched.
    pub async fn execute_tool(&self, path: &str, arguments: Value) -> GatewayResult<CallToolResult> {
        let path = normalize_path(path);
        let node = self
            .catalog
            .lookup(path)
            .filter(|n| n.is_tool())
            .ok_or_else(|| GatewayError::not_found(path))?;
        let target = node
            .target
            .as_ref()
            .ok_or_else(|| GatewayError::not_found(path))?;

        let arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => JsonObject::new(),
            other => {
                return Err(GatewayError::ArgumentValidationError {
                    backend: target.backend.clone(),
                    tool: target.tool.clone(),
                    message: format!("arguments must be a JSON object, got {}", json_kind(&other)),
                })
            }
        };

        let backend = self.pool.acquire(&target.backend).await?;
        debug!(backend = %target.backend, tool = %target.tool, path = %path, "Executing tool");

        self.adapter
            .call(
                backend.client.as_ref(),
                target,
                node.input_schema.as_ref(),
                arguments,
            )
            .await
            .map_err(|e| call_error(target, e))
    }
}

/// Annotate a transport error with the tool it happened on
fn call_error(target: &ToolTarget, err: ClientError) -> GatewayError {
    let backend = target.backend.clone();
    let tool = target.tool.clone();
    warn!(backend = %backend, tool = %tool, error = %err, "Tool call failed");
    match err {
        ClientError::Tool { code, message, .. }
            if code == rmcp::model::ErrorCode::INVALID_PARAMS.0 =>
        {
            GatewayError::ArgumentValidationError {
                backend,
                tool,
                message,
            }
        }
        ClientError::Tool { message, .. } => GatewayError::BackendToolError {
            backend,
            tool,
            message,
        },
        ClientError::Timeout(after) => GatewayError::BackendToolError {
            backend,
            tool,
            message: format!("tool call timed out after {:?}", after),
        },
        ClientError::Connect(reason) => GatewayError::BackendConnectionUnavailable { backend, reason },
        ClientError::Misconfigured(reason) => GatewayError::BackendMisconfigured { backend, reason },
        ClientError::Handshake(reason) | ClientError::Protocol(reason) => {
            GatewayError::BackendProtocolError { backend, reason }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
