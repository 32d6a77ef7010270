//! Front-facing MCP handler
//!
//! Callers see exactly two tools. Everything behind them is reached through
//! the [`DispatchRouter`].

use std::sync::Arc;

use lazymux_core::{GatewayError, NodeKind};
use rmcp::{
    model::*, service::RequestContext, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::router::DispatchRouter;

pub const GET_TOOLS_IN_CATEGORY: &str = "get_tools_in_category";
pub const EXECUTE_TOOL: &str = "execute_tool";

#[derive(Clone)]
pub struct LazymuxHandler {
    router: Arc<DispatchRouter>,
    name: String,
    version: String,
}

impl LazymuxHandler {
    pub fn new(router: Arc<DispatchRouter>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            router,
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        &self.router
    }

    /// The two advertised tools, with the root categories spelled out so a
    /// caller knows where to start.
    pub fn tools(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                GET_TOOLS_IN_CATEGORY,
                self.browse_description(),
                schema(json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Category or tool path, e.g. \"github\" or \"github/create_issue\". Empty for the root."
                        }
                    }
                })),
            ),
            Tool::new(
                EXECUTE_TOOL,
                "Run a tool by its full path. Look the tool up with get_tools_in_category first to learn its input schema.",
                schema(json!({
                    "type": "object",
                    "properties": {
                        "tool_path": {
                            "type": "string",
                            "description": "Full tool path, e.g. \"github/create_issue\""
                        },
                        "arguments": {
                            "type": "object",
                            "description": "Arguments for the tool, matching its input schema"
                        }
                    },
                    "required": ["tool_path"]
                })),
            ),
        ]
    }

    fn browse_description(&self) -> String {
        let catalog = self.router.catalog();
        let mut description = String::from(
            "Browse the tool hierarchy. A category path lists its children; a tool path returns the tool's description and input schema.",
        );
        if let Some(overview) = catalog.overview() {
            description.push_str("\n\n");
            description.push_str(overview);
        }
        if let Ok(children) = catalog.children("") {
            if !children.is_empty() {
                description.push_str("\n\nAvailable categories:");
                for child in children.iter().filter(|c| c.kind == NodeKind::Category) {
                    description.push_str(&format!("\n- {}: {}", child.name, child.summary));
                }
            }
        }
        description
    }

    /// Dispatch one front-facing call. Unknown tool names and missing paths
    /// are protocol errors; gateway failures come back as `is_error` results.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<CallToolResult, McpError> {
        let mut arguments = arguments.unwrap_or_default();
        match name {
            GET_TOOLS_IN_CATEGORY => {
                let path = string_arg(&arguments, &["path"])?.unwrap_or_default();
                debug!(path = %path, "get_tools_in_category");
                match self.router.get_tools_in_category(&path) {
                    Ok(listing) => json_result(&listing),
                    Err(e) => Ok(error_result(&e)),
                }
            }
            EXECUTE_TOOL => {
                let path = string_arg(&arguments, &["tool_path", "path"])?.ok_or_else(|| {
                    McpError::invalid_params("execute_tool requires \"tool_path\"", None)
                })?;
                let tool_arguments = arguments.remove("arguments").unwrap_or(Value::Null);
                info!(path = %path, "execute_tool");
                match self.router.execute_tool(&path, tool_arguments).await {
                    Ok(result) => Ok(result),
                    Err(e) => {
                        warn!(path = %path, error = %e, code = e.code(), "execute_tool failed");
                        Ok(error_result(&e))
                    }
                }
            }
            other => Err(McpError::invalid_params(
                format!(
                    "unknown tool \"{}\"; available: {}, {}",
                    other, GET_TOOLS_IN_CATEGORY, EXECUTE_TOOL
                ),
                None,
            )),
        }
    }
}

impl ServerHandler for LazymuxHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(false),
                })
                .build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            instructions: Some(
                "Lazymux aggregates many MCP servers behind two tools. Call get_tools_in_category \
                 to browse, then execute_tool with a full tool path."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.dispatch(&params.name, params.arguments).await
    }
}

fn schema(value: Value) -> Arc<JsonObject> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

/// First present key among `keys`; a non-string value is rejected.
fn string_arg(arguments: &JsonObject, keys: &[&str]) -> Result<Option<String>, McpError> {
    for key in keys {
        match arguments.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(Some(s.clone())),
            Some(_) => {
                return Err(McpError::invalid_params(
                    format!("\"{}\" must be a string", key),
                    None,
                ))
            }
        }
    }
    Ok(None)
}

fn json_result<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("failed to encode response: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

pub fn error_result(err: &GatewayError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(err.to_json().to_string())])
}
