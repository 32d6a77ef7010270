//! Streamable HTTP end-to-end tests
//!
//! A real rmcp backend is served over axum and reached through the real
//! transport client, and the gateway's own HTTP front end is exercised
//! with an rmcp client:
//! - backend tool listing and calls through pool and router
//! - envelope detection from a backend's invalid-params message
//! - an unreachable backend failing fast without affecting others
//! - the two-tool front end and `/health`

use std::sync::Arc;
use std::time::Duration;

use lazymux_core::{BackendDescriptor, CatalogBuilder, GatewayError, LazymuxConfig, ToolDescriptor};
use lazymux_gateway::pool::{ConnectionPool, ConnectionStatus, PoolConfig, TransportFactory};
use lazymux_gateway::router::{DispatchRouter, WrapDecision};
use lazymux_gateway::{GatewayServer, LazymuxHandler};
use rmcp::{
    model::*,
    service::RequestContext,
    transport::{
        streamable_http_server::{
            session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
        },
        StreamableHttpClientTransport,
    },
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
};
use serde_json::{json, Value};
use tests::fixtures::{catalog_dir, envelope_schema};
use tests::result_text;
use tokio_util::sync::CancellationToken;

/// Backend with an `echo` tool taking flat arguments and a `create_task`
/// tool that wants everything under `params`.
#[derive(Clone)]
struct DemoBackend;

impl DemoBackend {
    fn tools() -> Vec<Tool> {
        vec![
            Tool::new(
                "echo",
                "Echo the arguments back",
                object(json!({
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                })),
            ),
            Tool::new(
                "create_task",
                "Create a task",
                object(envelope_schema("params")),
            ),
        ]
    }
}

fn object(value: Value) -> Arc<JsonObject> {
    Arc::new(serde_json::from_value(value).unwrap())
}

impl ServerHandler for DemoBackend {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "demo-backend".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(Self::tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = params.arguments.unwrap_or_default();
        match params.name.as_ref() {
            "echo" => Ok(CallToolResult::success(vec![Content::text(
                serde_json::to_string(&arguments).unwrap(),
            )])),
            "create_task" => match arguments.get("params") {
                Some(Value::Object(inner)) => Ok(CallToolResult::success(vec![Content::text(
                    format!("created {}", inner.get("content").and_then(Value::as_str).unwrap_or("?")),
                )])),
                _ => Err(McpError::invalid_params(
                    "Invalid arguments: missing required property 'params'",
                    None,
                )),
            },
            other => Err(McpError::invalid_params(format!("unknown tool {}", other), None)),
        }
    }
}

/// Serve `router` on a random local port; returns the base URL.
async fn serve(router: axum::Router, ct: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { ct.cancelled().await })
            .await
            .unwrap();
    });

    // Give server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;
    format!("http://127.0.0.1:{}", addr.port())
}

async fn start_backend(ct: &CancellationToken) -> String {
    let service = StreamableHttpService::new(
        || Ok(DemoBackend),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            stateful_mode: true,
            sse_keep_alive: Some(Duration::from_secs(15)),
            sse_retry: Some(Duration::from_secs(3)),
            cancellation_token: ct.child_token(),
        },
    );
    let base = serve(axum::Router::new().nest_service("/mcp", service), ct.clone()).await;
    format!("{}/mcp", base)
}

/// A port nothing listens on
async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{}/mcp", port)
}

fn demo_catalog() -> lazymux_core::Catalog {
    CatalogBuilder::new()
        .backend_tools(
            "demo",
            "Demo backend",
            vec![
                ToolDescriptor::new("echo", "Echo the arguments back"),
                ToolDescriptor::new("create_task", "Create a task")
                    .with_schema(envelope_schema("params")),
            ],
        )
        .backend_tools(
            "context7",
            "Library docs",
            vec![ToolDescriptor::new("search", "Search docs")],
        )
        .build()
        .unwrap()
}

fn pool_config() -> PoolConfig {
    PoolConfig {
        preload_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(10),
        acquire_timeout: Duration::from_secs(10),
        call_timeout: Duration::from_secs(10),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_backend_calls_through_real_transport() {
    let ct = CancellationToken::new();
    let url = start_backend(&ct).await;

    let pool = Arc::new(ConnectionPool::new(
        vec![BackendDescriptor::streamable_http("demo", url).lazy(true)],
        Arc::new(TransportFactory::new(Duration::from_secs(10), Duration::from_secs(10))),
        pool_config(),
    ));
    let router = DispatchRouter::new(Arc::new(demo_catalog()), pool.clone());

    let ready = pool.acquire("demo").await.expect("demo backend connects");
    let names: Vec<&str> = ready.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "create_task"]);
    assert_eq!(ready.capabilities.server_name, "demo-backend");

    let result = router
        .execute_tool("demo/echo", json!({ "text": "hi" }))
        .await
        .unwrap();
    assert_eq!(result_text(&result), r#"{"text":"hi"}"#);

    let result = router
        .execute_tool("demo/create_task", json!({ "content": "Buy milk" }))
        .await
        .unwrap();
    assert_eq!(result_text(&result), "created Buy milk");
    assert_eq!(
        router.wrap_cache().get("demo", "create_task"),
        Some(WrapDecision::Envelope("params".to_string()))
    );

    pool.shutdown().await;
    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_backend_fails_fast_in_isolation() {
    let ct = CancellationToken::new();
    let url = start_backend(&ct).await;

    let pool = Arc::new(ConnectionPool::new(
        vec![
            BackendDescriptor::streamable_http("context7", closed_port_url().await),
            BackendDescriptor::streamable_http("demo", url),
        ],
        Arc::new(TransportFactory::new(Duration::from_secs(5), Duration::from_secs(10))),
        pool_config(),
    ));

    let started = std::time::Instant::now();
    let report = pool.preload().wait().await;
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(report.ready, vec!["demo"]);
    assert_eq!(report.failed[0].0, "context7");

    let router = DispatchRouter::new(Arc::new(demo_catalog()), pool.clone());
    let err = router
        .execute_tool("context7/search", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::BackendConnectionUnavailable { .. }));

    let result = router
        .execute_tool("demo/echo", json!({ "text": "still fine" }))
        .await
        .unwrap();
    assert!(result_text(&result).contains("still fine"));

    pool.shutdown().await;
    ct.cancel();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gateway_front_end_over_http() {
    let ct = CancellationToken::new();
    let backend_url = start_backend(&ct).await;

    let dir = catalog_dir(&[(
        "demo",
        vec![
            ToolDescriptor::new("echo", "Echo the arguments back"),
            ToolDescriptor::new("create_task", "Create a task").with_schema(envelope_schema("params")),
        ],
    )]);
    let config = LazymuxConfig::from_json_str(
        &json!({
            "mcpProxy": { "type": "streamable-http", "hierarchyPath": dir.path() },
            "mcpServers": {
                "demo": { "transportType": "streamable-http", "url": backend_url }
            }
        })
        .to_string(),
    )
    .unwrap();

    let server = GatewayServer::from_config(config).unwrap();
    server.start_preload();
    let base = serve(server.build_router(ct.child_token()), ct.clone()).await;

    // Front-end MCP client
    let transport = StreamableHttpClientTransport::from_uri(format!("{}/mcp", base));
    let client = ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "test-client".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
    .serve(transport)
    .await
    .expect("client should connect");

    let tools = client.list_tools(Default::default()).await.unwrap();
    let names: Vec<&str> = tools.tools.iter().map(|t| t.name.as_ref()).collect();
    assert_eq!(names, vec!["get_tools_in_category", "execute_tool"]);

    let listing = client
        .call_tool(CallToolRequestParams {
            name: "get_tools_in_category".into(),
            arguments: json!({ "path": "demo" }).as_object().cloned(),
            task: None,
            meta: None,
        })
        .await
        .unwrap();
    let body: Value = serde_json::from_str(&result_text(&listing)).unwrap();
    assert_eq!(body["kind"], "category");
    assert_eq!(body["children"].as_array().unwrap().len(), 2);

    let executed = client
        .call_tool(CallToolRequestParams {
            name: "execute_tool".into(),
            arguments: json!({ "tool_path": "demo/create_task", "arguments": { "content": "Ship it" } })
                .as_object()
                .cloned(),
            task: None,
            meta: None,
        })
        .await
        .unwrap();
    assert_eq!(result_text(&executed), "created Ship it");

    let missing = client
        .call_tool(CallToolRequestParams {
            name: "execute_tool".into(),
            arguments: json!({ "tool_path": "demo/nope" }).as_object().cloned(),
            task: None,
            meta: None,
        })
        .await
        .unwrap();
    assert_eq!(missing.is_error, Some(true));
    let body: Value = serde_json::from_str(&result_text(&missing)).unwrap();
    assert_eq!(body["error"], "catalog_path_not_found");

    // Health reports the backend as ready
    let health: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["backends"][0]["name"], "demo");
    assert_eq!(
        health["backends"][0]["state"],
        serde_json::to_value(ConnectionStatus::Ready).unwrap()
    );

    client.cancel().await.ok();
    server.pool().shutdown().await;
    ct.cancel();
}

#[test]
fn test_handler_advertises_two_tools() {
    let pool = ConnectionPool::new(vec![], Arc::new(TransportFactory::default()), PoolConfig::default());
    let router = DispatchRouter::new(Arc::new(demo_catalog()), Arc::new(pool));
    let handler = LazymuxHandler::new(Arc::new(router), "lazymux", "0.1.0");

    let info = handler.get_info();
    assert_eq!(info.server_info.name, "lazymux");
    assert!(info.capabilities.tools.is_some());
    assert_eq!(handler.tools().len(), 2);
}
