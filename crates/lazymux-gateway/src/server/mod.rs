//! Gateway server
//!
//! Wires config, catalog, pool and router together, starts the background
//! warm-up and serves the two-tool MCP surface over stdio or streamable HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{extract::State, response::Json, routing::get, Router};
use lazymux_core::{Catalog, FrontTransport, LazymuxConfig};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::mcp::LazymuxHandler;
use crate::pool::{BackendStatus, ClientFactory, ConnectionPool, PoolConfig, PreloadHandle, TransportFactory};
use crate::router::DispatchRouter;

/// Load the catalog, prune filtered tools and reconcile it with the
/// configured backends.
pub fn load_catalog(config: &LazymuxConfig) -> anyhow::Result<Catalog> {
    let path = &config.proxy.hierarchy_path;
    let catalog = Catalog::load(path)
        .with_context(|| format!("failed to load catalog from {}", path.display()))?;

    for backend in catalog.backends() {
        if !config.servers.contains_key(backend) {
            warn!(backend = %backend, "Catalog backend has no configuration; its tools will be unavailable");
        }
    }

    Ok(catalog
        .apply_filters(&config.tool_filters())
        .ensure_backends(config.servers.keys()))
}

pub struct GatewayServer {
    config: LazymuxConfig,
    router: Arc<DispatchRouter>,
}

impl GatewayServer {
    /// Build with the real transports.
    pub fn from_config(config: LazymuxConfig) -> anyhow::Result<Self> {
        let options = &config.proxy.options;
        let factory = TransportFactory::new(options.connect_timeout(), options.call_timeout());
        Self::with_factory(config, Arc::new(factory))
    }

    pub fn with_factory(config: LazymuxConfig, factory: Arc<dyn ClientFactory>) -> anyhow::Result<Self> {
        let catalog = load_catalog(&config)?;
        Ok(Self::with_catalog(config, catalog, factory))
    }

    pub fn with_catalog(config: LazymuxConfig, catalog: Catalog, factory: Arc<dyn ClientFactory>) -> Self {
        let pool = ConnectionPool::new(
            config.descriptors(),
            factory,
            PoolConfig::from(&config.proxy.options),
        );
        info!(
            backends = pool.backends().len(),
            categories = catalog.backends().len(),
            "Gateway assembled"
        );
        let router = Arc::new(DispatchRouter::new(Arc::new(catalog), Arc::new(pool)));
        Self { config, router }
    }

    pub fn config(&self) -> &LazymuxConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<DispatchRouter> {
        &self.router
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        self.router.pool()
    }

    pub fn handler(&self) -> LazymuxHandler {
        LazymuxHandler::new(
            self.router.clone(),
            self.config.proxy.name.clone(),
            self.config.proxy.version.clone(),
        )
    }

    /// Start warming up eager backends and log the outcome once it settles.
    pub fn start_preload(&self) -> tokio::task::JoinHandle<()> {
        let handle: PreloadHandle = self.pool().preload();
        tokio::spawn(async move {
            let report = handle.wait().await;
            for (backend, reason) in &report.failed {
                warn!(backend = %backend, reason = %reason, "Backend unavailable after preload");
            }
        })
    }

    /// HTTP routes: the MCP endpoint at `/mcp` and `/health`.
    pub fn build_router(&self, cancellation_token: CancellationToken) -> Router {
        let handler = self.handler();
        let mcp_service = StreamableHttpService::new(
            move || {
                debug!("Creating handler instance for MCP session");
                Ok(handler.clone())
            },
            LocalSessionManager::default().into(),
            StreamableHttpServerConfig {
                stateful_mode: true,
                sse_keep_alive: Some(Duration::from_secs(30)),
                sse_retry: Some(Duration::from_secs(3)),
                cancellation_token,
            },
        );

        let health_state = HealthState {
            pool: self.pool().clone(),
            name: self.config.proxy.name.clone(),
            version: self.config.proxy.version.clone(),
        };

        Router::new()
            .route("/health", get(health))
            .with_state(health_state)
            .nest_service("/mcp", mcp_service)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the front connection closes or ctrl-c, then close every
    /// backend session.
    pub async fn run(self) -> anyhow::Result<()> {
        self.start_preload();

        let result = match self.config.proxy.transport {
            FrontTransport::Stdio => self.serve_stdio().await,
            FrontTransport::StreamableHttp => self.serve_http().await,
        };

        self.pool().shutdown().await;
        result
    }

    async fn serve_stdio(&self) -> anyhow::Result<()> {
        info!(name = %self.config.proxy.name, "Serving MCP over stdio");
        let service = self
            .handler()
            .serve(rmcp::transport::stdio())
            .await
            .context("failed to start stdio MCP server")?;
        let cancel = service.cancellation_token();

        tokio::select! {
            quit = service.waiting() => {
                let reason = quit.context("stdio MCP server task failed")?;
                info!(reason = ?reason, "Front connection closed");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                cancel.cancel();
            }
        }
        Ok(())
    }

    async fn serve_http(&self) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .proxy
            .addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", self.config.proxy.addr))?;
        let cancellation_token = CancellationToken::new();
        let app = self.build_router(cancellation_token.child_token());

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        info!(addr = %addr, "Serving MCP over streamable HTTP at /mcp");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for ctrl-c");
                }
                info!("Shutdown requested");
                cancellation_token.cancel();
            })
            .await
            .context("HTTP server error")
    }
}

#[derive(Clone)]
struct HealthState {
    pool: Arc<ConnectionPool>,
    name: String,
    version: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub name: String,
    pub version: String,
    pub backends: Vec<BackendStatus>,
}

async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    debug!("Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        name: state.name,
        version: state.version,
        backends: state.pool.status(),
    })
}
