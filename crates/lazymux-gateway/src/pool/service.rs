//! Connection Pool / Preloader
//!
//! Owns one [`Connection`] per configured backend. Eager backends are warmed
//! up concurrently by [`ConnectionPool::preload`], each attempt bounded by the
//! fast-fail timeout; lazy backends connect on their first `acquire`.
//! A broken backend only ever affects calls addressed to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lazymux_core::{BackendDescriptor, GatewayError, GatewayResult, ProxyOptions, TransportType};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionState, ConnectionStatus, ReadyBackend, WaitOutcome};
use super::transport::ClientFactory;

/// Timing knobs for the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Fast-fail bound on a preload attempt
    pub preload_timeout: Duration,
    /// Bound on a lazy connect attempt
    pub connect_timeout: Duration,
    /// How long `acquire` waits on an in-flight connect
    pub acquire_timeout: Duration,
    /// Default per-call bound, overridable per backend
    pub call_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            preload_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ProxyOptions> for PoolConfig {
    fn from(options: &ProxyOptions) -> Self {
        Self {
            preload_timeout: options.preload_timeout(),
            connect_timeout: options.connect_timeout(),
            acquire_timeout: options.acquire_timeout(),
            call_timeout: options.call_timeout(),
        }
    }
}

/// Per-backend status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub name: String,
    pub transport: TransportType,
    pub lazy: bool,
    pub state: ConnectionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub connect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_count: Option<usize>,
}

/// Result of a completed warm-up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub ready: Vec<String>,
    /// (backend, reason)
    pub failed: Vec<(String, String)>,
}

impl PreloadReport {
    pub fn total(&self) -> usize {
        self.ready.len() + self.failed.len()
    }
}

/// Completion signal for the warm-up started by [`ConnectionPool::preload`]
pub struct PreloadHandle {
    tasks: Vec<(Arc<Connection>, Option<JoinHandle<()>>)>,
    /// Bound for attempts this warm-up did not start itself
    settle_wait: Duration,
}

impl PreloadHandle {
    /// Backends covered by this warm-up
    pub fn backends(&self) -> Vec<&str> {
        self.tasks.iter().map(|(c, _)| c.name()).collect()
    }

    /// Wait for every warm-up task to finish and report the outcome.
    pub async fn wait(self) -> PreloadReport {
        let mut report = PreloadReport::default();
        for (connection, task) in self.tasks {
            if let Some(task) = task {
                if let Err(e) = task.await {
                    warn!(backend = %connection.name(), error = %e, "Preload task aborted");
                }
            }
            match connection.state() {
                ConnectionState::Ready(_) => report.ready.push(connection.name().to_string()),
                ConnectionState::Failed(failure) => report
                    .failed
                    .push((connection.name().to_string(), failure.reason)),
                // Started by someone else, still running
                ConnectionState::Cold | ConnectionState::Connecting => {
                    match connection.wait_settled(self.settle_wait).await {
                        WaitOutcome::Ready(_) => report.ready.push(connection.name().to_string()),
                        WaitOutcome::Failed(failure) => report
                            .failed
                            .push((connection.name().to_string(), failure.reason)),
                        WaitOutcome::TimedOut => report
                            .failed
                            .push((connection.name().to_string(), "still connecting".to_string())),
                    }
                }
            }
        }
        info!(
            ready = report.ready.len(),
            failed = report.failed.len(),
            "Preload complete"
        );
        report
    }
}

pub struct ConnectionPool {
    connections: HashMap<String, Arc<Connection>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Construct every backend's transport client. Misconfigured backends are
    /// recorded as Failed and never reach connect.
    pub fn new(
        descriptors: Vec<BackendDescriptor>,
        factory: Arc<dyn ClientFactory>,
        config: PoolConfig,
    ) -> Self {
        let mut connections = HashMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let name = descriptor.name.clone();
            let connection = Arc::new(Connection::new(descriptor, factory.as_ref()));
            if connections.insert(name.clone(), connection).is_some() {
                warn!(backend = %name, "Duplicate backend name; keeping the last definition");
            }
        }
        info!(backends = connections.len(), "Connection pool created");
        Self {
            connections,
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn contains(&self, backend: &str) -> bool {
        self.connections.contains_key(backend)
    }

    /// Configured backend names, sorted
    pub fn backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Start one concurrent connect task per eager backend.
    pub fn preload(&self) -> PreloadHandle {
        let mut tasks: Vec<_> = self
            .connections
            .values()
            .filter(|c| !c.descriptor().lazy)
            .map(|c| {
                let task = c.begin_connect(self.config.preload_timeout);
                (Arc::clone(c), task)
            })
            .collect();
        tasks.sort_by(|(a, _), (b, _)| a.name().cmp(b.name()));

        let started = tasks.iter().filter(|(_, t)| t.is_some()).count();
        info!(
            eager = tasks.len(),
            started,
            timeout = ?self.config.preload_timeout,
            "Preloading backends"
        );
        PreloadHandle {
            tasks,
            settle_wait: self.config.connect_timeout.max(self.config.preload_timeout),
        }
    }

    /// Get a ready backend, connecting it if needed.
    ///
    /// Ready returns immediately, Failed returns the recorded failure, and
    /// Cold triggers the single-flight connect. A caller waiting on an
    /// in-flight connect gives up after the acquire timeout; the connect
    /// itself keeps running.
    pub async fn acquire(&self, backend: &str) -> GatewayResult<ReadyBackend> {
        let connection = self
            .connections
            .get(backend)
            .ok_or_else(|| GatewayError::unavailable(backend, "backend is not configured"))?;

        match connection.state() {
            ConnectionState::Ready(ready) => return Ok(ready),
            ConnectionState::Failed(failure) => return Err(failure.to_error(backend, false)),
            ConnectionState::Cold => {
                if connection.begin_connect(self.config.connect_timeout).is_some() {
                    debug!(backend = %backend, "Lazy connect triggered by call");
                }
            }
            ConnectionState::Connecting => {
                debug!(backend = %backend, "Waiting for in-flight connect");
            }
        }

        match connection.wait_settled(self.config.acquire_timeout).await {
            WaitOutcome::Ready(ready) => Ok(ready),
            WaitOutcome::Failed(failure) => Err(failure.to_error(backend, true)),
            WaitOutcome::TimedOut => Err(GatewayError::unavailable(
                backend,
                format!(
                    "still connecting after {:?}",
                    self.config.acquire_timeout
                ),
            )),
        }
    }

    pub fn status(&self) -> Vec<BackendStatus> {
        let mut statuses: Vec<BackendStatus> = self
            .connections
            .values()
            .map(|c| {
                let state = c.state();
                let (last_error, tool_count) = match &state {
                    ConnectionState::Failed(f) => (Some(f.reason.clone()), None),
                    ConnectionState::Ready(r) => (None, Some(r.tools.len())),
                    _ => (None, None),
                };
                BackendStatus {
                    name: c.name().to_string(),
                    transport: c.descriptor().transport_type(),
                    lazy: c.descriptor().lazy,
                    state: state.status(),
                    last_error,
                    connect_attempts: c.connect_attempts(),
                    tool_count,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Close every live session.
    pub async fn shutdown(&self) {
        let closes = self.connections.values().map(|c| c.close());
        futures::future::join_all(closes).await;
        info!("Connection pool shut down");
    }
}
