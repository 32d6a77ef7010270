//! Per-backend connection state machine
//!
//! `Cold -> Connecting -> Ready | Failed`, never backwards. The state lives in
//! a `watch` channel: the Cold -> Connecting swap is a compare-and-set on the
//! sender, so exactly one caller wins and spawns the connect task. Everyone
//! else waits on a receiver until the state settles.
//!
//! The connect task is detached from whoever triggered it. A waiter giving up
//! (timeout or cancellation) never aborts the attempt, and its outcome is
//! kept for later callers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lazymux_core::{BackendDescriptor, GatewayError, ToolDescriptor};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::transport::{BackendCapabilities, BackendClient, ClientError, ClientFactory};

/// A connected backend, cheap to clone and share between callers
#[derive(Clone)]
pub struct ReadyBackend {
    pub client: Arc<dyn BackendClient>,
    pub capabilities: BackendCapabilities,
    pub tools: Arc<Vec<ToolDescriptor>>,
}

impl std::fmt::Debug for ReadyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyBackend")
            .field("client", &self.client.description())
            .field("capabilities", &self.capabilities)
            .field("tools", &self.tools.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected when the transport client was constructed
    Misconfigured,
    /// Spawn, network, handshake or fast-fail timeout
    Connect,
    /// The backend connected but answered the tool listing badly
    Protocol,
}

/// Why a backend ended up Failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl ConnectFailure {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    fn from_client_error(err: &ClientError, listing: bool) -> Self {
        match err {
            ClientError::Misconfigured(reason) => Self::new(FailureKind::Misconfigured, reason.clone()),
            ClientError::Tool { .. } | ClientError::Protocol(_) if listing => {
                Self::new(FailureKind::Protocol, format!("tool listing failed: {}", err))
            }
            other => Self::new(FailureKind::Connect, other.to_string()),
        }
    }

    /// Error for a caller. `observed` is true when the caller waited on the
    /// attempt that produced this failure; later callers see the backend as
    /// unavailable.
    pub fn to_error(&self, backend: &str, observed: bool) -> GatewayError {
        let backend = backend.to_string();
        let reason = self.reason.clone();
        match (self.kind, observed) {
            (FailureKind::Misconfigured, _) => GatewayError::BackendMisconfigured { backend, reason },
            (FailureKind::Connect, true) => GatewayError::BackendConnectFailed { backend, reason },
            (FailureKind::Protocol, true) => GatewayError::BackendProtocolError { backend, reason },
            (_, false) => GatewayError::BackendConnectionUnavailable { backend, reason },
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
    Cold,
    Connecting,
    Ready(ReadyBackend),
    Failed(ConnectFailure),
}

impl ConnectionState {
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Ready(_) | Self::Failed(_))
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            Self::Cold => ConnectionStatus::Cold,
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Ready(_) => ConnectionStatus::Ready,
            Self::Failed(_) => ConnectionStatus::Failed,
        }
    }
}

/// Serializable view of [`ConnectionState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Cold,
    Connecting,
    Ready,
    Failed,
}

/// Outcome of waiting for a connection to settle
#[derive(Debug)]
pub enum WaitOutcome {
    Ready(ReadyBackend),
    Failed(ConnectFailure),
    /// Still connecting when the bounded wait expired
    TimedOut,
}

pub struct Connection {
    descriptor: BackendDescriptor,
    state: watch::Sender<ConnectionState>,
    /// Constructed client, taken by the one connect task
    pending: Mutex<Option<Box<dyn BackendClient>>>,
    attempts: AtomicU32,
}

impl Connection {
    /// Build the transport client now. A construction error leaves the
    /// connection Failed before any connect can happen.
    pub fn new(descriptor: BackendDescriptor, factory: &dyn ClientFactory) -> Self {
        let (state, pending) = match factory.create(&descriptor) {
            Ok(client) => (ConnectionState::Cold, Some(client)),
            Err(e) => {
                warn!(
                    backend = %descriptor.name,
                    transport = %descriptor.transport_type(),
                    error = %e,
                    "Backend rejected at configuration"
                );
                let failure = match e {
                    ClientError::Misconfigured(reason) => ConnectFailure::new(FailureKind::Misconfigured, reason),
                    other => ConnectFailure::new(FailureKind::Misconfigured, other.to_string()),
                };
                (ConnectionState::Failed(failure), None)
            }
        };
        let (state, _) = watch::channel(state);
        Self {
            descriptor,
            state,
            pending: Mutex::new(pending),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Connect attempts started so far (at most one per process run)
    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Move Cold -> Connecting and spawn the connect task. Returns `None` if
    /// another caller already did, or the connection is not Cold.
    pub fn begin_connect(self: &Arc<Self>, attempt_timeout: Duration) -> Option<JoinHandle<()>> {
        let won = self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Cold) {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !won {
            return None;
        }

        debug!(backend = %self.name(), timeout = ?attempt_timeout, "Connect attempt started");
        let connection = Arc::clone(self);
        Some(tokio::spawn(async move {
            connection.run_connect(attempt_timeout).await;
        }))
    }

    async fn run_connect(&self, attempt_timeout: Duration) {
        let client = self.pending.lock().take();
        let Some(mut client) = client else {
            self.state.send_replace(ConnectionState::Failed(ConnectFailure::new(
                FailureKind::Connect,
                "transport client already consumed",
            )));
            return;
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let outcome = tokio::time::timeout(attempt_timeout, async {
            client
                .connect()
                .await
                .map_err(|e| ConnectFailure::from_client_error(&e, false))?;
            let capabilities = client
                .initialize()
                .await
                .map_err(|e| ConnectFailure::from_client_error(&e, false))?;
            let tools = client
                .list_tools()
                .await
                .map_err(|e| ConnectFailure::from_client_error(&e, true))?;
            Ok::<_, ConnectFailure>((capabilities, tools))
        })
        .await
        .unwrap_or_else(|_| {
            Err(ConnectFailure::new(
                FailureKind::Connect,
                format!("connect timed out after {:?}", attempt_timeout),
            ))
        });

        let next = match outcome {
            Ok((capabilities, tools)) => {
                info!(
                    backend = %self.name(),
                    transport = %client.transport_type(),
                    tools = tools.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backend ready"
                );
                ConnectionState::Ready(ReadyBackend {
                    client: Arc::from(client),
                    capabilities,
                    tools: Arc::new(tools),
                })
            }
            Err(failure) => {
                error!(
                    backend = %self.name(),
                    target = %client.description(),
                    reason = %failure.reason,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Backend failed to connect"
                );
                client.close().await;
                ConnectionState::Failed(failure)
            }
        };
        self.state.send_replace(next);
    }

    /// Wait up to `wait` for the state to leave Cold/Connecting.
    pub async fn wait_settled(&self, wait: Duration) -> WaitOutcome {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(wait, async {
            // The sender lives as long as `self`, so the channel cannot close here.
            rx.wait_for(ConnectionState::is_settled)
                .await
                .map(|state| (*state).clone())
                .ok()
        })
        .await;

        match settled {
            Ok(Some(ConnectionState::Ready(ready))) => WaitOutcome::Ready(ready),
            Ok(Some(ConnectionState::Failed(failure))) => WaitOutcome::Failed(failure),
            _ => WaitOutcome::TimedOut,
        }
    }

    /// Close the live session, if any
    pub async fn close(&self) {
        if let ConnectionState::Ready(ready) = self.state() {
            ready.client.close().await;
        }
    }
}
