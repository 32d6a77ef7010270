//! Gateway error taxonomy.
//!
//! Every failure surfaces to a caller as one of these variants. Connect-time
//! failures are recorded per backend and only ever reported to calls that
//! address that backend.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// No catalog node at the path, or a non-tool path given to `execute_tool`
    #[error("catalog path not found: '{path}'")]
    CatalogPathNotFound { path: String },

    /// Rejected when the transport client was constructed
    #[error("backend '{backend}' is misconfigured: {reason}")]
    BackendMisconfigured { backend: String, reason: String },

    /// Fast-fail timeout or handshake error while connecting
    #[error("backend '{backend}' failed to connect: {reason}")]
    BackendConnectFailed { backend: String, reason: String },

    /// Still connecting past the bounded wait, or the backend is failed
    #[error("backend '{backend}' is unavailable: {reason}")]
    BackendConnectionUnavailable { backend: String, reason: String },

    /// Malformed listing or response
    #[error("backend '{backend}' protocol error: {reason}")]
    BackendProtocolError { backend: String, reason: String },

    /// The tool ran and reported an application-level failure
    #[error("tool '{tool}' on backend '{backend}' failed: {message}")]
    BackendToolError {
        backend: String,
        tool: String,
        message: String,
    },

    /// Arguments rejected by the backend's validation
    #[error("invalid arguments for tool '{tool}' on backend '{backend}': {message}")]
    ArgumentValidationError {
        backend: String,
        tool: String,
        message: String,
    },
}

impl GatewayError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::CatalogPathNotFound { path: path.into() }
    }

    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BackendConnectionUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::CatalogPathNotFound { .. } => "catalog_path_not_found",
            Self::BackendMisconfigured { .. } => "backend_misconfigured",
            Self::BackendConnectFailed { .. } => "backend_connect_failed",
            Self::BackendConnectionUnavailable { .. } => "backend_connection_unavailable",
            Self::BackendProtocolError { .. } => "backend_protocol_error",
            Self::BackendToolError { .. } => "backend_tool_error",
            Self::ArgumentValidationError { .. } => "argument_validation_error",
        }
    }

    pub fn backend(&self) -> Option<&str> {
        match self {
            Self::CatalogPathNotFound { .. } => None,
            Self::BackendMisconfigured { backend, .. }
            | Self::BackendConnectFailed { backend, .. }
            | Self::BackendConnectionUnavailable { backend, .. }
            | Self::BackendProtocolError { backend, .. }
            | Self::BackendToolError { backend, .. }
            | Self::ArgumentValidationError { backend, .. } => Some(backend),
        }
    }

    pub fn tool(&self) -> Option<&str> {
        match self {
            Self::BackendToolError { tool, .. } | Self::ArgumentValidationError { tool, .. } => {
                Some(tool)
            }
            _ => None,
        }
    }

    /// JSON body used when the error is returned to a caller as tool output
    pub fn to_json(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(backend) = self.backend() {
            body["backend"] = backend.into();
        }
        if let Some(tool) = self.tool() {
            body["tool"] = tool.into();
        }
        body
    }
}
