use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Wire transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportType {
    /// Spawned local process speaking MCP over stdin/stdout
    #[serde(rename = "stdio")]
    Stdio,
    /// Legacy server-sent-event stream plus POST endpoint
    #[serde(rename = "sse")]
    Sse,
    /// Streamable HTTP (single endpoint, optional SSE upgrade)
    #[serde(rename = "streamable-http", alias = "http", alias = "streamable_http")]
    StreamableHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }

    /// Whether the transport talks to a remote endpoint over HTTP
    pub fn is_stream_based(&self) -> bool {
        !matches!(self, Self::Stdio)
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters, one variant per transport kind.
///
/// Values are taken as already resolved: credentials referenced from `env`
/// or `headers` have been substituted before a descriptor reaches the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportSpec {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl TransportSpec {
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::Stdio { .. } => TransportType::Stdio,
            Self::Sse { .. } => TransportType::Sse,
            Self::StreamableHttp { .. } => TransportType::StreamableHttp,
        }
    }

    /// Get URL for stream-based transports
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Sse { url, .. } | Self::StreamableHttp { url, .. } => Some(url),
            Self::Stdio { .. } => None,
        }
    }

    /// Short human-readable form for logs, e.g. `stdio:npx` or `sse:https://host/sse`
    pub fn description(&self) -> String {
        match self {
            Self::Stdio { command, .. } => format!("stdio:{}", command),
            Self::Sse { url, .. } => format!("sse:{}", url),
            Self::StreamableHttp { url, .. } => format!("streamable-http:{}", url),
        }
    }
}

/// Allow/block list applied to a backend's tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFilterMode {
    #[default]
    Allow,
    Block,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFilter {
    #[serde(default)]
    pub mode: ToolFilterMode,
    #[serde(default)]
    pub list: Vec<String>,
}

impl ToolFilter {
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ToolFilterMode::Allow,
            list: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn block<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ToolFilterMode::Block,
            list: names.into_iter().map(Into::into).collect(),
        }
    }

    /// An empty allow list admits everything.
    pub fn permits(&self, tool_name: &str) -> bool {
        let listed = self.list.iter().any(|t| t == tool_name);
        match self.mode {
            ToolFilterMode::Allow => self.list.is_empty() || listed,
            ToolFilterMode::Block => !listed,
        }
    }
}

/// Immutable description of one configured backend, owned by the connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub transport: TransportSpec,
    /// Deferred until the first tool call instead of warmed up at startup
    #[serde(default)]
    pub lazy: bool,
    /// Per-call timeout override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_filter: Option<ToolFilter>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, transport: TransportSpec) -> Self {
        Self {
            name: name.into(),
            transport,
            lazy: false,
            call_timeout: None,
            tool_filter: None,
        }
    }

    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::new(
            name,
            TransportSpec::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        )
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportSpec::Sse {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(
            name,
            TransportSpec::StreamableHttp {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn with_tool_filter(mut self, filter: ToolFilter) -> Self {
        self.tool_filter = Some(filter);
        self
    }

    pub fn transport_type(&self) -> TransportType {
        self.transport.transport_type()
    }
}

/// A tool as reported by a backend's `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: serde_json::json!({ "type": "object" }),
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}
