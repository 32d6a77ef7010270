//! Gateway configuration file model.
//!
//! The file keeps the `mcpProxy` / `mcpServers` layout used by existing proxy
//! configurations. `${VAR}` references in commands, arguments, URLs, env and
//! header values are expanded from the process environment at load time.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::backend::{BackendDescriptor, ToolFilter, TransportSpec, TransportType};

lazy_static! {
    static ref ENV_REF: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LazymuxConfig {
    #[serde(rename = "mcpProxy", default)]
    pub proxy: ProxyConfig,
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerEntry>,
}

/// How the gateway itself is exposed to callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrontTransport {
    #[default]
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "streamable-http", alias = "http", alias = "streamable_http")]
    StreamableHttp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Listen address for the streamable HTTP front end
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(rename = "type", default)]
    pub transport: FrontTransport,
    #[serde(default = "default_hierarchy_path")]
    pub hierarchy_path: PathBuf,
    #[serde(default)]
    pub options: ProxyOptions,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            version: default_version(),
            addr: default_addr(),
            transport: FrontTransport::default(),
            hierarchy_path: default_hierarchy_path(),
            options: ProxyOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyOptions {
    /// Default laziness for servers that do not set their own
    #[serde(default)]
    pub lazy_load: bool,
    /// Warm up every backend at startup regardless of per-server laziness
    #[serde(default)]
    pub preload_all: bool,
    #[serde(default)]
    pub tool_filter: Option<ToolFilter>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_preload_timeout")]
    pub preload_timeout_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            lazy_load: false,
            preload_all: false,
            tool_filter: None,
            log_level: default_log_level(),
            log_dir: None,
            preload_timeout_secs: default_preload_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            acquire_timeout_secs: default_acquire_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl ProxyOptions {
    pub fn preload_timeout(&self) -> Duration {
        Duration::from_secs(self.preload_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// One `mcpServers` entry. Transport fields sit at the top level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    #[serde(default)]
    pub transport_type: Option<TransportType>,

    // stdio
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,

    // sse / streamable-http
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-call timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub options: ServerOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOptions {
    #[serde(default)]
    pub lazy_load: Option<bool>,
    #[serde(default)]
    pub tool_filter: Option<ToolFilter>,
}

impl ServerEntry {
    /// Explicit `transportType`, else `command` means stdio, else `url` means sse.
    pub fn resolved_transport(&self) -> TransportType {
        if let Some(kind) = self.transport_type {
            return kind;
        }
        if self.command.is_some() {
            TransportType::Stdio
        } else if self.url.is_some() {
            TransportType::Sse
        } else {
            TransportType::Stdio
        }
    }

    fn to_descriptor(&self, name: &str, defaults: &ProxyOptions) -> BackendDescriptor {
        let url = || self.url.clone().unwrap_or_default();
        let transport = match self.resolved_transport() {
            TransportType::Stdio => TransportSpec::Stdio {
                command: self.command.clone().unwrap_or_default(),
                args: self.args.clone(),
                env: self.env.clone(),
            },
            TransportType::Sse => TransportSpec::Sse {
                url: url(),
                headers: self.headers.clone(),
            },
            TransportType::StreamableHttp => TransportSpec::StreamableHttp {
                url: url(),
                headers: self.headers.clone(),
            },
        };

        let lazy = !defaults.preload_all && self.options.lazy_load.unwrap_or(defaults.lazy_load);
        let mut descriptor = BackendDescriptor::new(name, transport).lazy(lazy);
        if let Some(secs) = self.timeout.filter(|s| *s > 0) {
            descriptor = descriptor.with_call_timeout(Duration::from_secs(secs));
        }
        if let Some(filter) = self
            .options
            .tool_filter
            .clone()
            .or_else(|| defaults.tool_filter.clone())
        {
            descriptor = descriptor.with_tool_filter(filter);
        }
        descriptor
    }

    fn expand_env(&mut self) {
        if let Some(command) = self.command.as_mut() {
            *command = expand_env(command);
        }
        if let Some(url) = self.url.as_mut() {
            *url = expand_env(url);
        }
        for arg in self.args.iter_mut() {
            *arg = expand_env(arg);
        }
        for value in self.env.values_mut().chain(self.headers.values_mut()) {
            *value = expand_env(value);
        }
    }
}

impl LazymuxConfig {
    /// Read a config file. A relative `hierarchyPath` is resolved against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_json_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        if config.proxy.hierarchy_path.is_relative() {
            if let Some(dir) = path.parent() {
                config.proxy.hierarchy_path = dir.join(&config.proxy.hierarchy_path);
            }
        }
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_json::from_str(content).context("Failed to parse config JSON")?;
        for entry in config.servers.values_mut() {
            entry.expand_env();
        }
        Ok(config)
    }

    /// Backend descriptors ordered by name. Commands are not validated here.
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.servers
            .iter()
            .map(|(name, entry)| entry.to_descriptor(name, &self.proxy.options))
            .collect()
    }

    /// Effective tool filter per backend
    pub fn tool_filters(&self) -> HashMap<String, ToolFilter> {
        self.descriptors()
            .into_iter()
            .filter_map(|d| d.tool_filter.map(|f| (d.name, f)))
            .collect()
    }
}

fn expand_env(value: &str) -> String {
    ENV_REF
        .replace_all(value, |caps: &Captures| match std::env::var(&caps[1]) {
            Ok(v) => v,
            Err(_) => {
                warn!(var = %&caps[1], "Environment variable referenced in config is not set");
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn default_name() -> String {
    "lazymux".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_hierarchy_path() -> PathBuf {
    PathBuf::from("./structure")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_preload_timeout() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_call_timeout() -> u64 {
    60
}
