//! STDIO transport for MCP servers
//!
//! Handles connecting to MCP servers that run as child processes
//! communicating over stdin/stdout.
//!
//! The command line is checked when the transport is constructed: no shell
//! metacharacters anywhere, and the program is either an absolute path or one
//! of [`ALLOWED_BARE_COMMANDS`]. A rejected command never spawns a process.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use lazymux_core::{ToolDescriptor, TransportType};
use parking_lot::Mutex;
use rmcp::model::{CallToolResult, JsonObject};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use tokio::process::Command;
use tracing::{debug, error, info};

use super::{BackendCapabilities, BackendClient, BackendSession, ClientError};

/// Interpreters and launchers that may be given without a full path
pub const ALLOWED_BARE_COMMANDS: &[&str] = &["python", "python3", "node", "npx", "go", "ruby", "uvx"];

const SHELL_METACHARACTERS: &[&str] = &[";", "|", "&", "`", "$(", "${", ">", "<", "\n"];

/// Reject empty, relative or shell-injectable command lines.
pub fn validate_stdio_command(command: &str, args: &[String]) -> Result<(), ClientError> {
    if command.trim().is_empty() {
        return Err(ClientError::Misconfigured("stdio command is empty".to_string()));
    }

    let offending = std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .find_map(|part| {
            SHELL_METACHARACTERS
                .iter()
                .find(|m| part.contains(*m))
                .map(|m| (part, *m))
        });
    if let Some((part, meta)) = offending {
        return Err(ClientError::Misconfigured(format!(
            "shell metacharacter {:?} not allowed in '{}'",
            meta, part
        )));
    }

    if !Path::new(command).is_absolute() && !ALLOWED_BARE_COMMANDS.contains(&command) {
        return Err(ClientError::Misconfigured(format!(
            "command '{}' must be an absolute path or one of: {}",
            command,
            ALLOWED_BARE_COMMANDS.join(", ")
        )));
    }
    Ok(())
}

/// STDIO transport for child process MCP servers
pub struct StdioTransport {
    backend: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    handshake_timeout: Duration,
    call_timeout: Duration,
    /// Spawned child awaiting the handshake
    process: Mutex<Option<TokioChildProcess>>,
    session: Option<BackendSession>,
}

impl StdioTransport {
    pub fn new(
        backend: String,
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ClientError> {
        validate_stdio_command(&command, &args)?;
        Ok(Self {
            backend,
            command,
            args,
            env,
            handshake_timeout,
            call_timeout,
            process: Mutex::new(None),
            session: None,
        })
    }

    fn session(&self) -> Result<&BackendSession, ClientError> {
        self.session
            .as_ref()
            .ok_or_else(|| ClientError::Connect("session not initialized".to_string()))
    }
}

#[async_trait]
impl BackendClient for StdioTransport {
    async fn connect(&mut self) -> Result<(), ClientError> {
        info!(
            backend = %self.backend,
            command = %self.command,
            "Starting STDIO server"
        );

        let command_path = which::which(&self.command).map_err(|_| {
            let err = format!(
                "command not found: {}. Ensure it's installed and in PATH.",
                self.command
            );
            error!(backend = %self.backend, "{}", err);
            ClientError::Connect(err)
        })?;
        debug!(backend = %self.backend, path = ?command_path, "Found command");

        let args = self.args.clone();
        let env = self.env.clone();
        let process = TokioChildProcess::new(Command::new(&command_path).configure(move |cmd| {
            cmd.args(&args).envs(&env).kill_on_drop(true);
        }))
        .map_err(|e| ClientError::Connect(format!("failed to spawn process: {}", e)))?;

        *self.process.get_mut() = Some(process);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<BackendCapabilities, ClientError> {
        let process = self
            .process
            .get_mut()
            .take()
            .ok_or_else(|| ClientError::Connect("process not started".to_string()))?;
        let (session, capabilities) =
            BackendSession::start(&self.backend, process, self.handshake_timeout, self.call_timeout)
                .await?;
        self.session = Some(session);
        Ok(capabilities)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.session()?.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ClientError> {
        self.session()?.call_tool(name, arguments).await
    }

    async fn close(&self) {
        if let Some(session) = &self.session {
            session.close().await;
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Stdio
    }

    fn description(&self) -> String {
        format!("stdio:{}", self.command)
    }
}
