//! Fake transports for testing
//!
//! `FakeFactory` hands out `FakeClient`s driven by a per-backend
//! [`FakeBackend`] script: connect delay, scripted failures, an argument
//! envelope requirement, and counters for connects and calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lazymux_core::{BackendDescriptor, ToolDescriptor, TransportType};
use lazymux_gateway::pool::{BackendCapabilities, BackendClient, ClientError, ClientFactory};
use parking_lot::Mutex;
use rmcp::model::{CallToolResult, Content, JsonObject};

// ============================================================================
// FakeBackend
// ============================================================================

#[derive(Default)]
pub struct FakeBackend {
    pub name: String,
    pub tools: Vec<ToolDescriptor>,
    pub connect_delay: Duration,
    pub connect_error: Option<ClientError>,
    pub list_error: Option<ClientError>,
    /// (tool, field): that tool's arguments must arrive nested under `field`
    pub envelope: Option<(String, String)>,
    /// The enveloped tool rejects wrapped arguments too
    pub reject_wrapped: bool,
    /// Every call answers with this JSON-RPC error
    pub call_error: Option<ClientError>,
    /// Every call answers with an `is_error` result carrying this text
    pub error_result: Option<String>,
    connects: AtomicUsize,
    calls: Mutex<Vec<(String, JsonObject)>>,
}

impl FakeBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing_connect(mut self, reason: &str) -> Self {
        self.connect_error = Some(ClientError::Connect(reason.to_string()));
        self
    }

    pub fn failing_list(mut self, reason: &str) -> Self {
        self.list_error = Some(ClientError::Protocol(reason.to_string()));
        self
    }

    pub fn requiring_envelope_for(mut self, tool: &str, field: &str) -> Self {
        self.envelope = Some((tool.to_string(), field.to_string()));
        self
    }

    /// Report `field` missing on every call to `tool`, wrapped or not
    pub fn rejecting_every_shape(mut self, tool: &str, field: &str) -> Self {
        self.reject_wrapped = true;
        self.requiring_envelope_for(tool, field)
    }

    pub fn failing_calls(mut self, error: ClientError) -> Self {
        self.call_error = Some(error);
        self
    }

    pub fn answering_error(mut self, text: &str) -> Self {
        self.error_result = Some(text.to_string());
        self
    }

    /// Connect attempts made against this backend
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Arguments of every call, in order
    pub fn calls(&self) -> Vec<(String, JsonObject)> {
        self.calls.lock().clone()
    }

    fn answer(&self, tool: &str, arguments: JsonObject) -> Result<CallToolResult, ClientError> {
        self.calls.lock().push((tool.to_string(), arguments.clone()));

        if let Some(err) = &self.call_error {
            return Err(err.clone());
        }
        if let Some(text) = &self.error_result {
            return Ok(CallToolResult::error(vec![Content::text(text.clone())]));
        }
        if let Some((enveloped, field)) = &self.envelope {
            let wrapped = matches!(arguments.get(field), Some(serde_json::Value::Object(_)));
            if enveloped == tool && (!wrapped || self.reject_wrapped) {
                let input = serde_json::to_string(&arguments).unwrap_or_default();
                return Err(ClientError::Tool {
                    code: -32602,
                    message: format!(
                        "Error executing tool {tool}: 1 validation error for {tool}Arguments\n\
                         {field}\n  Field required [type=missing, input_value={input}, input_type=dict]"
                    ),
                    data: None,
                });
            }
        }

        let echo = serde_json::to_string(&arguments).unwrap_or_default();
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}:{} {}",
            self.name, tool, echo
        ))]))
    }
}

// ============================================================================
// FakeClient
// ============================================================================

pub struct FakeClient {
    backend: Arc<FakeBackend>,
}

#[async_trait]
impl BackendClient for FakeClient {
    async fn connect(&mut self) -> Result<(), ClientError> {
        self.backend.connects.fetch_add(1, Ordering::SeqCst);
        if !self.backend.connect_delay.is_zero() {
            tokio::time::sleep(self.backend.connect_delay).await;
        }
        match &self.backend.connect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn initialize(&mut self) -> Result<BackendCapabilities, ClientError> {
        Ok(BackendCapabilities {
            server_name: self.backend.name.clone(),
            server_version: "1.0.0".to_string(),
            protocol_version: "2025-06-18".to_string(),
            tools: true,
        })
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, ClientError> {
        match &self.backend.list_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.backend.tools.clone()),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ClientError> {
        self.backend.answer(name, arguments)
    }

    async fn close(&self) {}

    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn description(&self) -> String {
        format!("fake://{}", self.backend.name)
    }
}

// ============================================================================
// FakeFactory
// ============================================================================

/// Backends without a script are rejected as misconfigured
#[derive(Default)]
pub struct FakeFactory {
    backends: HashMap<String, Arc<FakeBackend>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: FakeBackend) -> Self {
        self.backends
            .insert(backend.name.clone(), Arc::new(backend));
        self
    }

    pub fn backend(&self, name: &str) -> Arc<FakeBackend> {
        self.backends
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("no fake backend named {name}"))
    }
}

impl ClientFactory for FakeFactory {
    fn create(&self, descriptor: &BackendDescriptor) -> Result<Box<dyn BackendClient>, ClientError> {
        let backend = self.backends.get(&descriptor.name).ok_or_else(|| {
            ClientError::Misconfigured(format!("no fake script for {}", descriptor.name))
        })?;
        Ok(Box::new(FakeClient {
            backend: Arc::clone(backend),
        }))
    }
}
