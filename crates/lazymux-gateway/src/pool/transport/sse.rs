//! Legacy SSE transport
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL (relative to the stream URL) that accepts
//! JSON-RPC messages by `POST`; responses and notifications arrive on the
//! stream as `message` events.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{future, StreamExt};
use lazymux_core::{ToolDescriptor, TransportType};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT};
use rmcp::model::{CallToolResult, ClientJsonRpcMessage, JsonObject, ServerJsonRpcMessage};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    build_header_map, parse_endpoint, BackendCapabilities, BackendClient, BackendSession,
    ClientError,
};

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

#[derive(Debug, Error)]
pub enum SseTransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    #[error("event stream error: {0}")]
    Stream(String),
}

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Bytes are buffered until a full line is available, so multi-byte
/// characters split across chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                // id / retry carry nothing this client uses
                _ => {}
            }
        }
        events
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| MESSAGE_EVENT.to_string()),
            data,
        })
    }
}

type EventStream = BoxStream<'static, Result<SseEvent, SseTransportError>>;

fn event_stream(response: reqwest::Response) -> EventStream {
    let bytes = Box::pin(response.bytes_stream());
    stream::unfold(
        (bytes, SseParser::new(), VecDeque::new()),
        |(mut bytes, mut parser, mut queue)| async move {
            loop {
                if let Some(event) = queue.pop_front() {
                    return Some((Ok(event), (bytes, parser, queue)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => queue.extend(parser.push(&chunk)),
                    Some(Err(e)) => {
                        return Some((
                            Err(SseTransportError::Stream(e.to_string())),
                            (bytes, parser, queue),
                        ))
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

/// Open stream waiting to be handed to the MCP session
struct SseChannel {
    client: reqwest::Client,
    endpoint: url::Url,
    events: EventStream,
}

pub struct SseTransport {
    backend: String,
    url: url::Url,
    headers: HeaderMap,
    handshake_timeout: Duration,
    call_timeout: Duration,
    /// Held from `connect` until `initialize`; locked so the transport stays `Sync`
    channel: Mutex<Option<SseChannel>>,
    session: Option<BackendSession>,
}

impl SseTransport {
    pub fn new(
        backend: String,
        url: &str,
        headers: HashMap<String, String>,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let url = parse_endpoint(url)?;
        let headers = build_header_map(&headers)?;
        Ok(Self {
            backend,
            url,
            headers,
            handshake_timeout,
            call_timeout,
            channel: Mutex::new(None),
            session: None,
        })
    }

    /// POST endpoint announced by the server, once connected
    pub fn message_endpoint(&self) -> Option<url::Url> {
        self.channel.lock().as_ref().map(|c| c.endpoint.clone())
    }

    fn session(&self) -> Result<&BackendSession, ClientError> {
        self.session
            .as_ref()
            .ok_or_else(|| ClientError::Connect("session not initialized".to_string()))
    }

    async fn open_stream(&self) -> Result<SseChannel, ClientError> {
        let client = reqwest::Client::builder()
            .default_headers(self.headers.clone())
            .connect_timeout(self.handshake_timeout)
            .build()
            .map_err(|e| ClientError::Connect(format!("failed to build HTTP client: {}", e)))?;

        let response = client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ClientError::Connect(format!("failed to open event stream: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Connect(format!(
                "event stream request answered {}",
                status
            )));
        }

        let mut events = event_stream(response);
        let endpoint = loop {
            match events.next().await {
                Some(Ok(event)) if event.event == ENDPOINT_EVENT => break event.data,
                Some(Ok(event)) => {
                    debug!(backend = %self.backend, event = %event.event, "Skipping event before endpoint");
                }
                Some(Err(e)) => return Err(ClientError::Connect(e.to_string())),
                None => {
                    return Err(ClientError::Handshake(
                        "event stream closed before the endpoint event".to_string(),
                    ))
                }
            }
        };
        let endpoint = self.url.join(endpoint.trim()).map_err(|e| {
            ClientError::Handshake(format!("invalid endpoint '{}': {}", endpoint, e))
        })?;

        Ok(SseChannel {
            client,
            endpoint,
            events,
        })
    }
}

#[async_trait]
impl BackendClient for SseTransport {
    async fn connect(&mut self) -> Result<(), ClientError> {
        info!(backend = %self.backend, url = %self.url, "Connecting to SSE server");
        let channel = tokio::time::timeout(self.handshake_timeout, self.open_stream())
            .await
            .map_err(|_| ClientError::Timeout(self.handshake_timeout))??;
        debug!(backend = %self.backend, endpoint = %channel.endpoint, "SSE endpoint received");
        *self.channel.get_mut() = Some(channel);
        Ok(())
    }

    async fn initialize(&mut self) -> Result<BackendCapabilities, ClientError> {
        let channel = self
            .channel
            .get_mut()
            .take()
            .ok_or_else(|| ClientError::Connect("event stream not open".to_string()))?;

        let backend = self.backend.clone();
        let inbound = channel
            .events
            .take_while(move |event| {
                if let Err(e) = event {
                    warn!(backend = %backend, error = %e, "SSE stream failed");
                }
                future::ready(event.is_ok())
            })
            .filter_map({
                let backend = self.backend.clone();
                move |event| {
                    let message = match event {
                        Ok(event) if event.event == MESSAGE_EVENT => {
                            match serde_json::from_str::<ServerJsonRpcMessage>(&event.data) {
                                Ok(message) => Some(message),
                                Err(e) => {
                                    warn!(backend = %backend, error = %e, "Dropping malformed SSE message");
                                    None
                                }
                            }
                        }
                        _ => None,
                    };
                    future::ready(message)
                }
            });

        let outbound = futures::sink::unfold(
            (channel.client, channel.endpoint),
            |(client, endpoint), message: ClientJsonRpcMessage| async move {
                let response = client.post(endpoint.clone()).json(&message).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(SseTransportError::Status(status));
                }
                Ok::<_, SseTransportError>((client, endpoint))
            },
        );

        let (session, capabilities) = BackendSession::start(
            &self.backend,
            (Box::pin(outbound), Box::pin(inbound)),
            self.handshake_timeout,
            self.call_timeout,
        )
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
        TransportType::Sse
    }

    fn description(&self) -> String {
        format!("sse:{}", self.url)
    }
}
