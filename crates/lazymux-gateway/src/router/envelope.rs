//! Argument Adapter (envelope auto-wrap)
//!
//! Some backends declare every logical argument under one wrapper field
//! (usually `params`), while callers send them flat. The first call to a tool
//! goes out unmodified. If the backend's validation failure names exactly one
//! missing required field, and that field is object-typed, the call is retried
//! once with the whole argument object nested under it. The outcome is cached
//! per (backend, tool) so later calls go out in the right shape directly.
//!
//! Field detection is a heuristic over validation messages. It recognises:
//!
//! - Pydantic: a location line followed by `Field required [type=missing ...]`
//! - Zod issue arrays: `{"code":"invalid_type","expected":"object","path":["params"],...}`
//! - Plain messages: `missing required property 'params'`, `'params' is a required
//!   property`, ``missing field `params` ``, `must have required property 'params'`
//!
//! When the wrapped retry also fails, the original error is returned and
//! nothing is cached.
//! Arguments a caller already wrapped go out unchanged, and a success with
//! them is not recorded as the tool's shape.

use dashmap::DashMap;
use lazy_static::lazy_static;
use lazymux_core::ToolTarget;
use regex::Regex;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::Value;
use tracing::{debug, info};

use crate::pool::{BackendClient, ClientError};

lazy_static! {
    static ref PYDANTIC_MISSING: Regex =
        Regex::new(r"(?mi)^[ \t]*([A-Za-z_][A-Za-z0-9_.]*)[ \t]*\r?\n[ \t]*field required").unwrap();
    /// Captures the whole name list, so `fields: a, b` names two fields
    static ref MISSING_LIST: Regex = Regex::new(
        r#"(?i)missing required (?:propert(?:y|ies)|fields?|arguments?|parameters?):?\s*([`'"]?[A-Za-z_][A-Za-z0-9_]*[`'"]?(?:\s*(?:,|\band\b)\s*[`'"]?[A-Za-z_][A-Za-z0-9_]*[`'"]?)*)"#
    ).unwrap();
    static ref FIELD_NAME: Regex = Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap();
    static ref MESSAGE_MISSING: Vec<Regex> = vec![
        Regex::new(r#"(?i)['"`]([A-Za-z_][A-Za-z0-9_]*)['"`] is a required (?:property|field)"#).unwrap(),
        Regex::new(r#"(?i)missing field [`'"]([A-Za-z_][A-Za-z0-9_]*)[`'"]"#).unwrap(),
        Regex::new(r#"(?i)must have required property ['"]([A-Za-z_][A-Za-z0-9_]*)['"]"#).unwrap(),
    ];
}

/// How a tool wants its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapDecision {
    Flat,
    Envelope(String),
}

/// (backend, tool) -> learned argument shape. Entries are only ever added.
#[derive(Debug, Default)]
pub struct WrapCache {
    entries: DashMap<(String, String), WrapDecision>,
}

impl WrapCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, backend: &str, tool: &str) -> Option<WrapDecision> {
        self.entries
            .get(&(backend.to_string(), tool.to_string()))
            .map(|entry| entry.value().clone())
    }

    fn record(&self, backend: &str, tool: &str, decision: WrapDecision) {
        self.entries
            .entry((backend.to_string(), tool.to_string()))
            .or_insert(decision);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A required field a validation failure reported as missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingField {
    pub name: String,
    /// `Some` when the failure stated the expected type
    pub expected_object: Option<bool>,
}

/// The single top-level missing field named by a validation failure, if
/// exactly one is named.
pub fn detect_missing_field(message: &str, data: Option<&Value>) -> Option<MissingField> {
    let mut found: Vec<MissingField> = Vec::new();
    let mut add = |field: MissingField| {
        match found.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => {
                if existing.expected_object.is_none() {
                    existing.expected_object = field.expected_object;
                }
            }
            None => found.push(field),
        }
    };

    for issue in zod_issues(message, data) {
        if let Some(field) = zod_missing(&issue) {
            add(field);
        }
    }
    for caps in PYDANTIC_MISSING.captures_iter(message) {
        let location = &caps[1];
        // Nested locations (`params.content`) are not top-level fields
        if !location.contains('.') {
            add(MissingField {
                name: location.to_string(),
                expected_object: None,
            });
        }
    }
    for caps in MISSING_LIST.captures_iter(message) {
        for name in FIELD_NAME.find_iter(&caps[1]) {
            if !name.as_str().eq_ignore_ascii_case("and") {
                add(MissingField {
                    name: name.as_str().to_string(),
                    expected_object: None,
                });
            }
        }
    }
    for regex in MESSAGE_MISSING.iter() {
        for caps in regex.captures_iter(message) {
            add(MissingField {
                name: caps[1].to_string(),
                expected_object: None,
            });
        }
    }

    if found.len() == 1 {
        found.pop()
    } else {
        None
    }
}

fn zod_issues(message: &str, data: Option<&Value>) -> Vec<Value> {
    let from_data = match data {
        Some(Value::Array(issues)) => Some(issues.clone()),
        Some(Value::Object(obj)) => obj.get("issues").and_then(Value::as_array).cloned(),
        _ => None,
    };
    if let Some(issues) = from_data {
        return issues;
    }

    let (Some(start), Some(end)) = (message.find("[{"), message.rfind("}]")) else {
        return Vec::new();
    };
    if end < start {
        return Vec::new();
    }
    serde_json::from_str::<Vec<Value>>(&message[start..end + 2]).unwrap_or_default()
}

fn zod_missing(issue: &Value) -> Option<MissingField> {
    let path = issue.get("path")?.as_array()?;
    if path.len() != 1 {
        return None;
    }
    let name = path[0].as_str()?;
    if issue.get("code").and_then(Value::as_str) != Some("invalid_type") {
        return None;
    }
    let message = issue.get("message").and_then(Value::as_str).unwrap_or("");
    let missing = issue.get("received").and_then(Value::as_str) == Some("undefined")
        || message.eq_ignore_ascii_case("required")
        || message.contains("received undefined");
    if !missing {
        return None;
    }
    Some(MissingField {
        name: name.to_string(),
        expected_object: issue
            .get("expected")
            .and_then(Value::as_str)
            .map(|e| e == "object"),
    })
}

/// Whether the tool's input schema declares `field` as an object
pub fn schema_declares_object(schema: Option<&Value>, field: &str) -> bool {
    let Some(property) = schema
        .and_then(|s| s.get("properties"))
        .and_then(|p| p.get(field))
    else {
        return false;
    };
    match property.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        _ => property.get("properties").is_some() || property.get("$ref").is_some(),
    }
}

/// Envelope field to retry with, if the failure qualifies
pub fn envelope_field(message: &str, data: Option<&Value>, schema: Option<&Value>) -> Option<String> {
    let missing = detect_missing_field(message, data)?;
    let object = missing
        .expected_object
        .unwrap_or_else(|| schema_declares_object(schema, &missing.name));
    object.then_some(missing.name)
}

/// Concatenated text content of a tool result
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.raw.as_text().map(|t| t.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_success(result: &Result<CallToolResult, ClientError>) -> bool {
    matches!(result, Ok(r) if r.is_error != Some(true))
}

/// The envelope field when `arguments` already arrive wrapped: a single
/// object-valued key the schema declares as an object.
pub fn wrapped_field(arguments: &JsonObject, schema: Option<&Value>) -> Option<String> {
    if arguments.len() != 1 {
        return None;
    }
    let (key, value) = arguments.iter().next()?;
    (value.is_object() && schema_declares_object(schema, key)).then(|| key.clone())
}

fn wrap(field: &str, arguments: JsonObject) -> JsonObject {
    let mut envelope = JsonObject::new();
    envelope.insert(field.to_string(), Value::Object(arguments));
    envelope
}

#[derive(Debug, Default)]
pub struct ArgumentAdapter {
    cache: WrapCache,
}

impl ArgumentAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &WrapCache {
        &self.cache
    }

    /// Call `target` on `client`, shaping arguments as learned for this tool.
    pub async fn call(
        &self,
        client: &dyn BackendClient,
        target: &ToolTarget,
        schema: Option<&Value>,
        arguments: JsonObject,
    ) -> Result<CallToolResult, ClientError> {
        let (backend, tool) = (target.backend.as_str(), target.tool.as_str());

        match self.cache.get(backend, tool) {
            Some(WrapDecision::Envelope(field)) => {
                if arguments.get(&field).is_some_and(Value::is_object) {
                    return client.call_tool(tool, arguments).await;
                }
                debug!(backend = %backend, tool = %tool, field = %field, "Sending wrapped arguments");
                return client.call_tool(tool, wrap(&field, arguments)).await;
            }
            Some(WrapDecision::Flat) => return client.call_tool(tool, arguments).await,
            None => {}
        }

        let first = client.call_tool(tool, arguments.clone()).await;
        if is_success(&first) {
            // A pre-wrapped success says nothing about how flat calls fare
            match wrapped_field(&arguments, schema) {
                Some(field) => {
                    debug!(backend = %backend, tool = %tool, field = %field, "Caller sent wrapped arguments; shape not recorded");
                }
                None => self.cache.record(backend, tool, WrapDecision::Flat),
            }
            return first;
        }

        let field = match &first {
            Err(ClientError::Tool { message, data, .. }) => envelope_field(message, data.as_ref(), schema),
            Ok(result) => envelope_field(&result_text(result), None, schema),
            Err(_) => None,
        };
        let Some(field) = field.filter(|f| !arguments.contains_key(f)) else {
            return first;
        };

        debug!(backend = %backend, tool = %tool, field = %field, "Retrying with argument envelope");
        let retry = client.call_tool(tool, wrap(&field, arguments)).await;
        if is_success(&retry) {
            info!(backend = %backend, tool = %tool, field = %field, "Tool requires argument envelope");
            self.cache.record(backend, tool, WrapDecision::Envelope(field));
            return retry;
        }

        debug!(backend = %backend, tool = %tool, "Wrapped retry failed; returning original error");
        first
    }
}
