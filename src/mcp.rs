//! Transport client for the remote MCP tool server.
//!
//! Speaks JSON-RPC 2.0 over HTTP POST. The server answers either with
//! plain JSON or with a server-sent event stream that is reassembled
//! into one result by [`crate::sse`]. A session identifier is issued
//! via the `mcp-session-id` response header on handshake and echoed as
//! a request header on every subsequent call.
//!
//! Retriable transport failures (refused connections, timeouts,
//! overloaded statuses) are retried transparently under the fixed
//! policy in [`crate::retry`]; remote-reported tool errors are not.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::McpConfig;
use crate::error::{HarvestError, HarvestResult};
use crate::models::{HealthStatus, ToolDescriptor, ToolParameter};
use crate::retry::{self, Failure, RetryDecision, RetryPolicy};
use crate::sse;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "mcp-session-id";
const CLIENT_NAME: &str = "case-harvest";

pub struct McpClient {
    http: reqwest::Client,
    server_url: String,
    session_id: Option<String>,
    connected: bool,
    policy: RetryPolicy,
    /// Descriptors from the last `tools/list`, kept for argument
    /// validation before a call goes over the wire.
    tools: Vec<ToolDescriptor>,
}

impl McpClient {
    pub fn new(config: &McpConfig) -> HarvestResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            server_url: config.server_url(),
            session_id: None,
            connected: false,
            policy: RetryPolicy::default(),
            tools: Vec::new(),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Perform the handshake and obtain a session. Retries transport
    /// failures under the fixed policy, then surfaces `Connection`.
    /// A protocol-version mismatch is a hard failure and is not
    /// retried.
    pub async fn connect(&mut self) -> HarvestResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "roots": { "listChanged": true },
                "sampling": {},
            },
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
        });

        let result = self
            .request_with_retry("initialize", Some(params), None)
            .await
            .map_err(|e| match e {
                HarvestError::Connection(_) => e,
                other => HarvestError::Connection(other.to_string()),
            })?;

        if let Some(server_version) = result.get("protocolVersion").and_then(Value::as_str) {
            if server_version != PROTOCOL_VERSION {
                return Err(HarvestError::Connection(format!(
                    "protocol version mismatch: server speaks {server_version}, client speaks {PROTOCOL_VERSION}"
                )));
            }
        }

        // Some servers require this before accepting tool calls.
        self.send_notification("notifications/initialized").await;

        self.connected = true;
        info!(
            server = %self.server_url,
            session = self.session_id.as_deref().unwrap_or("-"),
            "MCP connection established"
        );
        Ok(())
    }

    /// Release the session. Safe to call when never connected or
    /// already disconnected; never raises.
    pub async fn disconnect(&mut self) {
        if self.connected {
            if let Err(e) = self.try_send_request("shutdown", None, None).await {
                warn!("shutdown request failed: {}", e.into_error());
            }
            self.connected = false;
            info!("MCP connection closed");
        }
        self.session_id = None;
    }

    /// Fetch the current tool set. Refreshes the cached descriptors
    /// used for argument validation.
    pub async fn list_tools(&mut self) -> HarvestResult<Vec<ToolDescriptor>> {
        self.require_connected()?;

        let result = self.request_with_retry("tools/list", None, None).await?;
        let tools = parse_tool_descriptors(&result);
        debug!(count = tools.len(), "retrieved tool descriptors");
        self.tools = tools.clone();
        Ok(tools)
    }

    /// Invoke a named tool and assemble its streamed response into the
    /// logical result records. Text content items carrying JSON arrays
    /// are flattened; a remote-reported error becomes
    /// `ToolInvocation`, distinct from transport-level `Connection`.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: HashMap<String, Value>,
    ) -> HarvestResult<Vec<Value>> {
        self.require_connected()?;
        self.validate_arguments(name, &arguments)?;

        let params = json!({ "name": name, "arguments": arguments });
        let result = self
            .request_with_retry("tools/call", Some(params), Some(name))
            .await;

        let result = match result {
            Ok(r) => r,
            Err(e) => {
                // A dead transport invalidates the session; the caller
                // must reconnect before further calls.
                if matches!(e, HarvestError::Connection(_)) {
                    self.connected = false;
                }
                return Err(e);
            }
        };

        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if is_error {
            let message = content_text(&content);
            return Err(HarvestError::ToolInvocation {
                tool: name.to_string(),
                message,
            });
        }

        let mut records = Vec::new();
        for item in &content {
            if item.get("type").and_then(Value::as_str) != Some("text") {
                continue;
            }
            let Some(text) = item.get("text").and_then(Value::as_str) else {
                continue;
            };
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Array(items)) => records.extend(items),
                Ok(value) => records.push(value),
                Err(e) => warn!(tool = name, "skipping unparseable content item: {e}"),
            }
        }
        Ok(records)
    }

    /// Lightweight probe: one `tools/list` round trip. Transport
    /// failures are reported as unhealthy, never propagated.
    pub async fn health_check(&mut self) -> HealthStatus {
        let start = Instant::now();
        let outcome = self.try_send_request("tools/list", None, None).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(_) => HealthStatus {
                healthy: true,
                server_url: self.server_url.clone(),
                connected: self.connected,
                response_time_ms: (elapsed_ms * 100.0).round() / 100.0,
                error: None,
            },
            Err(failure) => HealthStatus {
                healthy: false,
                server_url: self.server_url.clone(),
                connected: self.connected,
                response_time_ms: 0.0,
                error: Some(failure.into_error().to_string()),
            },
        }
    }

    fn require_connected(&self) -> HarvestResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(HarvestError::Connection("not connected".to_string()))
        }
    }

    /// Fail fast on arguments the listed descriptor says the tool
    /// cannot take. Skipped when descriptors have not been fetched.
    fn validate_arguments(
        &self,
        tool: &str,
        arguments: &HashMap<String, Value>,
    ) -> HarvestResult<()> {
        let Some(descriptor) = self.tools.iter().find(|t| t.name == tool) else {
            return Ok(());
        };

        for param in descriptor.parameters.iter().filter(|p| p.required) {
            if !arguments.contains_key(&param.name) {
                return Err(HarvestError::Validation(format!(
                    "tool '{tool}' requires argument '{}'",
                    param.name
                )));
            }
        }
        for key in arguments.keys() {
            if !descriptor.parameters.iter().any(|p| &p.name == key) {
                return Err(HarvestError::Validation(format!(
                    "tool '{tool}' does not declare argument '{key}'"
                )));
            }
        }
        Ok(())
    }

    /// Send a request, retrying retriable failures under the policy.
    async fn request_with_retry(
        &mut self,
        method: &str,
        params: Option<Value>,
        tool: Option<&str>,
    ) -> HarvestResult<Value> {
        let mut attempt = 1u32;
        loop {
            match self.try_send_request(method, params.clone(), tool).await {
                Ok(result) => return Ok(result),
                Err(Failure::Fatal(e)) => return Err(e),
                Err(Failure::Retriable(e)) => match self.policy.after_failure(attempt) {
                    RetryDecision::RetryAfter(delay) => {
                        warn!(
                            method,
                            attempt,
                            delay_secs = delay.as_secs(),
                            "attempt failed, retrying: {e}"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        warn!(method, attempt, "giving up: {e}");
                        return Err(e);
                    }
                },
            }
        }
    }

    /// One request/response round trip, classified for the retry loop.
    async fn try_send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
        tool: Option<&str>,
    ) -> Result<Value, Failure> {
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
        });
        if let Some(p) = params {
            body["params"] = p;
        }

        let mut request = self
            .http
            .post(&self.server_url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(sid) = &self.session_id {
            request = request.header(SESSION_HEADER, sid);
        }

        let response = request.send().await.map_err(|e| {
            Failure::Retriable(HarvestError::Connection(format!("request failed: {e}")))
        })?;

        // Session id can be (re)issued on any response.
        if let Some(sid) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(sid.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = HarvestError::Connection(format!("HTTP {status}: {text}"));
            return if retry::status_is_retriable(status) {
                Err(Failure::Retriable(err))
            } else {
                Err(Failure::Fatal(err))
            };
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let text = response.text().await.map_err(|e| {
            Failure::Retriable(HarvestError::Connection(format!("read failed: {e}")))
        })?;

        let envelope = if content_type.contains("text/event-stream") {
            sse::parse_sse_body(&text)
        } else {
            serde_json::from_str(&text).ok()
        }
        .ok_or_else(|| {
            Failure::Fatal(HarvestError::Connection(format!(
                "unparseable response to {method}"
            )))
        })?;

        if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(Failure::Fatal(HarvestError::ToolInvocation {
                tool: tool.unwrap_or(method).to_string(),
                message,
            }));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Fire-and-forget notification; failures are logged only.
    async fn send_notification(&self, method: &str) {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        let mut request = self
            .http
            .post(&self.server_url)
            .header("Accept", "application/json, text/event-stream")
            .json(&body);
        if let Some(sid) = &self.session_id {
            request = request.header(SESSION_HEADER, sid);
        }
        if let Err(e) = request.send().await {
            warn!("failed to send notification {method}: {e}");
        }
    }
}

/// Flatten `tools/list` descriptors: inputSchema properties become
/// named parameters, with `required` membership folded in.
fn parse_tool_descriptors(result: &Value) -> Vec<ToolDescriptor> {
    let mut tools = Vec::new();
    let Some(entries) = result.get("tools").and_then(Value::as_array) else {
        return tools;
    };

    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let schema = entry.get("inputSchema").cloned().unwrap_or(Value::Null);
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut parameters = Vec::new();
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for (pname, info) in props {
                parameters.push(ToolParameter {
                    name: pname.clone(),
                    param_type: info
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or("string")
                        .to_string(),
                    description: info
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    required: required.contains(&pname.as_str()),
                });
            }
        }

        tools.push(ToolDescriptor {
            name: name.to_string(),
            description,
            parameters,
        });
    }
    tools
}

/// Join the text items of a tool response, for error messages.
fn content_text(content: &[Value]) -> String {
    let parts: Vec<&str> = content
        .iter()
        .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|i| i.get("text").and_then(Value::as_str))
        .collect();
    if parts.is_empty() {
        "unknown tool error".to_string()
    } else {
        parts.join("; ")
    }
}
