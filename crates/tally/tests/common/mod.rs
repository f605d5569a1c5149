#![allow(dead_code)]

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const SESSION_ID: &str = "session-1";

/// A small streamable-HTTP MCP server: pages tool listings and answers calls over SSE.
pub struct McpResponder {
    tools: Vec<Value>,
    page_size: usize,
    delay: Option<Duration>,
}

impl McpResponder {
    pub fn new(tools: Vec<Value>) -> Self {
        Self {
            tools,
            page_size: 1,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn reply(&self, id: &Value, result: Value) -> ResponseTemplate {
        let template = ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }));
        match self.delay {
            Some(delay) => template.set_delay(delay),
            None => template,
        }
    }
}

impl Respond for McpResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let id = body.get("id").cloned().unwrap_or(Value::Null);

        match body["method"].as_str().unwrap_or_default() {
            "initialize" => self
                .reply(
                    &id,
                    json!({
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {"listChanged": false}},
                        "serverInfo": {"name": "stocks", "version": "1.0.0"}
                    }),
                )
                .insert_header("Mcp-Session-Id", SESSION_ID),
            "notifications/initialized" => ResponseTemplate::new(202),
            "tools/list" => {
                let start = body["params"]["cursor"]
                    .as_str()
                    .and_then(|cursor| cursor.parse::<usize>().ok())
                    .unwrap_or(0);
                let end = (start + self.page_size).min(self.tools.len());
                let mut result = json!({ "tools": self.tools[start..end].to_vec() });
                if end < self.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                self.reply(&id, result)
            }
            "tools/call" => {
                let name = body["params"]["name"].as_str().unwrap_or_default();
                let arguments = &body["params"]["arguments"];
                let (text, is_error) = match name {
                    "failing_tool" => ("quote service unavailable".to_string(), true),
                    _ => (format!("{} -> {}", name, arguments), false),
                };
                let message = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "content": [{"type": "text", "text": text}],
                        "isError": is_error
                    }
                });
                ResponseTemplate::new(200)
                    .set_body_raw(format!("event: message\ndata: {}\n\n", message), "text/event-stream")
            }
            other => ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": -32601, "message": format!("Method not found: {}", other)}
            })),
        }
    }
}

pub fn remote_tool(name: &str) -> Value {
    json!({
        "name": name,
        "description": format!("Remote {}", name),
        "inputSchema": {
            "type": "object",
            "properties": {"symbol": {"type": "string"}},
            "required": ["symbol"]
        }
    })
}

/// Starts a server exposing `tools` at `/mcp` that expects exactly `deletes` session teardowns.
pub async fn mcp_server(responder: McpResponder, deletes: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(responder)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .and(header("Mcp-Session-Id", SESSION_ID))
        .respond_with(ResponseTemplate::new(200))
        .expect(deletes)
        .mount(&server)
        .await;
    server
}

pub async fn delete_count(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == "DELETE")
        .count()
}

/// JSON-RPC methods the server received, in arrival order.
pub async fn received_methods(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.method.as_str() == "POST")
        .filter_map(|request| serde_json::from_slice::<Value>(&request.body).ok())
        .filter_map(|body| body["method"].as_str().map(str::to_string))
        .collect()
}
