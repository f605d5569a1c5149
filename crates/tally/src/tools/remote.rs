use std::sync::Arc;
use std::time::Duration;

use mcp_client::transport::Error as TransportError;
use mcp_client::{Error as ClientError, McpClient};
use mcp_core::content::Content;
use mcp_core::handler::{ToolError, ToolResult};
use mcp_core::protocol::INVALID_PARAMS;
use mcp_core::tool::Tool;
use serde_json::Value;

/// A tool advertised by the remote server; calls are forwarded over the shared session.
///
/// The model may know the tool under a different name than the server does, when the
/// advertised one is not a valid function name.
#[derive(Clone)]
pub struct RemoteTool {
    tool: Tool,
    remote_name: String,
    client: Arc<dyn McpClient>,
    timeout: Duration,
}

impl RemoteTool {
    pub fn new(tool: Tool, client: Arc<dyn McpClient>, timeout: Duration) -> Self {
        let remote_name = tool.name.clone();
        Self {
            tool,
            remote_name,
            client,
            timeout,
        }
    }

    /// Offer the tool to the model as `name` while calling it by its advertised name.
    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.tool.name = name.into();
        self
    }

    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    pub fn name(&self) -> &str {
        &self.tool.name
    }

    pub fn description(&self) -> &str {
        &self.tool.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.tool.input_schema
    }

    pub async fn execute(&self, args: Value) -> ToolResult<Value> {
        let result = self
            .client
            .call_tool(&self.remote_name, args)
            .await
            .map_err(|e| self.map_error(e))?;

        let output = content_to_value(result.content);
        if result.is_error {
            let message = match output {
                Value::String(text) => text,
                other => other.to_string(),
            };
            return Err(ToolError::ExecutionError(message));
        }
        Ok(output)
    }

    fn map_error(&self, error: ClientError) -> ToolError {
        match error {
            ClientError::Timeout => ToolError::Timeout(self.timeout.as_millis() as u64),
            ClientError::RpcError { code, message } if code == INVALID_PARAMS => {
                ToolError::InvalidParameters(message)
            }
            ClientError::Transport(TransportError::HttpError { status, message }) if status != 0 => {
                ToolError::Upstream { status, message }
            }
            other => ToolError::ExecutionError(other.to_string()),
        }
    }
}

/// Text-only results collapse to one string; anything richer is kept as JSON.
fn content_to_value(content: Vec<Content>) -> Value {
    if content.iter().all(|c| c.as_text().is_some()) {
        let text = content
            .iter()
            .filter_map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        Value::String(text)
    } else {
        serde_json::to_value(&content).unwrap_or(Value::Null)
    }
}
