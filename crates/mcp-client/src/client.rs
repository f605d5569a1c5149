use std::sync::atomic::{AtomicU64, Ordering};

use mcp_core::protocol::{
    CallToolResult, InitializeResult, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tower::{BoxError, Service, ServiceExt};

use crate::transport::Error as TransportError;

pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Error type for MCP client operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("RPC error: code={code}, message={message}")]
    RpcError { code: i32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected response from server")]
    UnexpectedResponse,

    #[error("Timeout or service not ready")]
    NotReady,

    #[error("Request timed out")]
    Timeout,

    #[error("Service error: {0}")]
    Other(String),
}

impl From<BoxError> for Error {
    fn from(err: BoxError) -> Self {
        match err.downcast::<TransportError>() {
            Ok(transport_error) => Error::Transport(*transport_error),
            Err(err) => match err.downcast::<tower::timeout::error::Elapsed>() {
                Ok(_) => Error::Timeout,
                Err(err) => Error::Other(err.to_string()),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct ClientCapabilities {}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    pub client_info: ClientInfo,
}

/// The MCP client trait defining the interface for MCP operations.
#[async_trait::async_trait]
pub trait McpClient: Send + Sync + 'static {
    /// Initialize the connection with the server.
    async fn initialize(
        &self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error>;

    /// List one page of available tools, starting at `next_cursor` when given.
    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error>;

    /// Call a specific tool with arguments.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error>;
}

/// Standard implementation of the MCP client that sends requests via the provided service.
///
/// The service is cloned per request so concurrent tool calls do not queue behind each other.
pub struct McpClientImpl<S> {
    service: S,
    next_id: AtomicU64,
}

impl<S> McpClientImpl<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<Error>,
    S::Future: Send,
{
    pub fn new(service: S) -> Self {
        Self {
            service,
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a JSON-RPC request and check we don't get an error response.
    async fn send_request<R>(&self, method: &str, params: Value) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let mut service = self.service.clone();
        let service = service.ready().await.map_err(|_| Error::NotReady)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params: Some(params),
        });

        let response_msg = service.call(request).await.map_err(Into::into)?;

        match response_msg {
            JsonRpcMessage::Response(JsonRpcResponse {
                id: response_id,
                result,
                error,
                ..
            }) => {
                if response_id != Some(id) {
                    return Err(Error::UnexpectedResponse);
                }
                if let Some(err) = error {
                    Err(Error::RpcError {
                        code: err.code,
                        message: err.message,
                    })
                } else if let Some(r) = result {
                    Ok(serde_json::from_value(r)?)
                } else {
                    Err(Error::UnexpectedResponse)
                }
            }
            JsonRpcMessage::Error(JsonRpcError {
                id: response_id,
                error,
                ..
            }) => {
                if response_id != Some(id) {
                    return Err(Error::UnexpectedResponse);
                }
                Err(Error::RpcError {
                    code: error.code,
                    message: error.message,
                })
            }
            // Requests/notifications not expected as a response
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Send a JSON-RPC notification.
    async fn send_notification(&self, method: &str, params: Value) -> Result<(), Error> {
        let mut service = self.service.clone();
        let service = service.ready().await.map_err(|_| Error::NotReady)?;

        let notification = JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params: Some(params),
        });

        service.call(notification).await.map_err(Into::into)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S> McpClient for McpClientImpl<S>
where
    S: Service<JsonRpcMessage, Response = JsonRpcMessage> + Clone + Send + Sync + 'static,
    S::Error: Into<Error>,
    S::Future: Send,
{
    async fn initialize(
        &self,
        info: ClientInfo,
        capabilities: ClientCapabilities,
    ) -> Result<InitializeResult, Error> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.into(),
            client_info: info,
            capabilities,
        };
        let result: InitializeResult = self
            .send_request("initialize", serde_json::to_value(params)?)
            .await?;

        self.send_notification("notifications/initialized", serde_json::json!({}))
            .await?;

        Ok(result)
    }

    async fn list_tools(&self, next_cursor: Option<String>) -> Result<ListToolsResult, Error> {
        let params = match next_cursor {
            Some(cursor) => serde_json::json!({ "cursor": cursor }),
            None => serde_json::json!({}),
        };
        self.send_request("tools/list", params).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, Error> {
        let params = serde_json::json!({ "name": name, "arguments": arguments });
        self.send_request("tools/call", params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::McpService;
    use crate::transport::TransportHandle;
    use mcp_core::protocol::ErrorData;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Answers every request from a closure and records what was sent.
    #[derive(Clone)]
    struct ScriptedHandle {
        sent: Arc<Mutex<Vec<JsonRpcMessage>>>,
        reply: Arc<dyn Fn(&JsonRpcRequest) -> JsonRpcMessage + Send + Sync>,
        delay: Duration,
    }

    impl ScriptedHandle {
        fn new(reply: impl Fn(&JsonRpcRequest) -> JsonRpcMessage + Send + Sync + 'static) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                reply: Arc::new(reply),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait::async_trait]
    impl TransportHandle for ScriptedHandle {
        async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().unwrap().push(message.clone());
            match &message {
                JsonRpcMessage::Request(request) => Ok((self.reply)(request)),
                _ => Ok(JsonRpcMessage::Nil),
            }
        }
    }

    fn ok(request: &JsonRpcRequest, result: Value) -> JsonRpcMessage {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: request.id,
            result: Some(result),
            error: None,
        })
    }

    #[tokio::test]
    async fn test_list_tools_forwards_cursor() {
        let handle = ScriptedHandle::new(|request| {
            let cursor = request.params.as_ref().and_then(|p| p.get("cursor")).cloned();
            match cursor {
                None => ok(request, json!({"tools": [{"name": "a", "inputSchema": {}}], "nextCursor": "p2"})),
                Some(_) => ok(request, json!({"tools": [{"name": "b", "inputSchema": {}}]})),
            }
        });
        let client = McpClientImpl::new(McpService::with_timeout(
            handle.clone(),
            Duration::from_secs(5),
        ));

        let first = client.list_tools(None).await.unwrap();
        assert_eq!(first.next_cursor.as_deref(), Some("p2"));
        let second = client.list_tools(first.next_cursor).await.unwrap();
        assert_eq!(second.tools[0].name, "b");
        assert!(second.next_cursor.is_none());

        let sent = handle.sent.lock().unwrap();
        assert!(matches!(
            &sent[1],
            JsonRpcMessage::Request(r) if r.params == Some(json!({"cursor": "p2"}))
        ));
    }

    #[tokio::test]
    async fn test_initialize_sends_initialized_notification() {
        let handle = ScriptedHandle::new(|request| {
            ok(
                request,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "quotes", "version": "1.0"}
                }),
            )
        });
        let client = McpClientImpl::new(McpService::new(handle.clone()));

        let info = ClientInfo {
            name: "tally".to_string(),
            version: "0.1.0".to_string(),
        };
        let result = client
            .initialize(info, ClientCapabilities::default())
            .await
            .unwrap();
        assert_eq!(result.server_info.name, "quotes");

        let sent = handle.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(matches!(
            &sent[1],
            JsonRpcMessage::Notification(n) if n.method == "notifications/initialized"
        ));
    }

    #[tokio::test]
    async fn test_rpc_error_is_surfaced() {
        let handle = ScriptedHandle::new(|request| {
            JsonRpcMessage::Response(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(ErrorData {
                    code: -32602,
                    message: "unknown tool".to_string(),
                    data: None,
                }),
            })
        });
        let client = McpClientImpl::new(McpService::new(handle));

        let err = client.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::RpcError { code: -32602, .. }));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let mut handle = ScriptedHandle::new(|request| ok(request, json!({"content": []})));
        handle.delay = Duration::from_millis(200);
        let client = McpClientImpl::new(McpService::with_timeout(
            handle,
            Duration::from_millis(20),
        ));

        let err = client.call_tool("slow", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }
}
