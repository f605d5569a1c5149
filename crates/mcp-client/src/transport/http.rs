use async_trait::async_trait;
use mcp_core::protocol::{JsonRpcMessage, JsonRpcRequest};
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use super::{send_message, Error, PendingRequests, Transport, TransportHandle, TransportMessage};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// HTTP transport for MCP that implements the POST-based portion of the Streamable HTTP spec.
///
/// Each request is a POST to the endpoint; the server may answer with a plain JSON body or
/// with a `text/event-stream` body carrying one or more messages.
pub struct HttpTransport {
    endpoint_url: String,
    http_client: HttpClient,
    session_id: Arc<RwLock<Option<String>>>,
    custom_headers: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new<S: Into<String>>(endpoint_url: S) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            http_client: HttpClient::new(),
            session_id: Arc::new(RwLock::new(None)),
            custom_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.custom_headers = headers;
        self
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

#[derive(Clone)]
pub struct HttpTransportHandle {
    sender: mpsc::Sender<TransportMessage>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl HttpTransportHandle {
    /// Get the current session ID if one exists
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }
}

#[async_trait]
impl TransportHandle for HttpTransportHandle {
    async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, Error> {
        send_message(&self.sender, message).await
    }
}

struct HttpConnection {
    pending_requests: PendingRequests,
    endpoint_url: String,
    http_client: HttpClient,
    session_id: Arc<RwLock<Option<String>>>,
    custom_headers: HashMap<String, String>,
}

pub struct HttpActor {
    receiver: mpsc::Receiver<TransportMessage>,
    connection: Arc<HttpConnection>,
}

impl HttpActor {
    pub async fn run(mut self) {
        // requests are independent POSTs, so they are dispatched without waiting on each other
        while let Some(transport_msg) = self.receiver.recv().await {
            let connection = Arc::clone(&self.connection);
            tokio::spawn(async move { connection.handle_message(transport_msg).await });
        }

        // Clean up pending requests when actor stops
        self.connection.pending_requests.clear().await;
    }
}

impl HttpConnection {
    async fn handle_message(&self, mut transport_msg: TransportMessage) {
        let request_id = match &transport_msg.message {
            JsonRpcMessage::Request(JsonRpcRequest { id: Some(id), .. }) => Some(*id),
            _ => None,
        };

        let mut notification_tx = None;
        match (request_id, transport_msg.response_tx.take()) {
            (Some(id), Some(response_tx)) => self.pending_requests.insert(id, response_tx).await,
            (None, response_tx) => notification_tx = response_tx,
            (Some(_), None) => {}
        }

        let outcome = self.post(&transport_msg.message).await;

        match (request_id, outcome) {
            (Some(id), Err(e)) => {
                tracing::debug!(id, error = %e, "MCP request failed");
                self.pending_requests.respond(id, Err(e)).await;
            }
            (Some(id), Ok(())) => {
                if self.pending_requests.contains(id).await {
                    self.pending_requests
                        .respond(id, Err(Error::MissingResponse(id)))
                        .await;
                }
            }
            (None, outcome) => {
                if let Err(e) = &outcome {
                    tracing::error!("Error handling message: {:?}", e);
                }
                if let Some(tx) = notification_tx {
                    let _ = tx.send(outcome.map(|()| JsonRpcMessage::Nil));
                }
            }
        }
    }

    async fn post(&self, message: &JsonRpcMessage) -> Result<(), Error> {
        let message_str = serde_json::to_string(message).map_err(Error::Serialization)?;

        let mut request = self
            .http_client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(message_str);

        for (key, value) in &self.custom_headers {
            request = request.header(key, value);
        }

        if let Some(session_id) = &*self.session_id.read().await {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(|e| Error::HttpError {
            status: 0,
            message: e.to_string(),
        })?;

        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<(), Error> {
        let status = response.status();

        if let Some(session_id) = response.headers().get(SESSION_HEADER) {
            if let Ok(session_str) = session_id.to_str() {
                *self.session_id.write().await = Some(session_str.to_string());
            }
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| status.to_string());
            return Err(Error::HttpError {
                status: status.as_u16(),
                message,
            });
        }

        // 202 Accepted carries no body
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = response.text().await.map_err(|e| Error::HttpError {
            status: 0,
            message: e.to_string(),
        })?;

        if content_type.contains("text/event-stream") {
            for message in parse_event_stream(&body) {
                self.process_json_rpc_message(message).await;
            }
        } else if !body.trim().is_empty() {
            let message = serde_json::from_str::<JsonRpcMessage>(&body)?;
            self.process_json_rpc_message(message).await;
        }

        Ok(())
    }

    async fn process_json_rpc_message(&self, message: JsonRpcMessage) {
        let id = match &message {
            JsonRpcMessage::Response(response) => response.id,
            JsonRpcMessage::Error(error) => error.id,
            _ => None,
        };

        match id {
            Some(id) => self.pending_requests.respond(id, Ok(message)).await,
            None => tracing::debug!("Received non-response message: {:?}", message),
        }
    }
}

/// Pulls the JSON-RPC messages out of a fully buffered event-stream body.
fn parse_event_stream(body: &str) -> Vec<JsonRpcMessage> {
    let normalized = body.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .filter_map(|event| {
            let data = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect::<Vec<_>>();
            if data.is_empty() {
                return None;
            }
            match serde_json::from_str::<JsonRpcMessage>(&data.join("\n")) {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::debug!("Skipping unparseable event: {}", e);
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl Transport for HttpTransport {
    type Handle = HttpTransportHandle;

    async fn start(&self) -> Result<Self::Handle, Error> {
        let (tx, rx) = mpsc::channel(32);

        let actor = HttpActor {
            receiver: rx,
            connection: Arc::new(HttpConnection {
                pending_requests: PendingRequests::new(),
                endpoint_url: self.endpoint_url.clone(),
                http_client: self.http_client.clone(),
                session_id: Arc::clone(&self.session_id),
                custom_headers: self.custom_headers.clone(),
            }),
        };

        tokio::spawn(actor.run());

        Ok(HttpTransportHandle {
            sender: tx,
            session_id: Arc::clone(&self.session_id),
        })
    }

    async fn close(&self) -> Result<(), Error> {
        // Terminate the server-side session if one was issued
        let session_id = self.session_id.write().await.take();
        if let Some(session_id) = session_id {
            let mut request = self
                .http_client
                .delete(&self.endpoint_url)
                .header(SESSION_HEADER, session_id);
            for (key, value) in &self.custom_headers {
                request = request.header(key, value);
            }
            let response = request.send().await.map_err(|e| Error::HttpError {
                status: 0,
                message: e.to_string(),
            })?;
            // servers that do not support explicit termination answer 405
            if !response.status().is_success()
                && response.status() != reqwest::StatusCode::METHOD_NOT_ALLOWED
            {
                return Err(Error::HttpError {
                    status: response.status().as_u16(),
                    message: response.status().to_string(),
                });
            }
        }
        Ok(())
    }
}
