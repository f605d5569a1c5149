use std::collections::HashMap;

use async_trait::async_trait;
use mcp_core::protocol::JsonRpcMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

/// A generic error type for transport operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport was not connected or is already closed")]
    NotConnected,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Server sent no response for request {0}")]
    MissingResponse(u64),

    #[error("Unsupported message type")]
    UnsupportedMessage,
}

/// A message that can be sent through the transport
#[derive(Debug)]
pub struct TransportMessage {
    /// The JSON-RPC message to send
    pub message: JsonRpcMessage,
    /// Channel to receive the response on. A notification is answered with `Nil` once
    /// the server has accepted it.
    pub response_tx: Option<oneshot::Sender<Result<JsonRpcMessage, Error>>>,
}

/// A generic asynchronous transport trait with channel-based communication
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Handle: TransportHandle;

    /// Start the transport and establish the underlying connection.
    /// Returns the transport handle for sending messages.
    async fn start(&self) -> Result<Self::Handle, Error>;

    /// Close the transport and free any resources.
    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
pub trait TransportHandle: Send + Sync + Clone + 'static {
    async fn send(&self, message: JsonRpcMessage) -> Result<JsonRpcMessage, Error>;
}

/// Hands a message to a transport actor and waits for the matching reply.
///
/// Notifications are awaited too, so a caller that sends `notifications/initialized`
/// knows the server has it before issuing the next request.
pub async fn send_message(
    sender: &mpsc::Sender<TransportMessage>,
    message: JsonRpcMessage,
) -> Result<JsonRpcMessage, Error> {
    match message {
        JsonRpcMessage::Request(_) | JsonRpcMessage::Notification(_) => {
            let (respond_to, response) = oneshot::channel();
            let msg = TransportMessage {
                message,
                response_tx: Some(respond_to),
            };
            sender.send(msg).await.map_err(|_| Error::ChannelClosed)?;
            response.await.map_err(|_| Error::ChannelClosed)?
        }
        _ => Err(Error::UnsupportedMessage),
    }
}

// A data structure to store pending requests and their response channels
pub struct PendingRequests {
    requests: RwLock<HashMap<u64, oneshot::Sender<Result<JsonRpcMessage, Error>>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, id: u64, sender: oneshot::Sender<Result<JsonRpcMessage, Error>>) {
        self.requests.write().await.insert(id, sender);
    }

    pub async fn respond(&self, id: u64, response: Result<JsonRpcMessage, Error>) {
        if let Some(tx) = self.requests.write().await.remove(&id) {
            let _ = tx.send(response);
        }
    }

    pub async fn contains(&self, id: u64) -> bool {
        self.requests.read().await.contains_key(&id)
    }

    pub async fn clear(&self) {
        self.requests.write().await.clear();
    }
}

pub mod http;
pub use http::HttpTransport;
