use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use mcp_core::protocol::JsonRpcMessage;
use tower::timeout::Timeout;
use tower::{Service, ServiceBuilder};

use crate::transport::{Error as TransportError, TransportHandle};

/// A Tower `Service` that forwards JsonRpcMessages through a started transport.
pub struct McpService<T: TransportHandle> {
    inner: Arc<T>,
}

impl<T: TransportHandle> McpService<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(transport),
        }
    }

    /// Wraps the service so every request fails with `Elapsed` once `timeout` passes.
    pub fn with_timeout(transport: T, timeout: Duration) -> Timeout<McpService<T>> {
        ServiceBuilder::new()
            .timeout(timeout)
            .service(McpService::new(transport))
    }
}

impl<T: TransportHandle> Clone for McpService<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TransportHandle> Service<JsonRpcMessage> for McpService<T> {
    type Response = JsonRpcMessage;
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // The transport actor queues messages, so the service never applies backpressure
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: JsonRpcMessage) -> Self::Future {
        let transport = Arc::clone(&self.inner);
        Box::pin(async move { transport.send(message).await })
    }
}
