//! Per-request connection to a remote MCP tool server.
//!
//! Connecting is best effort: any failure leaves the session without tools and the
//! request carries on with local tools only. The session is released exactly once,
//! either through [`RemoteToolSession::close`] or, if the request is abandoned, from `Drop`.
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_client::transport::Error as TransportError;
use mcp_client::{
    ClientCapabilities, ClientInfo, Error as ClientError, HttpTransport, McpClient, McpClientImpl,
    McpService, Transport,
};
use mcp_core::tool::Tool;
use thiserror::Error;
use tracing::{info, warn};

use crate::providers::utils::{is_valid_function_name, sanitize_function_name, MAX_FUNCTION_NAME_LEN};
use crate::tools::{RemoteTool, ToolAdapter};

const MAX_LIST_PAGES: usize = 64;

#[derive(Debug, Clone)]
pub struct RemoteToolConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Bounds session setup plus tool listing as a whole
    pub connect_timeout: Duration,
    /// Bounds each individual request on an established session
    pub call_timeout: Duration,
}

impl RemoteToolConfig {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            connect_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Adds the key as an `api_key` query parameter, the way hosted MCP registries expect it.
    pub fn with_api_key(mut self, api_key: &str) -> Self {
        match reqwest::Url::parse(&self.url) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("api_key", api_key);
                self.url = url.to_string();
            }
            Err(e) => warn!("Remote tool URL is invalid, api key not applied: {}", e),
        }
        self
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, call_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.call_timeout = call_timeout;
        self
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Remote server error: {0}")]
    Client(#[from] ClientError),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Tool listing did not finish within {0} pages")]
    TooManyPages(usize),
}

struct Connection {
    transport: Arc<HttpTransport>,
    close_timeout: Duration,
}

impl Connection {
    async fn close(&self) {
        match tokio::time::timeout(self.close_timeout, self.transport.close()).await {
            Ok(Ok(())) => info!("Remote tool session closed"),
            Ok(Err(e)) => warn!("Error closing remote tool session: {}", e),
            Err(_) => warn!(
                "Closing remote tool session timed out after {:?}",
                self.close_timeout
            ),
        }
    }
}

pub struct RemoteToolSession {
    connection: Option<Connection>,
    tools: Vec<RemoteTool>,
    discovery_error: Option<DiscoveryError>,
    closed: AtomicBool,
}

impl RemoteToolSession {
    /// A session for requests that have no remote server configured.
    pub fn disconnected() -> Self {
        Self {
            connection: None,
            tools: Vec::new(),
            discovery_error: None,
            closed: AtomicBool::new(true),
        }
    }

    #[tracing::instrument(skip(config), fields(connect_timeout = ?config.connect_timeout))]
    pub async fn connect(config: &RemoteToolConfig) -> Self {
        let transport = Arc::new(
            HttpTransport::new(config.url.clone()).with_headers(config.headers.clone()),
        );

        let discovery = tokio::time::timeout(
            config.connect_timeout,
            discover(&transport, config.call_timeout),
        )
        .await
        .unwrap_or(Err(DiscoveryError::Timeout(config.connect_timeout)));

        let connection = Connection {
            transport,
            close_timeout: config.call_timeout,
        };

        match discovery {
            Ok(tools) => {
                info!(
                    tools = ?tools.iter().map(RemoteTool::name).collect::<Vec<_>>(),
                    "Connected to remote tool server"
                );
                Self {
                    connection: Some(connection),
                    tools,
                    discovery_error: None,
                    closed: AtomicBool::new(false),
                }
            }
            Err(e) => {
                warn!("Failed to connect to remote tool server: {}", e);
                // a session may have been issued before the failure
                connection.close().await;
                Self {
                    connection: None,
                    tools: Vec::new(),
                    discovery_error: Some(e),
                    closed: AtomicBool::new(true),
                }
            }
        }
    }

    pub fn tools(&self) -> Vec<ToolAdapter> {
        self.tools.iter().cloned().map(ToolAdapter::Remote).collect()
    }

    pub fn discovery_error(&self) -> Option<&DiscoveryError> {
        self.discovery_error.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some() && !self.closed.load(Ordering::SeqCst)
    }

    /// Ends the remote session. Only the first call does anything; failures are logged.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(connection) = &self.connection {
            connection.close().await;
        }
    }
}

impl Drop for RemoteToolSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(connection) = self.connection.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { connection.close().await });
            }
            Err(_) => warn!("Remote tool session dropped outside a runtime and was not closed"),
        }
    }
}

async fn discover(
    transport: &HttpTransport,
    call_timeout: Duration,
) -> Result<Vec<RemoteTool>, DiscoveryError> {
    let handle = transport.start().await?;
    let service = McpService::with_timeout(handle, call_timeout);
    let client: Arc<dyn McpClient> = Arc::new(McpClientImpl::new(service));

    let info = ClientInfo {
        name: "tally".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    client
        .initialize(info, ClientCapabilities::default())
        .await?;

    let mut listed = Vec::new();
    let mut cursor = None;
    for _ in 0..MAX_LIST_PAGES {
        let page = client.list_tools(cursor).await?;
        listed.extend(page.tools);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => {
                return Ok(callable_names(&listed)
                    .into_iter()
                    .zip(listed)
                    .filter_map(|(name, tool)| {
                        let name = name?;
                        Some(RemoteTool::new(tool, Arc::clone(&client), call_timeout).with_name(name))
                    })
                    .collect())
            }
        }
    }
    Err(DiscoveryError::TooManyPages(MAX_LIST_PAGES))
}

/// The name each listed tool is offered to the model under, or `None` to leave it out.
///
/// Names outside `[a-zA-Z0-9_-]{1,64}` are rewritten to fit. A rewritten name that
/// clashes with another tool's is dropped, so one bad entry never breaks the request.
fn callable_names(tools: &[Tool]) -> Vec<Option<String>> {
    let advertised: HashSet<&str> = tools
        .iter()
        .map(|tool| tool.name.as_str())
        .filter(|name| is_valid_function_name(name))
        .collect();
    let mut taken = HashSet::new();

    tools
        .iter()
        .map(|tool| {
            let name = if is_valid_function_name(&tool.name) {
                tool.name.clone()
            } else {
                let name: String = sanitize_function_name(&tool.name)
                    .chars()
                    .take(MAX_FUNCTION_NAME_LEN)
                    .collect();
                if name.is_empty() || advertised.contains(name.as_str()) {
                    warn!(tool = %tool.name, "Skipping remote tool with an unusable name");
                    return None;
                }
                warn!(tool = %tool.name, name = %name, "Renaming remote tool to a valid function name");
                name
            };
            if !taken.insert(name.clone()) {
                warn!(tool = %tool.name, "Skipping remote tool with a duplicate name");
                return None;
            }
            Some(name)
        })
        .collect()
}
