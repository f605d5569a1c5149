//! Request-scoped wiring: remote discovery, tool merging, the agent loop and teardown.
use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tracing::{info, instrument};

use crate::agents::{Agent, AgentConfig, AgentEvent};
use crate::message::Message;
use crate::providers::base::Provider;
use crate::registry::{RemoteToolConfig, RemoteToolSession};
use crate::tools::{ToolAdapter, ToolSet};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub agent: AgentConfig,
    /// Remote tool server to discover tools from on every request
    pub remote: Option<RemoteToolConfig>,
}

/// Long-lived entry point shared by all requests. Holds nothing request specific.
pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    local_tools: Vec<ToolAdapter>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        local_tools: Vec<ToolAdapter>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            local_tools,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer one conversation.
    ///
    /// The remote session opened here is closed once the agent finishes. If the caller
    /// drops the stream early the session is released by its drop path instead.
    #[instrument(skip_all, fields(messages = messages.len()))]
    pub fn run(&self, messages: Vec<Message>) -> BoxStream<'static, AgentEvent> {
        let provider = Arc::clone(&self.provider);
        let local_tools = self.local_tools.clone();
        let config = self.config.clone();

        Box::pin(async_stream::stream! {
            let session = match &config.remote {
                Some(remote) => RemoteToolSession::connect(remote).await,
                None => RemoteToolSession::disconnected(),
            };
            if let Some(e) = session.discovery_error() {
                info!("Continuing with local tools only: {}", e);
            }

            let tools = ToolSet::merge(session.tools(), local_tools);
            let agent = Agent::new(provider, tools, config.agent.clone());
            let mut events = agent.reply(messages);
            while let Some(event) = events.next().await {
                yield event;
            }
            drop(events);

            session.close().await;
        })
    }
}
