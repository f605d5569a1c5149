use std::sync::Arc;

use tally::orchestrator::{Orchestrator, OrchestratorConfig};
use tally::providers::errors::ProviderError;
use tally::providers::openai::OpenAiProvider;
use tally::tools::{HttpDocumentSearch, PriceQuoteTool, RetrievalTool, ToolAdapter};
use tracing::info;

use crate::configuration::{RemoteSettings, Settings, ToolSettings};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn from_settings(settings: Settings) -> Result<Self, ProviderError> {
        let provider = OpenAiProvider::new(settings.provider.into_config())?;
        let config = OrchestratorConfig {
            agent: settings.agent.into_config(),
            remote: settings.remote.map(RemoteSettings::into_config),
        };
        Ok(Self::new(Orchestrator::new(
            Arc::new(provider),
            local_tools(settings.tools),
            config,
        )))
    }
}

fn local_tools(settings: ToolSettings) -> Vec<ToolAdapter> {
    let mut tools = Vec::new();
    match settings.retrieval_url {
        Some(url) => tools.push(
            RetrievalTool::new(
                settings.retrieval_name,
                settings.retrieval_description,
                Arc::new(HttpDocumentSearch::new(url)),
            )
            .into(),
        ),
        None => info!(
            "No retrieval service configured, {} is disabled",
            settings.retrieval_name
        ),
    }
    tools.push(
        PriceQuoteTool::new(settings.price_name, settings.price_description)
            .with_host(settings.price_host)
            .with_default_currency(settings.default_currency)
            .into(),
    );
    tools
}
