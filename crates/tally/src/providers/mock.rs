use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::base::{Provider, ProviderUsage, Usage};
use super::errors::ProviderError;
use crate::message::Message;
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

/// A mock provider that returns pre-configured responses for testing
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Result<Message, ProviderError>>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
    model_config: ModelConfig,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self::with_results(responses.into_iter().map(Ok).collect())
    }

    /// Create a mock provider whose responses may include failures
    pub fn with_results(responses: Vec<Result<Message, ProviderError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            requests: Arc::new(Mutex::new(Vec::new())),
            model_config: ModelConfig::new("mock".to_string()),
        }
    }

    /// The conversations the provider has been asked to complete, in call order
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn get_model_config(&self) -> &ModelConfig {
        &self.model_config
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[Tool],
    ) -> Result<(Message, ProviderUsage), ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(messages.to_vec());
        }

        let next = {
            let mut responses = self
                .responses
                .lock()
                .map_err(|e| ProviderError::ExecutionError(e.to_string()))?;
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };

        let usage = ProviderUsage::new(
            "mock".to_string(),
            Usage::new(Some(1), Some(1), Some(2)),
        );
        match next {
            Some(response) => response.map(|message| (message, usage)),
            // Return empty response if no more pre-configured responses
            None => Ok((Message::assistant().with_text(""), usage)),
        }
    }
}
