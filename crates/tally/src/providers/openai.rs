use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::time::Duration;

use super::base::{CompletionStream, Provider, ProviderUsage};
use super::errors::ProviderError;
use super::formats::openai::{
    create_request, get_usage, is_context_length_error, response_to_message, StreamState,
};
use super::utils::{emit_debug_trace, get_model, handle_response, non_ok_response_to_provider_error};
use crate::message::Message;
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

pub const OPEN_AI_DEFAULT_HOST: &str = "https://api.openai.com";
pub const OPEN_AI_DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub host: String,
    pub api_key: String,
    pub model: ModelConfig,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            host: OPEN_AI_DEFAULT_HOST.to_string(),
            api_key: api_key.into(),
            model: ModelConfig::new(OPEN_AI_DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct OpenAiProvider {
    #[serde(skip)]
    client: Client,
    host: String,
    #[serde(skip)]
    api_key: String,
    model: ModelConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            host: config.host,
            api_key: config.api_key,
            model: config.model,
        })
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.host.trim_end_matches('/'))
    }

    async fn post(&self, payload: &Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(payload)
            .send()
            .await?;

        handle_response(payload, response).await
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn get_model_config(&self) -> &ModelConfig {
        &self.model
    }

    #[tracing::instrument(
        skip(self, system, messages, tools),
        fields(model = %self.model.model_name, messages = messages.len(), tools = tools.len())
    )]
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, ProviderUsage), ProviderError> {
        let payload = create_request(&self.model, system, messages, tools, false)?;

        let response = self.post(&payload).await?;

        // Raise specific error if context length is exceeded
        if let Some(error) = response.get("error") {
            if let Some(err) = is_context_length_error(error) {
                return Err(err);
            }
            return Err(ProviderError::ServerError(format!("OpenAI API error: {}", error)));
        }

        let message = response_to_message(&response)?;
        let usage = get_usage(&response);
        let model = get_model(&response);
        emit_debug_trace(self, &payload, &response, &usage);
        Ok((message, ProviderUsage::new(model, usage)))
    }

    #[tracing::instrument(
        skip(self, system, messages, tools),
        fields(model = %self.model.model_name, messages = messages.len(), tools = tools.len())
    )]
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<CompletionStream, ProviderError> {
        let payload = create_request(&self.model, system, messages, tools, true)?;

        let request = self
            .client
            .post(self.url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&payload);
        let mut source =
            EventSource::new(request).map_err(|e| ProviderError::ExecutionError(e.to_string()))?;

        let stream = async_stream::try_stream! {
            let mut state = StreamState::default();

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => {
                        if message.data.trim() == "[DONE]" {
                            break;
                        }
                        let chunk: Value = serde_json::from_str(&message.data)?;
                        if let Some(error) = chunk.get("error") {
                            source.close();
                            Err::<(), _>(is_context_length_error(error).unwrap_or_else(|| {
                                ProviderError::ServerError(format!("OpenAI API error: {}", error))
                            }))?;
                        }
                        for completion_chunk in state.handle_chunk(&chunk) {
                            yield completion_chunk;
                        }
                    }
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(reqwest_eventsource::Error::InvalidStatusCode(_, response)) => {
                        // the event source would otherwise reconnect
                        source.close();
                        Err::<(), _>(non_ok_response_to_provider_error(&payload, response).await)?;
                    }
                    Err(e) => {
                        source.close();
                        Err::<(), _>(ProviderError::RequestFailed(e.to_string()))?;
                    }
                }
            }
            source.close();

            for completion_chunk in state.finish() {
                yield completion_chunk;
            }
        };

        Ok(Box::pin(stream))
    }
}
