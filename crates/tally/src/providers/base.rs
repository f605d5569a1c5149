use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use super::errors::ProviderError;
use crate::message::{Message, MessageContent, ToolRequest};
use crate::model::ModelConfig;
use mcp_core::tool::Tool;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub model: String,
    pub usage: Usage,
}

impl ProviderUsage {
    pub fn new(model: String, usage: Usage) -> Self {
        Self { model, usage }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Adds another step's counts; a side that never reported stays `None`.
    pub fn accumulate(&mut self, other: &Usage) {
        fn add(a: Option<i32>, b: Option<i32>) -> Option<i32> {
            match (a, b) {
                (Some(a), Some(b)) => Some(a + b),
                (a, None) => a,
                (None, b) => b,
            }
        }
        self.input_tokens = add(self.input_tokens, other.input_tokens);
        self.output_tokens = add(self.output_tokens, other.output_tokens);
        self.total_tokens = add(self.total_tokens, other.total_tokens);
    }
}

/// One increment of a streamed completion.
#[derive(Debug, Clone)]
pub enum CompletionChunk {
    TextDelta(String),
    /// The model started emitting a tool call; arguments follow later.
    ToolCallStart {
        id: String,
        name: String,
    },
    /// A fully received tool call.
    ToolCall(ToolRequest),
    Usage(ProviderUsage),
}

pub type CompletionStream = BoxStream<'static, Result<CompletionChunk, ProviderError>>;

/// Base trait for AI providers (OpenAI, Anthropic, etc)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Get the model configuration
    fn get_model_config(&self) -> &ModelConfig;

    /// Generate the next message using the configured model and other parameters
    ///
    /// # Arguments
    /// * `system` - The system prompt that guides the model's behavior
    /// * `messages` - The conversation history as a sequence of messages
    /// * `tools` - Optional list of tools the model can use
    ///
    /// # Returns
    /// A tuple containing the model's response message and provider usage statistics
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, ProviderUsage), ProviderError>;

    /// Stream the next message as it is generated.
    ///
    /// Providers without native streaming get a single-burst stream built from `complete`.
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<CompletionStream, ProviderError> {
        let (message, usage) = self.complete(system, messages, tools).await?;
        Ok(stream::iter(message_to_chunks(message, usage).into_iter().map(Ok)).boxed())
    }
}

/// Splits a complete message into the chunks a streaming provider would have sent.
pub fn message_to_chunks(message: Message, usage: ProviderUsage) -> Vec<CompletionChunk> {
    let mut chunks = Vec::new();
    for content in message.content {
        match content {
            MessageContent::Text(text) if !text.text.is_empty() => {
                chunks.push(CompletionChunk::TextDelta(text.text))
            }
            MessageContent::ToolRequest(request) => {
                if let Ok(call) = &request.tool_call {
                    chunks.push(CompletionChunk::ToolCallStart {
                        id: request.id.clone(),
                        name: call.name.clone(),
                    });
                }
                chunks.push(CompletionChunk::ToolCall(request));
            }
            _ => {}
        }
    }
    chunks.push(CompletionChunk::Usage(usage));
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_core::tool::ToolCall;
    use serde_json::json;

    #[test]
    fn test_usage_accumulate() {
        let mut total = Usage::default();
        total.accumulate(&Usage::new(Some(10), Some(20), Some(30)));
        total.accumulate(&Usage::new(Some(5), None, Some(5)));
        assert_eq!(total, Usage::new(Some(15), Some(20), Some(35)));
    }

    #[test]
    fn test_usage_serialization() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let value = serde_json::to_value(usage).unwrap();
        assert_eq!(value["input_tokens"], json!(10));
        assert_eq!(value["output_tokens"], json!(20));
        assert_eq!(value["total_tokens"], json!(30));
    }

    #[test]
    fn test_message_to_chunks_announces_calls_first() {
        let message = Message::assistant()
            .with_text("Checking")
            .with_tool_request("c1", Ok(ToolCall::new("lookup", json!({}))));
        let chunks = message_to_chunks(
            message,
            ProviderUsage::new("mock".to_string(), Usage::default()),
        );
        assert!(matches!(&chunks[0], CompletionChunk::TextDelta(t) if t == "Checking"));
        assert!(
            matches!(&chunks[1], CompletionChunk::ToolCallStart { id, name } if id == "c1" && name == "lookup")
        );
        assert!(matches!(&chunks[2], CompletionChunk::ToolCall(r) if r.id == "c1"));
        assert!(matches!(&chunks[3], CompletionChunk::Usage(_)));
    }
}
