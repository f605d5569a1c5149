use std::collections::{BTreeMap, HashSet};

use serde_json::{json, Value};

use crate::message::{Message, MessageContent, ToolRequest};
use crate::model::ModelConfig;
use crate::providers::base::{CompletionChunk, ProviderUsage, Usage};
use crate::providers::errors::ProviderError;
use crate::providers::utils::{get_model, is_valid_function_name, sanitize_function_name};
use mcp_core::content::Content;
use mcp_core::handler::ToolError;
use mcp_core::tool::{Tool, ToolCall};

/// Convert internal Message format to OpenAI's API message specification
pub fn format_messages(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut text_parts = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        text_parts.push(text.text.clone());
                    }
                }
                MessageContent::Image(image) => {
                    converted["content"] = json!([{
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", image.mime_type, image.data)
                        }
                    }]);
                }
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let arguments = match &tool_call.arguments {
                            // text the model sent that never parsed goes back verbatim
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        };
                        let call = json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&tool_call.name),
                                "arguments": arguments,
                            }
                        });
                        match converted.get_mut("tool_calls").and_then(Value::as_array_mut) {
                            Some(calls) => calls.push(call),
                            None => converted["tool_calls"] = json!([call]),
                        }
                    }
                    // no function name to declare, so there is no call a tool message could answer
                    Err(e) => {
                        tracing::debug!(id = %request.id, error = %e, "skipping unparsed tool request");
                    }
                },
                MessageContent::ToolResponse(response) => {
                    let content = match &response.tool_result {
                        Ok(contents) => contents
                            .iter()
                            .map(|content| match content {
                                Content::Text(text) => text.text.clone(),
                                Content::Image(_) => {
                                    "This tool result included an image that cannot be shown."
                                        .to_string()
                                }
                                Content::Resource(resource) => resource.resource.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join("\n"),
                        // A tool result error is shown as output so the model can interpret the error message
                        Err(e) => format!("The tool call returned the following error:\n{}", e),
                    };
                    output.push(json!({
                        "role": "tool",
                        "content": content,
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if !text_parts.is_empty() {
            converted["content"] = json!(text_parts.join("\n"));
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn format_tools(tools: &[Tool]) -> Result<Vec<Value>, ProviderError> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ProviderError::ExecutionError(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

pub fn create_request(
    model_config: &ModelConfig,
    system: &str,
    messages: &[Message],
    tools: &[Tool],
    stream: bool,
) -> Result<Value, ProviderError> {
    let mut messages_array = vec![json!({"role": "system", "content": system})];
    messages_array.extend(format_messages(messages));

    let mut payload = json!({
        "model": model_config.model_name,
        "messages": messages_array,
    });

    let tools_spec = format_tools(tools)?;
    if !tools_spec.is_empty() {
        payload["tools"] = json!(tools_spec);
    }
    if let Some(temp) = model_config.temperature {
        payload["temperature"] = json!(temp);
    }
    if let Some(tokens) = model_config.max_tokens {
        payload["max_tokens"] = json!(tokens);
    }
    if stream {
        payload["stream"] = json!(true);
        payload["stream_options"] = json!({"include_usage": true});
    }

    Ok(payload)
}

fn parse_tool_call(id: String, function_name: String, arguments: &str) -> ToolRequest {
    if !is_valid_function_name(&function_name) {
        let error = ToolError::NotFound(format!(
            "The provided function name '{}' had invalid characters, it must match this regex [a-zA-Z0-9_-]+",
            function_name
        ));
        return ToolRequest {
            id,
            tool_call: Err(error),
        };
    }

    let arguments = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    // unparseable arguments stay as text; the call is answered with a validation error
    let params = serde_json::from_str::<Value>(arguments)
        .unwrap_or_else(|_| Value::String(arguments.to_string()));
    ToolRequest {
        id,
        tool_call: Ok(ToolCall::new(&function_name, params)),
    }
}

/// Convert OpenAI's API response to internal Message format
pub fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ProviderError::ResponseParseError("No message in response".to_string()))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default().to_string();
            let function_name = tool_call["function"]["name"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();
            message = message.with_content(MessageContent::ToolRequest(parse_tool_call(
                id,
                function_name,
                arguments,
            )));
        }
    }

    Ok(message)
}

pub fn get_usage(data: &Value) -> Usage {
    let Some(usage) = data.get("usage").filter(|u| u.is_object()) else {
        return Usage::default();
    };

    let read = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);
    let input_tokens = read("prompt_tokens");
    let output_tokens = read("completion_tokens");
    let total_tokens = read("total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });

    Usage::new(input_tokens, output_tokens, total_tokens)
}

pub fn is_context_length_error(error: &Value) -> Option<ProviderError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ProviderError::ContextLengthExceeded(message))
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

/// Accumulates `chat.completion.chunk` deltas into completion chunks.
///
/// Tool call fragments are keyed by their `index`; a call is announced as soon as its id
/// and name are known and handed over whole once the stream ends.
#[derive(Debug, Default)]
pub struct StreamState {
    model: Option<String>,
    tool_calls: BTreeMap<u64, PartialToolCall>,
}

impl StreamState {
    pub fn handle_chunk(&mut self, chunk: &Value) -> Vec<CompletionChunk> {
        let mut out = Vec::new();

        if self.model.is_none() && chunk.get("model").is_some() {
            self.model = Some(get_model(chunk));
        }

        let choices = chunk
            .get("choices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for choice in choices {
            let delta = &choice["delta"];

            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(CompletionChunk::TextDelta(text.to_string()));
                }
            }

            let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) else {
                continue;
            };
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    partial.id = id.to_string();
                }
                if let Some(name) = call["function"].get("name").and_then(Value::as_str) {
                    partial.name.push_str(name);
                }
                if let Some(arguments) = call["function"].get("arguments").and_then(Value::as_str)
                {
                    partial.arguments.push_str(arguments);
                }
                if !partial.announced && !partial.id.is_empty() && !partial.name.is_empty() {
                    partial.announced = true;
                    out.push(CompletionChunk::ToolCallStart {
                        id: partial.id.clone(),
                        name: partial.name.clone(),
                    });
                }
            }
        }

        if chunk.get("usage").is_some_and(Value::is_object) {
            let model = self.model.clone().unwrap_or_else(|| "Unknown".to_string());
            out.push(CompletionChunk::Usage(ProviderUsage::new(
                model,
                get_usage(chunk),
            )));
        }

        out
    }

    /// Complete tool calls in the order the model emitted them.
    pub fn finish(self) -> Vec<CompletionChunk> {
        self.tool_calls
            .into_values()
            .map(|partial| {
                CompletionChunk::ToolCall(parse_tool_call(
                    partial.id,
                    partial.name,
                    &partial.arguments,
                ))
            })
            .collect()
    }
}
