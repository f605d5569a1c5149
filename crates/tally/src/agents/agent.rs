use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, FuturesUnordered, StreamExt};
use mcp_core::content::Content;
use mcp_core::handler::{ToolError, ToolResult};
use mcp_core::tool::ToolCall;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, error, instrument, warn};

use super::config::AgentConfig;
use super::events::{AgentEvent, FinishReason, StepResult};
use crate::guard::ResponseGuard;
use crate::invocation::ToolInvocation;
use crate::message::{Message, MessageContent, ToolRequest};
use crate::providers::base::{CompletionChunk, Provider, Usage};
use crate::providers::errors::ProviderError;
use crate::tools::{ToolAdapter, ToolSet};

/// Errors that end the loop. Failures of a single tool never show up here.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Ran into this error: {0}.\n\nPlease retry if you think this is a transient or recoverable error.")]
    Model(#[from] ProviderError),
    #[error("The model asked for a tool that is not available: {0}")]
    UnknownTool(String),
}

/// Drives the exchange between the model and the tools for one request.
pub struct Agent {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolSet>,
    config: AgentConfig,
}

impl Agent {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolSet, config: AgentConfig) -> Self {
        Self {
            provider,
            tools: Arc::new(tools),
            config,
        }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the loop over `messages`, streaming events as they happen.
    ///
    /// Each step sends the conversation to the model. Plain text ends the loop; tool calls
    /// are executed concurrently, their guarded results appended, and the model is asked
    /// again until it stops calling tools or `max_steps` model calls have been made.
    /// The stream always ends with exactly one [`AgentEvent::Finish`].
    #[instrument(skip(self, messages), fields(max_steps = self.config.max_steps, tools = self.tools.len()))]
    pub fn reply(&self, messages: Vec<Message>) -> BoxStream<'static, AgentEvent> {
        let provider = Arc::clone(&self.provider);
        let tools = Arc::clone(&self.tools);
        let config = self.config.clone();
        let max_steps = config.max_steps.max(1);

        Box::pin(async_stream::stream! {
            let declared = tools.tools();
            let mut conversation = messages;
            let mut total = Usage::default();

            for step in 1..=max_steps {
                yield AgentEvent::StepStart { step };
                let mut step_usage = Usage::default();

                let mut completion = match provider
                    .stream(&config.system_prompt, &conversation, &declared)
                    .await
                {
                    Ok(completion) => completion,
                    Err(e) => {
                        for event in failed(AgentError::from(e), total) {
                            yield event;
                        }
                        return;
                    }
                };

                let mut text = String::new();
                let mut started: HashMap<String, ToolInvocation> = HashMap::new();
                let mut requests: Vec<ToolRequest> = Vec::new();
                let mut model_error = None;
                while let Some(chunk) = completion.next().await {
                    match chunk {
                        Ok(CompletionChunk::TextDelta(delta)) => {
                            text.push_str(&delta);
                            yield AgentEvent::TextDelta(delta);
                        }
                        Ok(CompletionChunk::ToolCallStart { id, name }) => {
                            let partial = ToolInvocation::partial(id.clone(), name);
                            yield AgentEvent::ToolCallStart(partial.clone());
                            started.insert(id, partial);
                        }
                        Ok(CompletionChunk::ToolCall(request)) => requests.push(request),
                        Ok(CompletionChunk::Usage(usage)) => step_usage.accumulate(&usage.usage),
                        Err(e) => {
                            model_error = Some(e);
                            break;
                        }
                    }
                }
                drop(completion);
                total.accumulate(&step_usage);

                if let Some(e) = model_error {
                    for event in failed(AgentError::from(e), total) {
                        yield event;
                    }
                    return;
                }

                if requests.is_empty() {
                    let result = StepResult {
                        step,
                        text,
                        tool_calls: Vec::new(),
                        tool_results: Vec::new(),
                        usage: step_usage,
                    };
                    debug!(step, text = %result.text, "step finished");
                    yield AgentEvent::StepFinish(result);
                    yield AgentEvent::Finish { reason: FinishReason::Stop, usage: total };
                    return;
                }

                if let Some(name) = requests
                    .iter()
                    .find_map(|request| unknown_tool(&tools, request, &started))
                {
                    for event in failed(AgentError::UnknownTool(name), total) {
                        yield event;
                    }
                    return;
                }

                let mut invocations: Vec<ToolInvocation> = requests
                    .iter()
                    .map(|request| {
                        let mut invocation = started.remove(&request.id).unwrap_or_else(|| {
                            ToolInvocation::partial(request.id.clone(), requested_name(request))
                        });
                        let args = match &request.tool_call {
                            Ok(call) => call.arguments.clone(),
                            Err(_) => Value::Null,
                        };
                        if let Err(e) = invocation.arguments_ready(args) {
                            warn!("{}", e);
                        }
                        invocation
                    })
                    .collect();
                for invocation in &invocations {
                    yield AgentEvent::ToolCall(invocation.clone());
                }

                let mut outcomes: Vec<Option<ToolResult<Vec<Content>>>> = vec![None; requests.len()];
                let mut tool_results = Vec::with_capacity(requests.len());
                let mut pending = FuturesUnordered::new();
                for (index, request) in requests.iter().enumerate() {
                    let rejected = match &request.tool_call {
                        Ok(call) => match malformed_arguments(&request.id, &call.arguments) {
                            Some(error) => Some(error),
                            None => {
                                if let Some(tool) = tools.get(&call.name) {
                                    pending.push(spawn_tool(
                                        index,
                                        tool,
                                        call.arguments.clone(),
                                        config.tool_timeout,
                                    ));
                                }
                                None
                            }
                        },
                        Err(e) => Some(e.clone()),
                    };
                    if let Some(error) = rejected {
                        outcomes[index] = Some(settle(&mut invocations[index], Err(error), &config.guard));
                        tool_results.push(invocations[index].clone());
                        yield AgentEvent::ToolResult(invocations[index].clone());
                    }
                }

                while let Some((index, result)) = pending.next().await {
                    outcomes[index] = Some(settle(&mut invocations[index], result, &config.guard));
                    tool_results.push(invocations[index].clone());
                    yield AgentEvent::ToolResult(invocations[index].clone());
                }

                let mut assistant = Message::assistant();
                if !text.is_empty() {
                    assistant = assistant.with_text(text.clone());
                }
                let mut responses = Message::user();
                for ((request, outcome), invocation) in
                    requests.into_iter().zip(outcomes).zip(&invocations)
                {
                    // every call in the history needs a name so its response can answer it
                    let request = match request.tool_call {
                        Ok(_) => request,
                        Err(_) => ToolRequest {
                            id: request.id,
                            tool_call: Ok(ToolCall::new(invocation.tool_name.clone(), json!({}))),
                        },
                    };
                    if let Some(result) = outcome {
                        responses = responses.with_tool_response(request.id.clone(), result);
                    }
                    assistant = assistant.with_content(MessageContent::ToolRequest(request));
                }
                conversation.push(assistant);
                if !responses.is_empty() {
                    conversation.push(responses);
                }

                let result = StepResult {
                    step,
                    text,
                    tool_calls: invocations
                        .iter()
                        .map(|invocation| ToolInvocation::call(
                            invocation.tool_call_id.clone(),
                            invocation.tool_name.clone(),
                            invocation.args.clone(),
                        ))
                        .collect(),
                    tool_results,
                    usage: step_usage,
                };
                debug!(
                    step,
                    text = %result.text,
                    tool_calls = ?result.tool_calls,
                    tool_results = ?result.tool_results,
                    "step finished"
                );
                yield AgentEvent::StepFinish(result);
            }

            debug!(max_steps, "step limit reached");
            yield AgentEvent::Finish { reason: FinishReason::StepLimit, usage: total };
        })
    }
}

fn failed(error: AgentError, usage: Usage) -> [AgentEvent; 2] {
    error!("Agent loop failed: {}", error);
    [
        AgentEvent::Error(error.to_string()),
        AgentEvent::Finish {
            reason: FinishReason::Error,
            usage,
        },
    ]
}

fn unknown_tool(
    tools: &ToolSet,
    request: &ToolRequest,
    started: &HashMap<String, ToolInvocation>,
) -> Option<String> {
    match &request.tool_call {
        Ok(call) if !tools.contains(&call.name) => Some(call.name.clone()),
        Err(ToolError::NotFound(_)) => Some(
            started
                .get(&request.id)
                .map(|partial| partial.tool_name.clone())
                .unwrap_or_else(|| request.id.clone()),
        ),
        _ => None,
    }
}

fn requested_name(request: &ToolRequest) -> String {
    match &request.tool_call {
        Ok(call) => call.name.clone(),
        Err(_) => "unknown".to_string(),
    }
}

/// Tool arguments must be a JSON object. Text the model sent that never parsed as JSON
/// arrives here as a string and is rejected with the parser's reason.
fn malformed_arguments(id: &str, arguments: &Value) -> Option<ToolError> {
    let reason = match arguments {
        Value::Object(_) => return None,
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Err(e) => e.to_string(),
            Ok(_) => "expected a JSON object".to_string(),
        },
        other => format!("expected a JSON object, got {}", other),
    };
    Some(ToolError::InvalidParameters(format!(
        "Could not interpret tool use parameters for id {}: {}",
        id, reason
    )))
}

/// Runs the tool on its own task so a slow call does not hold up the others.
fn spawn_tool(
    index: usize,
    tool: Arc<ToolAdapter>,
    args: Value,
    timeout: Duration,
) -> impl Future<Output = (usize, ToolResult<Value>)> {
    let handle = tokio::spawn(async move {
        match tokio::time::timeout(timeout, tool.execute(args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(timeout.as_millis() as u64)),
        }
    });
    async move {
        let result = handle.await.unwrap_or_else(|e| {
            Err(ToolError::ExecutionError(format!("Tool task failed: {}", e)))
        });
        (index, result)
    }
}

/// Moves the invocation to its terminal state and returns what the model will see.
fn settle(
    invocation: &mut ToolInvocation,
    result: ToolResult<Value>,
    guard: &ResponseGuard,
) -> ToolResult<Vec<Content>> {
    let transition = match &result {
        Ok(value) => invocation.complete(Value::String(guard.guard(value))),
        Err(e) => invocation.fail(e.to_string()),
    };
    if let Err(e) = transition {
        warn!("{}", e);
    }
    match result {
        Ok(_) => Ok(invocation
            .result
            .iter()
            .filter_map(Value::as_str)
            .map(Content::text)
            .collect()),
        Err(e) => {
            debug!(tool = %invocation.tool_name, error = %e, "tool call failed");
            Err(e)
        }
    }
}
