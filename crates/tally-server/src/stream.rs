//! Encodes agent events in the AI SDK data stream protocol.
//!
//! Every event becomes one line `<code>:<json>\n`, written to the response as soon as it
//! is produced.
use serde_json::{json, Value};
use tally::agents::AgentEvent;
use tally::providers::base::Usage;

pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";
pub const DATA_STREAM_VERSION: &str = "v1";

pub struct DataStreamEncoder {
    message_id: String,
}

impl DataStreamEncoder {
    pub fn new<S: Into<String>>(message_id: S) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }

    pub fn encode(&self, event: &AgentEvent) -> String {
        match event {
            AgentEvent::StepStart { .. } => part('f', json!({ "messageId": self.message_id })),
            AgentEvent::TextDelta(text) => part('0', json!(text)),
            AgentEvent::ToolCallStart(invocation) => part(
                'b',
                json!({
                    "toolCallId": invocation.tool_call_id,
                    "toolName": invocation.tool_name,
                }),
            ),
            AgentEvent::ToolCall(invocation) => part(
                '9',
                json!({
                    "toolCallId": invocation.tool_call_id,
                    "toolName": invocation.tool_name,
                    "args": invocation.args,
                }),
            ),
            AgentEvent::ToolResult(invocation) => part(
                'a',
                json!({
                    "toolCallId": invocation.tool_call_id,
                    "result": invocation.result.clone().unwrap_or(Value::Null),
                }),
            ),
            AgentEvent::StepFinish(step) => {
                let reason = if step.has_tool_calls() {
                    "tool-calls"
                } else {
                    "stop"
                };
                part(
                    'e',
                    json!({
                        "finishReason": reason,
                        "usage": usage(&step.usage),
                        "isContinued": false,
                    }),
                )
            }
            AgentEvent::Error(message) => part('3', json!(message)),
            AgentEvent::Finish { reason, usage: total } => part(
                'd',
                json!({
                    "finishReason": reason.as_str(),
                    "usage": usage(total),
                }),
            ),
        }
    }
}

fn part(code: char, value: Value) -> String {
    format!("{}:{}\n", code, value)
}

fn usage(usage: &Usage) -> Value {
    json!({
        "promptTokens": usage.input_tokens.unwrap_or(0),
        "completionTokens": usage.output_tokens.unwrap_or(0),
    })
}
