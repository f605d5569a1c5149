use serde::Serialize;

use crate::invocation::ToolInvocation;
use crate::providers::base::Usage;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinishReason {
    /// The model answered without calling tools.
    Stop,
    /// The step cap was reached while the model still wanted tools.
    StepLimit,
    Error,
}

impl FinishReason {
    /// Name used on the wire by AI SDK clients.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::StepLimit => "tool-calls",
            FinishReason::Error => "error",
        }
    }
}

/// What happened during one model round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step: usize,
    pub text: String,
    pub tool_calls: Vec<ToolInvocation>,
    pub tool_results: Vec<ToolInvocation>,
    pub usage: Usage,
}

impl StepResult {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Events emitted by the agent loop, in causal order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    StepStart { step: usize },
    TextDelta(String),
    /// The model began a tool call; the invocation is in `partial-call`.
    ToolCallStart(ToolInvocation),
    /// Arguments are complete; the invocation is in `call`.
    ToolCall(ToolInvocation),
    /// The adapter returned; the invocation is terminal.
    ToolResult(ToolInvocation),
    StepFinish(StepResult),
    Error(String),
    Finish { reason: FinishReason, usage: Usage },
}

impl AgentEvent {
    pub fn is_finish(&self) -> bool {
        matches!(self, AgentEvent::Finish { .. })
    }
}
