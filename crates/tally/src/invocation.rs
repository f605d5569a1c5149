//! Tool invocation lifecycle and the wire-level chat messages that carry them.
//!
//! An invocation moves `partial-call -> call -> result` or ends in `error`; terminal
//! states accept no further transitions.
use mcp_core::content::Content;
use mcp_core::handler::ToolError;
use mcp_core::role::Role;
use mcp_core::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationState {
    PartialCall,
    Call,
    Result,
    Error,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Result | InvocationState::Error)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvocationError {
    #[error("Invocation {id} is already in terminal state {state:?}")]
    AlreadyTerminal { id: String, state: InvocationState },
    #[error("Invocation {id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        id: String,
        from: InvocationState,
        to: InvocationState,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: InvocationState,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    /// A call the model has started emitting; arguments are not known yet.
    pub fn partial<I: Into<String>, N: Into<String>>(id: I, name: N) -> Self {
        Self {
            tool_call_id: id.into(),
            tool_name: name.into(),
            state: InvocationState::PartialCall,
            args: Value::Null,
            result: None,
        }
    }

    /// A call whose arguments are complete.
    pub fn call<I: Into<String>, N: Into<String>>(id: I, name: N, args: Value) -> Self {
        Self {
            tool_call_id: id.into(),
            tool_name: name.into(),
            state: InvocationState::Call,
            args,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, to: InvocationState) -> Result<(), InvocationError> {
        if self.state.is_terminal() {
            return Err(InvocationError::AlreadyTerminal {
                id: self.tool_call_id.clone(),
                state: self.state,
            });
        }
        let allowed = matches!(
            (self.state, to),
            (InvocationState::PartialCall, InvocationState::Call)
                | (InvocationState::PartialCall, InvocationState::Error)
                | (InvocationState::Call, InvocationState::Result)
                | (InvocationState::Call, InvocationState::Error)
        );
        if !allowed {
            return Err(InvocationError::InvalidTransition {
                id: self.tool_call_id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// `partial-call -> call` once the arguments have been fully received.
    pub fn arguments_ready(&mut self, args: Value) -> Result<(), InvocationError> {
        self.transition(InvocationState::Call)?;
        self.args = args;
        Ok(())
    }

    /// `call -> result`
    pub fn complete(&mut self, result: Value) -> Result<(), InvocationError> {
        self.transition(InvocationState::Result)?;
        self.result = Some(result);
        Ok(())
    }

    /// `partial-call | call -> error`; the message is kept as the result.
    pub fn fail<S: Into<String>>(&mut self, message: S) -> Result<(), InvocationError> {
        self.transition(InvocationState::Error)?;
        self.result = Some(Value::String(message.into()));
        Ok(())
    }
}

/// A chat message as the client sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl ChatMessage {
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_invocations: Vec::new(),
        }
    }
}

fn result_to_content(result: &Option<Value>) -> Vec<Content> {
    match result {
        Some(Value::String(text)) => vec![Content::text(text.clone())],
        Some(other) => vec![Content::text(other.to_string())],
        None => Vec::new(),
    }
}

/// Builds the model conversation from client messages.
///
/// Finished invocations on assistant messages are replayed as a tool request followed
/// by its response so the model sees earlier tool rounds. Unfinished ones are dropped.
pub fn to_conversation(messages: &[ChatMessage]) -> Vec<Message> {
    let mut conversation = Vec::with_capacity(messages.len());

    for chat in messages {
        match chat.role {
            Role::User => {
                if !chat.tool_invocations.is_empty() {
                    tracing::debug!(
                        count = chat.tool_invocations.len(),
                        "ignoring tool invocations on a user message"
                    );
                }
                conversation.push(Message::user().with_text(chat.content.clone()))
            }
            Role::Assistant => {
                let finished: Vec<&ToolInvocation> = chat
                    .tool_invocations
                    .iter()
                    .filter(|invocation| {
                        if !invocation.is_terminal() {
                            tracing::debug!(
                                id = %invocation.tool_call_id,
                                "dropping unfinished tool invocation from history"
                            );
                        }
                        invocation.is_terminal()
                    })
                    .collect();

                let mut assistant = Message::assistant();
                if !chat.content.is_empty() {
                    assistant = assistant.with_text(chat.content.clone());
                }
                for invocation in &finished {
                    assistant = assistant.with_tool_request(
                        invocation.tool_call_id.clone(),
                        Ok(ToolCall::new(
                            invocation.tool_name.clone(),
                            invocation.args.clone(),
                        )),
                    );
                }
                if !assistant.is_empty() {
                    conversation.push(assistant);
                }

                if !finished.is_empty() {
                    let mut responses = Message::user();
                    for invocation in finished {
                        let result = match invocation.state {
                            InvocationState::Error => Err(ToolError::ExecutionError(
                                invocation
                                    .result
                                    .as_ref()
                                    .and_then(Value::as_str)
                                    .unwrap_or("tool call failed")
                                    .to_string(),
                            )),
                            _ => Ok(result_to_content(&invocation.result)),
                        };
                        responses =
                            responses.with_tool_response(invocation.tool_call_id.clone(), result);
                    }
                    conversation.push(responses);
                }
            }
        }
    }

    conversation
}
