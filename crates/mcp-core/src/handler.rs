use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of a single tool execution.
///
/// These stay scoped to the call that produced them: they are reported back to the
/// model as the outcome of that call rather than aborting the conversation.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Upstream request failed with status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("Execution failed: {0}")]
    ExecutionError(String),
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

/// Helper function to generate JSON schema for a type
pub fn generate_schema<T: JsonSchema>() -> ToolResult<Value> {
    let schema = schemars::schema_for!(T);
    let mut value =
        serde_json::to_value(schema).map_err(|e| ToolError::SchemaError(e.to_string()))?;

    // model APIs reject the draft/title metadata schemars puts at the root
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    Ok(value)
}
