pub mod content;
pub use content::Content;
pub mod handler;
pub use handler::{ToolError, ToolResult};
pub mod role;
pub use role::Role;
pub mod tool;
pub use tool::{Tool, ToolCall};
pub mod protocol;
