mod agent;
mod config;
mod events;

pub use agent::{Agent, AgentError};
pub use config::AgentConfig;
pub use events::{AgentEvent, FinishReason, StepResult};
