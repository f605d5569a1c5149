use std::time::Duration;

use crate::guard::ResponseGuard;

pub const DEFAULT_MAX_STEPS: usize = 3;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-orchestrator settings for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub system_prompt: String,
    /// Upper bound on model calls for one request
    pub max_steps: usize,
    /// Applied to every tool execution on top of the tool's own timeouts
    pub tool_timeout: Duration,
    pub guard: ResponseGuard,
}

impl AgentConfig {
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_steps: DEFAULT_MAX_STEPS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            guard: ResponseGuard::default(),
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_guard(mut self, guard: ResponseGuard) -> Self {
        self.guard = guard;
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("")
    }
}
