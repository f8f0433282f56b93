//! Conversation orchestration: the tool-calling loop, tool call recovery
//! and system prompt assembly.

#[allow(clippy::module_inception)]
pub mod agent;
pub mod parsing;
pub mod prompt;

pub use agent::{
    describe_action, Agent, AgentBuilder, ContextInfo, RunMetrics, RunOutcome,
    ITERATION_LIMIT_MESSAGE,
};
pub use parsing::extract_tool_calls;
pub use prompt::{Specialization, SystemPromptBuilder};
