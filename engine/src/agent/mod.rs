//! Agent Loop
//!
//! The conversation state machine that turns a prompt into an answer by
//! alternating completion requests and capability calls, plus the pieces a
//! session owns: conversation history, usage, metrics and observers.

pub mod conversation;
pub mod core;
pub mod metrics;
pub mod observer;
pub mod prompt;

pub use conversation::Conversation;
pub use self::core::{
    Agent, AgentSettings, RunOutcome, StopReason, DEFAULT_MAX_TURNS, MAX_TURNS_MESSAGE,
    ORCHESTRATE, ORCHESTRATION_DONE_MESSAGE,
};
pub use metrics::{SessionMetrics, ToolUsage};
pub use observer::{AgentObserver, NoopObserver, ScriptCallBridge};
