//! Agent observers
//!
//! Callbacks a caller can hook into the loop to render progress. They are
//! synchronous and must return quickly; the loop does not wait on anything
//! they start.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::sandbox::CallObserver;
use crate::usage::TokenLedger;

pub trait AgentObserver: Send + Sync {
    /// Before a capability runs, with its repaired arguments
    fn on_tool_call(&self, _name: &str, _args: &Map<String, Value>) {}

    /// After a capability ran; `output` is the output or `Error: ...`
    fn on_tool_result(&self, _name: &str, _args: &Map<String, Value>, _output: &str) {}

    /// Text the model produced, including text alongside tool calls
    fn on_completion_text(&self, _text: &str) {}

    /// Running totals after each completion
    fn on_token_update(&self, _prompt: u64, _completion: u64, _total: u64, _cost: f64) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AgentObserver for NoopObserver {}

/// Reports calls made inside orchestration scripts as tool calls
pub struct ScriptCallBridge(pub Arc<dyn AgentObserver>);

impl CallObserver for ScriptCallBridge {
    fn on_script_call(&self, capability: &str, args: &Map<String, Value>) {
        self.0.on_tool_call(capability, args);
    }
}

pub(crate) fn notify_tokens(observer: &dyn AgentObserver, ledger: &TokenLedger) {
    observer.on_token_update(
        ledger.prompt_tokens(),
        ledger.completion_tokens(),
        ledger.total_tokens(),
        ledger.cost(),
    );
}
