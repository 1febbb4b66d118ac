//! Session metrics
//!
//! Per-session tool usage counters. Owned by the [`Agent`](super::Agent) that
//! produces them; there is no process-wide instance.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use super::core::ORCHESTRATE;

/// Counters for one capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolUsage {
    pub calls: u64,
    pub successes: u64,
    pub errors: u64,
    pub total_time: Duration,
}

impl ToolUsage {
    /// Success rate in percent, 0 when never called
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            return 0.0;
        }
        self.successes as f64 / self.calls as f64 * 100.0
    }
}

#[derive(Debug, Clone)]
pub struct SessionMetrics {
    started: Instant,
    prompts: u64,
    direct_calls: u64,
    orchestration_calls: u64,
    tools: BTreeMap<String, ToolUsage>,
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            prompts: 0,
            direct_calls: 0,
            orchestration_calls: 0,
            tools: BTreeMap::new(),
        }
    }
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_prompt(&mut self) {
        self.prompts += 1;
    }

    /// Record one capability call requested by the model
    pub fn record_tool_call(&mut self, name: &str, success: bool, elapsed: Duration) {
        let usage = self.tools.entry(name.to_string()).or_default();
        usage.calls += 1;
        usage.total_time += elapsed;
        if success {
            usage.successes += 1;
        } else {
            usage.errors += 1;
        }

        if name == ORCHESTRATE {
            self.orchestration_calls += 1;
        } else {
            self.direct_calls += 1;
        }
    }

    pub fn prompts(&self) -> u64 {
        self.prompts
    }

    pub fn direct_calls(&self) -> u64 {
        self.direct_calls
    }

    pub fn orchestration_calls(&self) -> u64 {
        self.orchestration_calls
    }

    pub fn tool(&self, name: &str) -> Option<&ToolUsage> {
        self.tools.get(name)
    }

    /// Human-readable report, busiest tools first
    pub fn summary(&self) -> String {
        let rule = "=".repeat(60);
        let thin = "-".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "SESSION METRICS");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(
            out,
            "Session duration: {:.1}s",
            self.started.elapsed().as_secs_f64()
        );
        let _ = writeln!(out, "Total prompts: {}", self.prompts);
        let _ = writeln!(out, "Direct tool calls: {}", self.direct_calls);
        let _ = writeln!(out, "Orchestration calls: {}", self.orchestration_calls);
        let _ = writeln!(out);
        let _ = writeln!(out, "Tool usage:");
        let _ = writeln!(out, "{}", thin);

        let mut tools: Vec<_> = self.tools.iter().collect();
        tools.sort_by(|a, b| b.1.calls.cmp(&a.1.calls));
        for (name, usage) in tools {
            let _ = writeln!(
                out,
                "  {:20} {:3} calls  {:5.1}% success  {:>8.1}ms",
                name,
                usage.calls,
                usage.success_rate(),
                usage.total_time.as_secs_f64() * 1000.0
            );
        }

        let _ = writeln!(out, "{}", thin);
        let _ = writeln!(
            out,
            "Hybrid ratio: {}:{} (direct:orchestrate)",
            self.direct_calls, self.orchestration_calls
        );
        let _ = write!(out, "{}", rule);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_split_direct_and_orchestrated() {
        let mut metrics = SessionMetrics::new();
        metrics.record_prompt();
        metrics.record_tool_call("read_file", true, Duration::from_millis(5));
        metrics.record_tool_call("read_file", false, Duration::from_millis(5));
        metrics.record_tool_call(ORCHESTRATE, true, Duration::from_millis(40));

        assert_eq!(metrics.prompts(), 1);
        assert_eq!(metrics.direct_calls(), 2);
        assert_eq!(metrics.orchestration_calls(), 1);

        let read = metrics.tool("read_file").unwrap();
        assert_eq!(read.calls, 2);
        assert_eq!(read.errors, 1);
        assert_eq!(read.success_rate(), 50.0);
        assert_eq!(read.total_time, Duration::from_millis(10));
    }

    #[test]
    fn test_summary_orders_by_call_count() {
        let mut metrics = SessionMetrics::new();
        metrics.record_tool_call("grep", true, Duration::ZERO);
        metrics.record_tool_call("shell", true, Duration::ZERO);
        metrics.record_tool_call("shell", true, Duration::ZERO);

        let summary = metrics.summary();
        let shell = summary.find("shell").unwrap();
        let grep = summary.find("grep").unwrap();
        assert!(shell < grep);
        assert!(summary.contains("Hybrid ratio: 3:0 (direct:orchestrate)"));
        assert!(summary.contains("100.0% success"));
    }

    #[test]
    fn test_unused_tool_rate_is_zero() {
        assert_eq!(ToolUsage::default().success_rate(), 0.0);
    }
}
