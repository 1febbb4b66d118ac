//! Token and cost accounting
//!
//! A [`TokenLedger`] lives for the whole session and only ever grows.
//! Cost is derived from the accumulated token counts and the fixed per-1k
//! rates of the active provider, never summed incrementally, so it cannot
//! drift from the counts it is based on.

use serde::{Deserialize, Serialize};

/// Token counts reported by one completion call
///
/// Backends that do not report usage produce [`TokenUsage::default`], which
/// is all zeroes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens() == 0
    }
}

/// Price of a provider in dollars per 1000 tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Cost of the given token counts in dollars
    pub fn cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Running token totals for a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenLedger {
    prompt_tokens: u64,
    completion_tokens: u64,
    calls: u64,
    pricing: Pricing,
}

impl TokenLedger {
    pub fn new(pricing: Pricing) -> Self {
        Self {
            pricing,
            ..Self::default()
        }
    }

    /// Fold one completion's usage into the totals
    pub fn add(&mut self, usage: TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.calls += 1;
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    /// Always `prompt_tokens + completion_tokens`
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Number of completion calls folded in
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    /// Accumulated cost in dollars
    pub fn cost(&self) -> f64 {
        self.pricing.cost(self.prompt_tokens, self.completion_tokens)
    }

    /// Cost formatted as dollars with two decimals, e.g. `$4.30`
    pub fn cost_string(&self) -> String {
        format!("${:.2}", self.cost())
    }

    /// Totals as a [`TokenUsage`]
    pub fn totals(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}

impl std::fmt::Display for TokenLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} tokens ({} in / {} out) {}",
            self.total_tokens(),
            self.prompt_tokens,
            self.completion_tokens,
            self.cost_string()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_call() {
        let mut ledger = TokenLedger::new(Pricing::new(0.50, 1.50));
        ledger.add(TokenUsage::new(1000, 500));

        assert_eq!(ledger.prompt_tokens(), 1000);
        assert_eq!(ledger.completion_tokens(), 500);
        assert_eq!(ledger.total_tokens(), 1500);
        assert_eq!(ledger.cost_string(), "$1.25");
    }

    #[test]
    fn test_multiple_calls_accumulate() {
        let mut ledger = TokenLedger::new(Pricing::new(0.50, 1.50));
        ledger.add(TokenUsage::new(1000, 500));
        ledger.add(TokenUsage::new(2000, 1000));
        ledger.add(TokenUsage::new(500, 200));

        assert_eq!(ledger.prompt_tokens(), 3500);
        assert_eq!(ledger.completion_tokens(), 1700);
        assert_eq!(ledger.total_tokens(), 5200);
        assert_eq!(ledger.calls(), 3);
        assert!((ledger.cost() - 4.30).abs() < 1e-9);
        assert_eq!(ledger.cost_string(), "$4.30");
    }

    #[test]
    fn test_zero_usage() {
        let mut ledger = TokenLedger::default();
        assert_eq!(ledger.cost_string(), "$0.00");

        ledger.add(TokenUsage::default());
        assert_eq!(ledger.total_tokens(), 0);
        assert_eq!(ledger.calls(), 1);
    }

    #[test]
    fn test_free_provider_tracks_tokens() {
        let mut ledger = TokenLedger::new(Pricing::default());
        ledger.add(TokenUsage::new(12983, 880));
        assert_eq!(ledger.total_tokens(), 13863);
        assert_eq!(ledger.cost_string(), "$0.00");
    }

    #[test]
    fn test_display() {
        let mut ledger = TokenLedger::new(Pricing::new(0.50, 1.50));
        ledger.add(TokenUsage::new(10000, 5000));
        assert_eq!(ledger.to_string(), "15000 tokens (10000 in / 5000 out) $12.50");
    }
}
