//! Token usage tracking and cost estimation.

use serde::Serialize;

use forge_core::ForgeError;
use forge_gen::TokenUsage;

/// Estimated cost per 1M tokens (input, output) by model prefix.
const COST_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-5", 2.00, 8.00),
    ("o3", 2.00, 8.00),
    ("o4-mini", 1.10, 4.40),
    ("claude-sonnet", 3.00, 15.00),
    ("claude-opus", 15.00, 75.00),
    ("claude-haiku", 0.25, 1.25),
    ("llama-4", 0.60, 0.60),
    ("llama3.3-70b", 0.60, 0.60),
    ("llama3.1-8b", 0.10, 0.10),
];

/// Estimated cost in USD. Longest prefix wins so "gpt-4.1-mini" beats
/// "gpt-4.1". Unknown models cost zero.
#[must_use]
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let mut best: Option<(&str, f64, f64)> = None;
    for &(prefix, inp, out) in COST_TABLE {
        if model.starts_with(prefix)
            && best.is_none_or(|(current, _, _)| prefix.len() > current.len())
        {
            best = Some((prefix, inp, out));
        }
    }
    let Some((_, inp_rate, out_rate)) = best else {
        return 0.0;
    };
    (prompt_tokens as f64 * inp_rate + completion_tokens as f64 * out_rate) / 1_000_000.0
}

/// Accumulates token usage across one build run.
#[derive(Debug, Default)]
pub struct CostTracker {
    max_cost: Option<f64>,
    records: Vec<(String, TokenUsage)>,
    cache_hits: u64,
}

/// JSON-serializable cost summary.
#[derive(Debug, Serialize)]
pub struct CostSummary {
    pub api_calls: usize,
    pub cache_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostTracker {
    #[must_use]
    pub fn new(max_cost: Option<f64>) -> Self {
        Self {
            max_cost,
            records: Vec::new(),
            cache_hits: 0,
        }
    }

    pub fn record(&mut self, module_name: &str, usage: TokenUsage) {
        self.records.push((module_name.to_string(), usage));
    }

    pub fn record_cache_hit(&mut self) {
        self.cache_hits += 1;
    }

    #[must_use]
    pub fn total_prompt_tokens(&self) -> u64 {
        self.records.iter().map(|(_, u)| u.prompt_tokens).sum()
    }

    #[must_use]
    pub fn total_completion_tokens(&self) -> u64 {
        self.records.iter().map(|(_, u)| u.completion_tokens).sum()
    }

    #[must_use]
    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens() + self.total_completion_tokens()
    }

    #[must_use]
    pub fn estimated_cost(&self) -> f64 {
        self.records
            .iter()
            .map(|(_, u)| estimate_cost(&u.model, u.prompt_tokens, u.completion_tokens))
            .sum()
    }

    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    #[must_use]
    pub fn api_calls(&self) -> usize {
        self.records.len()
    }

    /// # Errors
    ///
    /// Returns [`ForgeError::BudgetExceeded`] once estimated cost passes the
    /// configured ceiling. No ceiling means this never fails.
    pub fn check_budget(&self) -> Result<(), ForgeError> {
        if let Some(limit) = self.max_cost {
            let spent = self.estimated_cost();
            if spent > limit {
                return Err(ForgeError::BudgetExceeded { spent, limit });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn summary(&self) -> CostSummary {
        CostSummary {
            api_calls: self.api_calls(),
            cache_hits: self.cache_hits,
            prompt_tokens: self.total_prompt_tokens(),
            completion_tokens: self.total_completion_tokens(),
            total_tokens: self.total_tokens(),
            estimated_cost_usd: (self.estimated_cost() * 1e6).round() / 1e6,
        }
    }

    /// Human-readable summary for stderr.
    #[must_use]
    pub fn format_summary(&self) -> String {
        let mut lines = vec![
            format!(
                "Cost: {} API call(s), {} cache hit(s)",
                self.api_calls(),
                self.cache_hits
            ),
            format!(
                "  Tokens: {} prompt + {} completion = {} total",
                self.total_prompt_tokens(),
                self.total_completion_tokens(),
                self.total_tokens()
            ),
            format!("  Estimated cost: ${:.4}", self.estimated_cost()),
        ];
        if let Some(limit) = self.max_cost {
            lines.push(format!("  Budget limit: ${limit:.4}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(model: &str, prompt: u64, completion: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            model: model.to_string(),
            provider: "openai".to_string(),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mini = estimate_cost("gpt-4.1-mini-2025-04-14", 1_000_000, 0);
        assert!((mini - 0.40).abs() < 1e-9);
        let full = estimate_cost("gpt-4.1-2025-04-14", 1_000_000, 0);
        assert!((full - 2.00).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_costs_nothing() {
        assert_eq!(estimate_cost("mystery-model", 1_000_000, 1_000_000), 0.0);
    }

    #[test]
    fn tracker_sums_records() {
        let mut tracker = CostTracker::new(None);
        tracker.record("a", usage("gpt-4.1-mini", 100, 50));
        tracker.record("b", usage("gpt-4.1-mini", 200, 100));
        tracker.record_cache_hit();

        assert_eq!(tracker.api_calls(), 2);
        assert_eq!(tracker.cache_hits(), 1);
        assert_eq!(tracker.total_prompt_tokens(), 300);
        assert_eq!(tracker.total_completion_tokens(), 150);
        assert_eq!(tracker.total_tokens(), 450);
        assert!(tracker.check_budget().is_ok());
    }

    #[test]
    fn budget_check_fails_past_the_limit() {
        let mut tracker = CostTracker::new(Some(0.0001));
        tracker.record("a", usage("claude-opus", 1_000_000, 1_000_000));
        let err = tracker.check_budget().unwrap_err();
        assert!(matches!(err, ForgeError::BudgetExceeded { .. }));
        assert!(err.to_string().contains("budget limit"));
    }

    #[test]
    fn no_ceiling_never_fails() {
        let mut tracker = CostTracker::new(None);
        tracker.record("a", usage("claude-opus", u64::from(u32::MAX), 0));
        assert!(tracker.check_budget().is_ok());
    }

    #[test]
    fn summary_serializes() {
        let mut tracker = CostTracker::new(Some(1.0));
        tracker.record("a", usage("gpt-4.1-mini", 1000, 500));
        let json = serde_json::to_string(&tracker.summary()).unwrap();
        assert!(json.contains("\"api_calls\":1"));
        assert!(json.contains("estimated_cost_usd"));
        assert!(tracker.format_summary().contains("Budget limit"));
    }
}
