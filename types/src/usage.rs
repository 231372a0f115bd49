//! Token and cost accounting.

use serde::{Deserialize, Serialize};

/// Output of one model-call site together with what it cost.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryResult {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl SummaryResult {
    /// Text that needed no model call.
    pub fn passthrough(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    #[must_use]
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    #[must_use]
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

/// Running total across every call of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

impl TokenUsage {
    pub fn record(&mut self, result: &SummaryResult) {
        self.add_tokens(result.input_tokens, result.output_tokens);
    }

    pub fn add_tokens(&mut self, input_tokens: u32, output_tokens: u32) {
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
        self.total_tokens = self.input_tokens + self.output_tokens;
    }

    /// Adds another total's tokens; cost is left for [`price`](Self::price).
    pub fn merge(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens = self.input_tokens + self.output_tokens;
    }

    /// Recomputes `estimated_cost` from the token totals.
    pub fn price(&mut self, pricing: &ModelPricing) {
        self.estimated_cost = pricing.cost(self.input_tokens, self.output_tokens);
    }
}
