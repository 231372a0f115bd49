//! Core domain types for condense.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the pipeline.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod budget;
mod content;
mod usage;

pub use budget::{BASIS_POINTS, CategoryWeights, ContentBudget};
pub use content::{Chunk, ContentBundle, ContentKind, ContentUnit};
pub use usage::{ModelPricing, SummaryResult, TokenUsage};

use serde::{Deserialize, Serialize};

// ============================================================================
// Provider Types
// ============================================================================

/// Supported inference providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    #[default]
    OpenAI,
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::OpenAI => "openai",
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::OpenAI => "GPT",
        }
    }

    #[must_use]
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Claude => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }

    /// Cheap model used for summarization calls when none is configured.
    #[must_use]
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Claude => "claude-haiku-4-5",
            Provider::OpenAI => "gpt-4o-mini",
        }
    }

    /// Parse provider from string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Some(Provider::Claude),
            "openai" | "gpt" | "chatgpt" => Some(Provider::OpenAI),
            _ => None,
        }
    }

    /// Infer provider from model name prefix.
    #[must_use]
    pub fn from_model_name(model: &str) -> Option<Self> {
        let lower = model.trim().to_ascii_lowercase();
        if lower.starts_with("claude-") {
            Some(Provider::Claude)
        } else if lower.starts_with("gpt-") || lower.starts_with("o1") || lower.starts_with("o3") {
            Some(Provider::OpenAI)
        } else {
            None
        }
    }
}
