//! Summarization engine for Condense.
//!
//! [`HierarchicalSummarizer`] reduces a single oversized text through a
//! chunk/combine tree of model calls. [`Pipeline`] applies it, together with
//! truncation, to every unit of a [`ContentBundle`] so the assembled prompt
//! fits the target model's input budget.

mod prompts;

pub mod pipeline;
pub mod summarizer;

pub use condense_context::{BudgetCalculator, ModelRegistry, Reservations, TokenCounter};
pub use condense_providers::{InferenceClient, InferenceError};
pub use condense_types::{ContentBundle, ContentKind, ContentUnit, SummaryResult, TokenUsage};

pub use pipeline::{
    BoundedBundle, BoundedUnit, BudgetParams, BudgetPlan, Pipeline, PipelineConfig,
    PipelineError, PipelineOutput, PlannedUnit, UnitAction, UnitFailure,
};
pub use summarizer::{
    HierarchicalSummarizer, SummarizeError, SummarizerConfig, SummaryOutcome, SummaryPhase,
    SummaryStats, hierarchical_threshold, needs_hierarchical,
};
