//! Hierarchical summarization of one oversized text.
//!
//! A text that does not fit its target is chunked, every chunk is summarized
//! with one call, and the chunk summaries are combined in batches until a
//! single summary remains:
//!
//! ```text
//! SinglePass ──(fits)──────────────────────────────────────────► Done
//!     │
//!     └──► NeedsSummarization ──► ChunkSummarize ──► Combine ──► Done
//!                                        │              │
//!                                        └──────────────┴──────► Failed
//! ```
//!
//! Combination is a loop over a work queue: while more than
//! `max_combine_batch` summaries remain, consecutive batches are merged with
//! one call each. A last call merges what is left. The number of combine
//! rounds is `ceil(log_B(chunks))` for batch size `B`.

use condense_context::{ChunkOptions, TokenCounter, chunk};
use condense_providers::retry::retry;
use condense_providers::{
    InferenceClient, InferenceError, InferenceOptions, InferenceRequest, RetryConfig,
};
use condense_types::{ContentKind, SummaryResult, TokenUsage};
use serde::Serialize;
use thiserror::Error;

use crate::prompts::{chunk_prompt, combine_prompt};

/// Smallest output budget requested from the model.
const MIN_SUMMARY_TOKENS: u32 = 64;

/// Per-unit state of the summarizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryPhase {
    SinglePass,
    NeedsSummarization,
    ChunkSummarize,
    Combine,
    Done,
    Failed,
}

impl SummaryPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SinglePass => "single_pass",
            Self::NeedsSummarization => "needs_summarization",
            Self::ChunkSummarize => "chunk_summarize",
            Self::Combine => "combine",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SummaryPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("inference failed in {phase} phase")]
    Inference {
        phase: SummaryPhase,
        /// Spent by the calls that succeeded before the failure.
        usage: TokenUsage,
        #[source]
        source: InferenceError,
    },
}

impl SummarizeError {
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        let Self::Inference { usage, .. } = self;
        *usage
    }

    fn with_usage(mut self, spent: TokenUsage) -> Self {
        let Self::Inference { usage, .. } = &mut self;
        *usage = spent;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizerConfig {
    pub chunking: ChunkOptions,
    /// Most summaries merged by one combine call; at least 2.
    pub max_combine_batch: usize,
    /// Output budget for each chunk summary.
    pub chunk_summary_tokens: u32,
    /// Output budget for each combine call.
    pub combine_summary_tokens: u32,
    pub temperature: f32,
    pub retry: RetryConfig,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkOptions::default(),
            max_combine_batch: 5,
            chunk_summary_tokens: 500,
            combine_summary_tokens: 1_500,
            temperature: 0.2,
            retry: RetryConfig::default(),
        }
    }
}

/// Call counts of one summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SummaryStats {
    pub chunk_calls: u32,
    pub combine_calls: u32,
    pub combine_rounds: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryOutcome {
    /// Final text plus the summed usage of every call.
    pub result: SummaryResult,
    pub stats: SummaryStats,
}

/// Token threshold above which a prompt must be summarized hierarchically:
/// `floor(available_budget * ratio)`.
#[must_use]
pub fn hierarchical_threshold(available_budget: u32, ratio: f64) -> u32 {
    (f64::from(available_budget) * ratio).floor() as u32
}

#[must_use]
pub fn needs_hierarchical(tokens: u32, available_budget: u32, ratio: f64) -> bool {
    tokens > hierarchical_threshold(available_budget, ratio)
}

pub struct HierarchicalSummarizer<'a, C> {
    client: &'a C,
    counter: &'a TokenCounter,
    config: &'a SummarizerConfig,
}

impl<'a, C: InferenceClient> HierarchicalSummarizer<'a, C> {
    pub fn new(client: &'a C, counter: &'a TokenCounter, config: &'a SummarizerConfig) -> Self {
        Self {
            client,
            counter,
            config,
        }
    }

    /// Reduces `text` to a summary aimed at `target_tokens`.
    ///
    /// Text that already fits is returned unchanged with zero usage. The
    /// result is not truncated; callers enforce the hard bound.
    pub async fn summarize(
        &self,
        kind: ContentKind,
        source_id: &str,
        text: &str,
        target_tokens: u32,
    ) -> Result<SummaryOutcome, SummarizeError> {
        let tokens = self.counter.count(text);
        self.enter(source_id, SummaryPhase::SinglePass);
        if tokens <= target_tokens {
            self.enter(source_id, SummaryPhase::Done);
            return Ok(SummaryOutcome {
                result: SummaryResult::passthrough(text),
                stats: SummaryStats::default(),
            });
        }

        self.enter(source_id, SummaryPhase::NeedsSummarization);
        let chunks = chunk(self.counter, text, &self.config.chunking);
        tracing::info!(
            source_id,
            tokens,
            target_tokens,
            chunks = chunks.len(),
            "Summarizing hierarchically"
        );

        let mut stats = SummaryStats::default();
        let mut usage = TokenUsage::default();

        self.enter(source_id, SummaryPhase::ChunkSummarize);
        let mut summaries = Vec::with_capacity(chunks.len());
        for c in &chunks {
            let max_output_tokens = self.config.chunk_summary_tokens;
            let (system, user) =
                chunk_prompt(kind, source_id, c.index, chunks.len(), &c.text, max_output_tokens);
            let result = self
                .call(source_id, SummaryPhase::ChunkSummarize, system, user, max_output_tokens)
                .await
                .map_err(|e| e.with_usage(usage))?;
            usage.record(&result);
            stats.chunk_calls += 1;

            if result.text.trim().is_empty() {
                tracing::warn!(
                    source_id,
                    chunk = c.index,
                    "Empty chunk summary; keeping chunk text"
                );
                summaries.push(c.text.clone());
            } else {
                summaries.push(result.text);
            }
        }

        self.enter(source_id, SummaryPhase::Combine);
        let batch_size = self.config.max_combine_batch.max(2);
        let combine_tokens = self.config.combine_summary_tokens.max(MIN_SUMMARY_TOKENS);
        let final_tokens = target_tokens.clamp(MIN_SUMMARY_TOKENS, combine_tokens);

        while summaries.len() > batch_size {
            stats.combine_rounds += 1;
            let mut next = Vec::with_capacity(summaries.len().div_ceil(batch_size));
            for batch in summaries.chunks(batch_size) {
                if let [single] = batch {
                    next.push(single.clone());
                    continue;
                }
                let result = self
                    .combine(kind, source_id, batch, combine_tokens, false)
                    .await
                    .map_err(|e| e.with_usage(usage))?;
                usage.record(&result);
                stats.combine_calls += 1;
                next.push(result.text);
            }
            tracing::debug!(
                source_id,
                round = stats.combine_rounds,
                remaining = next.len(),
                "Combine round finished"
            );
            summaries = next;
        }

        let text = if summaries.len() > 1 {
            stats.combine_rounds += 1;
            let result = self
                .combine(kind, source_id, &summaries, final_tokens, true)
                .await
                .map_err(|e| e.with_usage(usage))?;
            usage.record(&result);
            stats.combine_calls += 1;
            result.text
        } else {
            summaries.pop().unwrap_or_default()
        };

        self.enter(source_id, SummaryPhase::Done);
        Ok(SummaryOutcome {
            result: SummaryResult {
                text,
                input_tokens: u32::try_from(usage.input_tokens).unwrap_or(u32::MAX),
                output_tokens: u32::try_from(usage.output_tokens).unwrap_or(u32::MAX),
            },
            stats,
        })
    }

    /// One combine call; a blank answer falls back to the joined inputs.
    async fn combine(
        &self,
        kind: ContentKind,
        source_id: &str,
        summaries: &[String],
        max_output_tokens: u32,
        is_final: bool,
    ) -> Result<SummaryResult, SummarizeError> {
        let (system, user) =
            combine_prompt(kind, source_id, summaries, max_output_tokens, is_final);
        let mut result = self
            .call(source_id, SummaryPhase::Combine, system, user, max_output_tokens)
            .await?;
        if result.text.trim().is_empty() {
            tracing::warn!(
                source_id,
                inputs = summaries.len(),
                "Empty combined summary; joining inputs"
            );
            result.text = summaries.join("\n\n");
        }
        Ok(result)
    }

    async fn call(
        &self,
        source_id: &str,
        phase: SummaryPhase,
        system: String,
        user: String,
        max_output_tokens: u32,
    ) -> Result<SummaryResult, SummarizeError> {
        let request = InferenceRequest::new(
            system,
            user,
            InferenceOptions {
                temperature: self.config.temperature,
                max_output_tokens,
                json_mode: false,
            },
        );

        let client = self.client;
        let request = &request;
        match retry(&self.config.retry, move || client.infer(request)).await {
            Ok(completion) => {
                tracing::debug!(
                    source_id,
                    %phase,
                    input_tokens = completion.input_tokens,
                    output_tokens = completion.output_tokens,
                    "Inference call finished"
                );
                Ok(completion.into())
            }
            Err(source) => {
                self.enter(source_id, SummaryPhase::Failed);
                Err(SummarizeError::Inference {
                    phase,
                    usage: TokenUsage::default(),
                    source,
                })
            }
        }
    }

    fn enter(&self, source_id: &str, phase: SummaryPhase) {
        tracing::trace!(source_id, %phase, model = self.client.model(), "Summary phase");
    }
}
