//! Bounding a whole content bundle to a model's input budget.
//!
//! The driver plans first ([`Pipeline::plan`]): it measures every unit and,
//! when the bundle as a whole is too large, allocates a per-category budget
//! and decides per unit whether to pass it through, truncate it or summarize
//! it. Executing the plan makes inference calls only for summarized units.
//! The assembled prompt is truncated to the available budget as a last resort.

use std::fmt::Write;
use std::future;

use condense_context::{
    BudgetCalculator, Reservations, TokenCounter, allocate, truncate_with_ellipsis,
};
use condense_providers::InferenceClient;
use condense_types::{ContentBudget, ContentBundle, ContentKind, ContentUnit, TokenUsage};
use serde::Serialize;
use thiserror::Error;

use crate::summarizer::{
    HierarchicalSummarizer, SummarizeError, SummarizerConfig, SummaryStats, hierarchical_threshold,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Fraction of the available budget a prompt may fill before it is reduced.
    pub hierarchical_trigger_ratio: f64,
    /// Units at or below this size are truncated instead of summarized.
    pub min_hierarchical_tokens: u32,
    pub summarizer: SummarizerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            hierarchical_trigger_ratio: 0.8,
            min_hierarchical_tokens: 8_000,
            summarizer: SummarizerConfig::default(),
        }
    }
}

/// Model and headroom for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetParams {
    pub model: String,
    pub reservations: Reservations,
}

impl BudgetParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reservations: Reservations::default(),
        }
    }
}

/// What the pipeline did (or will do) with one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    PassThrough,
    Summarized,
    Truncated,
}

impl UnitAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PassThrough => "pass through",
            Self::Summarized => "summarize",
            Self::Truncated => "truncate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUnit {
    pub kind: ContentKind,
    pub source_id: String,
    pub tokens: u32,
    /// Per-unit budget; `None` when the whole bundle fits.
    pub share: Option<u32>,
    pub action: UnitAction,
}

impl PlannedUnit {
    /// Human-readable routing decision, e.g. `README.md: summarize (12000 -> 3500 tokens)`.
    #[must_use]
    pub fn describe(&self) -> String {
        match self.share {
            Some(share) if self.action != UnitAction::PassThrough => format!(
                "{}: {} ({} -> {share} tokens)",
                self.source_id,
                self.action.as_str(),
                self.tokens
            ),
            _ => format!(
                "{}: {} ({} tokens)",
                self.source_id,
                self.action.as_str(),
                self.tokens
            ),
        }
    }
}

/// Budgets and routing decisions, computed without any inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BudgetPlan {
    pub model: String,
    pub available_budget: u32,
    /// `floor(available_budget * hierarchical_trigger_ratio)`.
    pub threshold: u32,
    pub bundle_tokens: u32,
    /// Section headers and separators, withheld before allocation.
    pub header_tokens: u32,
    pub single_pass: bool,
    /// Category budgets; `None` on the single-pass path.
    pub budget: Option<ContentBudget>,
    pub units: Vec<PlannedUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundedUnit {
    pub kind: ContentKind,
    pub source_id: String,
    pub text: String,
    pub original_tokens: u32,
    pub tokens: u32,
    pub action: UnitAction,
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SummaryStats>,
}

/// The bounded units of one bundle, in bundle order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoundedBundle {
    pub units: Vec<BoundedUnit>,
}

impl BoundedBundle {
    /// One `## <kind>: <source_id>` section per unit.
    #[must_use]
    pub fn render(&self) -> String {
        render_sections(
            self.units
                .iter()
                .map(|u| (u.kind, u.source_id.as_str(), u.text.as_str())),
        )
    }
}

#[derive(Debug)]
pub struct UnitFailure {
    pub kind: ContentKind,
    pub source_id: String,
    pub error: SummarizeError,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub plan: BudgetPlan,
    pub bundle: BoundedBundle,
    pub usage: TokenUsage,
    /// The rendered bundle, bounded by the available budget.
    pub prompt: String,
    /// Units that could not be summarized; they are absent from `bundle`.
    pub failures: Vec<UnitFailure>,
}

impl PipelineOutput {
    /// All-or-nothing view: the first unit failure becomes the error.
    pub fn into_result(mut self) -> Result<Self, PipelineError> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let failure = self.failures.remove(0);
        Err(PipelineError::UnitFailed {
            source_id: failure.source_id,
            source: failure.error,
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("model {model} leaves no input budget after reservations")]
    NoBudget { model: String },
    #[error("failed to summarize {source_id}")]
    UnitFailed {
        source_id: String,
        #[source]
        source: SummarizeError,
    },
}

pub struct Pipeline<C> {
    client: C,
    counter: TokenCounter,
    calculator: BudgetCalculator,
    config: PipelineConfig,
}

impl<C: InferenceClient> Pipeline<C> {
    pub fn new(
        client: C,
        counter: TokenCounter,
        calculator: BudgetCalculator,
        config: PipelineConfig,
    ) -> Self {
        Self {
            client,
            counter,
            calculator,
            config,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Measures the bundle and decides what happens to every unit.
    pub fn plan(
        &self,
        bundle: &ContentBundle,
        params: &BudgetParams,
    ) -> Result<BudgetPlan, PipelineError> {
        let available_budget = self
            .calculator
            .available_budget_with(&params.model, &params.reservations);
        if available_budget == 0 {
            return Err(PipelineError::NoBudget {
                model: params.model.clone(),
            });
        }

        let threshold =
            hierarchical_threshold(available_budget, self.config.hierarchical_trigger_ratio);
        let unit_tokens: Vec<u32> = bundle
            .units
            .iter()
            .map(|unit| self.counter.count(&unit.text))
            .collect();
        // Measured as rendered, so section headers count against the threshold.
        let bundle_tokens = self.counter.count(&render_sections(
            bundle
                .units
                .iter()
                .map(|u| (u.kind, u.source_id.as_str(), u.text.as_str())),
        ));
        let header_tokens = self.counter.count(&render_sections(
            bundle
                .units
                .iter()
                .map(|u| (u.kind, u.source_id.as_str(), "")),
        ));
        let single_pass = bundle_tokens <= threshold;

        let budget = (!single_pass).then(|| {
            allocate(
                available_budget.saturating_sub(header_tokens),
                bundle.has_primary_doc(),
                bundle.count(ContentKind::Source),
                bundle.count(ContentKind::Config),
            )
        });

        let units = bundle
            .units
            .iter()
            .zip(unit_tokens)
            .map(|(unit, tokens)| {
                let share = budget.map(|b| b.share_for(unit.kind, bundle.count(unit.kind)));
                let action = match share {
                    None => UnitAction::PassThrough,
                    Some(share) if tokens <= share => UnitAction::PassThrough,
                    Some(_) if tokens > self.config.min_hierarchical_tokens => {
                        UnitAction::Summarized
                    }
                    Some(_) => UnitAction::Truncated,
                };
                PlannedUnit {
                    kind: unit.kind,
                    source_id: unit.source_id.clone(),
                    tokens,
                    share,
                    action,
                }
            })
            .collect();

        tracing::info!(
            model = %params.model,
            available_budget,
            threshold,
            bundle_tokens,
            header_tokens,
            single_pass,
            "Planned content budget"
        );

        Ok(BudgetPlan {
            model: params.model.clone(),
            available_budget,
            threshold,
            bundle_tokens,
            header_tokens,
            single_pass,
            budget,
            units,
        })
    }

    /// Produces the bounded text for one unit according to its plan entry.
    pub async fn bound_unit(
        &self,
        unit: &ContentUnit,
        planned: &PlannedUnit,
    ) -> Result<BoundedUnit, SummarizeError> {
        let share = planned.share.unwrap_or(planned.tokens);
        let mut bounded = BoundedUnit {
            kind: unit.kind,
            source_id: unit.source_id.clone(),
            text: String::new(),
            original_tokens: planned.tokens,
            tokens: 0,
            action: planned.action,
            input_tokens: 0,
            output_tokens: 0,
            stats: None,
        };

        match planned.action {
            UnitAction::PassThrough => {
                bounded.text = unit.text.clone();
                bounded.tokens = planned.tokens;
            }
            UnitAction::Truncated => {
                bounded.text = truncate_with_ellipsis(&self.counter, &unit.text, share).into_owned();
                bounded.tokens = self.counter.count(&bounded.text);
            }
            UnitAction::Summarized => {
                let summarizer = HierarchicalSummarizer::new(
                    &self.client,
                    &self.counter,
                    &self.config.summarizer,
                );
                let outcome = summarizer
                    .summarize(unit.kind, &unit.source_id, &unit.text, share)
                    .await?;
                // Summaries aim at the share; truncation makes it exact.
                bounded.text =
                    truncate_with_ellipsis(&self.counter, &outcome.result.text, share).into_owned();
                bounded.tokens = self.counter.count(&bounded.text);
                bounded.input_tokens = outcome.result.input_tokens;
                bounded.output_tokens = outcome.result.output_tokens;
                bounded.stats = Some(outcome.stats);
            }
        }

        tracing::info!(
            source_id = %unit.source_id,
            action = planned.action.as_str(),
            original_tokens = planned.tokens,
            tokens = bounded.tokens,
            "Bounded content unit"
        );
        Ok(bounded)
    }

    /// Sums usage, prices it for the client's model and renders the prompt.
    ///
    /// Calls that succeeded before a unit failed are billed too.
    pub fn assemble(
        &self,
        plan: BudgetPlan,
        units: Vec<BoundedUnit>,
        failures: Vec<UnitFailure>,
    ) -> PipelineOutput {
        let mut usage = TokenUsage::default();
        for unit in &units {
            usage.add_tokens(unit.input_tokens, unit.output_tokens);
        }
        for failure in &failures {
            usage.merge(&failure.error.usage());
        }
        usage.price(&self.calculator.registry().pricing(self.client.model()));

        let bundle = BoundedBundle { units };
        let prompt =
            truncate_with_ellipsis(&self.counter, &bundle.render(), plan.available_budget)
                .into_owned();

        PipelineOutput {
            plan,
            bundle,
            usage,
            prompt,
            failures,
        }
    }

    /// Plans, bounds every unit in order and assembles the result.
    ///
    /// A unit whose summarization fails is reported in
    /// [`PipelineOutput::failures`] and left out; the others still run.
    pub async fn summarize_to_budget(
        &self,
        bundle: &ContentBundle,
        params: &BudgetParams,
        progress: impl FnMut(&str),
    ) -> Result<PipelineOutput, PipelineError> {
        self.summarize_to_budget_paced(bundle, params, progress, || future::ready(()))
            .await
    }

    /// [`summarize_to_budget`](Self::summarize_to_budget) that awaits `pause()`
    /// before every unit after the first. Callers use it to throttle requests.
    pub async fn summarize_to_budget_paced<F, Fut>(
        &self,
        bundle: &ContentBundle,
        params: &BudgetParams,
        mut progress: impl FnMut(&str),
        mut pause: F,
    ) -> Result<PipelineOutput, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let plan = self.plan(bundle, params)?;
        progress(&format!(
            "{} tokens across {} units; {} available for {}",
            plan.bundle_tokens,
            bundle.units.len(),
            plan.available_budget,
            plan.model
        ));

        let mut units = Vec::with_capacity(bundle.units.len());
        let mut failures = Vec::new();
        for (i, (unit, planned)) in bundle.units.iter().zip(&plan.units).enumerate() {
            if i > 0 {
                pause().await;
            }
            progress(&planned.describe());
            match self.bound_unit(unit, planned).await {
                Ok(bounded) => units.push(bounded),
                Err(error) => {
                    let SummarizeError::Inference { phase, source, .. } = &error;
                    tracing::warn!(
                        source_id = %unit.source_id,
                        %phase,
                        error = %source,
                        "Unit failed"
                    );
                    progress(&format!(
                        "{}: failed in {phase} phase: {source}",
                        unit.source_id
                    ));
                    failures.push(UnitFailure {
                        kind: unit.kind,
                        source_id: unit.source_id.clone(),
                        error,
                    });
                }
            }
        }

        Ok(self.assemble(plan, units, failures))
    }
}

fn render_sections<'a>(sections: impl Iterator<Item = (ContentKind, &'a str, &'a str)>) -> String {
    let mut out = String::new();
    for (kind, source_id, text) in sections {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        let _ = write!(out, "## {}: {source_id}\n\n{}", kind.label(), text.trim_end());
    }
    out
}
