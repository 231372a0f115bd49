//! End-to-end pipeline behavior against a scripted model and a word tokenizer.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use condense_context::{
    BudgetCalculator, ChunkOptions, ModelLimits, ModelRegistry, Reservations, TokenCounter,
    Tokenizer, TokenizerError,
};
use condense_engine::{
    BudgetParams, Pipeline, PipelineConfig, PipelineError, SummarizerConfig, UnitAction,
};
use condense_providers::{Completion, InferenceClient, InferenceError, InferenceRequest, RetryConfig};
use condense_types::{ContentBundle, ContentKind, ContentUnit, ModelPricing};

struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
        Ok(text.split_whitespace().count())
    }

    fn name(&self) -> &str {
        "words"
    }
}

/// Answers `S<n>` for call `n`, or rejects prompts mentioning `fail_on`.
#[derive(Default)]
struct ScriptedClient {
    calls: AtomicU32,
    fail_on: Option<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl InferenceClient for ScriptedClient {
    fn model(&self) -> &str {
        "test-model"
    }

    async fn infer(&self, request: &InferenceRequest) -> Result<Completion, InferenceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.user_prompt.clone());
        if let Some(needle) = self.fail_on
            && request.user_prompt.contains(needle)
        {
            return Err(InferenceError::Http {
                status: 400,
                body: "bad request".into(),
                retryable: false,
                retry_after: None,
            });
        }
        Ok(Completion {
            text: format!("S{n}"),
            input_tokens: 10,
            output_tokens: 2,
        })
    }
}

fn words(n: usize, tag: &str) -> String {
    (0..n).map(|i| format!("{tag}{i}")).collect::<Vec<_>>().join(" ")
}

/// "test-model": 23 500 window leaves 20 000 available (threshold 16 000).
/// "small-model": 5 500 window leaves 2 000 available (threshold 1 600).
/// "tiny-model": smaller than the default reservations.
fn calculator() -> BudgetCalculator {
    let mut registry = ModelRegistry::new();
    registry.set_override("test-model", ModelLimits::new(23_500));
    registry.set_override("small-model", ModelLimits::new(5_500));
    registry.set_override("tiny-model", ModelLimits::new(3_000));
    registry.set_pricing("test-model", ModelPricing::new(3.0, 15.0));
    BudgetCalculator::new(registry, Reservations::default())
}

fn config() -> PipelineConfig {
    PipelineConfig {
        min_hierarchical_tokens: 1_000,
        summarizer: SummarizerConfig {
            chunking: ChunkOptions {
                max_chunk_tokens: 400,
                overlap_tokens: 0,
                ..ChunkOptions::default()
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
            ..SummarizerConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn pipeline(client: ScriptedClient, config: PipelineConfig) -> Pipeline<ScriptedClient> {
    Pipeline::new(
        client,
        TokenCounter::with_tokenizer(Arc::new(WordTokenizer)),
        calculator(),
        config,
    )
}

/// Rendered size: 1 500 + 300 + 500 + 50 words plus three per section header.
fn mixed_bundle() -> ContentBundle {
    ContentBundle::new(vec![
        ContentUnit::new(ContentKind::PrimaryDoc, "README.md", words(1_500, "d")),
        ContentUnit::new(ContentKind::Source, "src/main.rs", words(300, "m")),
        ContentUnit::new(ContentKind::Source, "src/lib.rs", words(500, "l")),
        ContentUnit::new(ContentKind::Config, "Cargo.toml", words(50, "c")),
    ])
}

#[test]
fn bundle_at_threshold_is_single_pass() {
    let pipeline = pipeline(ScriptedClient::default(), PipelineConfig::default());
    // Header "## Documentation: README.md" adds three words.
    let bundle = ContentBundle::new(vec![ContentUnit::new(
        ContentKind::PrimaryDoc,
        "README.md",
        words(15_997, "w"),
    )]);

    let plan = pipeline.plan(&bundle, &BudgetParams::new("test-model")).unwrap();

    assert_eq!(plan.available_budget, 20_000);
    assert_eq!(plan.threshold, 16_000);
    assert_eq!(plan.bundle_tokens, 16_000);
    assert!(plan.single_pass);
    assert!(plan.budget.is_none());
    assert_eq!(plan.units[0].action, UnitAction::PassThrough);
    assert_eq!(plan.units[0].share, None);
}

#[test]
fn one_token_over_threshold_is_summarized() {
    let pipeline = pipeline(ScriptedClient::default(), PipelineConfig::default());
    let bundle = ContentBundle::new(vec![ContentUnit::new(
        ContentKind::PrimaryDoc,
        "README.md",
        words(15_998, "w"),
    )]);

    let plan = pipeline.plan(&bundle, &BudgetParams::new("test-model")).unwrap();

    assert_eq!(plan.bundle_tokens, 16_001);
    assert_eq!(plan.header_tokens, 3);
    assert!(!plan.single_pass);
    // No sources: primary doc takes 59% of 20 000 less the header.
    let budget = plan.budget.unwrap();
    assert_eq!(budget.primary_doc, 11_798);
    assert_eq!(budget.source_snippets, 0);
    assert_eq!(plan.units[0].share, Some(11_798));
    assert_eq!(plan.units[0].action, UnitAction::Summarized);
}

#[test]
fn plan_routes_each_unit_by_its_share() {
    let pipeline = pipeline(ScriptedClient::default(), config());

    let plan = pipeline
        .plan(&mixed_bundle(), &BudgetParams::new("small-model"))
        .unwrap();

    assert_eq!(plan.available_budget, 2_000);
    assert_eq!(plan.bundle_tokens, 2_362);
    // Four headers leave 1 988 to allocate.
    assert_eq!(plan.header_tokens, 12);
    let routed: Vec<_> = plan
        .units
        .iter()
        .map(|u| (u.source_id.as_str(), u.share, u.action))
        .collect();
    assert_eq!(
        routed,
        vec![
            ("README.md", Some(695), UnitAction::Summarized),
            ("src/main.rs", Some(397), UnitAction::PassThrough),
            ("src/lib.rs", Some(397), UnitAction::Truncated),
            ("Cargo.toml", Some(298), UnitAction::PassThrough),
        ]
    );

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["units"][0]["action"], "summarized");
    assert_eq!(json["budget"]["primary_doc"], 695);
    assert_eq!(json["header_tokens"], 12);
}

#[test]
fn exhausted_budget_is_an_error() {
    let pipeline = pipeline(ScriptedClient::default(), config());

    let err = pipeline
        .plan(&mixed_bundle(), &BudgetParams::new("tiny-model"))
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoBudget { ref model } if model == "tiny-model"));
}

#[tokio::test]
async fn single_pass_makes_no_calls() {
    let pipeline = pipeline(ScriptedClient::default(), config());
    let bundle = ContentBundle::new(vec![
        ContentUnit::new(ContentKind::PrimaryDoc, "README.md", "# Demo\n\nA tool."),
        ContentUnit::new(ContentKind::Config, "Cargo.toml", "[package]\nname = \"demo\""),
    ]);

    let output = pipeline
        .summarize_to_budget(&bundle, &BudgetParams::new("test-model"), |_| {})
        .await
        .unwrap();

    assert_eq!(pipeline.client().calls.load(Ordering::SeqCst), 0);
    assert_eq!(output.usage.total_tokens, 0);
    assert_eq!(
        output.prompt,
        "## Documentation: README.md\n\n# Demo\n\nA tool.\n\n\
         ## Configuration: Cargo.toml\n\n[package]\nname = \"demo\""
    );
}

#[tokio::test]
async fn mixed_bundle_is_bounded_and_priced() {
    let pipeline = pipeline(ScriptedClient::default(), config());
    let mut progress = Vec::new();

    let output = pipeline
        .summarize_to_budget(&mixed_bundle(), &BudgetParams::new("small-model"), |line| {
            progress.push(line.to_string());
        })
        .await
        .unwrap();

    assert!(output.failures.is_empty());
    let calls = pipeline.client().calls.load(Ordering::SeqCst);

    let readme = &output.bundle.units[0];
    assert_eq!(readme.action, UnitAction::Summarized);
    assert_eq!(readme.text, format!("S{}", calls - 1));
    let stats = readme.stats.unwrap();
    assert!(stats.chunk_calls >= 4);
    assert_eq!(stats.combine_calls, 1);
    assert_eq!(stats.chunk_calls + stats.combine_calls, calls);

    let main = &output.bundle.units[1];
    assert_eq!(main.action, UnitAction::PassThrough);
    assert_eq!(main.tokens, 300);

    let lib = &output.bundle.units[2];
    assert_eq!(lib.action, UnitAction::Truncated);
    assert!(lib.tokens <= 397);
    assert!(lib.text.ends_with("..."));

    assert_eq!(output.usage.input_tokens, u64::from(calls) * 10);
    assert_eq!(output.usage.output_tokens, u64::from(calls) * 2);
    let expected_cost = f64::from(calls) * (10.0 * 3.0 + 2.0 * 15.0) / 1_000_000.0;
    assert!((output.usage.estimated_cost - expected_cost).abs() < 1e-12);

    assert_eq!(output.prompt, output.bundle.render());
    assert!(output.prompt.starts_with("## Documentation: README.md\n\nS"));
    assert!(progress.iter().any(|l| l == "README.md: summarize (1500 -> 695 tokens)"));
    assert!(progress.iter().any(|l| l == "src/lib.rs: truncate (500 -> 397 tokens)"));
}

#[tokio::test]
async fn failed_unit_does_not_abort_the_bundle() {
    let client = ScriptedClient {
        fail_on: Some("`README.md`"),
        ..ScriptedClient::default()
    };
    let pipeline = pipeline(client, config());

    let output = pipeline
        .summarize_to_budget(&mixed_bundle(), &BudgetParams::new("small-model"), |_| {})
        .await
        .unwrap();

    // 400 is not retried; the first chunk call fails the unit.
    assert_eq!(pipeline.client().calls.load(Ordering::SeqCst), 1);
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].source_id, "README.md");

    let ids: Vec<_> = output
        .bundle
        .units
        .iter()
        .map(|u| u.source_id.as_str())
        .collect();
    assert_eq!(ids, vec!["src/main.rs", "src/lib.rs", "Cargo.toml"]);
    assert_eq!(output.usage.total_tokens, 0);
    assert!(!output.prompt.contains("README.md"));

    match output.into_result() {
        Err(PipelineError::UnitFailed { source_id, .. }) => assert_eq!(source_id, "README.md"),
        other => panic!("expected UnitFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_combine_still_counts_chunk_spend() {
    let client = ScriptedClient {
        fail_on: Some("Summaries of consecutive parts"),
        ..ScriptedClient::default()
    };
    let pipeline = pipeline(client, config());

    let output = pipeline
        .summarize_to_budget(&mixed_bundle(), &BudgetParams::new("small-model"), |_| {})
        .await
        .unwrap();

    // Every chunk call succeeded; only the combine was rejected.
    let calls = pipeline.client().calls.load(Ordering::SeqCst);
    assert!(calls >= 5);
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].source_id, "README.md");

    let spent = u64::from(calls - 1);
    assert_eq!(output.failures[0].error.usage().input_tokens, spent * 10);
    assert_eq!(output.usage.input_tokens, spent * 10);
    assert_eq!(output.usage.output_tokens, spent * 2);
    assert_eq!(output.usage.total_tokens, spent * 12);
    let expected_cost = f64::from(calls - 1) * (10.0 * 3.0 + 2.0 * 15.0) / 1_000_000.0;
    assert!((output.usage.estimated_cost - expected_cost).abs() < 1e-12);
}

#[tokio::test]
async fn pause_runs_between_units_only() {
    let pipeline = pipeline(ScriptedClient::default(), config());
    let pauses = AtomicU32::new(0);
    let mut seen = Vec::new();

    let output = pipeline
        .summarize_to_budget_paced(
            &mixed_bundle(),
            &BudgetParams::new("small-model"),
            |line| seen.push(line.to_string()),
            || {
                pauses.fetch_add(1, Ordering::SeqCst);
                std::future::ready(())
            },
        )
        .await
        .unwrap();

    assert_eq!(pauses.load(Ordering::SeqCst), 3);
    assert_eq!(output.bundle.units.len(), 4);
    assert!(seen.iter().any(|l| l.starts_with("src/main.rs: ")));
}

#[tokio::test]
async fn units_at_their_share_fit_with_headers() {
    let pipeline = pipeline(ScriptedClient::default(), config());
    let bundle = ContentBundle::new(vec![
        ContentUnit::new(ContentKind::PrimaryDoc, "README.md", words(700, "d")),
        ContentUnit::new(ContentKind::Source, "src/main.rs", words(400, "m")),
        ContentUnit::new(ContentKind::Source, "src/lib.rs", words(400, "l")),
        ContentUnit::new(ContentKind::Config, "Cargo.toml", words(300, "c")),
        ContentUnit::new(ContentKind::Metadata, "meta.json", words(200, "x")),
    ]);

    let output = pipeline
        .summarize_to_budget(&bundle, &BudgetParams::new("small-model"), |_| {})
        .await
        .unwrap();

    // Five headers of three words each come off the 2 000 before allocation.
    assert_eq!(output.plan.header_tokens, 15);
    let shares: Vec<_> = output.plan.units.iter().map(|u| u.share).collect();
    assert_eq!(
        shares,
        vec![Some(694), Some(397), Some(397), Some(297), Some(198)]
    );
    assert!(
        output
            .plan
            .units
            .iter()
            .all(|u| u.action == UnitAction::Truncated)
    );
    assert_eq!(pipeline.client().calls.load(Ordering::SeqCst), 0);

    // Nothing is cut from the assembled prompt.
    assert_eq!(output.prompt, output.bundle.render());
    let meta = &output.bundle.units[4];
    assert!(output.prompt.ends_with(&meta.text));
}
