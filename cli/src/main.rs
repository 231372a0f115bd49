//! condense CLI - bounds a content bundle to a model's input budget.
//!
//! ```text
//! bundle.json -> CondenseConfig -> Pipeline::summarize_to_budget_paced -> PipelineReport
//!                                   |
//!                                   v
//!                         Pipeline::plan (--dry-run report)
//! ```
//!
//! Logs go to stderr so stdout carries only the JSON report.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use condense_config::CondenseConfig;
use condense_engine::{
    BoundedUnit, BudgetCalculator, BudgetParams, BudgetPlan, ContentBundle, ContentKind,
    Pipeline, PipelineOutput, SummarizeError, SummaryPhase, TokenUsage, UnitFailure,
};
use condense_providers::HttpInferenceClient;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "condense")]
#[command(about = "Summarize a content bundle until it fits a model's input budget")]
struct Args {
    /// JSON file holding the content bundle
    #[arg(long)]
    bundle: PathBuf,

    /// Model to summarize with and budget for
    #[arg(long)]
    model: Option<String>,

    /// Config file (default: $CONDENSE_CONFIG, then ~/.condense/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Pause between units, in milliseconds
    #[arg(long, default_value_t = 0)]
    unit_delay_ms: u64,

    /// Report budgets and routing decisions without calling the model
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct PipelineReport<'a> {
    model: &'a str,
    plan: &'a BudgetPlan,
    units: &'a [BoundedUnit],
    usage: TokenUsage,
    prompt: &'a str,
    failures: Vec<FailureReport>,
}

#[derive(Debug, Serialize)]
struct FailureReport {
    source_id: String,
    kind: ContentKind,
    phase: SummaryPhase,
    /// Spent before the failure; already part of the report's total.
    usage: TokenUsage,
    error: String,
}

impl FailureReport {
    fn new(failure: &UnitFailure) -> Self {
        let SummarizeError::Inference { phase, .. } = &failure.error;
        Self {
            source_id: failure.source_id.clone(),
            kind: failure.kind,
            phase: *phase,
            usage: failure.error.usage(),
            error: error_chain(&failure.error),
        }
    }
}

impl<'a> PipelineReport<'a> {
    fn new(model: &'a str, output: &'a PipelineOutput) -> Self {
        Self {
            model,
            plan: &output.plan,
            units: &output.bundle.units,
            usage: output.usage,
            prompt: &output.prompt,
            failures: output.failures.iter().map(FailureReport::new).collect(),
        }
    }
}

/// `outer: inner: root` rendering of an error and its sources.
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn read_bundle(path: &Path) -> Result<ContentBundle> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read bundle {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse bundle {}", path.display()))
}

fn write_report(path: Option<&Path>, report: &impl Serialize) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    match path {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("failed to write report to {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}

fn build_client(config: &CondenseConfig, model: &str, dry_run: bool) -> Result<HttpInferenceClient> {
    let provider = config.provider_for(model);
    let api_key = match config.api_key(provider) {
        Some(key) => key,
        // Planning never calls the model.
        None if dry_run => String::new(),
        None => anyhow::bail!(
            "no API key for {}: set {} or provider.api_key",
            provider.display_name(),
            provider.env_var()
        ),
    };

    let mut client = HttpInferenceClient::new(provider, api_key, model)
        .context("failed to build HTTP client")?;
    if let Some(base_url) = config.base_url() {
        client = client.with_base_url(base_url);
    }
    if let Some(timeout) = config.timeout() {
        client = client
            .with_timeout(timeout)
            .context("failed to build HTTP client")?;
    }
    Ok(client)
}

async fn run(args: Args) -> Result<bool> {
    let config = CondenseConfig::load(args.config.as_deref()).context("failed to load config")?;
    let bundle = read_bundle(&args.bundle)?;
    let model = config.model(args.model.as_deref());

    let client = build_client(&config, &model, args.dry_run)?;
    let calculator = BudgetCalculator::new(config.model_registry(), config.reservations());
    let pipeline = Pipeline::new(
        client,
        config.token_counter(),
        calculator,
        config.pipeline_config(),
    );

    let params = BudgetParams {
        model: model.clone(),
        reservations: config.reservations(),
    };
    if args.dry_run {
        let plan = pipeline.plan(&bundle, &params)?;
        for planned in &plan.units {
            tracing::info!("{}", planned.describe());
        }
        write_report(args.output.as_deref(), &plan)?;
        return Ok(true);
    }

    let delay = Duration::from_millis(args.unit_delay_ms);
    let output = pipeline
        .summarize_to_budget_paced(
            &bundle,
            &params,
            |line| tracing::info!("{line}"),
            || tokio::time::sleep(delay),
        )
        .await?;
    tracing::info!(
        input_tokens = output.usage.input_tokens,
        output_tokens = output.usage.output_tokens,
        estimated_cost = output.usage.estimated_cost,
        failures = output.failures.len(),
        "Finished"
    );
    write_report(args.output.as_deref(), &PipelineReport::new(&model, &output))?;
    Ok(output.failures.is_empty())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
