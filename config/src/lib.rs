//! Configuration loading for condense.
//!
//! The file is TOML, located by an explicit path, else `$CONDENSE_CONFIG`,
//! else `~/.condense/config.toml`. A missing file yields the defaults. Every
//! section and key is optional.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use condense_context::{
    ChunkOptions, Encoding, ModelLimits, ModelRegistry, Reservations, TokenCounter,
};
use condense_engine::{PipelineConfig, SummarizerConfig};
use condense_providers::RetryConfig;
use condense_types::{ModelPricing, Provider};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "CONDENSE_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CondenseConfig {
    pub provider: ProviderConfig,
    pub tokenizer: TokenizerConfig,
    pub budget: BudgetConfig,
    pub chunking: ChunkingConfig,
    pub summarizer: SummarizerSection,
    pub retry: RetrySection,
    /// Context-window overrides keyed by model name or prefix.
    pub models: BTreeMap<String, ModelOverride>,
    /// Per-million-token prices keyed by model name or prefix.
    pub pricing: BTreeMap<String, PricingOverride>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// `"claude"` or `"openai"`; inferred from the model name when absent.
    pub kind: Option<Provider>,
    pub model: Option<String>,
    /// May reference environment variables as `${VAR}`.
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

// Manual Debug impl to prevent leaking API keys in logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let api_key = if self.api_key.is_some() {
            "[REDACTED]"
        } else {
            "None"
        };
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_key", &api_key)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub encoding: Encoding,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub reserved_system_prompt: u32,
    pub reserved_response: u32,
    pub reserved_safety_margin: u32,
    pub hierarchical_trigger_ratio: f64,
    pub min_hierarchical_tokens: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let reservations = Reservations::default();
        let pipeline = PipelineConfig::default();
        Self {
            reserved_system_prompt: reservations.system_prompt,
            reserved_response: reservations.response,
            reserved_safety_margin: reservations.safety_margin,
            hierarchical_trigger_ratio: pipeline.hierarchical_trigger_ratio,
            min_hierarchical_tokens: pipeline.min_hierarchical_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_tokens: u32,
    pub overlap_tokens: u32,
    pub preserve_code_blocks: bool,
    pub preserve_paragraphs: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let options = ChunkOptions::default();
        Self {
            max_chunk_tokens: options.max_chunk_tokens,
            overlap_tokens: options.overlap_tokens,
            preserve_code_blocks: options.preserve_code_blocks,
            preserve_paragraphs: options.preserve_paragraphs,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    pub max_combine_batch: usize,
    pub chunk_summary_tokens: u32,
    pub combine_summary_tokens: u32,
    pub temperature: f32,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        let config = SummarizerConfig::default();
        Self {
            max_combine_batch: config.max_combine_batch,
            chunk_summary_tokens: config.chunk_summary_tokens,
            combine_summary_tokens: config.combine_summary_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let config = RetryConfig::default();
        Self {
            max_retries: config.max_retries,
            initial_delay_ms: config.initial_delay.as_millis() as u64,
            max_delay_ms: config.max_delay.as_millis() as u64,
            multiplier: config.multiplier,
            jitter_factor: config.jitter_factor,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ModelOverride {
    pub context_window: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PricingOverride {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

/// Replaces every `${VAR}` with the variable's value (empty when unset).
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let var = &rest[start + 2..start + 2 + len];
        if !var.is_empty() {
            out.push_str(&env::var(var).unwrap_or_default());
        }
        rest = &rest[start + 2 + len + 1..];
    }

    out.push_str(rest);
    out
}

/// Default config location: `~/.condense/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".condense").join("config.toml"))
}

/// Resolves which file to read: `explicit`, else `$CONDENSE_CONFIG`, else
/// [`config_path`].
#[must_use]
pub fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    match env::var_os(CONFIG_ENV_VAR) {
        Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
        _ => config_path(),
    }
}

impl CondenseConfig {
    /// Loads and validates the config file, or returns defaults when the
    /// located file does not exist.
    ///
    /// An explicitly named file must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = resolve_path(explicit) else {
            return Ok(Self::default());
        };
        if explicit.is_none() && !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config = match Self::parse(&content) {
            Ok(config) => config,
            Err(ParseFailure::Toml(err)) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
            Err(ParseFailure::Invalid(err)) => return Err(err),
        };
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parses and validates TOML text.
    fn parse(content: &str) -> Result<Self, ParseFailure> {
        let config: Self = toml::from_str(content).map_err(ParseFailure::Toml)?;
        config.validate().map_err(ParseFailure::Invalid)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ratio = self.budget.hierarchical_trigger_ratio;
        if ratio.is_nan() || ratio <= 0.0 || ratio > 1.0 {
            return Err(invalid(
                "budget.hierarchical_trigger_ratio",
                format!("{ratio} is outside (0, 1]"),
            ));
        }
        if self.summarizer.max_combine_batch < 2 {
            return Err(invalid(
                "summarizer.max_combine_batch",
                format!("{} is below 2", self.summarizer.max_combine_batch),
            ));
        }
        if self.chunking.max_chunk_tokens == 0 {
            return Err(invalid("chunking.max_chunk_tokens", "must be positive".into()));
        }
        if self.chunking.overlap_tokens >= self.chunking.max_chunk_tokens {
            return Err(invalid(
                "chunking.overlap_tokens",
                format!(
                    "{} is not below max_chunk_tokens ({})",
                    self.chunking.overlap_tokens, self.chunking.max_chunk_tokens
                ),
            ));
        }
        let jitter = self.retry.jitter_factor;
        if !(0.0..=1.0).contains(&jitter) {
            return Err(invalid(
                "retry.jitter_factor",
                format!("{jitter} is outside [0, 1]"),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(invalid(
                "retry.multiplier",
                format!("{} is below 1", self.retry.multiplier),
            ));
        }
        if let Some((model, _)) = self.models.iter().find(|(_, m)| m.context_window == 0) {
            return Err(invalid(
                "models.context_window",
                format!("{model} has a zero context window"),
            ));
        }
        Ok(())
    }

    /// Provider for `model`: the configured kind, else inferred from the
    /// model name, else the default provider.
    #[must_use]
    pub fn provider_for(&self, model: &str) -> Provider {
        self.provider
            .kind
            .or_else(|| Provider::from_model_name(model))
            .unwrap_or_default()
    }

    /// Model to summarize with: `requested`, else the configured model, else
    /// the provider's default.
    #[must_use]
    pub fn model(&self, requested: Option<&str>) -> String {
        if let Some(model) = requested.filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        if let Some(model) = self.provider.model.as_deref().filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        self.provider.kind.unwrap_or_default().default_model().to_string()
    }

    /// API key from the config (after `${VAR}` expansion), else the
    /// provider's environment variable.
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<String> {
        let configured = self
            .provider
            .api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.trim().is_empty());
        configured.or_else(|| {
            env::var(provider.env_var())
                .ok()
                .filter(|key| !key.trim().is_empty())
        })
    }

    #[must_use]
    pub fn base_url(&self) -> Option<String> {
        self.provider.base_url.as_deref().map(expand_env_vars)
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.provider.timeout_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub fn reservations(&self) -> Reservations {
        Reservations {
            system_prompt: self.budget.reserved_system_prompt,
            response: self.budget.reserved_response,
            safety_margin: self.budget.reserved_safety_margin,
        }
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.retry.max_retries,
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
            jitter_factor: self.retry.jitter_factor,
        }
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            hierarchical_trigger_ratio: self.budget.hierarchical_trigger_ratio,
            min_hierarchical_tokens: self.budget.min_hierarchical_tokens,
            summarizer: SummarizerConfig {
                chunking: ChunkOptions {
                    max_chunk_tokens: self.chunking.max_chunk_tokens,
                    overlap_tokens: self.chunking.overlap_tokens,
                    preserve_code_blocks: self.chunking.preserve_code_blocks,
                    preserve_paragraphs: self.chunking.preserve_paragraphs,
                },
                max_combine_batch: self.summarizer.max_combine_batch,
                chunk_summary_tokens: self.summarizer.chunk_summary_tokens,
                combine_summary_tokens: self.summarizer.combine_summary_tokens,
                temperature: self.summarizer.temperature,
                retry: self.retry_config(),
            },
        }
    }

    /// Built-in model tables plus the `[models]` and `[pricing]` overrides.
    #[must_use]
    pub fn model_registry(&self) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        for (model, entry) in &self.models {
            registry.set_override(model.clone(), ModelLimits::new(entry.context_window));
        }
        for (model, entry) in &self.pricing {
            registry.set_pricing(
                model.clone(),
                ModelPricing::new(entry.input_per_million, entry.output_per_million),
            );
        }
        registry
    }

    #[must_use]
    pub fn token_counter(&self) -> TokenCounter {
        TokenCounter::with_encoding(self.tokenizer.encoding)
    }
}

enum ParseFailure {
    Toml(toml::de::Error),
    Invalid(ConfigError),
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}
