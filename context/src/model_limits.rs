//! Model token limits, prices and the usable input budget.
//!
//! This module provides [`ModelLimits`] for storing the context window per model,
//! [`ModelRegistry`] for looking up limits and prices by model name with prefix
//! matching, and [`BudgetCalculator`] which subtracts the fixed [`Reservations`]
//! from a model's window to produce the usable input budget.

use std::collections::HashMap;

use condense_types::ModelPricing;

/// Context window of a model.
///
/// # Example
///
/// ```
/// use condense_context::{ModelLimits, Reservations};
///
/// let limits = ModelLimits::new(128_000);
/// assert_eq!(limits.available_budget(&Reservations::default()), 124_500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelLimits {
    /// Maximum context window in tokens (prompt plus response).
    context_window: u32,
}

impl ModelLimits {
    #[must_use]
    pub const fn new(context_window: u32) -> Self {
        Self { context_window }
    }

    #[must_use]
    pub const fn context_window(&self) -> u32 {
        self.context_window
    }

    /// `context_window - system_prompt - response - safety_margin`, saturating at 0.
    #[must_use]
    pub fn available_budget(&self, reservations: &Reservations) -> u32 {
        self.context_window.saturating_sub(reservations.total())
    }
}

/// Headroom withheld from every model call's input budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservations {
    /// Room for the instruction prompt.
    pub system_prompt: u32,
    /// Room for the expected response.
    pub response: u32,
    /// Cushion for tokenizer estimation error.
    pub safety_margin: u32,
}

impl Reservations {
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.system_prompt
            .saturating_add(self.response)
            .saturating_add(self.safety_margin)
    }
}

impl Default for Reservations {
    fn default() -> Self {
        Self {
            system_prompt: 1_000,
            response: 2_000,
            safety_margin: 500,
        }
    }
}

/// Where model limits came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLimitsSource {
    /// Exact match from an override.
    Override,
    /// Matched a known prefix (the matched prefix).
    Prefix(&'static str),
    /// Fell back to `DEFAULT_LIMITS` because no match was found.
    DefaultFallback,
}

/// Result of looking up model limits.
///
/// This makes the "fallback OR real data" decision explicit at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedModelLimits {
    limits: ModelLimits,
    source: ModelLimitsSource,
}

impl ResolvedModelLimits {
    #[must_use]
    pub const fn new(limits: ModelLimits, source: ModelLimitsSource) -> Self {
        Self { limits, source }
    }

    #[must_use]
    pub const fn limits(self) -> ModelLimits {
        self.limits
    }

    #[must_use]
    pub const fn source(self) -> ModelLimitsSource {
        self.source
    }
}

/// Default fallback limits for unknown models.
const DEFAULT_LIMITS: ModelLimits = ModelLimits::new(8192);

/// Known model prefixes and their limits.
///
/// Ordered by specificity (more specific prefixes first) to ensure
/// correct matching when multiple prefixes could match.
const KNOWN_MODELS: &[(&str, ModelLimits)] = &[
    ("claude-opus-4-5", ModelLimits::new(200_000)),
    ("claude-sonnet-4-5", ModelLimits::new(200_000)),
    ("claude-haiku-4-5", ModelLimits::new(200_000)),
    ("claude-3-5-haiku", ModelLimits::new(200_000)),
    ("gpt-4.1-mini", ModelLimits::new(1_047_576)),
    ("gpt-4.1", ModelLimits::new(1_047_576)),
    ("gpt-4o-mini", ModelLimits::new(128_000)),
    ("gpt-4o", ModelLimits::new(128_000)),
    ("gpt-4-turbo", ModelLimits::new(128_000)),
    ("gpt-3.5-turbo", ModelLimits::new(16_385)),
];

/// Known model prefixes and their list prices (USD per million tokens).
const KNOWN_PRICING: &[(&str, ModelPricing)] = &[
    ("claude-opus-4-5", ModelPricing::new(5.0, 25.0)),
    ("claude-sonnet-4-5", ModelPricing::new(3.0, 15.0)),
    ("claude-haiku-4-5", ModelPricing::new(1.0, 5.0)),
    ("claude-3-5-haiku", ModelPricing::new(0.8, 4.0)),
    ("gpt-4.1-mini", ModelPricing::new(0.4, 1.6)),
    ("gpt-4.1", ModelPricing::new(2.0, 8.0)),
    ("gpt-4o-mini", ModelPricing::new(0.15, 0.6)),
    ("gpt-4o", ModelPricing::new(2.5, 10.0)),
    ("gpt-4-turbo", ModelPricing::new(10.0, 30.0)),
    ("gpt-3.5-turbo", ModelPricing::new(0.5, 1.5)),
];

/// Registry of known model limits and prices with support for custom overrides.
///
/// Lookup is two-tier:
/// 1. Exact match in overrides set via [`ModelRegistry::set_override`]
/// 2. Prefix match against the built-in table
/// 3. Otherwise `DEFAULT_LIMITS` with an explicit `DefaultFallback` source
///    (pricing falls back to zero)
///
/// # Prefix Matching
///
/// - `"gpt-4o-mini-2024-07-18"` matches prefix `"gpt-4o-mini"`
/// - `"claude-haiku-4-5-20251001"` matches prefix `"claude-haiku-4-5"`
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    overrides: HashMap<String, ModelLimits>,
    pricing_overrides: HashMap<String, ModelPricing>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the limits for the given model.
    #[must_use]
    pub fn get(&self, model: &str) -> ResolvedModelLimits {
        if let Some(limits) = self.overrides.get(model) {
            return ResolvedModelLimits::new(*limits, ModelLimitsSource::Override);
        }

        for (prefix, limits) in KNOWN_MODELS {
            if model.starts_with(prefix) {
                return ResolvedModelLimits::new(*limits, ModelLimitsSource::Prefix(prefix));
            }
        }

        ResolvedModelLimits::new(DEFAULT_LIMITS, ModelLimitsSource::DefaultFallback)
    }

    /// Returns the price table entry for the given model, or zero pricing for
    /// unknown models.
    #[must_use]
    pub fn pricing(&self, model: &str) -> ModelPricing {
        if let Some(pricing) = self.pricing_overrides.get(model) {
            return *pricing;
        }
        KNOWN_PRICING
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, pricing)| *pricing)
            .unwrap_or_default()
    }

    /// Sets a custom override for a specific model. Overrides take precedence
    /// over prefix matching for exact matches.
    pub fn set_override(&mut self, model: impl Into<String>, limits: ModelLimits) {
        self.overrides.insert(model.into(), limits);
    }

    pub fn set_pricing(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.pricing_overrides.insert(model.into(), pricing);
    }
}

/// Computes the usable input budget for a model.
#[derive(Debug, Clone, Default)]
pub struct BudgetCalculator {
    registry: ModelRegistry,
    reservations: Reservations,
}

impl BudgetCalculator {
    #[must_use]
    pub fn new(registry: ModelRegistry, reservations: Reservations) -> Self {
        Self {
            registry,
            reservations,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    #[must_use]
    pub fn reservations(&self) -> Reservations {
        self.reservations
    }

    /// Usable input budget for `model` under the calculator's reservations.
    #[must_use]
    pub fn available_budget(&self, model: &str) -> u32 {
        self.available_budget_with(model, &self.reservations)
    }

    /// Usable input budget for `model` under caller-supplied reservations.
    #[must_use]
    pub fn available_budget_with(&self, model: &str, reservations: &Reservations) -> u32 {
        let resolved = self.registry.get(model);
        if resolved.source() == ModelLimitsSource::DefaultFallback {
            tracing::debug!(model, "Unknown model; using default context window");
        }
        resolved.limits().available_budget(reservations)
    }
}
