//! Priority-weighted split of a token budget across content categories.

use condense_types::{CategoryWeights, ContentBudget};

/// Splits `total` across the four content categories.
///
/// Starts from [`CategoryWeights::BASE`] and redistributes, in order:
/// 1. a missing primary document's weight to source and config;
/// 2. an empty source list's weight to the primary document and config.
///
/// The result never sums to more than `total`. `config_unit_count` does not
/// move weight; config keeps its share even when no config units exist.
#[must_use]
pub fn allocate(
    total: u32,
    has_primary_doc: bool,
    source_unit_count: usize,
    config_unit_count: usize,
) -> ContentBudget {
    let mut weights = CategoryWeights::BASE;
    if !has_primary_doc {
        weights = weights.without_primary_doc();
    }
    if source_unit_count == 0 {
        weights = weights.without_sources();
    }

    let budget = weights.apply(total);
    tracing::debug!(
        total,
        has_primary_doc,
        source_unit_count,
        config_unit_count,
        primary_doc = budget.primary_doc,
        source_snippets = budget.source_snippets,
        config_snippets = budget.config_snippets,
        metadata = budget.metadata,
        "Allocated content budget"
    );
    budget
}
