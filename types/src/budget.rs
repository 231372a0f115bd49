//! Token budget invariant types.
//!
//! Category weights are kept in integer basis points so that splitting a budget
//! can never overshoot the total through floating-point rounding.

use serde::{Deserialize, Serialize};

use crate::ContentKind;

/// 100% expressed in basis points.
pub const BASIS_POINTS: u32 = 10_000;

/// Relative share of the usable budget given to each content category.
///
/// The four weights always sum to [`BASIS_POINTS`]; the redistribution methods
/// move weight between categories and never create or destroy any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryWeights {
    primary_doc: u32,
    source_snippets: u32,
    config_snippets: u32,
    metadata: u32,
}

impl CategoryWeights {
    /// Base weights: primary 35%, source 40%, config 15%, metadata 10%.
    pub const BASE: Self = Self {
        primary_doc: 3_500,
        source_snippets: 4_000,
        config_snippets: 1_500,
        metadata: 1_000,
    };

    /// Moves the primary document's weight to source (+25 points) and config
    /// (+10 points). Any remainder beyond the base 35 points goes to source.
    #[must_use]
    pub fn without_primary_doc(self) -> Self {
        let freed = self.primary_doc;
        let to_config = freed.min(1_000);
        Self {
            primary_doc: 0,
            source_snippets: self.source_snippets + (freed - to_config),
            config_snippets: self.config_snippets + to_config,
            metadata: self.metadata,
        }
    }

    /// Moves the source weight to the primary document (60%) and config (40%).
    #[must_use]
    pub fn without_sources(self) -> Self {
        let freed = self.source_snippets;
        let to_primary = freed * 60 / 100;
        Self {
            primary_doc: self.primary_doc + to_primary,
            source_snippets: 0,
            config_snippets: self.config_snippets + (freed - to_primary),
            metadata: self.metadata,
        }
    }

    #[must_use]
    pub const fn primary_doc(self) -> u32 {
        self.primary_doc
    }

    #[must_use]
    pub const fn source_snippets(self) -> u32 {
        self.source_snippets
    }

    #[must_use]
    pub const fn config_snippets(self) -> u32 {
        self.config_snippets
    }

    #[must_use]
    pub const fn metadata(self) -> u32 {
        self.metadata
    }

    /// Applies the weights to `total`, flooring each share.
    #[must_use]
    pub fn apply(self, total: u32) -> ContentBudget {
        let share = |weight: u32| -> u32 {
            (u64::from(total) * u64::from(weight) / u64::from(BASIS_POINTS)) as u32
        };
        ContentBudget {
            primary_doc: share(self.primary_doc),
            source_snippets: share(self.source_snippets),
            config_snippets: share(self.config_snippets),
            metadata: share(self.metadata),
        }
    }
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self::BASE
    }
}

/// Per-category token budgets. The sum never exceeds the budget it was
/// allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContentBudget {
    pub primary_doc: u32,
    pub source_snippets: u32,
    pub config_snippets: u32,
    pub metadata: u32,
}

impl ContentBudget {
    #[must_use]
    pub fn total(&self) -> u32 {
        self.primary_doc + self.source_snippets + self.config_snippets + self.metadata
    }

    #[must_use]
    pub fn category(&self, kind: ContentKind) -> u32 {
        match kind {
            ContentKind::PrimaryDoc => self.primary_doc,
            ContentKind::Source => self.source_snippets,
            ContentKind::Config => self.config_snippets,
            ContentKind::Metadata => self.metadata,
        }
    }

    /// Share of a category budget for one of `unit_count` units of that kind.
    #[must_use]
    pub fn share_for(&self, kind: ContentKind, unit_count: usize) -> u32 {
        let units = u32::try_from(unit_count.max(1)).unwrap_or(u32::MAX);
        self.category(kind) / units
    }
}

#[cfg(test)]
mod tests {
    use super::{BASIS_POINTS, CategoryWeights, ContentBudget};
    use crate::ContentKind;

    fn sum(w: CategoryWeights) -> u32 {
        w.primary_doc() + w.source_snippets() + w.config_snippets() + w.metadata()
    }

    #[test]
    fn base_weights_sum_to_one_hundred_percent() {
        assert_eq!(sum(CategoryWeights::BASE), BASIS_POINTS);
    }

    #[test]
    fn redistribution_conserves_weight() {
        let w = CategoryWeights::BASE.without_primary_doc();
        assert_eq!(sum(w), BASIS_POINTS);
        assert_eq!(w.source_snippets(), 6_500);
        assert_eq!(w.config_snippets(), 2_500);

        let w = CategoryWeights::BASE.without_sources();
        assert_eq!(sum(w), BASIS_POINTS);
        assert_eq!(w.primary_doc(), 3_500 + 2_400);
        assert_eq!(w.config_snippets(), 1_500 + 1_600);

        let w = CategoryWeights::BASE.without_primary_doc().without_sources();
        assert_eq!(sum(w), BASIS_POINTS);
        assert_eq!(w.source_snippets(), 0);
    }

    #[test]
    fn apply_floors_each_share() {
        let budget = CategoryWeights::BASE.apply(999);
        // 349.65, 399.6, 149.85, 99.9
        assert_eq!(budget.primary_doc, 349);
        assert_eq!(budget.source_snippets, 399);
        assert_eq!(budget.config_snippets, 149);
        assert_eq!(budget.metadata, 99);
        assert!(budget.total() <= 999);
    }

    #[test]
    fn apply_handles_large_totals_without_overflow() {
        let budget = CategoryWeights::BASE.apply(u32::MAX);
        assert!(u64::from(budget.total()) <= u64::from(u32::MAX));
    }

    #[test]
    fn share_for_splits_evenly() {
        let budget = ContentBudget {
            primary_doc: 100,
            source_snippets: 900,
            config_snippets: 30,
            metadata: 10,
        };
        assert_eq!(budget.share_for(ContentKind::Source, 3), 300);
        assert_eq!(budget.share_for(ContentKind::Config, 0), 30);
        assert_eq!(budget.share_for(ContentKind::PrimaryDoc, 1), 100);
    }
}
