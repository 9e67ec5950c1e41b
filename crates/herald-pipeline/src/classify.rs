//! Impact Classifier.
//!
//! Maps a validated event to an [`ImpactTier`]. A `High` hint always wins;
//! otherwise the tier is the larger of the hint (or `Low`) and the weight the
//! table assigns to `(policy, change type)`.

use std::collections::HashMap;

use herald_core::{ChangeType, ClassifiedEvent, ImpactTier, PolicyChangeEvent};
use herald_settings::ClassifierSettings;

/// Immutable `(policy, change type) → tier` table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WeightTable {
    weights: HashMap<(String, ChangeType), ImpactTier>,
}

impl WeightTable {
    /// Build from settings. A later rule for the same key overrides an earlier one.
    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        let weights = settings
            .weights
            .iter()
            .map(|rule| ((rule.policy.clone(), rule.change), rule.tier))
            .collect();
        Self { weights }
    }

    /// Weight for `(policy, change)`; `Medium` for created/updated and `Low`
    /// for deleted when the table has no entry.
    pub fn weight(&self, policy: &str, change: ChangeType) -> ImpactTier {
        self.weights
            .get(&(policy.to_string(), change))
            .copied()
            .unwrap_or(match change {
                ChangeType::Created | ChangeType::Updated => ImpactTier::Medium,
                ChangeType::Deleted => ImpactTier::Low,
            })
    }

    /// Number of explicit rules.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Whether the table has no explicit rules.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Pure, deterministic classifier.
#[derive(Clone, Debug, Default)]
pub struct Classifier {
    table: WeightTable,
}

impl Classifier {
    /// Classifier over `table`.
    pub fn new(table: WeightTable) -> Self {
        Self { table }
    }

    /// Tier for `event`.
    pub fn tier_for(&self, event: &PolicyChangeEvent) -> ImpactTier {
        match event.severity_hint {
            Some(ImpactTier::High) => ImpactTier::High,
            hint => hint
                .unwrap_or(ImpactTier::Low)
                .max(self.table.weight(&event.policy_name, event.change_type)),
        }
    }

    /// Classify `event`, ingested as `sequence`.
    pub fn classify(&self, event: PolicyChangeEvent, sequence: i64) -> ClassifiedEvent {
        let tier = self.tier_for(&event);
        ClassifiedEvent {
            event,
            tier,
            sequence,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
