//! Per-item verdicts and batch admission.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use pressroom_core::{GateConfig, ItemId, ProcessedItem};
use serde::{Deserialize, Serialize};

use crate::checks::{CHECKS, CheckContext};
use crate::reason::ReasonCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub item_id: ItemId,
    pub passed: bool,
    /// Failed checks in battery order.
    pub failed_checks: Vec<ReasonCode>,
}

impl GateVerdict {
    fn reject(&mut self, code: ReasonCode) {
        self.passed = false;
        if !self.failed_checks.contains(&code) {
            self.failed_checks.push(code);
        }
    }
}

/// Result of gating a whole candidate set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOutcome {
    /// One verdict per candidate, in evaluation order (newest first).
    pub verdicts: Vec<GateVerdict>,
}

impl GateOutcome {
    pub fn accepted(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.verdicts.iter().filter(|v| v.passed).map(|v| v.item_id)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &GateVerdict> {
        self.verdicts.iter().filter(|v| !v.passed)
    }

    pub fn accepted_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.passed).count()
    }

    pub fn verdict_for(&self, id: ItemId) -> Option<&GateVerdict> {
        self.verdicts.iter().find(|v| v.item_id == id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: GateConfig,
}

impl QualityGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run every check against one item. Never short-circuits.
    pub fn evaluate(&self, item: &ProcessedItem, ctx: &CheckContext<'_>) -> GateVerdict {
        let failed_checks: Vec<ReasonCode> = CHECKS
            .iter()
            .filter(|check| !(check.eval)(item, ctx))
            .map(|check| check.code)
            .collect();

        GateVerdict {
            item_id: item.id,
            passed: failed_checks.is_empty(),
            failed_checks,
        }
    }

    /// Gate a candidate set and apply the diversity cap as items are admitted.
    ///
    /// Candidates are considered newest first, ties broken by item id, so the
    /// same set always yields the same accepted subset regardless of the order
    /// it was passed in. An item is a duplicate when an earlier admitted
    /// candidate has the same content fingerprint; a candidate turned away by
    /// the cap does not count as admitted.
    pub fn evaluate_batch(&self, items: &[ProcessedItem]) -> GateOutcome {
        let mut ordered: Vec<&ProcessedItem> = items.iter().collect();
        ordered.sort_by_key(|item| (Reverse(item.published_at), item.id));

        let mut seen = BTreeSet::new();
        let mut per_bucket: BTreeMap<(&str, &str), usize> = BTreeMap::new();
        let mut verdicts = Vec::with_capacity(ordered.len());
        for item in &ordered {
            let fingerprint = item.fingerprint();
            let ctx = CheckContext {
                config: &self.config,
                duplicate: seen.contains(&fingerprint),
            };
            let mut verdict = self.evaluate(item, &ctx);
            if verdict.passed {
                let admitted = per_bucket.entry(bucket(item)).or_insert(0);
                if *admitted >= self.config.diversity_cap {
                    verdict.reject(ReasonCode::DiversityCapExceeded);
                } else {
                    *admitted += 1;
                    seen.insert(fingerprint);
                }
            }
            verdicts.push(verdict);
        }

        GateOutcome { verdicts }
    }
}

/// Diversity bucket: (source, category).
fn bucket(item: &ProcessedItem) -> (&str, &str) {
    (
        item.source.source_id.as_str(),
        item.category.as_deref().unwrap_or(""),
    )
}
