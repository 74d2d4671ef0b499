use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cascade::KindCounts;
use crate::plan::EntityKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapAnalysis {
    pub gaps: KindCounts,
    pub coverage_pct: BTreeMap<EntityKind, u64>,
    pub priority_order: Vec<EntityKind>,
    pub total_generation_needed: u64,
}

pub fn compute_gaps(current: &KindCounts, target: &KindCounts) -> GapAnalysis {
    let mut gaps = KindCounts::new();
    let mut coverage = BTreeMap::new();
    for kind in target.keys().chain(current.keys()) {
        if gaps.contains_key(kind) {
            continue;
        }
        let have = current.get(kind).copied().unwrap_or(0);
        let want = target.get(kind).copied().unwrap_or(0);
        gaps.insert(*kind, want.saturating_sub(have));
        coverage.insert(*kind, coverage_pct(have, want));
    }

    // stable: equal gaps keep canonical kind order
    let mut priority_order: Vec<EntityKind> = gaps
        .iter()
        .filter(|(_, gap)| **gap > 0)
        .map(|(kind, _)| *kind)
        .collect();
    priority_order.sort_by(|a, b| gaps[b].cmp(&gaps[a]));

    let total_generation_needed = gaps.values().sum();
    GapAnalysis {
        gaps,
        coverage_pct: coverage,
        priority_order,
        total_generation_needed,
    }
}

/// round(100 * current / target), half up; 100 when nothing is required.
pub fn coverage_pct(current: u64, target: u64) -> u64 {
    if target == 0 {
        return 100;
    }
    let current = u128::from(current);
    let target = u128::from(target);
    ((200 * current + target) / (2 * target)) as u64
}

/// One percentage across all kinds: summed current over summed target.
pub fn blended_coverage_pct(current: &KindCounts, target: &KindCounts) -> u64 {
    let have: u64 = target
        .keys()
        .map(|kind| current.get(kind).copied().unwrap_or(0))
        .sum();
    let want: u64 = target.values().sum();
    coverage_pct(have, want)
}
