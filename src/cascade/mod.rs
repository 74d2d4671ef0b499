pub mod gaps;
pub mod report;
pub mod targets;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::plan::EntityKind;

pub use gaps::{blended_coverage_pct, compute_gaps, coverage_pct, GapAnalysis};
pub use report::{build_report, GapAnalysisReport, KindCoverage, ObjectiveCoverage, Recommendation};
pub use targets::{compute_targets, objective_count, CascadeTargets, ObjectiveTargets};

/// Count per entity kind. Iteration follows the canonical kind order.
pub type KindCounts = BTreeMap<EntityKind, u64>;

/// How the remainder of `total / objective_count` is attributed to objectives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    #[default]
    RoundRobin,
    Drop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl AnalysisDepth {
    pub fn includes_objectives(self) -> bool {
        !matches!(self, Self::Quick)
    }
}

impl Display for AnalysisDepth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slug = match self {
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Deep => "deep",
        };
        write!(f, "{slug}")
    }
}

#[derive(Debug, Error)]
#[error("unknown analysis depth: {0}")]
pub struct AnalysisDepthParseError(pub String);

impl FromStr for AnalysisDepth {
    type Err = AnalysisDepthParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "basic" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "deep" | "comprehensive" => Ok(Self::Deep),
            _ => Err(AnalysisDepthParseError(s.to_string())),
        }
    }
}

/// Counts for the cascade kinds, zero-filled so every kind is present.
pub fn cascade_counts(counts: &KindCounts) -> KindCounts {
    EntityKind::CASCADE
        .iter()
        .map(|kind| (*kind, counts.get(kind).copied().unwrap_or(0)))
        .collect()
}
