use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cascade::gaps::{blended_coverage_pct, compute_gaps, coverage_pct};
use crate::cascade::targets::compute_targets;
use crate::cascade::{cascade_counts, AnalysisDepth, KindCounts, RemainderPolicy};
use crate::plan::{EntityKind, StrategicPlan};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapAnalysisReport {
    pub strategic_plan_id: String,
    pub plan_title: String,
    pub analysis_depth: AnalysisDepth,
    pub generated_at: DateTime<Utc>,
    pub overall_coverage_pct: u64,
    pub entity_coverage: BTreeMap<EntityKind, KindCoverage>,
    #[serde(default)]
    pub objectives: Vec<ObjectiveCoverage>,
    pub gaps: GapSummary,
    pub total_generation_needed: u64,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindCoverage {
    pub current: u64,
    pub target: u64,
    pub coverage_pct: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GapSummary {
    pub quantity_gaps: KindCounts,
    pub priority_order: Vec<EntityKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectiveCoverage {
    pub objective_id: String,
    pub title: String,
    pub weight: f64,
    pub current: KindCounts,
    pub target: KindCounts,
    pub coverage_pct: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaps: Option<KindCounts>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub priority: usize,
    pub title: String,
    pub rationale: String,
    pub entity_kind: Option<EntityKind>,
    pub quantity: u64,
}

pub fn build_report(
    plan: &StrategicPlan,
    current: &KindCounts,
    depth: AnalysisDepth,
    policy: RemainderPolicy,
) -> GapAnalysisReport {
    let current = cascade_counts(current);
    let targets = compute_targets(&plan.objectives, &plan.cascade, &current, policy);
    let analysis = compute_gaps(&current, &targets.global);

    let entity_coverage = targets
        .global
        .iter()
        .map(|(kind, target)| {
            let have = current.get(kind).copied().unwrap_or(0);
            (
                *kind,
                KindCoverage {
                    current: have,
                    target: *target,
                    coverage_pct: coverage_pct(have, *target),
                },
            )
        })
        .collect();

    let objectives = if depth.includes_objectives() {
        targets
            .per_objective
            .iter()
            .map(|objective| ObjectiveCoverage {
                objective_id: objective.objective_id.clone(),
                title: objective.title.clone(),
                weight: objective.weight,
                current: objective.current.clone(),
                target: objective.target.clone(),
                coverage_pct: blended_coverage_pct(&objective.current, &objective.target),
                gaps: matches!(depth, AnalysisDepth::Deep)
                    .then(|| compute_gaps(&objective.current, &objective.target).gaps),
            })
            .collect()
    } else {
        Vec::new()
    };

    let mut report = GapAnalysisReport {
        strategic_plan_id: plan.id.clone(),
        plan_title: plan.title.clone(),
        analysis_depth: depth,
        generated_at: Utc::now(),
        overall_coverage_pct: blended_coverage_pct(&current, &targets.global),
        entity_coverage,
        objectives,
        gaps: GapSummary {
            quantity_gaps: analysis.gaps,
            priority_order: analysis.priority_order,
        },
        total_generation_needed: analysis.total_generation_needed,
        recommendations: Vec::new(),
    };
    if matches!(depth, AnalysisDepth::Deep) {
        report.recommendations = build_recommendations(&report, 3);
    }
    report
}

/// One entry per kind with a gap, in priority order, then the weakest objectives.
pub fn build_recommendations(
    report: &GapAnalysisReport,
    max_objectives: usize,
) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    let mut rank = 1usize;

    for kind in &report.gaps.priority_order {
        let gap = report.gaps.quantity_gaps.get(kind).copied().unwrap_or(0);
        let coverage = report
            .entity_coverage
            .get(kind)
            .map(|c| c.coverage_pct)
            .unwrap_or(100);
        recommendations.push(Recommendation {
            priority: rank,
            title: format!("Generate {gap} {}", plural(*kind)),
            rationale: format!(
                "{} coverage is {coverage}% of the cascade target.",
                kind
            ),
            entity_kind: Some(*kind),
            quantity: gap,
        });
        rank += 1;
    }

    let mut weakest = report
        .objectives
        .iter()
        .filter(|o| o.coverage_pct < 100)
        .collect::<Vec<_>>();
    weakest.sort_by(|a, b| {
        a.coverage_pct
            .cmp(&b.coverage_pct)
            .then_with(|| b.weight.total_cmp(&a.weight))
    });
    for objective in weakest.into_iter().take(max_objectives) {
        let missing: u64 = objective
            .target
            .iter()
            .map(|(kind, want)| want.saturating_sub(objective.current.get(kind).copied().unwrap_or(0)))
            .sum();
        recommendations.push(Recommendation {
            priority: rank,
            title: format!("Strengthen objective '{}'", objective.title),
            rationale: format!(
                "Objective is at {}% coverage with {missing} linked items missing.",
                objective.coverage_pct
            ),
            entity_kind: None,
            quantity: missing,
        });
        rank += 1;
    }

    recommendations
}

fn plural(kind: EntityKind) -> String {
    format!("{}s", kind.as_slug())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::plan::{CascadeConfig, Objective};

    fn plan_with(objectives: usize) -> StrategicPlan {
        StrategicPlan {
            id: "plan-1".to_string(),
            title: "Riyadh Innovation Plan".to_string(),
            objectives: (0..objectives)
                .map(|i| Objective::new(format!("Objective {i}"), 1.0 + i as f64))
                .collect(),
            cascade: CascadeConfig::default(),
            start_year: 2025,
            end_year: 2030,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fresh_plan_reports_full_gaps() {
        let report = build_report(
            &plan_with(2),
            &KindCounts::new(),
            AnalysisDepth::Standard,
            RemainderPolicy::RoundRobin,
        );
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Challenge], 10);
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Campaign], 4);
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Event], 6);
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Pilot], 0);
        assert_eq!(
            report.gaps.priority_order,
            vec![EntityKind::Challenge, EntityKind::Event, EntityKind::Campaign]
        );
        assert_eq!(report.total_generation_needed, 20);
        assert_eq!(report.overall_coverage_pct, 0);
        assert_eq!(report.entity_coverage[&EntityKind::Pilot].coverage_pct, 100);
        assert_eq!(report.objectives.len(), 2);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn pilots_open_up_once_challenges_exist() {
        let current: KindCounts = [(EntityKind::Challenge, 10)].into_iter().collect();
        let report = build_report(
            &plan_with(2),
            &current,
            AnalysisDepth::Quick,
            RemainderPolicy::RoundRobin,
        );
        assert_eq!(report.entity_coverage[&EntityKind::Pilot].target, 20);
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Pilot], 20);
        assert_eq!(report.gaps.quantity_gaps[&EntityKind::Challenge], 0);
        assert_eq!(report.gaps.priority_order[0], EntityKind::Pilot);
        assert!(report.objectives.is_empty());
    }

    #[test]
    fn deep_analysis_adds_objective_gaps_and_recommendations() {
        let current: KindCounts = [(EntityKind::Event, 3)].into_iter().collect();
        let report = build_report(
            &plan_with(2),
            &current,
            AnalysisDepth::Deep,
            RemainderPolicy::RoundRobin,
        );
        let first = &report.objectives[0];
        assert!(first.gaps.is_some());
        // 2 of 10 targeted items attributed to the first objective
        assert_eq!(first.coverage_pct, 20);
        assert_eq!(report.recommendations[0].entity_kind, Some(EntityKind::Challenge));
        assert_eq!(report.recommendations[0].quantity, 10);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.entity_kind.is_none() && r.title.contains("Objective")));
    }

    #[test]
    fn ignores_non_cascade_kinds_in_coverage() {
        let current: KindCounts = [(EntityKind::Solution, 40)].into_iter().collect();
        let report = build_report(
            &plan_with(1),
            &current,
            AnalysisDepth::Quick,
            RemainderPolicy::Drop,
        );
        assert!(!report.entity_coverage.contains_key(&EntityKind::Solution));
        assert_eq!(report.overall_coverage_pct, 0);
    }
}
