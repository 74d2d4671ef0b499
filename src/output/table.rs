use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::cascade::{GapAnalysisReport, KindCounts};
use crate::plan::{PortfolioEntity, StrategicPlan};
use crate::queue::{DemandQueueItem, QueueStats, QueueStatus};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn coverage_cell(pct: u64) -> Cell {
    let cell = Cell::new(format!("{pct}%"));
    if pct >= 100 {
        cell.fg(Color::Green)
    } else if pct >= 50 {
        cell.fg(Color::Yellow)
    } else {
        cell.fg(Color::Red)
    }
}

pub fn render_plans_table(plans: &[StrategicPlan]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Id", "Title", "Objectives", "Period", "Updated"]);
    for plan in plans {
        table.add_row(vec![
            plan.id.clone(),
            plan.title.clone(),
            plan.objectives.len().to_string(),
            format!("{}-{}", plan.start_year, plan.end_year),
            plan.updated_at.to_rfc3339(),
        ]);
    }
    table.to_string()
}

pub fn render_plan_table(plan: &StrategicPlan) -> String {
    let mut table = new_table();
    table.set_header(vec!["Objective", "Id", "Weight"]);
    for objective in &plan.objectives {
        table.add_row(vec![
            objective.title.clone(),
            objective.id.clone(),
            format!("{:.2}", objective.weight),
        ]);
    }
    let cascade = &plan.cascade;
    format!(
        "{} ({}-{})\nid: {}\ncascade: {} challenges/objective, {} pilots/challenge, {} campaigns/objective, {} events/objective\n{}",
        plan.title,
        plan.start_year,
        plan.end_year,
        plan.id,
        cascade.challenges_per_objective,
        cascade.pilots_per_challenge,
        cascade.campaigns_per_objective,
        cascade.events_per_objective,
        table
    )
}

pub fn render_counts_table(counts: &KindCounts) -> String {
    let mut table = new_table();
    table.set_header(vec!["Kind", "Count"]);
    for (kind, count) in counts {
        table.add_row(vec![kind.to_string(), count.to_string()]);
    }
    table.to_string()
}

pub fn render_entity_table(entity: &PortfolioEntity) -> String {
    let mut table = new_table();
    table.set_header(vec!["Id", "Kind", "Title", "Created"]);
    table.add_row(vec![
        entity.id.clone(),
        entity.kind.to_string(),
        entity.title.clone(),
        entity.created_at.to_rfc3339(),
    ]);
    table.to_string()
}

pub fn render_report_table(report: &GapAnalysisReport) -> String {
    let mut coverage = new_table();
    coverage.set_header(vec!["Kind", "Current", "Target", "Coverage", "Gap", "Priority"]);
    for (kind, entry) in &report.entity_coverage {
        let gap = report.gaps.quantity_gaps.get(kind).copied().unwrap_or(0);
        let priority = report
            .gaps
            .priority_order
            .iter()
            .position(|k| k == kind)
            .map(|p| (p + 1).to_string())
            .unwrap_or_else(|| "-".to_string());
        coverage.add_row(Row::from(vec![
            Cell::new(kind.to_string()),
            Cell::new(entry.current),
            Cell::new(entry.target),
            coverage_cell(entry.coverage_pct),
            Cell::new(gap),
            Cell::new(priority),
        ]));
    }

    let mut out = format!(
        "{} [{}]\nOverall coverage: {}%  Items to generate: {}\n{coverage}",
        report.plan_title,
        report.analysis_depth,
        report.overall_coverage_pct,
        report.total_generation_needed
    );

    if !report.objectives.is_empty() {
        let mut objectives = new_table();
        objectives.set_header(vec!["Objective", "Weight", "Current", "Target", "Coverage"]);
        for objective in &report.objectives {
            objectives.add_row(Row::from(vec![
                Cell::new(&objective.title),
                Cell::new(format!("{:.2}", objective.weight)),
                Cell::new(join_counts(&objective.current)),
                Cell::new(join_counts(&objective.target)),
                coverage_cell(objective.coverage_pct),
            ]));
        }
        out.push('\n');
        out.push_str(&objectives.to_string());
    }

    if !report.recommendations.is_empty() {
        let mut recommendations = new_table();
        recommendations.set_header(vec!["Priority", "Title", "Rationale"]);
        for item in &report.recommendations {
            recommendations.add_row(vec![
                item.priority.to_string(),
                item.title.clone(),
                item.rationale.clone(),
            ]);
        }
        out.push('\n');
        out.push_str(&recommendations.to_string());
    }
    out
}

fn join_counts(counts: &KindCounts) -> String {
    counts
        .iter()
        .map(|(kind, count)| format!("{}:{count}", kind.as_slug()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn status_cell(status: QueueStatus) -> Cell {
    let cell = Cell::new(status.as_slug());
    match status {
        QueueStatus::Accepted => cell.fg(Color::Green),
        QueueStatus::Review => cell.fg(Color::Yellow),
        QueueStatus::Rejected => cell.fg(Color::Red),
        QueueStatus::InProgress => cell.fg(Color::Cyan),
        QueueStatus::Pending | QueueStatus::Skipped => cell,
    }
}

pub fn render_queue_table(items: &[DemandQueueItem]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Id", "Type", "Status", "Priority", "Hint", "Score", "Attempts"]);
    for item in items {
        let hint = item
            .prefilled_spec
            .get("title_hint")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        table.add_row(Row::from(vec![
            Cell::new(&item.id),
            Cell::new(item.entity_type.to_string()),
            status_cell(item.status),
            Cell::new(format!("{:.3}", item.priority_score)),
            Cell::new(hint),
            Cell::new(
                item.quality_score
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(item.attempts),
        ]));
    }
    table.to_string()
}

pub fn render_stats_table(stats: &QueueStats) -> String {
    let mut table = new_table();
    table.set_header(vec!["Status", "Items"]);
    for (status, count) in &stats.by_status {
        table.add_row(Row::from(vec![status_cell(*status), Cell::new(count)]));
    }
    let mut by_type = new_table();
    by_type.set_header(vec!["Type", "Items"]);
    for (kind, count) in &stats.by_entity_type {
        by_type.add_row(vec![kind.to_string(), count.to_string()]);
    }
    let mean = stats
        .mean_quality_score
        .map(|m| format!("{m:.1}"))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "Plan {}: {} items, mean quality {mean}\n{table}\n{by_type}",
        stats.strategic_plan_id, stats.total
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::cascade::{build_report, AnalysisDepth, RemainderPolicy};
    use crate::plan::{CascadeConfig, EntityKind, Objective};

    #[test]
    fn report_table_lists_every_cascade_kind() {
        let plan = StrategicPlan {
            id: "plan-1".to_string(),
            title: "Madinah Smart City".to_string(),
            objectives: vec![Objective::new("Mobility", 1.0)],
            cascade: CascadeConfig::default(),
            start_year: 2025,
            end_year: 2027,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let current: KindCounts = [(EntityKind::Challenge, 2)].into_iter().collect();
        let report = build_report(&plan, &current, AnalysisDepth::Deep, RemainderPolicy::RoundRobin);
        let rendered = render_report_table(&report);
        for kind in EntityKind::CASCADE {
            assert!(rendered.contains(&kind.to_string()));
        }
        assert!(rendered.contains("Mobility"));
        assert!(rendered.contains("Overall coverage"));
    }

    #[test]
    fn queue_table_shows_title_hint() {
        let item = DemandQueueItem {
            id: "q-1".to_string(),
            strategic_plan_id: "plan-1".to_string(),
            entity_type: EntityKind::Pilot,
            status: QueueStatus::Pending,
            priority_score: 4.0,
            prefilled_spec: json!({ "title_hint": "Pilot for \"Mobility\" (1/4)" }),
            generated_entity_id: None,
            generated_entity_type: None,
            quality_score: None,
            quality_feedback: None,
            attempts: 0,
            last_attempt_at: None,
            created_at: Utc::now(),
        };
        let rendered = render_queue_table(&[item]);
        assert!(rendered.contains("(1/4)"));
        assert!(rendered.contains("pending"));
    }
}
