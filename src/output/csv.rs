use anyhow::Result;

use crate::cascade::{GapAnalysisReport, KindCounts};
use crate::plan::StrategicPlan;
use crate::queue::{DemandQueueItem, QueueStats};

pub fn plans_to_csv(plans: &[StrategicPlan]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["id", "title", "objectives", "start_year", "end_year"])?;
    for plan in plans {
        writer.write_record([
            plan.id.clone(),
            plan.title.clone(),
            plan.objectives.len().to_string(),
            plan.start_year.to_string(),
            plan.end_year.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn counts_to_csv(counts: &KindCounts) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["kind", "count"])?;
    for (kind, count) in counts {
        writer.write_record([kind.as_slug().to_string(), count.to_string()])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

/// One row per cascade kind with its coverage and gap.
pub fn report_to_csv(report: &GapAnalysisReport) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["kind", "current", "target", "coverage_pct", "gap"])?;
    for (kind, entry) in &report.entity_coverage {
        writer.write_record([
            kind.as_slug().to_string(),
            entry.current.to_string(),
            entry.target.to_string(),
            entry.coverage_pct.to_string(),
            report
                .gaps
                .quantity_gaps
                .get(kind)
                .copied()
                .unwrap_or(0)
                .to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn queue_to_csv(items: &[DemandQueueItem]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "entity_type",
        "status",
        "priority_score",
        "quality_score",
        "generated_entity_id",
        "attempts",
    ])?;
    for item in items {
        writer.write_record([
            item.id.clone(),
            item.entity_type.as_slug().to_string(),
            item.status.as_slug().to_string(),
            format!("{:.4}", item.priority_score),
            item.quality_score.map(|s| s.to_string()).unwrap_or_default(),
            item.generated_entity_id.clone().unwrap_or_default(),
            item.attempts.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn stats_to_csv(stats: &QueueStats) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record(["dimension", "key", "count"])?;
    for (status, count) in &stats.by_status {
        writer.write_record(["status", status.as_slug(), count.to_string().as_str()])?;
    }
    for (kind, count) in &stats.by_entity_type {
        writer.write_record(["entity_type", kind.as_slug(), count.to_string().as_str()])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EntityKind;

    #[test]
    fn counts_csv_has_header_and_rows() {
        let counts: KindCounts = [(EntityKind::Challenge, 4), (EntityKind::Event, 1)]
            .into_iter()
            .collect();
        let rendered = counts_to_csv(&counts).expect("csv");
        assert_eq!(rendered, "kind,count\nchallenge,4\nevent,1\n");
    }
}
