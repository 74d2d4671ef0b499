use serde_json::json;

use crate::cascade::KindCounts;
use crate::plan::{EntityKind, Objective, StrategicPlan};
use crate::queue::NewQueueItem;

/// Score for unit `index` of a kind whose gap is `gap`. Lies in (gap-1, gap],
/// so a larger gap always outranks a smaller one.
pub fn priority_score(gap: u64, index: u64) -> f64 {
    if gap == 0 {
        return 0.0;
    }
    gap as f64 - index as f64 / gap as f64
}

/// Gap left after rows already queued for it. Kinds fully covered drop out.
pub fn uncovered_gaps(gaps: &KindCounts, open: &KindCounts) -> KindCounts {
    gaps.iter()
        .map(|(kind, gap)| (*kind, gap.saturating_sub(open.get(kind).copied().unwrap_or(0))))
        .filter(|(_, gap)| *gap > 0)
        .collect()
}

/// One pending row per unit of gap, each tagged round-robin with an objective
/// taken in descending weight order.
pub fn materialize_gaps(plan: &StrategicPlan, gaps: &KindCounts) -> Vec<NewQueueItem> {
    let mut ranked: Vec<&Objective> = plan.objectives.iter().collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight));

    let mut items = Vec::new();
    for (kind, gap) in gaps {
        for index in 0..*gap {
            let objective = if ranked.is_empty() {
                None
            } else {
                Some(ranked[(index % ranked.len() as u64) as usize])
            };
            items.push(NewQueueItem {
                strategic_plan_id: plan.id.clone(),
                entity_type: *kind,
                priority_score: priority_score(*gap, index),
                prefilled_spec: prefilled_spec(plan, *kind, objective, index + 1, *gap),
            });
        }
    }
    items.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));
    items
}

fn prefilled_spec(
    plan: &StrategicPlan,
    kind: EntityKind,
    objective: Option<&Objective>,
    sequence: u64,
    of: u64,
) -> serde_json::Value {
    let title_hint = match objective {
        Some(objective) => format!("{kind} for \"{}\" ({sequence}/{of})", objective.title),
        None => format!("{kind} for \"{}\" ({sequence}/{of})", plan.title),
    };
    json!({
        "entity_type": kind.as_slug(),
        "strategic_plan_id": plan.id,
        "plan_title": plan.title,
        "objective_id": objective.map(|o| o.id.clone()),
        "objective_title": objective.map(|o| o.title.clone()),
        "title_hint": title_hint,
        "period": { "start_year": plan.start_year, "end_year": plan.end_year },
        "sequence": sequence,
        "of": of,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::plan::CascadeConfig;

    fn plan(objectives: Vec<Objective>) -> StrategicPlan {
        StrategicPlan {
            id: "plan-7".to_string(),
            title: "Jeddah Waterfront".to_string(),
            objectives,
            cascade: CascadeConfig::default(),
            start_year: 2024,
            end_year: 2027,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn one_row_per_unit_of_gap() {
        let gaps: KindCounts = [
            (EntityKind::Challenge, 10),
            (EntityKind::Pilot, 0),
            (EntityKind::Campaign, 4),
            (EntityKind::Event, 6),
        ]
        .into_iter()
        .collect();
        let items = materialize_gaps(&plan(vec![Objective::new("Tourism", 1.0)]), &gaps);
        assert_eq!(items.len(), 20);
        assert!(items.iter().all(|i| i.entity_type != EntityKind::Pilot));
        assert!(items[..10].iter().all(|i| i.entity_type == EntityKind::Challenge));
        assert!(items[10..16].iter().all(|i| i.entity_type == EntityKind::Event));
        assert!(items[16..].iter().all(|i| i.entity_type == EntityKind::Campaign));
    }

    #[test]
    fn queued_rows_cover_their_share_of_the_gap() {
        let gaps: KindCounts = [(EntityKind::Challenge, 10), (EntityKind::Event, 6)]
            .into_iter()
            .collect();
        let open: KindCounts = [(EntityKind::Challenge, 4), (EntityKind::Event, 9)]
            .into_iter()
            .collect();
        let left = uncovered_gaps(&gaps, &open);
        assert_eq!(left.get(&EntityKind::Challenge), Some(&6));
        assert_eq!(left.get(&EntityKind::Event), None);
        assert_eq!(uncovered_gaps(&gaps, &KindCounts::new()), gaps);
    }

    #[test]
    fn larger_gaps_always_outrank_smaller() {
        let last_of_ten = priority_score(10, 9);
        let first_of_nine = priority_score(9, 0);
        assert!(last_of_ten > first_of_nine);
        assert!(priority_score(4, 0) > priority_score(4, 1));
        assert_eq!(priority_score(0, 0), 0.0);
    }

    #[test]
    fn objectives_rotate_by_weight() {
        let light = Objective::new("Light", 0.5);
        let heavy = Objective::new("Heavy", 3.0);
        let gaps: KindCounts = [(EntityKind::Event, 3)].into_iter().collect();
        let items = materialize_gaps(&plan(vec![light, heavy]), &gaps);
        let titles: Vec<&str> = items
            .iter()
            .map(|i| i.prefilled_spec["objective_title"].as_str().unwrap_or_default())
            .collect();
        assert_eq!(titles, vec!["Heavy", "Light", "Heavy"]);
        assert_eq!(items[2].prefilled_spec["sequence"], 3);
    }

    #[test]
    fn plan_without_objectives_leaves_objective_null() {
        let gaps: KindCounts = [(EntityKind::Challenge, 1)].into_iter().collect();
        let items = materialize_gaps(&plan(Vec::new()), &gaps);
        assert!(items[0].prefilled_spec["objective_id"].is_null());
        assert_eq!(items[0].strategic_plan_id, "plan-7");
    }
}
