use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::gateway::{Draft, DraftOracle};
use crate::queue::DemandQueueItem;

/// Spec fields the offline draft depends on. Each present field is worth an
/// equal share of the quality score.
const COMPLETENESS_FIELDS: [&str; 5] = [
    "title_hint",
    "plan_title",
    "objective_id",
    "objective_title",
    "period",
];

/// Offline drafting from the prefilled spec. Deterministic for a given item.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateOracle;

#[async_trait]
impl DraftOracle for TemplateOracle {
    fn name(&self) -> &str {
        "template"
    }

    async fn draft(&self, item: &DemandQueueItem) -> Result<Draft> {
        Ok(template_draft(item))
    }
}

pub fn template_draft(item: &DemandQueueItem) -> Draft {
    let spec = &item.prefilled_spec;
    let title = text_field(spec, "title_hint")
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} for plan {}", item.entity_type, item.strategic_plan_id));

    let mut description = format!("{} drafted", item.entity_type);
    if let Some(objective) = text_field(spec, "objective_title") {
        description.push_str(&format!(" for objective \"{objective}\""));
    }
    if let Some(plan) = text_field(spec, "plan_title") {
        description.push_str(&format!(" of plan \"{plan}\""));
    }
    if let (Some(start), Some(end)) = (
        spec.pointer("/period/start_year").and_then(Value::as_i64),
        spec.pointer("/period/end_year").and_then(Value::as_i64),
    ) {
        description.push_str(&format!(", {start}-{end}"));
    }
    description.push('.');

    Draft {
        title,
        description,
        payload: json!({ "source": "template", "spec": spec }),
        quality_score: completeness_score(spec),
    }
}

pub fn completeness_score(spec: &Value) -> u8 {
    let present = COMPLETENESS_FIELDS
        .iter()
        .filter(|field| match spec.get(**field) {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        })
        .count();
    let score = (present * 100 + COMPLETENESS_FIELDS.len() / 2) / COMPLETENESS_FIELDS.len();
    u8::try_from(score).unwrap_or(100)
}

fn text_field<'a>(spec: &'a Value, key: &str) -> Option<&'a str> {
    spec.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::plan::EntityKind;
    use crate::queue::QueueStatus;

    fn item(spec: Value) -> DemandQueueItem {
        DemandQueueItem {
            id: "item-1".to_string(),
            strategic_plan_id: "plan-1".to_string(),
            entity_type: EntityKind::Campaign,
            status: QueueStatus::InProgress,
            priority_score: 4.0,
            prefilled_spec: spec,
            generated_entity_id: None,
            generated_entity_type: None,
            quality_score: None,
            quality_feedback: None,
            attempts: 0,
            last_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn full_spec_drafts_an_accepted_quality_entity() {
        let spec = json!({
            "title_hint": "Campaign for \"Clean streets\" (1/2)",
            "plan_title": "Riyadh 2030",
            "objective_id": "obj-1",
            "objective_title": "Clean streets",
            "period": { "start_year": 2025, "end_year": 2027 },
        });
        let draft = TemplateOracle.draft(&item(spec)).await.expect("draft");
        assert_eq!(draft.title, "Campaign for \"Clean streets\" (1/2)");
        assert_eq!(
            draft.description,
            "Campaign drafted for objective \"Clean streets\" of plan \"Riyadh 2030\", 2025-2027."
        );
        assert_eq!(draft.quality_score, 100);
    }

    #[test]
    fn missing_objective_lowers_score_below_acceptance() {
        let spec = json!({
            "title_hint": "Campaign for \"Riyadh 2030\" (1/2)",
            "plan_title": "Riyadh 2030",
            "objective_id": null,
            "objective_title": null,
            "period": { "start_year": 2025, "end_year": 2027 },
        });
        assert_eq!(completeness_score(&spec), 60);
        assert_eq!(completeness_score(&Value::Null), 0);

        let draft = template_draft(&item(Value::Null));
        assert_eq!(draft.title, "Campaign for plan plan-1");
        assert_eq!(draft.description, "Campaign drafted.");
    }
}
