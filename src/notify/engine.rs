use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NotificationRulesConfig;
use crate::notify::rules::QueueEventKind;
use crate::plan::EntityKind;
use crate::queue::{DemandQueueItem, QueueStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub strategic_plan_id: String,
    pub item_id: Option<String>,
    pub title: String,
    pub body: String,
    pub at: DateTime<Utc>,
}

/// Event for an item that just left the in-progress state, if any applies.
pub fn item_event(item: &DemandQueueItem) -> Option<QueueEvent> {
    let (kind, title) = match item.status {
        QueueStatus::Accepted => (
            QueueEventKind::ItemAccepted,
            format!("{} accepted", item.entity_type),
        ),
        QueueStatus::Review => (
            QueueEventKind::ItemNeedsReview,
            format!("{} needs review", item.entity_type),
        ),
        QueueStatus::Skipped => (
            QueueEventKind::ItemSkipped,
            format!("{} skipped", item.entity_type),
        ),
        QueueStatus::Rejected => (
            QueueEventKind::ItemRejected,
            format!("{} rejected", item.entity_type),
        ),
        QueueStatus::Pending | QueueStatus::InProgress => return None,
    };
    let body = match (item.quality_score, &item.quality_feedback) {
        (Some(score), _) => format!(
            "item {} scored {score}; entity {}",
            item.id,
            item.generated_entity_id.as_deref().unwrap_or("-")
        ),
        (None, Some(feedback)) => {
            let reason = feedback
                .get("skip_reason")
                .or_else(|| feedback.get("rejection_reason"))
                .and_then(|v| v.as_str())
                .unwrap_or("no reason given");
            format!("item {}: {reason}", item.id)
        }
        (None, None) => format!("item {}", item.id),
    };
    Some(QueueEvent {
        kind,
        strategic_plan_id: item.strategic_plan_id.clone(),
        item_id: Some(item.id.clone()),
        title,
        body,
        at: Utc::now(),
    })
}

pub fn drained_event(plan_id: &str, kind: EntityKind, processed: usize) -> QueueEvent {
    QueueEvent {
        kind: QueueEventKind::QueueDrained,
        strategic_plan_id: plan_id.to_string(),
        item_id: None,
        title: format!("{kind} queue drained"),
        body: format!("{processed} items processed for plan {plan_id}"),
        at: Utc::now(),
    }
}

pub fn apply_rules(events: Vec<QueueEvent>, rules: &NotificationRulesConfig) -> Vec<QueueEvent> {
    events
        .into_iter()
        .filter(|event| event.kind.enabled_in(rules))
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(status: QueueStatus) -> DemandQueueItem {
        DemandQueueItem {
            id: "q-1".to_string(),
            strategic_plan_id: "plan-1".to_string(),
            entity_type: EntityKind::Event,
            status,
            priority_score: 1.0,
            prefilled_spec: json!({}),
            generated_entity_id: None,
            generated_entity_type: None,
            quality_score: None,
            quality_feedback: None,
            attempts: 0,
            last_attempt_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn maps_terminal_statuses_to_events() {
        let mut accepted = item(QueueStatus::Accepted);
        accepted.quality_score = Some(88);
        accepted.generated_entity_id = Some("ev-9".to_string());
        let event = item_event(&accepted).expect("event");
        assert_eq!(event.kind, QueueEventKind::ItemAccepted);
        assert_eq!(event.body, "item q-1 scored 88; entity ev-9");

        let mut skipped = item(QueueStatus::Skipped);
        skipped.quality_feedback = Some(json!({ "skip_reason": "out of season" }));
        let event = item_event(&skipped).expect("event");
        assert_eq!(event.kind, QueueEventKind::ItemSkipped);
        assert_eq!(event.body, "item q-1: out of season");

        assert!(item_event(&item(QueueStatus::InProgress)).is_none());
    }

    #[test]
    fn rules_filter_disabled_kinds() {
        let rules = NotificationRulesConfig {
            item_accepted: false,
            ..NotificationRulesConfig::default()
        };
        let mut accepted = item(QueueStatus::Accepted);
        accepted.quality_score = Some(90);
        let events = vec![
            item_event(&accepted).expect("event"),
            drained_event("plan-1", EntityKind::Event, 3),
        ];
        let kept = apply_rules(events, &rules);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].kind, QueueEventKind::QueueDrained);
    }
}
