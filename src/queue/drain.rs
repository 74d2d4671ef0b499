use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::gateway::DraftOracle;
use crate::notify::engine::{drained_event, item_event};
use crate::notify::Notifier;
use crate::plan::EntityKind;
use crate::queue::backend::QueueBackend;
use crate::queue::consumer::QueueConsumer;
use crate::queue::{DemandQueueItem, QueueStatus};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DrainSummary {
    pub strategic_plan_id: String,
    pub entity_type: EntityKind,
    pub processed: usize,
    pub accepted: usize,
    pub review: usize,
    pub hit_limit: bool,
}

/// Claims, drafts, creates and completes items of one type until the queue
/// is empty or `limit` items were processed. The first error stops the loop;
/// an item whose draft failed stays in progress until released or reclaimed.
pub async fn drain_queue(
    backend: Arc<dyn QueueBackend>,
    oracle: &dyn DraftOracle,
    notifier: &Notifier,
    plan_id: &str,
    kind: EntityKind,
    limit: usize,
) -> Result<DrainSummary> {
    let mut summary = DrainSummary {
        strategic_plan_id: plan_id.to_string(),
        entity_type: kind,
        processed: 0,
        accepted: 0,
        review: 0,
        hit_limit: false,
    };
    if limit == 0 {
        summary.hit_limit = true;
        return Ok(summary);
    }

    let mut consumer = QueueConsumer::new(backend.clone(), plan_id);
    let mut current = consumer.start_auto_mode(kind).await?;
    while let Some(item) = current.take() {
        let (entity_id, score) = generate_entity(backend.as_ref(), oracle, &item).await?;
        summary.processed += 1;

        let completed = if summary.processed >= limit {
            let completed = consumer
                .complete(&entity_id, i64::from(score), None)
                .await?;
            consumer.exit_auto_mode();
            summary.hit_limit = true;
            completed
        } else {
            let outcome = consumer
                .complete_and_load_next(&entity_id, i64::from(score), None)
                .await?;
            current = outcome.next;
            outcome.completed
        };
        match completed.status {
            QueueStatus::Accepted => summary.accepted += 1,
            QueueStatus::Review => summary.review += 1,
            other => warn!(item = %completed.id, status = %other, "unexpected status after completion"),
        }
        info!(
            item = %completed.id,
            status = %completed.status,
            processed = summary.processed,
            "drain step"
        );
        if let Some(event) = item_event(&completed) {
            notifier.publish(vec![event]).await;
        }
    }

    if !summary.hit_limit {
        notifier
            .publish(vec![drained_event(plan_id, kind, summary.processed)])
            .await;
    }
    Ok(summary)
}

/// Drafts the item and records the entity. Returns the entity id and the
/// draft's quality score.
async fn generate_entity(
    backend: &dyn QueueBackend,
    oracle: &dyn DraftOracle,
    item: &DemandQueueItem,
) -> Result<(String, u8)> {
    let draft = oracle
        .draft(item)
        .await
        .with_context(|| format!("{} oracle failed drafting item {}", oracle.name(), item.id))?;
    let payload = json!({
        "description": draft.description,
        "draft": draft.payload,
        "queue_item_id": item.id,
    });
    let entity = backend
        .create_entity(&item.strategic_plan_id, item.entity_type, &draft.title, payload)
        .await?;
    Ok((entity.id, draft.quality_score))
}
