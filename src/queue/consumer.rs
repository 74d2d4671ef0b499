//! Auto-population state machine over the demand queue.
//!
//! A consumer holds at most one claimed item. The server-side status is the
//! source of truth; `held` is a local cache of the last successful claim and
//! is left untouched when a backend call fails.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::plan::EntityKind;
use crate::queue::backend::QueueBackend;
use crate::queue::{
    rejection_feedback, skip_feedback, validate_quality_score, DemandQueueItem,
    InvalidQualityScore, QueueStatus,
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Idle,
    Loaded,
}

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("no queue item is loaded")]
    NotLoaded,
    #[error("queue item {0} is already loaded")]
    AlreadyLoaded(String),
    #[error(transparent)]
    InvalidQualityScore(#[from] InvalidQualityScore),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub completed: DemandQueueItem,
    pub next: Option<DemandQueueItem>,
}

pub struct QueueConsumer {
    backend: Arc<dyn QueueBackend>,
    plan_id: String,
    held: Option<DemandQueueItem>,
    auto_mode: bool,
}

impl QueueConsumer {
    pub fn new(backend: Arc<dyn QueueBackend>, plan_id: impl Into<String>) -> Self {
        Self {
            backend,
            plan_id: plan_id.into(),
            held: None,
            auto_mode: false,
        }
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }

    pub fn state(&self) -> ConsumerState {
        if self.held.is_some() {
            ConsumerState::Loaded
        } else {
            ConsumerState::Idle
        }
    }

    pub fn held(&self) -> Option<&DemandQueueItem> {
        self.held.as_ref()
    }

    /// Draft payload for the creation form while an item is loaded.
    pub fn prefilled_spec(&self) -> Option<&Value> {
        self.held.as_ref().map(|item| &item.prefilled_spec)
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub async fn start_auto_mode(
        &mut self,
        kind: EntityKind,
    ) -> Result<Option<DemandQueueItem>, ConsumerError> {
        self.auto_mode = true;
        self.load_next(kind).await
    }

    /// Claims the next pending item of `kind`. With nothing pending the
    /// consumer stays idle and auto mode is switched off.
    pub async fn load_next(
        &mut self,
        kind: EntityKind,
    ) -> Result<Option<DemandQueueItem>, ConsumerError> {
        if let Some(item) = &self.held {
            return Err(ConsumerError::AlreadyLoaded(item.id.clone()));
        }
        match self.backend.claim_next(&self.plan_id, kind).await? {
            Some(item) => {
                info!(item = %item.id, kind = %kind, plan = %self.plan_id, "claimed queue item");
                self.held = Some(item.clone());
                Ok(Some(item))
            }
            None => {
                info!(kind = %kind, plan = %self.plan_id, "no pending items");
                self.auto_mode = false;
                Ok(None)
            }
        }
    }

    /// Records the generated entity against the held item and returns to idle.
    pub async fn complete(
        &mut self,
        entity_id: &str,
        quality_score: i64,
        entity_type: Option<EntityKind>,
    ) -> Result<DemandQueueItem, ConsumerError> {
        let score = validate_quality_score(quality_score)?;
        let held = self.held.as_ref().ok_or(ConsumerError::NotLoaded)?;
        let kind = entity_type.unwrap_or(held.entity_type);
        let completed = self
            .backend
            .complete_item(&held.id, entity_id, kind, score)
            .await?;
        info!(
            item = %completed.id,
            status = %completed.status,
            score,
            "completed queue item"
        );
        self.held = None;
        Ok(completed)
    }

    /// Completes, then claims the next item of the same type. The two steps
    /// are independent: if the claim fails the completion stays committed.
    pub async fn complete_and_load_next(
        &mut self,
        entity_id: &str,
        quality_score: i64,
        entity_type: Option<EntityKind>,
    ) -> Result<CompletionOutcome, ConsumerError> {
        let completed = self.complete(entity_id, quality_score, entity_type).await?;
        let next = self.load_next(completed.entity_type).await?;
        Ok(CompletionOutcome { completed, next })
    }

    pub async fn skip(&mut self, reason: &str) -> Result<DemandQueueItem, ConsumerError> {
        self.finish_held(QueueStatus::Skipped, skip_feedback(reason, Utc::now()))
            .await
    }

    pub async fn reject(&mut self, reason: &str) -> Result<DemandQueueItem, ConsumerError> {
        self.finish_held(QueueStatus::Rejected, rejection_feedback(reason, Utc::now()))
            .await
    }

    /// Hands the held item back to the queue as pending.
    pub async fn release(&mut self) -> Result<DemandQueueItem, ConsumerError> {
        let held = self.held.as_ref().ok_or(ConsumerError::NotLoaded)?;
        let released = self.backend.release_item(&held.id).await?;
        self.held = None;
        Ok(released)
    }

    /// Drops local state only. A held item stays in progress in the store
    /// until it is released or reclaimed as stale.
    pub fn exit_auto_mode(&mut self) -> Option<DemandQueueItem> {
        self.auto_mode = false;
        let abandoned = self.held.take();
        if let Some(item) = &abandoned {
            warn!(item = %item.id, "left auto mode while holding an in-progress item");
        }
        abandoned
    }

    async fn finish_held(
        &mut self,
        status: QueueStatus,
        feedback: Value,
    ) -> Result<DemandQueueItem, ConsumerError> {
        let held = self.held.as_ref().ok_or(ConsumerError::NotLoaded)?;
        let updated = self
            .backend
            .update_status(&held.id, status, Some(feedback))
            .await?;
        info!(item = %updated.id, status = %status, "closed queue item");
        self.held = None;
        Ok(updated)
    }
}
