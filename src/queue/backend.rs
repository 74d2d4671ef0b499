use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::plan::{EntityKind, PortfolioEntity};
use crate::queue::{DemandQueueItem, QueueFilter, QueueStats, QueueStatus};
use crate::store::PlanStore;

/// Demand-queue operations the consumer and the CLI need. Implemented over
/// the local database and over a running server.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn list_items(&self, plan_id: &str, filter: &QueueFilter) -> Result<Vec<DemandQueueItem>>;
    async fn claim_next(&self, plan_id: &str, kind: EntityKind) -> Result<Option<DemandQueueItem>>;
    async fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        quality_feedback: Option<Value>,
    ) -> Result<DemandQueueItem>;
    async fn complete_item(
        &self,
        id: &str,
        generated_entity_id: &str,
        generated_entity_type: EntityKind,
        quality_score: u8,
    ) -> Result<DemandQueueItem>;
    async fn release_item(&self, id: &str) -> Result<DemandQueueItem>;
    async fn delete_item(&self, id: &str) -> Result<()>;
    async fn clear_pending(&self, plan_id: &str) -> Result<usize>;
    async fn reclaim_stale(&self, plan_id: &str, older_than_minutes: u64) -> Result<usize>;
    async fn queue_stats(&self, plan_id: &str) -> Result<QueueStats>;
    async fn create_entity(
        &self,
        plan_id: &str,
        kind: EntityKind,
        title: &str,
        payload: Value,
    ) -> Result<PortfolioEntity>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DeletedCount {
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReclaimedCount {
    pub reclaimed: usize,
}

pub struct LocalQueue {
    store: Mutex<PlanStore>,
    acceptance_threshold: u8,
}

impl LocalQueue {
    pub fn new(store: PlanStore, acceptance_threshold: u8) -> Self {
        Self {
            store: Mutex::new(store),
            acceptance_threshold,
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, PlanStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow!("plan store mutex poisoned"))
    }
}

fn missing(id: &str) -> anyhow::Error {
    anyhow!("queue item {id} not found")
}

#[async_trait]
impl QueueBackend for LocalQueue {
    async fn list_items(&self, plan_id: &str, filter: &QueueFilter) -> Result<Vec<DemandQueueItem>> {
        self.store()?.list_items(plan_id, filter)
    }

    async fn claim_next(&self, plan_id: &str, kind: EntityKind) -> Result<Option<DemandQueueItem>> {
        self.store()?.claim_next(plan_id, kind)
    }

    async fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        quality_feedback: Option<Value>,
    ) -> Result<DemandQueueItem> {
        self.store()?
            .update_status(id, status, quality_feedback.as_ref())?
            .ok_or_else(|| missing(id))
    }

    async fn complete_item(
        &self,
        id: &str,
        generated_entity_id: &str,
        generated_entity_type: EntityKind,
        quality_score: u8,
    ) -> Result<DemandQueueItem> {
        self.store()?
            .complete_item(
                id,
                generated_entity_id,
                generated_entity_type,
                quality_score,
                self.acceptance_threshold,
            )?
            .ok_or_else(|| missing(id))
    }

    async fn release_item(&self, id: &str) -> Result<DemandQueueItem> {
        self.store()?.release_item(id)?.ok_or_else(|| missing(id))
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        if self.store()?.delete_item(id)? {
            Ok(())
        } else {
            Err(missing(id))
        }
    }

    async fn clear_pending(&self, plan_id: &str) -> Result<usize> {
        self.store()?.clear_pending(plan_id)
    }

    async fn reclaim_stale(&self, plan_id: &str, older_than_minutes: u64) -> Result<usize> {
        let minutes = i64::try_from(older_than_minutes).unwrap_or(i64::MAX / 60_000);
        let cutoff = Utc::now() - chrono::Duration::minutes(minutes);
        self.store()?.reclaim_stale(plan_id, cutoff)
    }

    async fn queue_stats(&self, plan_id: &str) -> Result<QueueStats> {
        self.store()?.queue_stats(plan_id)
    }

    async fn create_entity(
        &self,
        plan_id: &str,
        kind: EntityKind,
        title: &str,
        payload: Value,
    ) -> Result<PortfolioEntity> {
        self.store()?.insert_entity(plan_id, kind, title, payload)
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client for the demand-queue endpoints of a running server.
pub struct RemoteQueue {
    client: Client,
    base_url: String,
}

impl RemoteQueue {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cascade-planner/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build queue HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Unwraps the `{ok, data}` envelope; `data: null` comes back as `None`.
    async fn send_envelope<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed request: {what}"))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed reading response body: {what}"))?;
        let envelope: Envelope<T> = serde_json::from_str(&body).with_context(|| {
            let preview: String = body.chars().take(180).collect();
            format!("{what} returned {status} with unexpected body: {preview}")
        })?;
        if !envelope.ok || !status.is_success() {
            let error = envelope.error.unwrap_or_else(|| status.to_string());
            return Err(anyhow!("{what} failed ({status}): {error}"));
        }
        Ok(envelope.data)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        self.send_envelope(request, what)
            .await?
            .ok_or_else(|| anyhow!("{what} returned no data"))
    }
}

#[async_trait]
impl QueueBackend for RemoteQueue {
    async fn list_items(&self, plan_id: &str, filter: &QueueFilter) -> Result<Vec<DemandQueueItem>> {
        let mut query = vec![("plan_id", plan_id.to_string())];
        if let Some(status) = filter.status {
            query.push(("status", status.as_slug().to_string()));
        }
        if let Some(kind) = filter.entity_type {
            query.push(("entity_type", kind.as_slug().to_string()));
        }
        let request = self.client.get(self.url("/demand_queue")).query(&query);
        self.send(request, "GET /demand_queue").await
    }

    async fn claim_next(&self, plan_id: &str, kind: EntityKind) -> Result<Option<DemandQueueItem>> {
        let request = self
            .client
            .post(self.url("/demand_queue/claim"))
            .json(&json!({ "plan_id": plan_id, "entity_type": kind }));
        self.send_envelope(request, "POST /demand_queue/claim").await
    }

    async fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        quality_feedback: Option<Value>,
    ) -> Result<DemandQueueItem> {
        let request = self
            .client
            .patch(self.url(&format!("/demand_queue/{id}")))
            .json(&json!({ "status": status, "quality_feedback": quality_feedback }));
        self.send(request, "PATCH /demand_queue/:id").await
    }

    async fn complete_item(
        &self,
        id: &str,
        generated_entity_id: &str,
        generated_entity_type: EntityKind,
        quality_score: u8,
    ) -> Result<DemandQueueItem> {
        let request = self
            .client
            .patch(self.url(&format!("/demand_queue/{id}")))
            .json(&json!({
                "generated_entity_id": generated_entity_id,
                "generated_entity_type": generated_entity_type,
                "quality_score": quality_score,
            }));
        self.send(request, "PATCH /demand_queue/:id").await
    }

    async fn release_item(&self, id: &str) -> Result<DemandQueueItem> {
        let request = self
            .client
            .post(self.url(&format!("/demand_queue/{id}/release")));
        self.send(request, "POST /demand_queue/:id/release").await
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/demand_queue/{id}")));
        let _: DeletedCount = self.send(request, "DELETE /demand_queue/:id").await?;
        Ok(())
    }

    async fn clear_pending(&self, plan_id: &str) -> Result<usize> {
        let request = self
            .client
            .delete(self.url("/demand_queue"))
            .query(&[("plan_id", plan_id), ("status", "pending")]);
        let count: DeletedCount = self.send(request, "DELETE /demand_queue").await?;
        Ok(count.deleted)
    }

    async fn reclaim_stale(&self, plan_id: &str, older_than_minutes: u64) -> Result<usize> {
        let request = self
            .client
            .post(self.url("/demand_queue/reclaim"))
            .json(&json!({ "plan_id": plan_id, "older_than_minutes": older_than_minutes }));
        let count: ReclaimedCount = self.send(request, "POST /demand_queue/reclaim").await?;
        Ok(count.reclaimed)
    }

    async fn queue_stats(&self, plan_id: &str) -> Result<QueueStats> {
        let request = self
            .client
            .get(self.url("/demand_queue/stats"))
            .query(&[("plan_id", plan_id)]);
        self.send(request, "GET /demand_queue/stats").await
    }

    async fn create_entity(
        &self,
        plan_id: &str,
        kind: EntityKind,
        title: &str,
        payload: Value,
    ) -> Result<PortfolioEntity> {
        let request = self.client.post(self.url("/entities")).json(&json!({
            "plan_id": plan_id,
            "kind": kind,
            "title": title,
            "payload": payload,
        }));
        self.send(request, "POST /entities").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_null_data_as_absent() {
        let parsed: Envelope<DemandQueueItem> =
            serde_json::from_str(r#"{"ok": true, "data": null}"#).expect("parse");
        assert!(parsed.ok);
        assert!(parsed.data.is_none());

        let failed: Envelope<DeletedCount> =
            serde_json::from_str(r#"{"ok": false, "error": "queue item x not found"}"#)
                .expect("parse");
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("queue item x not found"));
    }

    #[test]
    fn remote_urls_drop_trailing_slash() {
        let remote = RemoteQueue::new("http://127.0.0.1:3001/", Duration::from_secs(5))
            .expect("client");
        assert_eq!(
            remote.url("/demand_queue/claim"),
            "http://127.0.0.1:3001/demand_queue/claim"
        );
    }
}
