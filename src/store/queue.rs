use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::plan::EntityKind;
use crate::cascade::KindCounts;
use crate::queue::{
    completion_status, DemandQueueItem, NewQueueItem, QueueConflict, QueueFilter, QueueStats,
    QueueStatus,
};
use crate::store::{parse_column, parse_json, parse_ts, ts, PlanStore};

const ITEM_COLUMNS: &str = r#"id, strategic_plan_id, entity_type, status, priority_score,
    prefilled_spec, generated_entity_id, generated_entity_type, quality_score,
    quality_feedback, attempts, last_attempt_at, created_at"#;

const MAX_CLAIM_ATTEMPTS: usize = 64;

impl PlanStore {
    /// Inserts all rows in one transaction, optionally clearing the plans'
    /// pending rows first. Returns the created items in insertion order.
    pub fn insert_items(
        &self,
        items: &[NewQueueItem],
        replace_pending: bool,
    ) -> Result<Vec<DemandQueueItem>> {
        let tx = self.conn.unchecked_transaction()?;
        if replace_pending {
            let mut plan_ids = items
                .iter()
                .map(|item| item.strategic_plan_id.as_str())
                .collect::<Vec<_>>();
            plan_ids.sort_unstable();
            plan_ids.dedup();
            for plan_id in plan_ids {
                tx.execute(
                    "DELETE FROM demand_queue WHERE strategic_plan_id = ?1 AND status = 'pending'",
                    params![plan_id],
                )?;
            }
        }

        let now = Utc::now();
        let mut created = Vec::with_capacity(items.len());
        {
            let mut stmt = tx.prepare(
                r#"
INSERT INTO demand_queue(
    id, strategic_plan_id, entity_type, status, priority_score, prefilled_spec, created_at
) VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6)
"#,
            )?;
            for item in items {
                let id = Uuid::new_v4().to_string();
                stmt.execute(params![
                    id,
                    item.strategic_plan_id,
                    item.entity_type.as_slug(),
                    item.priority_score,
                    serde_json::to_string(&item.prefilled_spec)?,
                    ts(now)
                ])?;
                created.push(DemandQueueItem {
                    id,
                    strategic_plan_id: item.strategic_plan_id.clone(),
                    entity_type: item.entity_type,
                    status: QueueStatus::Pending,
                    priority_score: item.priority_score,
                    prefilled_spec: item.prefilled_spec.clone(),
                    generated_entity_id: None,
                    generated_entity_type: None,
                    quality_score: None,
                    quality_feedback: None,
                    attempts: 0,
                    last_attempt_at: None,
                    created_at: now,
                });
            }
        }
        tx.commit()?;
        Ok(created)
    }

    /// Items for a plan, highest priority first, insertion order on ties.
    pub fn list_items(&self, plan_id: &str, filter: &QueueFilter) -> Result<Vec<DemandQueueItem>> {
        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM demand_queue WHERE strategic_plan_id = ?1");
        let mut args = vec![plan_id.to_string()];
        if let Some(status) = filter.status {
            args.push(status.as_slug().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(kind) = filter.entity_type {
            args.push(kind.as_slug().to_string());
            sql.push_str(&format!(" AND entity_type = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY priority_score DESC, seq ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(args.iter()), row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn get_item(&self, id: &str) -> Result<Option<DemandQueueItem>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM demand_queue WHERE id = ?1");
        let item = self
            .conn
            .query_row(&sql, params![id], row_to_item)
            .optional()?;
        Ok(item)
    }

    /// First pending item for the plan and type in priority order. Read only.
    pub fn next_pending(&self, plan_id: &str, kind: EntityKind) -> Result<Option<DemandQueueItem>> {
        let sql = format!(
            r#"SELECT {ITEM_COLUMNS} FROM demand_queue
WHERE strategic_plan_id = ?1 AND entity_type = ?2 AND status = 'pending'
ORDER BY priority_score DESC, seq ASC
LIMIT 1"#
        );
        let item = self
            .conn
            .query_row(&sql, params![plan_id, kind.as_slug()], row_to_item)
            .optional()?;
        Ok(item)
    }

    /// Claims the next pending item with a conditional update, so two
    /// consumers can never hold the same row. A lost race moves on to the
    /// next candidate.
    pub fn claim_next(&self, plan_id: &str, kind: EntityKind) -> Result<Option<DemandQueueItem>> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let Some(candidate) = self.next_pending(plan_id, kind)? else {
                return Ok(None);
            };
            let claimed = self.conn.execute(
                r#"
UPDATE demand_queue
SET status = 'in_progress', last_attempt_at = ?1
WHERE id = ?2 AND status = 'pending'
"#,
                params![ts(Utc::now()), candidate.id],
            )?;
            if claimed == 1 {
                return self.get_item(&candidate.id);
            }
            debug!(item = %candidate.id, "claim lost to another consumer, retrying");
        }
        Err(anyhow!(
            "could not claim a {kind} item for plan {plan_id} after {MAX_CLAIM_ATTEMPTS} attempts"
        ))
    }

    /// Sets the status; feedback is only overwritten when provided. Completed
    /// rows (accepted or review) are final and fail with [`QueueConflict`].
    pub fn update_status(
        &self,
        id: &str,
        status: QueueStatus,
        quality_feedback: Option<&Value>,
    ) -> Result<Option<DemandQueueItem>> {
        let feedback = quality_feedback.map(serde_json::to_string).transpose()?;
        let stamp = (status == QueueStatus::InProgress).then(|| ts(Utc::now()));
        let changed = self.conn.execute(
            r#"
UPDATE demand_queue
SET status = ?1,
    quality_feedback = COALESCE(?2, quality_feedback),
    last_attempt_at = COALESCE(?3, last_attempt_at)
WHERE id = ?4 AND status NOT IN ('accepted', 'review')
"#,
            params![status.as_slug(), feedback, stamp, id],
        )?;
        if changed == 0 {
            return self.refused(id, "change its status");
        }
        self.get_item(id)
    }

    /// Records the generated entity and routes the item by quality score.
    /// Only an in-progress claim can be completed.
    pub fn complete_item(
        &self,
        id: &str,
        generated_entity_id: &str,
        generated_entity_type: EntityKind,
        quality_score: u8,
        acceptance_threshold: u8,
    ) -> Result<Option<DemandQueueItem>> {
        let status = completion_status(quality_score, acceptance_threshold);
        let changed = self.conn.execute(
            r#"
UPDATE demand_queue
SET status = ?1,
    generated_entity_id = ?2,
    generated_entity_type = ?3,
    quality_score = ?4,
    attempts = attempts + 1
WHERE id = ?5 AND status = 'in_progress'
"#,
            params![
                status.as_slug(),
                generated_entity_id,
                generated_entity_type.as_slug(),
                i64::from(quality_score),
                id
            ],
        )?;
        if changed == 0 {
            return self.refused(id, "complete it");
        }
        self.get_item(id)
    }

    /// Returns an in-progress item to pending.
    pub fn release_item(&self, id: &str) -> Result<Option<DemandQueueItem>> {
        let changed = self.conn.execute(
            "UPDATE demand_queue SET status = 'pending' WHERE id = ?1 AND status = 'in_progress'",
            params![id],
        )?;
        if changed == 0 {
            return self.refused(id, "release it");
        }
        self.get_item(id)
    }

    /// `None` for a missing row, a [`QueueConflict`] for one in the wrong state.
    fn refused(&self, id: &str, action: &'static str) -> Result<Option<DemandQueueItem>> {
        match self.get_item(id)? {
            None => Ok(None),
            Some(item) => Err(QueueConflict {
                id: id.to_string(),
                status: item.status,
                action,
            }
            .into()),
        }
    }

    /// Open rows per kind: in-progress claims, plus pending rows unless they
    /// are about to be replaced.
    pub fn open_item_counts(&self, plan_id: &str, include_pending: bool) -> Result<KindCounts> {
        let mut stmt = self.conn.prepare(
            r#"
SELECT entity_type, COUNT(*)
FROM demand_queue
WHERE strategic_plan_id = ?1
  AND (status = 'in_progress' OR (?2 AND status = 'pending'))
GROUP BY entity_type
"#,
        )?;
        let rows = stmt.query_map(params![plan_id, include_pending], |row| {
            let raw: String = row.get(0)?;
            Ok((parse_column::<EntityKind>(0, &raw)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = KindCounts::new();
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count.max(0) as u64);
        }
        Ok(counts)
    }

    /// Returns claims whose last attempt is older than `older_than` to pending.
    pub fn reclaim_stale(&self, plan_id: &str, older_than: DateTime<Utc>) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
UPDATE demand_queue
SET status = 'pending'
WHERE strategic_plan_id = ?1
  AND status = 'in_progress'
  AND (last_attempt_at IS NULL OR last_attempt_at < ?2)
"#,
            params![plan_id, ts(older_than)],
        )?;
        Ok(changed)
    }

    pub fn delete_item(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM demand_queue WHERE id = ?1", params![id])?;
        Ok(changed == 1)
    }

    pub fn clear_pending(&self, plan_id: &str) -> Result<usize> {
        let changed = self.conn.execute(
            "DELETE FROM demand_queue WHERE strategic_plan_id = ?1 AND status = 'pending'",
            params![plan_id],
        )?;
        Ok(changed)
    }

    pub fn queue_stats(&self, plan_id: &str) -> Result<QueueStats> {
        let mut stats = QueueStats {
            strategic_plan_id: plan_id.to_string(),
            ..QueueStats::default()
        };

        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM demand_queue WHERE strategic_plan_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![plan_id], |row| {
            let raw: String = row.get(0)?;
            Ok((parse_column::<QueueStatus>(0, &raw)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let count = count.max(0) as u64;
            stats.total += count;
            stats.by_status.insert(status, count);
        }

        let mut stmt = self.conn.prepare(
            "SELECT entity_type, COUNT(*) FROM demand_queue WHERE strategic_plan_id = ?1 GROUP BY entity_type",
        )?;
        let rows = stmt.query_map(params![plan_id], |row| {
            let raw: String = row.get(0)?;
            Ok((parse_column::<EntityKind>(0, &raw)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            stats.by_entity_type.insert(kind, count.max(0) as u64);
        }

        stats.mean_quality_score = self.conn.query_row(
            r#"
SELECT AVG(quality_score)
FROM demand_queue
WHERE strategic_plan_id = ?1 AND quality_score IS NOT NULL
"#,
            params![plan_id],
            |row| row.get::<_, Option<f64>>(0),
        )?;
        Ok(stats)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<DemandQueueItem> {
    let entity_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let spec_raw: String = row.get(5)?;
    let generated_type_raw: Option<String> = row.get(7)?;
    let quality_score: Option<i64> = row.get(8)?;
    let feedback_raw: Option<String> = row.get(9)?;
    let last_attempt_raw: Option<String> = row.get(11)?;
    let created_raw: String = row.get(12)?;
    Ok(DemandQueueItem {
        id: row.get(0)?,
        strategic_plan_id: row.get(1)?,
        entity_type: parse_column(2, &entity_raw)?,
        status: parse_column(3, &status_raw)?,
        priority_score: row.get(4)?,
        prefilled_spec: parse_json(5, &spec_raw)?,
        generated_entity_id: row.get(6)?,
        generated_entity_type: generated_type_raw
            .as_deref()
            .map(|raw| parse_column(7, raw))
            .transpose()?,
        quality_score: quality_score.map(|score| score.clamp(0, 100) as u8),
        quality_feedback: feedback_raw
            .as_deref()
            .map(|raw| parse_json(9, raw))
            .transpose()?,
        attempts: row.get::<_, i64>(10)?.max(0) as u32,
        last_attempt_at: last_attempt_raw
            .as_deref()
            .map(|raw| parse_ts(11, raw))
            .transpose()?,
        created_at: parse_ts(12, &created_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::plan::{CascadeConfig, NewPlan};
    use crate::queue::{rejection_feedback, skip_feedback, DEFAULT_ACCEPTANCE_THRESHOLD};

    fn seeded_store() -> (PlanStore, String) {
        let store = PlanStore::open_in_memory().expect("store");
        let plan_id = seed_plan(&store);
        (store, plan_id)
    }

    fn seed_plan(store: &PlanStore) -> String {
        let plan = NewPlan {
            title: "Queue plan".to_string(),
            objectives: Vec::new(),
            cascade: None,
            start_year: 2025,
            end_year: 2026,
        }
        .into_plan(CascadeConfig::default())
        .expect("plan");
        store.insert_plan(&plan).expect("insert plan");
        plan.id
    }

    fn new_item(plan_id: &str, kind: EntityKind, score: f64) -> NewQueueItem {
        NewQueueItem {
            strategic_plan_id: plan_id.to_string(),
            entity_type: kind,
            priority_score: score,
            prefilled_spec: json!({ "title_hint": format!("{kind} {score}") }),
        }
    }

    #[test]
    fn lists_by_priority_then_insertion() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 1.0),
                    new_item(&plan_id, EntityKind::Challenge, 5.0),
                    new_item(&plan_id, EntityKind::Campaign, 1.0),
                ],
                false,
            )
            .expect("insert");

        let items = store
            .list_items(&plan_id, &QueueFilter::default())
            .expect("list");
        let kinds: Vec<EntityKind> = items.iter().map(|i| i.entity_type).collect();
        assert_eq!(
            kinds,
            vec![EntityKind::Challenge, EntityKind::Event, EntityKind::Campaign]
        );
        assert!(store
            .list_items("unknown-plan", &QueueFilter::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn claim_marks_in_progress_and_stamps_attempt() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Challenge, 2.0),
                    new_item(&plan_id, EntityKind::Challenge, 9.0),
                ],
                false,
            )
            .expect("insert");

        let claimed = store
            .claim_next(&plan_id, EntityKind::Challenge)
            .expect("claim")
            .expect("item");
        assert_eq!(claimed.status, QueueStatus::InProgress);
        assert_eq!(claimed.priority_score, 9.0);
        assert!(claimed.last_attempt_at.is_some());

        let second = store
            .claim_next(&plan_id, EntityKind::Challenge)
            .expect("claim")
            .expect("item");
        assert_ne!(second.id, claimed.id);
        assert!(store
            .claim_next(&plan_id, EntityKind::Challenge)
            .expect("claim")
            .is_none());
    }

    #[test]
    fn empty_claim_does_not_touch_rows() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(&[new_item(&plan_id, EntityKind::Event, 1.0)], false)
            .expect("insert");
        let before = store.list_items(&plan_id, &QueueFilter::default()).expect("list");
        assert!(store
            .claim_next(&plan_id, EntityKind::Pilot)
            .expect("claim")
            .is_none());
        let after = store.list_items(&plan_id, &QueueFilter::default()).expect("list");
        assert_eq!(before, after);
    }

    #[test]
    fn completion_routes_by_threshold_and_counts_attempts() {
        let (store, plan_id) = seeded_store();
        let created = store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Pilot, 2.0),
                    new_item(&plan_id, EntityKind::Pilot, 1.0),
                ],
                false,
            )
            .expect("insert");
        for _ in 0..2 {
            store
                .claim_next(&plan_id, EntityKind::Pilot)
                .expect("claim")
                .expect("item");
        }

        let accepted = store
            .complete_item(&created[0].id, "pilot-1", EntityKind::Pilot, 70, DEFAULT_ACCEPTANCE_THRESHOLD)
            .expect("complete")
            .expect("item");
        assert_eq!(accepted.status, QueueStatus::Accepted);
        assert_eq!(accepted.attempts, 1);
        assert_eq!(accepted.generated_entity_id.as_deref(), Some("pilot-1"));

        let review = store
            .complete_item(&created[1].id, "pilot-2", EntityKind::Pilot, 69, DEFAULT_ACCEPTANCE_THRESHOLD)
            .expect("complete")
            .expect("item");
        assert_eq!(review.status, QueueStatus::Review);
        assert_eq!(review.quality_score, Some(69));

        assert!(store
            .complete_item("missing", "x", EntityKind::Pilot, 90, DEFAULT_ACCEPTANCE_THRESHOLD)
            .expect("complete")
            .is_none());
    }

    #[test]
    fn skipped_and_rejected_rows_stay_queryable() {
        let (store, plan_id) = seeded_store();
        let created = store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 2.0),
                    new_item(&plan_id, EntityKind::Event, 1.0),
                ],
                false,
            )
            .expect("insert");
        let now = Utc::now();
        store
            .update_status(&created[0].id, QueueStatus::Skipped, Some(&skip_feedback("dup", now)))
            .expect("skip");
        store
            .update_status(
                &created[1].id,
                QueueStatus::Rejected,
                Some(&rejection_feedback("off-plan", now)),
            )
            .expect("reject");

        let skipped = store.get_item(&created[0].id).expect("get").expect("row");
        assert_eq!(skipped.status, QueueStatus::Skipped);
        assert_eq!(
            skipped.quality_feedback.as_ref().map(|f| f["skip_reason"].clone()),
            Some(json!("dup"))
        );
        let rejected = store.get_item(&created[1].id).expect("get").expect("row");
        assert_eq!(rejected.status, QueueStatus::Rejected);
        assert!(rejected.quality_feedback.is_some());
    }

    #[test]
    fn clear_pending_keeps_other_statuses() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 3.0),
                    new_item(&plan_id, EntityKind::Event, 2.0),
                    new_item(&plan_id, EntityKind::Event, 1.0),
                ],
                false,
            )
            .expect("insert");
        store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");
        assert_eq!(store.clear_pending(&plan_id).expect("clear"), 2);
        let remaining = store.list_items(&plan_id, &QueueFilter::default()).expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].status, QueueStatus::InProgress);
    }

    #[test]
    fn replace_pending_swaps_backlog_atomically() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(&[new_item(&plan_id, EntityKind::Event, 1.0)], false)
            .expect("insert");
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Challenge, 2.0),
                    new_item(&plan_id, EntityKind::Challenge, 1.0),
                ],
                true,
            )
            .expect("replace");
        let items = store.list_items(&plan_id, &QueueFilter::default()).expect("list");
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.entity_type == EntityKind::Challenge));
    }

    #[test]
    fn insert_for_unknown_plan_rolls_back() {
        let (store, plan_id) = seeded_store();
        let result = store.insert_items(
            &[
                new_item(&plan_id, EntityKind::Event, 1.0),
                new_item("ghost-plan", EntityKind::Event, 1.0),
            ],
            false,
        );
        assert!(result.is_err());
        assert!(store
            .list_items(&plan_id, &QueueFilter::default())
            .expect("list")
            .is_empty());
    }

    #[test]
    fn reclaims_stale_claims_and_releases() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 2.0),
                    new_item(&plan_id, EntityKind::Event, 1.0),
                ],
                false,
            )
            .expect("insert");
        let first = store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");
        assert_eq!(
            store
                .reclaim_stale(&plan_id, Utc::now() - Duration::minutes(30))
                .expect("reclaim"),
            0
        );
        assert_eq!(
            store
                .reclaim_stale(&plan_id, Utc::now() + Duration::seconds(1))
                .expect("reclaim"),
            1
        );

        let again = store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");
        assert_eq!(again.id, first.id);
        let released = store.release_item(&again.id).expect("release").expect("row");
        assert_eq!(released.status, QueueStatus::Pending);
    }

    fn conflict(err: anyhow::Error) -> QueueConflict {
        err.downcast::<QueueConflict>().expect("queue conflict")
    }

    #[test]
    fn late_completion_after_reclaim_is_refused() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(&[new_item(&plan_id, EntityKind::Event, 1.0)], false)
            .expect("insert");
        let first = store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");
        store
            .reclaim_stale(&plan_id, Utc::now() + Duration::seconds(1))
            .expect("reclaim");
        let second = store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");
        assert_eq!(second.id, first.id);
        store
            .complete_item(&second.id, "entity-b", EntityKind::Event, 90, DEFAULT_ACCEPTANCE_THRESHOLD)
            .expect("complete")
            .expect("item");

        let err = store
            .complete_item(&first.id, "entity-a", EntityKind::Event, 40, DEFAULT_ACCEPTANCE_THRESHOLD)
            .unwrap_err();
        assert_eq!(conflict(err).status, QueueStatus::Accepted);
        let row = store.get_item(&first.id).expect("get").expect("row");
        assert_eq!(row.status, QueueStatus::Accepted);
        assert_eq!(row.generated_entity_id.as_deref(), Some("entity-b"));
        assert_eq!(row.attempts, 1);

        let err = store
            .update_status(&first.id, QueueStatus::Pending, None)
            .unwrap_err();
        assert_eq!(conflict(err).status, QueueStatus::Accepted);
    }

    #[test]
    fn only_claimed_items_complete_or_release() {
        let (store, plan_id) = seeded_store();
        let created = store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Campaign, 2.0),
                    new_item(&plan_id, EntityKind::Campaign, 1.0),
                ],
                false,
            )
            .expect("insert");
        store
            .update_status(&created[0].id, QueueStatus::Skipped, Some(&skip_feedback("dup", Utc::now())))
            .expect("skip");
        let err = store
            .complete_item(&created[0].id, "c1", EntityKind::Campaign, 95, DEFAULT_ACCEPTANCE_THRESHOLD)
            .unwrap_err();
        assert_eq!(conflict(err).status, QueueStatus::Skipped);

        let err = store.release_item(&created[1].id).unwrap_err();
        assert_eq!(conflict(err).status, QueueStatus::Pending);
        assert!(store.release_item("missing").expect("release").is_none());
        assert!(store
            .update_status("missing", QueueStatus::Skipped, None)
            .expect("update")
            .is_none());
    }

    #[test]
    fn open_counts_cover_claims_and_optionally_pending() {
        let (store, plan_id) = seeded_store();
        store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 2.0),
                    new_item(&plan_id, EntityKind::Event, 1.0),
                    new_item(&plan_id, EntityKind::Pilot, 1.0),
                ],
                false,
            )
            .expect("insert");
        store
            .claim_next(&plan_id, EntityKind::Event)
            .expect("claim")
            .expect("item");

        let all = store.open_item_counts(&plan_id, true).expect("counts");
        assert_eq!(all.get(&EntityKind::Event), Some(&2));
        assert_eq!(all.get(&EntityKind::Pilot), Some(&1));
        let claims = store.open_item_counts(&plan_id, false).expect("counts");
        assert_eq!(claims.get(&EntityKind::Event), Some(&1));
        assert_eq!(claims.get(&EntityKind::Pilot), None);
    }

    #[test]
    fn stats_group_by_status_and_type() {
        let (store, plan_id) = seeded_store();
        let created = store
            .insert_items(
                &[
                    new_item(&plan_id, EntityKind::Event, 2.0),
                    new_item(&plan_id, EntityKind::Challenge, 1.0),
                    new_item(&plan_id, EntityKind::Challenge, 0.5),
                ],
                false,
            )
            .expect("insert");
        for _ in 0..2 {
            store
                .claim_next(&plan_id, EntityKind::Challenge)
                .expect("claim")
                .expect("item");
        }
        store
            .complete_item(&created[1].id, "c1", EntityKind::Challenge, 80, 70)
            .expect("complete");
        store
            .complete_item(&created[2].id, "c2", EntityKind::Challenge, 60, 70)
            .expect("complete");

        let stats = store.queue_stats(&plan_id).expect("stats");
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get(&QueueStatus::Pending), Some(&1));
        assert_eq!(stats.by_status.get(&QueueStatus::Accepted), Some(&1));
        assert_eq!(stats.by_status.get(&QueueStatus::Review), Some(&1));
        assert_eq!(stats.by_entity_type.get(&EntityKind::Challenge), Some(&2));
        assert_eq!(stats.mean_quality_score, Some(70.0));
    }

    #[test]
    fn concurrent_consumers_never_share_an_item() {
        let path = std::env::temp_dir().join(format!("cascade-claim-{}.db", Uuid::new_v4()));
        let plan_id = {
            let store = PlanStore::open(&path).expect("store");
            let plan_id = seed_plan(&store);
            let items: Vec<NewQueueItem> = (0..40)
                .map(|i| new_item(&plan_id, EntityKind::Challenge, f64::from(i)))
                .collect();
            store.insert_items(&items, false).expect("insert");
            plan_id
        };

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let plan_id = plan_id.clone();
                thread::spawn(move || {
                    let store = PlanStore::open(&path).expect("store");
                    let mut claimed = Vec::new();
                    while let Some(item) = store
                        .claim_next(&plan_id, EntityKind::Challenge)
                        .expect("claim")
                    {
                        claimed.push(item.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.join().expect("worker panicked"));
        }
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 40);
        assert_eq!(unique.len(), 40);
        let _ = std::fs::remove_file(&path);
    }
}
