use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::cascade::KindCounts;
use crate::plan::{CascadeConfig, EntityKind, PortfolioEntity, StrategicPlan};
use crate::store::{parse_column, parse_json, parse_ts, ts, PlanStore};

const PLAN_COLUMNS: &str =
    "id, title, objectives_json, cascade_json, start_year, end_year, created_at, updated_at";

impl PlanStore {
    pub fn insert_plan(&self, plan: &StrategicPlan) -> Result<()> {
        self.conn.execute(
            r#"
INSERT INTO strategic_plans(
    id, title, objectives_json, cascade_json, start_year, end_year, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
            params![
                plan.id,
                plan.title,
                serde_json::to_string(&plan.objectives)?,
                serde_json::to_string(&plan.cascade)?,
                plan.start_year,
                plan.end_year,
                ts(plan.created_at),
                ts(plan.updated_at)
            ],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> Result<Option<StrategicPlan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM strategic_plans WHERE id = ?1");
        let plan = self
            .conn
            .query_row(&sql, params![id], row_to_plan)
            .optional()?;
        Ok(plan)
    }

    pub fn list_plans(&self) -> Result<Vec<StrategicPlan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM strategic_plans ORDER BY created_at DESC");
        let mut stmt = self.conn.prepare(&sql)?;
        let plans = stmt
            .query_map([], row_to_plan)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(plans)
    }

    pub fn update_cascade(&self, id: &str, cascade: &CascadeConfig) -> Result<Option<StrategicPlan>> {
        let changed = self.conn.execute(
            "UPDATE strategic_plans SET cascade_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![serde_json::to_string(cascade)?, ts(Utc::now()), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        self.get_plan(id)
    }

    pub fn insert_entity(
        &self,
        plan_id: &str,
        kind: EntityKind,
        title: &str,
        payload: serde_json::Value,
    ) -> Result<PortfolioEntity> {
        let entity = PortfolioEntity {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.to_string(),
            kind,
            title: title.to_string(),
            payload,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.conn.execute(
            r#"
INSERT INTO entities(id, plan_id, kind, title, payload_json, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                entity.id,
                entity.plan_id,
                entity.kind.as_slug(),
                entity.title,
                serde_json::to_string(&entity.payload)?,
                ts(entity.created_at)
            ],
        )?;
        Ok(entity)
    }

    /// Soft delete; returns false when the entity is missing or already deleted.
    pub fn soft_delete_entity(&self, id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE entities SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![ts(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Live entity counts for a plan, zero-filled for every kind.
    pub fn count_entities(&self, plan_id: &str) -> Result<KindCounts> {
        let mut counts: KindCounts = EntityKind::ALL.iter().map(|kind| (*kind, 0)).collect();
        let mut stmt = self.conn.prepare(
            r#"
SELECT kind, COUNT(*)
FROM entities
WHERE plan_id = ?1 AND deleted_at IS NULL
GROUP BY kind
"#,
        )?;
        let rows = stmt.query_map(params![plan_id], |row| {
            let kind: String = row.get(0)?;
            Ok((parse_column::<EntityKind>(0, &kind)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, count) = row?;
            counts.insert(kind, count.max(0) as u64);
        }
        Ok(counts)
    }
}

fn row_to_plan(row: &rusqlite::Row<'_>) -> rusqlite::Result<StrategicPlan> {
    let objectives_raw: String = row.get(2)?;
    let cascade_raw: String = row.get(3)?;
    let created_raw: String = row.get(6)?;
    let updated_raw: String = row.get(7)?;
    Ok(StrategicPlan {
        id: row.get(0)?,
        title: row.get(1)?,
        objectives: parse_json(2, &objectives_raw)?,
        cascade: parse_json(3, &cascade_raw)?,
        start_year: row.get(4)?,
        end_year: row.get(5)?,
        created_at: parse_ts(6, &created_raw)?,
        updated_at: parse_ts(7, &updated_raw)?,
    })
}
