pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS strategic_plans (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    objectives_json TEXT NOT NULL,
    cascade_json TEXT NOT NULL,
    start_year INTEGER NOT NULL,
    end_year INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    plan_id TEXT NOT NULL REFERENCES strategic_plans(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    payload_json TEXT NOT NULL DEFAULT 'null',
    created_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_entities_plan_kind
    ON entities(plan_id, kind) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS demand_queue (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    strategic_plan_id TEXT NOT NULL REFERENCES strategic_plans(id) ON DELETE CASCADE,
    entity_type TEXT NOT NULL CHECK (
        entity_type IN ('challenge', 'pilot', 'campaign', 'event', 'solution', 'program')
    ),
    status TEXT NOT NULL DEFAULT 'pending' CHECK (
        status IN ('pending', 'in_progress', 'accepted', 'review', 'rejected', 'skipped')
    ),
    priority_score REAL NOT NULL DEFAULT 0,
    prefilled_spec TEXT NOT NULL DEFAULT 'null',
    generated_entity_id TEXT,
    generated_entity_type TEXT,
    quality_score INTEGER CHECK (quality_score IS NULL OR quality_score BETWEEN 0 AND 100),
    quality_feedback TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_plan_type_status
    ON demand_queue(strategic_plan_id, entity_type, status, priority_score DESC);
"#;
