pub mod backend;
pub mod consumer;
pub mod drain;
pub mod materialize;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::plan::EntityKind;

pub const DEFAULT_ACCEPTANCE_THRESHOLD: u8 = 70;
pub const MAX_QUALITY_SCORE: u8 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    InProgress,
    Accepted,
    Review,
    Rejected,
    Skipped,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 6] = [
        QueueStatus::Pending,
        QueueStatus::InProgress,
        QueueStatus::Accepted,
        QueueStatus::Review,
        QueueStatus::Rejected,
        QueueStatus::Skipped,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Accepted => "accepted",
            Self::Review => "review",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    /// Completed means a generated entity was recorded against the item.
    pub fn is_completed(self) -> bool {
        matches!(self, Self::Accepted | Self::Review)
    }
}

impl Display for QueueStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown queue status: {0}")]
pub struct QueueStatusParseError(pub String);

impl FromStr for QueueStatus {
    type Err = QueueStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" | "inprogress" => Ok(Self::InProgress),
            "accepted" => Ok(Self::Accepted),
            "review" => Ok(Self::Review),
            "rejected" => Ok(Self::Rejected),
            "skipped" => Ok(Self::Skipped),
            _ => Err(QueueStatusParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemandQueueItem {
    pub id: String,
    pub strategic_plan_id: String,
    pub entity_type: EntityKind,
    pub status: QueueStatus,
    pub priority_score: f64,
    #[serde(default)]
    pub prefilled_spec: Value,
    pub generated_entity_id: Option<String>,
    pub generated_entity_type: Option<EntityKind>,
    pub quality_score: Option<u8>,
    pub quality_feedback: Option<Value>,
    #[serde(default)]
    pub attempts: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Row to insert; id, status and timestamps are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewQueueItem {
    pub strategic_plan_id: String,
    pub entity_type: EntityKind,
    #[serde(default)]
    pub priority_score: f64,
    #[serde(default)]
    pub prefilled_spec: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub entity_type: Option<EntityKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub strategic_plan_id: String,
    pub total: u64,
    pub by_status: BTreeMap<QueueStatus, u64>,
    pub by_entity_type: BTreeMap<EntityKind, u64>,
    pub mean_quality_score: Option<f64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("quality score {0} is outside 0..=100")]
pub struct InvalidQualityScore(pub i64);

pub fn validate_quality_score(raw: i64) -> Result<u8, InvalidQualityScore> {
    u8::try_from(raw)
        .ok()
        .filter(|score| *score <= MAX_QUALITY_SCORE)
        .ok_or(InvalidQualityScore(raw))
}

/// A transition refused because the row is no longer in a state that allows it.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("queue item {id} is {status}, cannot {action}")]
pub struct QueueConflict {
    pub id: String,
    pub status: QueueStatus,
    pub action: &'static str,
}

/// Accepted at or above the threshold, otherwise routed to review.
pub fn completion_status(quality_score: u8, threshold: u8) -> QueueStatus {
    if quality_score >= threshold {
        QueueStatus::Accepted
    } else {
        QueueStatus::Review
    }
}

pub fn skip_feedback(reason: &str, at: DateTime<Utc>) -> Value {
    json!({ "skip_reason": reason, "timestamp": at.to_rfc3339() })
}

pub fn rejection_feedback(reason: &str, at: DateTime<Utc>) -> Value {
    json!({ "rejection_reason": reason, "timestamp": at.to_rfc3339() })
}
