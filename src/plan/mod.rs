use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Kinds of portfolio entities a strategic plan cascades into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Challenge,
    Pilot,
    Campaign,
    Event,
    Solution,
    Program,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Challenge,
        EntityKind::Pilot,
        EntityKind::Campaign,
        EntityKind::Event,
        EntityKind::Solution,
        EntityKind::Program,
    ];

    /// Kinds with a cascade ratio, in canonical report order.
    pub const CASCADE: [EntityKind; 4] = [
        EntityKind::Challenge,
        EntityKind::Pilot,
        EntityKind::Campaign,
        EntityKind::Event,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Challenge => "challenge",
            Self::Pilot => "pilot",
            Self::Campaign => "campaign",
            Self::Event => "event",
            Self::Solution => "solution",
            Self::Program => "program",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Challenge => "Challenge",
            Self::Pilot => "Pilot",
            Self::Campaign => "Campaign",
            Self::Event => "Event",
            Self::Solution => "Solution",
            Self::Program => "Program",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown entity kind: {0}")]
pub struct EntityKindParseError(pub String);

impl FromStr for EntityKind {
    type Err = EntityKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "challenge" | "challenges" => Ok(Self::Challenge),
            "pilot" | "pilots" => Ok(Self::Pilot),
            "campaign" | "campaigns" => Ok(Self::Campaign),
            "event" | "events" => Ok(Self::Event),
            "solution" | "solutions" => Ok(Self::Solution),
            "program" | "programs" => Ok(Self::Program),
            _ => Err(EntityKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Objective {
    pub id: String,
    pub title: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Objective {
    pub fn new(title: impl Into<String>, weight: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CascadeConfig {
    #[serde(default = "default_challenges_per_objective")]
    pub challenges_per_objective: u32,
    #[serde(default = "default_pilots_per_challenge")]
    pub pilots_per_challenge: u32,
    #[serde(default = "default_campaigns_per_objective")]
    pub campaigns_per_objective: u32,
    #[serde(default = "default_events_per_objective")]
    pub events_per_objective: u32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            challenges_per_objective: default_challenges_per_objective(),
            pilots_per_challenge: default_pilots_per_challenge(),
            campaigns_per_objective: default_campaigns_per_objective(),
            events_per_objective: default_events_per_objective(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategicPlan {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub objectives: Vec<Objective>,
    #[serde(default)]
    pub cascade: CascadeConfig,
    pub start_year: i32,
    pub end_year: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author-supplied fields for a new plan. Objective ids are assigned when missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlan {
    pub title: String,
    #[serde(default)]
    pub objectives: Vec<NewObjective>,
    pub cascade: Option<CascadeConfig>,
    pub start_year: i32,
    pub end_year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewObjective {
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum PlanValidationError {
    #[error("plan title cannot be empty")]
    EmptyTitle,
    #[error("objective title cannot be empty")]
    EmptyObjectiveTitle,
    #[error("objective '{title}' has invalid weight {weight}")]
    InvalidWeight { title: String, weight: f64 },
    #[error("start year {start} is after end year {end}")]
    InvertedYears { start: i32, end: i32 },
}

impl NewPlan {
    pub fn into_plan(self, default_cascade: CascadeConfig) -> Result<StrategicPlan, PlanValidationError> {
        if self.title.trim().is_empty() {
            return Err(PlanValidationError::EmptyTitle);
        }
        if self.start_year > self.end_year {
            return Err(PlanValidationError::InvertedYears {
                start: self.start_year,
                end: self.end_year,
            });
        }
        let mut objectives = Vec::with_capacity(self.objectives.len());
        for objective in self.objectives {
            if objective.title.trim().is_empty() {
                return Err(PlanValidationError::EmptyObjectiveTitle);
            }
            if !objective.weight.is_finite() || objective.weight < 0.0 {
                return Err(PlanValidationError::InvalidWeight {
                    title: objective.title,
                    weight: objective.weight,
                });
            }
            objectives.push(Objective {
                id: objective
                    .id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                title: objective.title.trim().to_string(),
                weight: objective.weight,
            });
        }
        let now = Utc::now();
        Ok(StrategicPlan {
            id: Uuid::new_v4().to_string(),
            title: self.title.trim().to_string(),
            objectives,
            cascade: self.cascade.unwrap_or(default_cascade),
            start_year: self.start_year,
            end_year: self.end_year,
            created_at: now,
            updated_at: now,
        })
    }
}

/// A derived portfolio entity linked to a plan. Only the fields the counters need.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioEntity {
    pub id: String,
    pub plan_id: String,
    pub kind: EntityKind,
    pub title: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Parses `Title` or `Title:weight` as used on the command line.
pub fn parse_objective_arg(raw: &str) -> Result<NewObjective, PlanValidationError> {
    let (title, weight) = match raw.rsplit_once(':') {
        Some((title, weight)) => match weight.trim().parse::<f64>() {
            Ok(weight) => (title, weight),
            Err(_) => (raw, default_weight()),
        },
        None => (raw, default_weight()),
    };
    if title.trim().is_empty() {
        return Err(PlanValidationError::EmptyObjectiveTitle);
    }
    Ok(NewObjective {
        id: None,
        title: title.trim().to_string(),
        weight,
    })
}

fn default_weight() -> f64 {
    1.0
}

fn default_challenges_per_objective() -> u32 {
    5
}

fn default_pilots_per_challenge() -> u32 {
    2
}

fn default_campaigns_per_objective() -> u32 {
    2
}

fn default_events_per_objective() -> u32 {
    3
}
