//! Typed activities distilled from raw remote payloads.

mod classifier;

pub use classifier::classify;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The classified kind of a remote activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    PlanGenerated,
    PlanApproved,
    SessionCompleted,
    ProgressUpdated,
    UserMessage,
    AgentMessage,
    Unknown,
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActivityKind::PlanGenerated => "PLAN_GENERATED",
            ActivityKind::PlanApproved => "PLAN_APPROVED",
            ActivityKind::SessionCompleted => "SESSION_COMPLETED",
            ActivityKind::ProgressUpdated => "PROGRESS_UPDATED",
            ActivityKind::UserMessage => "USER_MESSAGE",
            ActivityKind::AgentMessage => "AGENT_MESSAGE",
            ActivityKind::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Who produced an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Originator {
    User,
    Agent,
    System,
    Unknown,
}

/// One immutable event in a session's history.
///
/// Only ever constructed by [`classify`]; the raw payload is kept verbatim
/// for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Short identifier (last segment of the resource name).
    pub id: String,
    /// Full resource name as reported by the service.
    pub name: String,
    pub create_time: Option<DateTime<Utc>>,
    pub originator: Originator,
    pub kind: ActivityKind,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Error message extracted from the payload, if any.
    pub error: Option<String>,
    /// Raw payload, retained verbatim.
    pub raw: Value,
}

impl Activity {
    /// True when this activity carries an extracted error.
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
