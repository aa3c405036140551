//! Pure classification of raw activity payloads.
//!
//! The remote service encodes an activity's meaning in its shape: exactly one
//! marker key (`planGenerated`, `progressUpdated`, ...) is present per
//! record. `classify` inspects the markers in a fixed order, extracts the
//! human-readable title/description for the matched kind, and scans the
//! payload for embedded failures. No I/O, no clock; classifying the same
//! payload twice yields the same activity.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;

use super::{Activity, ActivityKind, Originator};

/// Marker keys checked in order; the first present key decides the kind.
const MARKERS: [(&str, ActivityKind); 6] = [
    ("planGenerated", ActivityKind::PlanGenerated),
    ("planApproved", ActivityKind::PlanApproved),
    ("sessionCompleted", ActivityKind::SessionCompleted),
    ("progressUpdated", ActivityKind::ProgressUpdated),
    ("userMessage", ActivityKind::UserMessage),
    ("agentMessage", ActivityKind::AgentMessage),
];

fn error_keywords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("(?i)(error|failed|exception|fatal)").expect("valid regex"))
}

/// Classify one raw activity payload into a typed [`Activity`].
pub fn classify(raw: &Value) -> Activity {
    let name = raw
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let id = name.rsplit('/').next().unwrap_or_default().to_string();
    let kind = detect_kind(raw);
    let (title, description) = extract_title_description(raw, kind);

    Activity {
        id,
        name,
        create_time: parse_create_time(raw),
        originator: parse_originator(raw),
        kind,
        title,
        description,
        error: extract_error(raw),
        raw: raw.clone(),
    }
}

fn detect_kind(raw: &Value) -> ActivityKind {
    for (marker, kind) in MARKERS {
        if raw.get(marker).is_some() {
            return kind;
        }
    }
    ActivityKind::Unknown
}

fn parse_create_time(raw: &Value) -> Option<DateTime<Utc>> {
    let text = raw.get("createTime")?.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_originator(raw: &Value) -> Originator {
    match raw.get("originator").and_then(Value::as_str) {
        Some(s) if s.eq_ignore_ascii_case("user") => Originator::User,
        Some(s) if s.eq_ignore_ascii_case("agent") => Originator::Agent,
        Some(s) if s.eq_ignore_ascii_case("system") => Originator::System,
        _ => Originator::Unknown,
    }
}

fn extract_title_description(raw: &Value, kind: ActivityKind) -> (Option<String>, Option<String>) {
    match kind {
        ActivityKind::PlanGenerated => {
            let plan = raw.get("planGenerated").and_then(|v| v.get("plan"));
            (string_field(plan, "title"), string_field(plan, "description"))
        }
        ActivityKind::ProgressUpdated => {
            let progress = raw.get("progressUpdated");
            (
                string_field(progress, "title"),
                string_field(progress, "description"),
            )
        }
        ActivityKind::UserMessage => (
            Some("User Message".to_string()),
            string_field(raw.get("userMessage"), "message"),
        ),
        ActivityKind::AgentMessage => (
            Some("Agent Message".to_string()),
            string_field(raw.get("agentMessage"), "message"),
        ),
        _ => (None, None),
    }
}

fn string_field(value: Option<&Value>, field: &str) -> Option<String> {
    value?.get(field)?.as_str().map(str::to_string)
}

/// Scan a payload for embedded failures: command artifacts with non-zero
/// exit codes, then progress descriptions containing error keywords.
fn extract_error(raw: &Value) -> Option<String> {
    if let Some(artifacts) = raw.get("artifacts").and_then(Value::as_array) {
        for artifact in artifacts {
            if let Some(bash) = artifact.get("bashOutput") {
                let exit_code = bash.get("exitCode").and_then(Value::as_i64).unwrap_or(0);
                if exit_code != 0 {
                    let output = bash.get("output").and_then(Value::as_str).unwrap_or("");
                    let preview: String = output.chars().take(200).collect();
                    return Some(format!("command failed (exit code {exit_code}): {preview}"));
                }
            }
        }
    }

    if let Some(progress) = raw.get("progressUpdated") {
        if let Some(description) = progress.get("description").and_then(Value::as_str) {
            if error_keywords().is_match(description) {
                return Some(description.to_string());
            }
        }
    }

    None
}

// ============================================================================
// TESTS
// ============================================================================
