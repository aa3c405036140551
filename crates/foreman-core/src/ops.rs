//! Structured operation surface for tool-style front ends.
//!
//! Every operation returns an [`OpResponse`] envelope - status, message,
//! optional data - so a caller renders failures instead of unwinding. This
//! is the boundary a command front end (stdin loop, RPC server, ...) talks
//! to; nothing here ever propagates an error past it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::research;
use crate::session::WorkerManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpStatus {
    Success,
    Error,
}

/// Envelope returned by every operation.
#[derive(Debug, Clone, Serialize)]
pub struct OpResponse {
    pub status: OpStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OpResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Success,
            message: message.into(),
            data: None,
        }
    }

    pub fn success_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            status: OpStatus::Success,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}

/// Commands a front end can issue, tagged by `op`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateWorker {
        task: String,
        source: String,
        title: String,
        #[serde(default = "default_branch")]
        branch: String,
    },
    SendMessage {
        session_id: String,
        message: String,
    },
    ApprovePlan {
        session_id: String,
    },
    RejectPlan {
        session_id: String,
        #[serde(default)]
        feedback: String,
    },
    CancelWorker {
        session_id: String,
    },
    GetActivities {
        session_id: String,
        #[serde(default = "default_limit")]
        limit: usize,
    },
    WorkerStatus {
        session_id: String,
    },
    ListWorkers,
    Metrics,
    ResearchRepository {
        repository: String,
    },
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_limit() -> usize {
    10
}

/// Execute one command against the manager, converting every outcome into an
/// envelope.
pub fn dispatch(manager: &WorkerManager, command: Command) -> OpResponse {
    match command {
        Command::CreateWorker {
            task,
            source,
            title,
            branch,
        } => match manager.create_worker(&task, &source, &title, &branch) {
            Ok(session_id) => OpResponse::success_with(
                format!("Worker created successfully. Session ID: {session_id}"),
                json!({ "session_id": session_id }),
            ),
            Err(e) => {
                log::error!("failed to create worker: {e}");
                OpResponse::error(format!("Failed to create worker: {e}"))
            }
        },
        Command::SendMessage {
            session_id,
            message,
        } => match manager.send_worker_message(&session_id, &message) {
            Ok(()) => OpResponse::success(format!("Message sent to worker {session_id}")),
            Err(e) => OpResponse::error(format!("Failed to send message: {e}")),
        },
        Command::ApprovePlan { session_id } => match manager.approve_worker_plan(&session_id) {
            Ok(()) => OpResponse::success(format!("Plan approved for worker {session_id}")),
            Err(e) => OpResponse::error(format!("Failed to approve plan: {e}")),
        },
        Command::RejectPlan {
            session_id,
            feedback,
        } => match manager.reject_worker_plan(&session_id, &feedback) {
            Ok(()) => OpResponse::success(format!("Plan rejected for worker {session_id}")),
            Err(e) => OpResponse::error(format!("Failed to reject plan: {e}")),
        },
        Command::CancelWorker { session_id } => match manager.cancel_worker(&session_id) {
            Ok(()) => OpResponse::success(format!("Worker {session_id} cancelled")),
            Err(e) => OpResponse::error(format!("Failed to cancel worker: {e}")),
        },
        Command::GetActivities { session_id, limit } => {
            match manager.get_worker_activities(&session_id, limit) {
                Ok(activities) => {
                    let listed: Vec<Value> = activities
                        .iter()
                        .map(|activity| {
                            json!({
                                "id": activity.id,
                                "type": activity.kind,
                                "originator": activity.originator,
                                "create_time": activity.create_time.map(format_timestamp),
                                "title": activity.title,
                                "description": activity
                                    .description
                                    .as_deref()
                                    .map(|d| truncate_text(d, 200)),
                            })
                        })
                        .collect();
                    OpResponse::success_with(
                        format!("{} activities for worker {session_id}", listed.len()),
                        json!({
                            "session_id": session_id,
                            "activities": listed,
                            "count": listed.len(),
                        }),
                    )
                }
                Err(e) => OpResponse::error(format!("Failed to get activities: {e}")),
            }
        }
        Command::WorkerStatus { session_id } => match manager.get_worker_status(&session_id) {
            Ok(status) => match serde_json::to_value(&status) {
                Ok(data) => OpResponse::success_with(
                    format!("Worker {session_id} is {}", status.state),
                    data,
                ),
                Err(e) => OpResponse::error(format!("Failed to serialize status: {e}")),
            },
            Err(e) => OpResponse::error(format!("Failed to get status: {e}")),
        },
        Command::ListWorkers => {
            let workers = manager.get_all_workers();
            let listed: Vec<Value> = workers
                .iter()
                .map(|worker| {
                    json!({
                        "session_id": worker.session_id,
                        "state": worker.state,
                        "task": truncate_text(&worker.task, 100),
                        "created_at": format_timestamp(worker.created_at),
                    })
                })
                .collect();
            OpResponse::success_with(
                format!("{} workers tracked", listed.len()),
                json!({ "workers": listed, "count": listed.len() }),
            )
        }
        Command::Metrics => {
            let snapshot = manager.metrics().snapshot();
            match serde_json::to_value(&snapshot) {
                Ok(data) => OpResponse::success_with("Request metrics", data),
                Err(e) => OpResponse::error(format!("Failed to serialize metrics: {e}")),
            }
        }
        Command::ResearchRepository { repository } => {
            match research::research_repository(manager.client().runner(), &repository) {
                Ok(insights) => match serde_json::to_value(&insights) {
                    Ok(data) => {
                        OpResponse::success_with(format!("Research for {repository}"), data)
                    }
                    Err(e) => OpResponse::error(format!("Failed to serialize research: {e}")),
                },
                Err(e) => OpResponse::error(format!("Research failed: {e}")),
            }
        }
    }
}

/// Render a timestamp the way humans read it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate to `max_length` characters with an ellipsis suffix.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_length.saturating_sub(3)).collect();
    format!("{cut}...")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AgentApiClient, RequestRunner, RetryPolicy};
    use crate::config::Config;
    use crate::metrics::ThroughputMetrics;
    use crate::rate_limit::SlidingWindowLimiter;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::time::Duration;

    fn offline_manager() -> WorkerManager {
        // Points at a closed port; only operations that fail before any
        // network call are exercised here.
        let config = Config::new("http://127.0.0.1:9", "test-key");
        let runner = RequestRunner::new(
            Duration::from_millis(200),
            Arc::new(SlidingWindowLimiter::new(100, Duration::from_secs(60))),
            Arc::new(ThroughputMetrics::new()),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
        );
        let client = AgentApiClient::new(&config, runner);
        WorkerManager::new(&config, client)
    }

    mod formatting {
        use super::*;

        #[test]
        fn format_timestamp_is_human_readable() {
            let ts = Utc.with_ymd_and_hms(2026, 3, 1, 14, 30, 15).unwrap();
            assert_eq!(format_timestamp(ts), "2026-03-01 14:30:15");
        }

        #[test]
        fn truncate_keeps_short_text() {
            assert_eq!(truncate_text("short", 100), "short");
        }

        #[test]
        fn truncate_adds_ellipsis() {
            let long = "x".repeat(150);
            let cut = truncate_text(&long, 100);
            assert_eq!(cut.chars().count(), 100);
            assert!(cut.ends_with("..."));
        }
    }

    mod envelope {
        use super::*;

        #[test]
        fn success_serializes_without_null_data() {
            let json = serde_json::to_string(&OpResponse::success("done")).unwrap();
            assert!(json.contains("\"status\":\"success\""));
            assert!(!json.contains("\"data\""));
        }

        #[test]
        fn error_envelope_carries_message() {
            let response = OpResponse::error("boom");
            assert_eq!(response.status, OpStatus::Error);
            assert_eq!(response.message, "boom");
        }
    }

    mod commands {
        use super::*;

        #[test]
        fn parses_create_worker_with_default_branch() {
            let command: Command = serde_json::from_str(
                r#"{"op":"create_worker","task":"t","source":"s","title":"x"}"#,
            )
            .unwrap();
            match command {
                Command::CreateWorker { branch, .. } => assert_eq!(branch, "main"),
                _ => panic!("expected CreateWorker"),
            }
        }

        #[test]
        fn parses_get_activities_with_default_limit() {
            let command: Command =
                serde_json::from_str(r#"{"op":"get_activities","session_id":"s-1"}"#).unwrap();
            match command {
                Command::GetActivities { limit, .. } => assert_eq!(limit, 10),
                _ => panic!("expected GetActivities"),
            }
        }

        #[test]
        fn unknown_op_fails_to_parse() {
            assert!(serde_json::from_str::<Command>(r#"{"op":"reboot"}"#).is_err());
        }
    }

    mod dispatching {
        use super::*;

        #[test]
        fn unknown_worker_becomes_error_envelope() {
            let manager = offline_manager();
            let response = dispatch(
                &manager,
                Command::ApprovePlan {
                    session_id: "ghost".to_string(),
                },
            );
            assert_eq!(response.status, OpStatus::Error);
            assert!(response.message.contains("ghost"));
        }

        #[test]
        fn cancel_unknown_worker_is_an_error_not_a_panic() {
            let manager = offline_manager();
            let response = dispatch(
                &manager,
                Command::CancelWorker {
                    session_id: "ghost".to_string(),
                },
            );
            assert_eq!(response.status, OpStatus::Error);
        }

        #[test]
        fn list_workers_on_empty_manager_succeeds() {
            let manager = offline_manager();
            let response = dispatch(&manager, Command::ListWorkers);
            assert_eq!(response.status, OpStatus::Success);
            assert_eq!(response.data.unwrap()["count"], 0);
        }

        #[test]
        fn metrics_always_answers() {
            let manager = offline_manager();
            let response = dispatch(&manager, Command::Metrics);
            assert_eq!(response.status, OpStatus::Success);
            assert_eq!(response.data.unwrap()["total_requests"], 0);
        }

        #[test]
        fn invalid_repository_reference_is_an_error_envelope() {
            let manager = offline_manager();
            let response = dispatch(
                &manager,
                Command::ResearchRepository {
                    repository: "not-a-repo".to_string(),
                },
            );
            assert_eq!(response.status, OpStatus::Error);
            assert!(response.message.contains("Research failed"));
        }
    }
}
