//! WorkerManager - the session table and the background polling loop.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::activity::{classify, Activity};
use crate::client::AgentApiClient;
use crate::config::Config;
use crate::error::WorkerError;
use crate::metrics::ThroughputMetrics;
use crate::notify::NotificationDispatcher;

use super::state::{WorkerSession, WorkerState};

/// Snapshot of one worker for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub session_id: String,
    pub task: String,
    pub state: WorkerState,
    pub is_blocked: bool,
    pub blocker_reason: Option<String>,
    pub pending_plan_id: Option<String>,
    pub error_message: Option<String>,
    pub last_activity_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Orchestrates worker sessions against the remote agent service.
///
/// Thread-safe: operator operations may run concurrently with the polling
/// loop. All session mutations are serialized by the session-table mutex;
/// operator calls hold it across their remote confirmation, so a competing
/// call for the same session observes the already-updated state.
pub struct WorkerManager {
    client: AgentApiClient,
    poll_interval: Duration,
    stuck_timeout: Duration,
    page_size: u32,
    buffer_capacity: usize,
    workers: Mutex<HashMap<String, WorkerSession>>,
    dispatcher: Arc<NotificationDispatcher>,
    poll_thread: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl WorkerManager {
    pub fn new(config: &Config, client: AgentApiClient) -> Self {
        Self {
            client,
            poll_interval: config.poll_interval,
            stuck_timeout: config.stuck_timeout,
            page_size: config.activity_page_size,
            buffer_capacity: config.activity_buffer_size,
            workers: Mutex::new(HashMap::new()),
            dispatcher: Arc::new(NotificationDispatcher::new()),
            poll_thread: Mutex::new(None),
        }
    }

    /// Notification registry for new activities and terminal transitions.
    pub fn notifications(&self) -> Arc<NotificationDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// The API client this manager polls through.
    pub fn client(&self) -> &AgentApiClient {
        &self.client
    }

    /// Throughput counters shared with the request layer.
    pub fn metrics(&self) -> Arc<ThroughputMetrics> {
        self.client.runner().metrics()
    }

    /// Start the background polling loop. No-op if already running.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.poll_thread.lock().unwrap();
        if guard.is_some() {
            log::warn!("worker manager already running");
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            log::info!("polling loop started");
            loop {
                manager.poll_cycle();
                match stop_rx.recv_timeout(manager.poll_interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    // Stop requested, or the manager handle went away.
                    _ => break,
                }
            }
            log::info!("polling loop stopped");
        });
        *guard = Some((stop_tx, handle));
    }

    /// Signal the polling loop to stop and wait for it to exit. The stop
    /// signal interrupts the inter-cycle sleep immediately; an in-flight
    /// cycle finishes first.
    pub fn stop(&self) {
        let taken = self.poll_thread.lock().unwrap().take();
        if let Some((stop_tx, handle)) = taken {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                log::error!("polling thread panicked during shutdown");
            }
        }
    }

    /// Whether the polling loop is currently running.
    pub fn is_running(&self) -> bool {
        self.poll_thread.lock().unwrap().is_some()
    }

    /// Create a worker session on the remote service and register it locally
    /// in `Planning`.
    pub fn create_worker(
        &self,
        prompt: &str,
        source: &str,
        title: &str,
        starting_branch: &str,
    ) -> Result<String, WorkerError> {
        let response = self
            .client
            .create_session(prompt, source, title, starting_branch)?;
        let session_id = extract_session_id(&response)
            .ok_or_else(|| WorkerError::Creation("response carries no session name".to_string()))?;

        let session = WorkerSession::new(
            session_id.clone(),
            prompt,
            source,
            title,
            starting_branch,
            self.buffer_capacity,
        );
        self.workers
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        log::info!("created worker session {session_id}");
        Ok(session_id)
    }

    /// Approve the pending plan. The local transition to `Executing` happens
    /// as soon as the remote call succeeds, closing the window in which a
    /// second approval could slip through.
    pub fn approve_worker_plan(&self, session_id: &str) -> Result<(), WorkerError> {
        let mut workers = self.workers.lock().unwrap();
        let session = workers
            .get_mut(session_id)
            .ok_or_else(|| WorkerError::NotFound(session_id.to_string()))?;
        if session.state != WorkerState::WaitingApproval {
            return Err(WorkerError::InvalidState {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }

        self.client.approve_plan(session_id, true, None)?;
        session.plan_approved();
        log::info!("approved plan for worker {session_id}");
        Ok(())
    }

    /// Reject the pending plan with feedback; the worker goes back to
    /// planning until a revised plan arrives.
    pub fn reject_worker_plan(&self, session_id: &str, feedback: &str) -> Result<(), WorkerError> {
        let mut workers = self.workers.lock().unwrap();
        let session = workers
            .get_mut(session_id)
            .ok_or_else(|| WorkerError::NotFound(session_id.to_string()))?;
        if session.state != WorkerState::WaitingApproval {
            return Err(WorkerError::InvalidState {
                session_id: session_id.to_string(),
                state: session.state,
            });
        }

        self.client
            .approve_plan(session_id, false, Some(feedback))?;
        session.plan_rejected();
        log::info!("rejected plan for worker {session_id}");
        Ok(())
    }

    /// Forward a user message to the worker. Local state is unchanged; the
    /// polling loop picks up whatever the message causes.
    pub fn send_worker_message(&self, session_id: &str, message: &str) -> Result<(), WorkerError> {
        if !self.workers.lock().unwrap().contains_key(session_id) {
            return Err(WorkerError::NotFound(session_id.to_string()));
        }
        self.client.send_message(session_id, message)?;
        log::info!("sent message to worker {session_id}");
        Ok(())
    }

    /// Cancel a worker locally. The remote session is left to the service;
    /// already-terminal workers are unaffected.
    pub fn cancel_worker(&self, session_id: &str) -> Result<(), WorkerError> {
        let changed = {
            let mut workers = self.workers.lock().unwrap();
            let session = workers
                .get_mut(session_id)
                .ok_or_else(|| WorkerError::NotFound(session_id.to_string()))?;
            session.cancel()
        };
        if changed {
            log::info!("cancelled worker {session_id}");
            self.dispatcher
                .dispatch_state(session_id, WorkerState::Cancelled);
        }
        Ok(())
    }

    /// Most recent buffered activities for a worker, oldest first.
    pub fn get_worker_activities(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Activity>, WorkerError> {
        let workers = self.workers.lock().unwrap();
        let session = workers
            .get(session_id)
            .ok_or_else(|| WorkerError::NotFound(session_id.to_string()))?;
        Ok(session.recent_activities(limit))
    }

    /// Current status snapshot for one worker.
    pub fn get_worker_status(&self, session_id: &str) -> Result<WorkerStatus, WorkerError> {
        let workers = self.workers.lock().unwrap();
        let session = workers
            .get(session_id)
            .ok_or_else(|| WorkerError::NotFound(session_id.to_string()))?;
        Ok(WorkerStatus {
            session_id: session.session_id.clone(),
            task: session.task.clone(),
            state: session.state,
            is_blocked: session.is_blocked(self.stuck_timeout),
            blocker_reason: session.blocker_reason(self.stuck_timeout),
            pending_plan_id: session.pending_plan_id.clone(),
            error_message: session.error_message.clone(),
            last_activity_time: session.last_activity_time,
            created_at: session.created_at,
        })
    }

    /// All tracked workers, most recently created first.
    pub fn get_all_workers(&self) -> Vec<WorkerSession> {
        let workers = self.workers.lock().unwrap();
        let mut all: Vec<WorkerSession> = workers.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// One pass over every active session: fetch, classify, apply, notify.
    /// Per-session failures are logged and never abort the cycle.
    fn poll_cycle(&self) {
        let active: Vec<String> = {
            let workers = self.workers.lock().unwrap();
            workers
                .values()
                .filter(|worker| worker.state.is_active())
                .map(|worker| worker.session_id.clone())
                .collect()
        };

        for session_id in active {
            // Fetch without holding the table lock.
            let response = match self.client.list_activities(&session_id, self.page_size, None) {
                Ok(response) => response,
                Err(e) => {
                    log::error!("error polling worker {session_id}: {e}");
                    continue;
                }
            };

            let batch = classify_page(&response);
            if batch.is_empty() {
                continue;
            }

            let (new_activities, terminal) = {
                let mut workers = self.workers.lock().unwrap();
                let Some(session) = workers.get_mut(&session_id) else {
                    continue;
                };
                let before = session.state;
                let new_activities = session.apply_batch(&batch);
                let after = session.state;
                let terminal = (before != after && after.is_terminal()).then_some(after);
                (new_activities, terminal)
            };

            for activity in &new_activities {
                self.dispatcher.dispatch_activity(&session_id, activity);
            }
            if let Some(state) = terminal {
                self.dispatcher.dispatch_state(&session_id, state);
            }
        }
    }
}

/// Pull the session id out of a create response (`name: "sessions/<id>"`).
fn extract_session_id(response: &Value) -> Option<String> {
    let name = response.get("name")?.as_str()?;
    let id = name.rsplit('/').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Classify every raw record in a list-activities response, preserving the
/// service's ordering.
fn classify_page(response: &Value) -> Vec<Activity> {
    response
        .get("activities")
        .and_then(Value::as_array)
        .map(|records| records.iter().map(classify).collect())
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::client::{RequestRunner, RetryPolicy};
    use crate::rate_limit::SlidingWindowLimiter;
    use crate::testutil::StubServer;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn manager_for(base_url: &str) -> Arc<WorkerManager> {
        let mut config = Config::new(base_url, "test-key");
        config.poll_interval = Duration::from_secs(60);
        config.request_timeout = Duration::from_secs(5);
        config.retry_max_attempts = 2;
        config.retry_base_delay = Duration::from_millis(1);

        let runner = RequestRunner::new(
            config.request_timeout,
            Arc::new(SlidingWindowLimiter::new(10_000, Duration::from_secs(60))),
            Arc::new(ThroughputMetrics::new()),
            RetryPolicy {
                max_attempts: config.retry_max_attempts,
                base_delay: config.retry_base_delay,
                max_delay: Duration::from_millis(20),
            },
        );
        let client = AgentApiClient::new(&config, runner);
        Arc::new(WorkerManager::new(&config, client))
    }

    fn plan_generated(id: &str) -> Value {
        json!({
            "name": format!("sessions/sess-1/activities/{id}"),
            "createTime": "2026-03-01T10:00:00Z",
            "originator": "agent",
            "planGenerated": {"plan": {"title": "Add logging", "description": "Two steps"}},
        })
    }

    fn progress(id: &str) -> Value {
        json!({
            "name": format!("sessions/sess-1/activities/{id}"),
            "createTime": "2026-03-01T10:01:00Z",
            "originator": "agent",
            "progressUpdated": {"title": "Working", "description": "Adding log statements"},
        })
    }

    fn completed(id: &str) -> Value {
        json!({
            "name": format!("sessions/sess-1/activities/{id}"),
            "createTime": "2026-03-01T10:02:00Z",
            "originator": "agent",
            "sessionCompleted": {},
        })
    }

    mod operations {
        use super::*;

        #[test]
        fn unknown_session_is_rejected_before_any_network_call() {
            let manager = manager_for("http://127.0.0.1:9");

            assert!(matches!(
                manager.approve_worker_plan("ghost"),
                Err(WorkerError::NotFound(_))
            ));
            assert!(matches!(
                manager.reject_worker_plan("ghost", "no"),
                Err(WorkerError::NotFound(_))
            ));
            assert!(matches!(
                manager.send_worker_message("ghost", "hi"),
                Err(WorkerError::NotFound(_))
            ));
            assert!(matches!(
                manager.cancel_worker("ghost"),
                Err(WorkerError::NotFound(_))
            ));
            assert!(matches!(
                manager.get_worker_status("ghost"),
                Err(WorkerError::NotFound(_))
            ));
            assert!(matches!(
                manager.get_worker_activities("ghost", 10),
                Err(WorkerError::NotFound(_))
            ));
        }

        #[test]
        fn create_worker_registers_planning_session() {
            let server =
                StubServer::start(|_, _| (200, r#"{"name":"sessions/sess-1"}"#.to_string()));
            let manager = manager_for(&server.base_url());

            let session_id = manager
                .create_worker("add logging", "sources/github/acme/app", "Logging", "main")
                .unwrap();
            assert_eq!(session_id, "sess-1");

            let status = manager.get_worker_status(&session_id).unwrap();
            assert_eq!(status.state, WorkerState::Planning);
            assert_eq!(status.task, "add logging");
            assert!(!status.is_blocked);
        }

        #[test]
        fn create_worker_without_name_is_a_creation_error() {
            let server = StubServer::start(|_, _| (200, "{}".to_string()));
            let manager = manager_for(&server.base_url());

            let err = manager
                .create_worker("task", "src", "title", "main")
                .unwrap_err();
            assert!(matches!(err, WorkerError::Creation(_)));
        }

        #[test]
        fn get_all_workers_orders_newest_first() {
            let count = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&count);
            let server = StubServer::start(move |_, _| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                (200, format!(r#"{{"name":"sessions/sess-{n}"}}"#))
            });
            let manager = manager_for(&server.base_url());

            manager.create_worker("first", "src", "t", "main").unwrap();
            std::thread::sleep(Duration::from_millis(5));
            manager.create_worker("second", "src", "t", "main").unwrap();

            let all = manager.get_all_workers();
            assert_eq!(all.len(), 2);
            assert_eq!(all[0].task, "second");
            assert_eq!(all[1].task, "first");
        }

        #[test]
        fn cancel_is_local_and_notifies_terminal_state() {
            let server =
                StubServer::start(|_, _| (200, r#"{"name":"sessions/sess-1"}"#.to_string()));
            let manager = manager_for(&server.base_url());
            manager.create_worker("task", "src", "t", "main").unwrap();

            let seen = Arc::new(Mutex::new(Vec::new()));
            let record = Arc::clone(&seen);
            manager.notifications().on_state_change(move |id, state| {
                record.lock().unwrap().push((id.to_string(), state));
            });

            let hits_before = server.hits();
            manager.cancel_worker("sess-1").unwrap();
            assert_eq!(server.hits(), hits_before);

            let status = manager.get_worker_status("sess-1").unwrap();
            assert_eq!(status.state, WorkerState::Cancelled);
            assert_eq!(
                *seen.lock().unwrap(),
                vec![("sess-1".to_string(), WorkerState::Cancelled)]
            );

            // Cancelling again changes nothing and stays quiet.
            manager.cancel_worker("sess-1").unwrap();
            assert_eq!(seen.lock().unwrap().len(), 1);
        }
    }

    mod polling {
        use super::*;

        /// The end-to-end worker lifecycle against a scripted remote:
        /// create, plan, approve, progress, completion - with notifications
        /// observed in order.
        #[test]
        fn full_lifecycle_with_notifications() {
            let phase = Arc::new(AtomicUsize::new(0));
            let phase_for_router = Arc::clone(&phase);
            let server = StubServer::start(move |method, path| {
                if method == "POST" && path == "/v1alpha/sessions" {
                    return (200, r#"{"name":"sessions/sess-1"}"#.to_string());
                }
                if method == "POST" && path == "/v1alpha/sessions/sess-1:approvePlan" {
                    return (200, "{}".to_string());
                }
                if method == "GET" && path.starts_with("/v1alpha/sessions/sess-1/activities") {
                    let body = match phase_for_router.load(Ordering::SeqCst) {
                        0 => json!({"activities": [plan_generated("act-1")]}),
                        _ => json!({
                            "activities": [
                                plan_generated("act-1"),
                                progress("act-2"),
                                completed("act-3"),
                            ]
                        }),
                    };
                    return (200, body.to_string());
                }
                (404, r#"{"error":"unexpected request"}"#.to_string())
            });

            let manager = manager_for(&server.base_url());
            let notified = Arc::new(Mutex::new(Vec::new()));
            let record = Arc::clone(&notified);
            manager.notifications().on_activity(move |id, activity| {
                record
                    .lock()
                    .unwrap()
                    .push((id.to_string(), activity.id.clone(), activity.kind));
            });
            let terminal = Arc::new(Mutex::new(Vec::new()));
            let record = Arc::clone(&terminal);
            manager.notifications().on_state_change(move |id, state| {
                record.lock().unwrap().push((id.to_string(), state));
            });

            let session_id = manager
                .create_worker("add logging", "sources/github/acme/app", "Logging", "main")
                .unwrap();

            // First poll: the plan arrives.
            manager.poll_cycle();
            let status = manager.get_worker_status(&session_id).unwrap();
            assert_eq!(status.state, WorkerState::WaitingApproval);
            assert_eq!(status.pending_plan_id.as_deref(), Some("act-1"));
            assert!(status.is_blocked);

            // Approve: local transition happens with the remote confirmation.
            manager.approve_worker_plan(&session_id).unwrap();
            let status = manager.get_worker_status(&session_id).unwrap();
            assert_eq!(status.state, WorkerState::Executing);
            assert!(status.pending_plan_id.is_none());

            // A second approval is invalid now.
            assert!(matches!(
                manager.approve_worker_plan(&session_id),
                Err(WorkerError::InvalidState { .. })
            ));

            // Second poll: progress plus completion.
            phase.store(1, Ordering::SeqCst);
            manager.poll_cycle();
            let status = manager.get_worker_status(&session_id).unwrap();
            assert_eq!(status.state, WorkerState::Completed);

            let notified = notified.lock().unwrap();
            assert_eq!(
                *notified,
                vec![
                    (
                        "sess-1".to_string(),
                        "act-1".to_string(),
                        ActivityKind::PlanGenerated
                    ),
                    (
                        "sess-1".to_string(),
                        "act-2".to_string(),
                        ActivityKind::ProgressUpdated
                    ),
                    (
                        "sess-1".to_string(),
                        "act-3".to_string(),
                        ActivityKind::SessionCompleted
                    ),
                ]
            );
            assert_eq!(
                *terminal.lock().unwrap(),
                vec![("sess-1".to_string(), WorkerState::Completed)]
            );

            // Completed workers drop out of the poll set.
            let hits = server.hits();
            manager.poll_cycle();
            assert_eq!(server.hits(), hits);
        }

        #[test]
        fn poll_failure_is_isolated_and_logged() {
            let server = StubServer::start(|method, path| {
                if method == "POST" && path == "/v1alpha/sessions" {
                    (200, r#"{"name":"sessions/sess-err"}"#.to_string())
                } else {
                    (500, r#"{"error":"backend down"}"#.to_string())
                }
            });
            let manager = manager_for(&server.base_url());
            manager.create_worker("task", "src", "t", "main").unwrap();

            manager.poll_cycle();

            let status = manager.get_worker_status("sess-err").unwrap();
            assert_eq!(status.state, WorkerState::Planning);
        }

        #[test]
        fn error_bearing_batch_fails_the_worker() {
            let server = StubServer::start(|method, path| {
                if method == "POST" && path == "/v1alpha/sessions" {
                    return (200, r#"{"name":"sessions/sess-1"}"#.to_string());
                }
                let body = json!({
                    "activities": [
                        {
                            "name": "sessions/sess-1/activities/act-1",
                            "originator": "agent",
                            "progressUpdated": {"description": "build failed with exit status"},
                        },
                        completed("act-2"),
                    ]
                });
                (200, body.to_string())
            });
            let manager = manager_for(&server.base_url());
            manager.create_worker("task", "src", "t", "main").unwrap();

            manager.poll_cycle();

            let status = manager.get_worker_status("sess-1").unwrap();
            assert_eq!(status.state, WorkerState::Failed);
            assert!(status.error_message.unwrap().contains("failed"));
            assert!(status.is_blocked);
        }

        #[test]
        fn panicking_notification_handler_does_not_abort_the_cycle() {
            let server = StubServer::start(|method, path| {
                if method == "POST" && path == "/v1alpha/sessions" {
                    return (200, r#"{"name":"sessions/sess-1"}"#.to_string());
                }
                (200, json!({"activities": [plan_generated("act-1")]}).to_string())
            });
            let manager = manager_for(&server.base_url());
            manager.create_worker("task", "src", "t", "main").unwrap();

            manager
                .notifications()
                .on_activity(|_, _| panic!("observer exploded"));
            let reached = Arc::new(Mutex::new(0));
            let counter = Arc::clone(&reached);
            manager
                .notifications()
                .on_activity(move |_, _| *counter.lock().unwrap() += 1);

            manager.poll_cycle();

            assert_eq!(*reached.lock().unwrap(), 1);
            let status = manager.get_worker_status("sess-1").unwrap();
            assert_eq!(status.state, WorkerState::WaitingApproval);
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn stop_interrupts_the_sleep_promptly() {
            let server = StubServer::start(|_, _| (200, "{}".to_string()));
            // 60s poll interval; stop must not wait for it.
            let manager = manager_for(&server.base_url());

            manager.start();
            assert!(manager.is_running());

            let begun = Instant::now();
            manager.stop();
            assert!(begun.elapsed() < Duration::from_secs(5));
            assert!(!manager.is_running());
        }

        #[test]
        fn start_twice_is_a_no_op() {
            let server = StubServer::start(|_, _| (200, "{}".to_string()));
            let manager = manager_for(&server.base_url());

            manager.start();
            manager.start();
            assert!(manager.is_running());
            manager.stop();
            assert!(!manager.is_running());
        }

        #[test]
        fn stop_without_start_is_harmless() {
            let server = StubServer::start(|_, _| (200, "{}".to_string()));
            let manager = manager_for(&server.base_url());
            manager.stop();
            assert!(!manager.is_running());
        }
    }

    mod helpers {
        use super::*;

        #[test]
        fn extract_session_id_variants() {
            assert_eq!(
                extract_session_id(&json!({"name": "sessions/abc-123"})),
                Some("abc-123".to_string())
            );
            assert_eq!(extract_session_id(&json!({"name": "sessions/"})), None);
            assert_eq!(extract_session_id(&json!({"name": ""})), None);
            assert_eq!(extract_session_id(&json!({})), None);
            assert_eq!(extract_session_id(&json!({"name": 42})), None);
        }

        #[test]
        fn classify_page_tolerates_malformed_responses() {
            assert!(classify_page(&json!({})).is_empty());
            assert!(classify_page(&json!({"activities": "nope"})).is_empty());

            let page = json!({"activities": [plan_generated("a"), progress("b")]});
            let batch = classify_page(&page);
            assert_eq!(batch.len(), 2);
            assert_eq!(batch[0].kind, ActivityKind::PlanGenerated);
            assert_eq!(batch[1].kind, ActivityKind::ProgressUpdated);
        }
    }
}
