//! Notification fan-out for worker events.
//!
//! Observers register plain callbacks; the orchestrator invokes them
//! synchronously, in registration order, for every newly observed activity
//! and for terminal state transitions. Dispatch copies the handler list
//! first, so handlers may be added or removed while a dispatch is running,
//! and a panicking handler is contained and logged without affecting the
//! rest.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::activity::Activity;
use crate::session::WorkerState;

/// Callback for newly observed activities.
pub type ActivityHandler = Arc<dyn Fn(&str, &Activity) + Send + Sync>;
/// Callback for terminal state transitions.
pub type StateHandler = Arc<dyn Fn(&str, WorkerState) + Send + Sync>;

/// Opaque handle for removing a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerId(Uuid);

#[derive(Default)]
pub struct NotificationDispatcher {
    activity_handlers: Mutex<Vec<(HandlerId, ActivityHandler)>>,
    state_handlers: Mutex<Vec<(HandlerId, StateHandler)>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler invoked once per newly observed activity.
    pub fn on_activity<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str, &Activity) + Send + Sync + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        self.activity_handlers
            .lock()
            .unwrap()
            .push((id.clone(), Arc::new(handler)));
        id
    }

    /// Register a handler invoked when a session reaches a terminal state.
    pub fn on_state_change<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&str, WorkerState) + Send + Sync + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        self.state_handlers
            .lock()
            .unwrap()
            .push((id.clone(), Arc::new(handler)));
        id
    }

    /// Remove a handler by id. Returns whether anything was removed.
    pub fn remove(&self, id: &HandlerId) -> bool {
        let mut removed = false;
        {
            let mut handlers = self.activity_handlers.lock().unwrap();
            let before = handlers.len();
            handlers.retain(|(hid, _)| hid != id);
            removed |= handlers.len() != before;
        }
        {
            let mut handlers = self.state_handlers.lock().unwrap();
            let before = handlers.len();
            handlers.retain(|(hid, _)| hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Invoke every activity handler, in registration order.
    pub fn dispatch_activity(&self, session_id: &str, activity: &Activity) {
        let handlers: Vec<ActivityHandler> = self
            .activity_handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(session_id, activity))).is_err() {
                log::error!("activity notification handler panicked for session {session_id}");
            }
        }
    }

    /// Invoke every state handler, in registration order.
    pub fn dispatch_state(&self, session_id: &str, state: WorkerState) {
        let handlers: Vec<StateHandler> = self
            .state_handlers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(session_id, state))).is_err() {
                log::error!("state notification handler panicked for session {session_id}");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
