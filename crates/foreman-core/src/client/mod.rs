//! Remote agent API client.
//!
//! Thin, typed wrapper over the REST surface of the remote coding-agent
//! service. Every call runs through [`RequestRunner`] and therefore shares
//! its retry, rate-limit and metrics behavior.

mod request;

pub use request::{RequestRunner, RequestSpec, RetryPolicy};

use serde_json::{json, Value};

use crate::config::Config;
use crate::error::RequestError;

/// Rate-limit bucket name for the agent API.
pub const AGENT_SERVICE: &str = "agent-api";

pub struct AgentApiClient {
    base_url: String,
    api_key: String,
    runner: RequestRunner,
}

impl AgentApiClient {
    /// Create a client rooted at `{base_url}/{api_version}`.
    pub fn new(config: &Config, runner: RequestRunner) -> Self {
        Self {
            base_url: format!(
                "{}/{}",
                config.api_base_url.trim_end_matches('/'),
                config.api_version
            ),
            api_key: config.api_key.clone(),
            runner,
        }
    }

    /// The underlying request executor (shared limiter and metrics).
    pub fn runner(&self) -> &RequestRunner {
        &self.runner
    }

    fn spec(&self, method: &str, path: &str) -> RequestSpec {
        RequestSpec::new(method, format!("{}{}", self.base_url, path))
            .service(AGENT_SERVICE)
            .header("X-Api-Key", self.api_key.as_str())
    }

    /// `POST /sessions` - start a new remote session.
    pub fn create_session(
        &self,
        prompt: &str,
        source: &str,
        title: &str,
        starting_branch: &str,
    ) -> Result<Value, RequestError> {
        let body = json!({
            "prompt": prompt,
            "sourceContext": {
                "source": source,
                "githubRepoContext": { "startingBranch": starting_branch }
            },
            "title": title,
        });
        log::debug!("creating session for source {source}");
        self.runner.execute(&self.spec("POST", "/sessions").json(body))
    }

    /// `GET /sessions/{id}` - fetch the session resource.
    pub fn get_session(&self, session_id: &str) -> Result<Value, RequestError> {
        self.runner
            .execute(&self.spec("GET", &format!("/sessions/{session_id}")))
    }

    /// `GET /sessions/{id}/activities` - one page of raw activity records.
    pub fn list_activities(
        &self,
        session_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<Value, RequestError> {
        let mut spec = self
            .spec("GET", &format!("/sessions/{session_id}/activities"))
            .query("pageSize", page_size.to_string());
        if let Some(token) = page_token {
            spec = spec.query("pageToken", token);
        }
        self.runner.execute(&spec)
    }

    /// `POST /sessions/{id}:approvePlan` - approve or reject the pending
    /// plan, with optional feedback for the worker.
    pub fn approve_plan(
        &self,
        session_id: &str,
        approved: bool,
        feedback: Option<&str>,
    ) -> Result<Value, RequestError> {
        let body = json!({
            "approved": approved,
            "feedback": feedback.unwrap_or(""),
        });
        self.runner.execute(
            &self
                .spec("POST", &format!("/sessions/{session_id}:approvePlan"))
                .json(body),
        )
    }

    /// `POST /sessions/{id}/activities` - send a user message into the
    /// session.
    pub fn send_message(&self, session_id: &str, message: &str) -> Result<Value, RequestError> {
        let body = json!({ "userMessage": { "message": message } });
        self.runner.execute(
            &self
                .spec("POST", &format!("/sessions/{session_id}/activities"))
                .json(body),
        )
    }
}
