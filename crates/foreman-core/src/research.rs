//! Repository research helpers.
//!
//! Pure utilities for enriching worker prompts with context about the
//! repository a task targets. They ride the same resilient request layer as
//! the agent client, under their own rate-limit bucket.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::client::{RequestRunner, RequestSpec};
use crate::error::RequestError;

/// Rate-limit bucket name for GitHub lookups.
pub const GITHUB_SERVICE: &str = "github-api";

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "foreman-research/0.1";

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("invalid repository reference: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Condensed view of a researched repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoInsights {
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub stars: u64,
    /// First lines of the most recent commit messages.
    pub recent_commits: Vec<String>,
    /// Coarse implementation patterns inferred from the metadata.
    pub patterns: Vec<String>,
}

/// Fetch repository metadata from GitHub.
pub fn lookup_repository(
    runner: &RequestRunner,
    owner: &str,
    repo: &str,
) -> Result<Value, RequestError> {
    let spec = RequestSpec::new("GET", format!("{GITHUB_API}/repos/{owner}/{repo}"))
        .service(GITHUB_SERVICE)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json");
    runner.execute(&spec)
}

/// Fetch the most recent commits for a repository.
pub fn recent_commits(
    runner: &RequestRunner,
    owner: &str,
    repo: &str,
    limit: usize,
) -> Result<Value, RequestError> {
    let spec = RequestSpec::new("GET", format!("{GITHUB_API}/repos/{owner}/{repo}/commits"))
        .service(GITHUB_SERVICE)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .query("per_page", limit.to_string());
    runner.execute(&spec)
}

/// Research a repository given a URL or `owner/repo` slug: metadata, recent
/// commits, and a few coarse implementation patterns. A failed commit lookup
/// degrades to an empty list rather than failing the research.
pub fn research_repository(
    runner: &RequestRunner,
    repository: &str,
) -> Result<RepoInsights, ResearchError> {
    let (owner, repo) = parse_repository(repository)
        .ok_or_else(|| ResearchError::InvalidReference(repository.to_string()))?;

    let repo_data = lookup_repository(runner, owner, repo)?;
    let commits = recent_commits(runner, owner, repo, 5).unwrap_or(Value::Null);

    let recent: Vec<String> = commits
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|entry| {
                    entry
                        .get("commit")
                        .and_then(|c| c.get("message"))
                        .and_then(Value::as_str)
                        .map(|message| message.lines().next().unwrap_or("").to_string())
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(RepoInsights {
        full_name: repo_data
            .get("full_name")
            .and_then(Value::as_str)
            .unwrap_or(repository)
            .to_string(),
        description: repo_data
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        language: repo_data
            .get("language")
            .and_then(Value::as_str)
            .map(str::to_string),
        stars: repo_data
            .get("stargazers_count")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        recent_commits: recent,
        patterns: extract_patterns(&repo_data),
    })
}

/// Accepts `owner/repo`, `github.com/owner/repo`, or a full URL with an
/// optional `.git` suffix. The last two path segments are the slug.
fn parse_repository(reference: &str) -> Option<(&str, &str)> {
    let trimmed = reference.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    let mut segments = trimmed.rsplit('/');
    let repo = segments.next()?;
    let owner = segments.next()?;
    if repo.is_empty() || owner.is_empty() || owner.contains(':') {
        return None;
    }
    Some((owner, repo))
}

/// Coarse implementation patterns inferred from repository metadata.
fn extract_patterns(repo_data: &Value) -> Vec<String> {
    let mut patterns = Vec::new();
    if let Some(language) = repo_data.get("language").and_then(Value::as_str) {
        patterns.push(format!("Language: {language}"));
    }

    let description = repo_data
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_lowercase();
    for (needle, pattern) in [
        ("api", "REST API implementation"),
        ("react", "React components"),
        ("typescript", "TypeScript patterns"),
        ("python", "Python patterns"),
        ("docker", "Docker containerization"),
        ("kubernetes", "Kubernetes deployment"),
    ] {
        if description.contains(needle) {
            patterns.push(pattern.to_string());
        }
    }
    patterns
}
