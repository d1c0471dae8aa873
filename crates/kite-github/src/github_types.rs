use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("github api {operation} rate limited after {attempts} attempt(s)")]
    RateLimited { operation: String, attempts: usize },
    #[error("github api {operation} failed with status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("github api {operation} request failed: {message}")]
    Transport { operation: String, message: String },
    #[error("failed to decode github {operation}: {message}")]
    Decode { operation: String, message: String },
    #[error("invalid repository {0}")]
    InvalidRepo(String),
    #[error("invalid github client configuration: {0}")]
    Config(String),
}

impl GithubError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub state: String,
    pub head_sha: String,
    pub head_ref: String,
    pub base_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub name: String,
    pub head_sha: String,
    pub head_branch: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
    pub html_url: String,
    pub pull_request_numbers: Vec<u64>,
}

impl WorkflowRun {
    pub fn is_failed(&self) -> bool {
        matches!(
            self.conclusion.as_deref(),
            Some("failure" | "timed_out" | "startup_failure")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
    pub html_url: Option<String>,
    pub failed_steps: Vec<String>,
}

impl WorkflowJob {
    pub fn is_failed(&self) -> bool {
        matches!(self.conclusion.as_deref(), Some("failure" | "timed_out"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLog {
    pub job_id: u64,
    pub job_name: String,
    pub failed_steps: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Plain-text logs of the failed jobs of one run.
pub struct RunLogs {
    pub run_id: u64,
    pub jobs: Vec<JobLog>,
}

impl RunLogs {
    pub fn combined_text(&self) -> String {
        self.jobs
            .iter()
            .map(|job| format!("##[job] {}\n{}", job.job_name, job.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub patch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoFile {
    pub path: String,
    pub sha: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawPullRequest {
    pub(crate) number: u64,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) html_url: String,
    #[serde(default)]
    pub(crate) state: String,
    pub(crate) head: RawBranchRef,
    pub(crate) base: RawBranchRef,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBranchRef {
    pub(crate) sha: String,
    #[serde(rename = "ref")]
    pub(crate) ref_name: String,
}

impl From<RawPullRequest> for PullRequest {
    fn from(raw: RawPullRequest) -> Self {
        Self {
            number: raw.number,
            title: raw.title,
            html_url: raw.html_url,
            state: raw.state,
            head_sha: raw.head.sha,
            head_ref: raw.head.ref_name,
            base_ref: raw.base.ref_name,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWorkflowRun {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) name: Option<String>,
    pub(crate) head_sha: String,
    #[serde(default)]
    pub(crate) head_branch: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
    #[serde(default)]
    pub(crate) conclusion: Option<String>,
    #[serde(default)]
    pub(crate) html_url: String,
    #[serde(default)]
    pub(crate) pull_requests: Vec<RawRunPullRequest>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawRunPullRequest {
    pub(crate) number: u64,
}

impl From<RawWorkflowRun> for WorkflowRun {
    fn from(raw: RawWorkflowRun) -> Self {
        Self {
            id: raw.id,
            name: raw.name.unwrap_or_default(),
            head_sha: raw.head_sha,
            head_branch: raw.head_branch,
            status: raw.status,
            conclusion: raw.conclusion,
            html_url: raw.html_url,
            pull_request_numbers: raw.pull_requests.into_iter().map(|pr| pr.number).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawWorkflowRunList {
    #[serde(default)]
    pub(crate) workflow_runs: Vec<RawWorkflowRun>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawJobList {
    #[serde(default)]
    pub(crate) total_count: u64,
    #[serde(default)]
    pub(crate) jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawJob {
    pub(crate) id: u64,
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) conclusion: Option<String>,
    #[serde(default)]
    pub(crate) html_url: Option<String>,
    #[serde(default)]
    pub(crate) steps: Vec<RawJobStep>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawJobStep {
    #[serde(default)]
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) conclusion: Option<String>,
}

impl From<RawJob> for WorkflowJob {
    fn from(raw: RawJob) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            conclusion: raw.conclusion,
            html_url: raw.html_url,
            failed_steps: raw
                .steps
                .into_iter()
                .filter(|step| step.conclusion.as_deref() == Some("failure"))
                .map(|step| step.name)
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawContent {
    pub(crate) path: String,
    pub(crate) sha: String,
    #[serde(default)]
    pub(crate) content: String,
    #[serde(default)]
    pub(crate) encoding: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawGitRef {
    pub(crate) object: RawGitObject,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawGitObject {
    pub(crate) sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawContentWrite {
    pub(crate) commit: RawGitObject,
}
