//! Rate-limit-aware access to the source-hosting API used by failure triage.

pub mod github_api_client;
pub mod github_transport_helpers;
pub mod github_types;
pub mod repo_ref;
pub mod source_host;

pub use github_api_client::{GithubApiClient, GithubClientConfig, DEFAULT_GITHUB_API_BASE};
pub use github_types::{
    ChangedFile, CreatedPullRequest, GithubError, JobLog, PullRequest, RepoFile, RunLogs,
    WorkflowJob, WorkflowRun,
};
pub use repo_ref::RepoRef;
pub use source_host::SourceHost;
