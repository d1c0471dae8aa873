use async_trait::async_trait;

use crate::github_types::{
    ChangedFile, CreatedPullRequest, GithubError, JobLog, PullRequest, RepoFile, RunLogs,
    WorkflowJob, WorkflowRun,
};
use crate::repo_ref::RepoRef;

/// Source-hosting operations triage needs, scoped to one repository.
///
/// Implementations back off on rate limits and surface `GithubError::RateLimited`
/// once their retry budget is spent.
#[async_trait]
pub trait SourceHost: Send + Sync {
    fn repo(&self) -> &RepoRef;

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, GithubError>;
    async fn list_changed_files(&self, number: u64) -> Result<Vec<ChangedFile>, GithubError>;
    async fn get_pull_request_diff(&self, number: u64) -> Result<String, GithubError>;

    async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun, GithubError>;
    /// Most recent failed run whose head commit is `sha`.
    async fn find_failed_run_for_sha(&self, sha: &str)
        -> Result<Option<WorkflowRun>, GithubError>;
    async fn list_failed_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>, GithubError>;
    async fn get_job_log(&self, job_id: u64) -> Result<String, GithubError>;

    /// Plain-text logs of every failed job in the run.
    async fn get_logs(&self, run_id: u64) -> Result<RunLogs, GithubError> {
        let mut jobs = Vec::new();
        for job in self.list_failed_jobs(run_id).await? {
            let text = self.get_job_log(job.id).await?;
            jobs.push(JobLog {
                job_id: job.id,
                job_name: job.name,
                failed_steps: job.failed_steps,
                text,
            });
        }
        Ok(RunLogs { run_id, jobs })
    }

    /// File contents at `git_ref`, or `None` when the path does not exist there.
    async fn get_file(&self, path: &str, git_ref: &str) -> Result<Option<RepoFile>, GithubError>;

    async fn get_branch_sha(&self, branch: &str) -> Result<String, GithubError>;
    async fn create_branch(&self, branch: &str, from_sha: &str) -> Result<(), GithubError>;
    /// Commits `content` to `path` on `branch`; returns the new commit sha.
    async fn put_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        previous_sha: Option<&str>,
    ) -> Result<String, GithubError>;
    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPullRequest, GithubError>;
    async fn request_reviewers(&self, number: u64, reviewers: &[String])
        -> Result<(), GithubError>;
}
