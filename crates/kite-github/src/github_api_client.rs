use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::github_transport_helpers::{
    classify_failure, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error, FailureClass,
};
use crate::github_types::{
    ChangedFile, CreatedPullRequest, GithubError, PullRequest, RawContent, RawContentWrite,
    RawGitRef, RawJobList, RawPullRequest, RawWorkflowRun, RawWorkflowRunList, RepoFile,
    WorkflowJob, WorkflowRun,
};
use crate::repo_ref::RepoRef;
use crate::source_host::SourceHost;

pub const DEFAULT_GITHUB_API_BASE: &str = "https://api.github.com";
const RETRY_ATTEMPT_HEADER: &str = "x-kite-retry-attempt";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    pub api_base: String,
    pub token: Option<String>,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            token: None,
            request_timeout_ms: 30_000,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            max_retry_delay_ms: 30_000,
        }
    }
}

#[derive(Clone)]
pub struct GithubApiClient {
    http: reqwest::Client,
    api_base: String,
    repo: RepoRef,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
    max_retry_delay_ms: u64,
}

impl GithubApiClient {
    pub fn new(config: GithubClientConfig, repo: RepoRef) -> Result<Self, GithubError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("kite-triage"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        if let Some(token) = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GithubError::Config("invalid github authorization header".into()))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| GithubError::Config(format!("failed to create github client: {error}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            repo,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
            max_retry_delay_ms: config.max_retry_delay_ms.max(1),
        })
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            self.repo.owner,
            self.repo.name,
            suffix.trim_start_matches('/')
        )
    }

    async fn send_with_retry<F>(
        &self,
        operation: &str,
        mut request_builder: F,
    ) -> Result<reqwest::Response, GithubError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = request_builder()
                .header(RETRY_ATTEMPT_HEADER, attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let headers = response.headers().clone();
                    let retry_after = parse_retry_after(&headers);
                    let body = response.text().await.unwrap_or_default();
                    let failure = classify_failure(status.as_u16(), &headers, &body);
                    if failure != FailureClass::Fatal && attempt < self.retry_max_attempts {
                        let delay = retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                            self.max_retry_delay_ms,
                        );
                        tracing::warn!(
                            operation,
                            status = status.as_u16(),
                            attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "github request backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if failure == FailureClass::RateLimited {
                        return Err(GithubError::RateLimited {
                            operation: operation.to_string(),
                            attempts: attempt,
                        });
                    }
                    return Err(GithubError::Status {
                        operation: operation.to_string(),
                        status: status.as_u16(),
                        body: truncate_for_error(&body, 800),
                    });
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            None,
                            self.max_retry_delay_ms,
                        ))
                        .await;
                        continue;
                    }
                    return Err(GithubError::Transport {
                        operation: operation.to_string(),
                        message: error.without_url().to_string(),
                    });
                }
            }
        }
    }

    async fn request_json<T, F>(&self, operation: &str, request_builder: F) -> Result<T, GithubError>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, request_builder).await?;
        response
            .json::<T>()
            .await
            .map_err(|error| GithubError::Decode {
                operation: operation.to_string(),
                message: error.without_url().to_string(),
            })
    }

    async fn request_text<F>(&self, operation: &str, request_builder: F) -> Result<String, GithubError>
    where
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let response = self.send_with_retry(operation, request_builder).await?;
        response.text().await.map_err(|error| GithubError::Decode {
            operation: operation.to_string(),
            message: error.without_url().to_string(),
        })
    }
}

fn decode_base64_content(operation: &str, raw: &RawContent) -> Result<String, GithubError> {
    if !raw.encoding.is_empty() && raw.encoding != "base64" {
        return Err(GithubError::Decode {
            operation: operation.to_string(),
            message: format!("unsupported content encoding '{}'", raw.encoding),
        });
    }
    let compact = raw
        .content
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|error| GithubError::Decode {
            operation: operation.to_string(),
            message: error.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|_| GithubError::Decode {
        operation: operation.to_string(),
        message: format!("{} is not valid utf-8", raw.path),
    })
}

#[async_trait]
impl SourceHost for GithubApiClient {
    fn repo(&self) -> &RepoRef {
        &self.repo
    }

    async fn get_pull_request(&self, number: u64) -> Result<PullRequest, GithubError> {
        let url = self.repo_url(&format!("pulls/{number}"));
        let raw: RawPullRequest = self
            .request_json("get pull request", || self.http.get(&url))
            .await?;
        Ok(raw.into())
    }

    async fn list_changed_files(&self, number: u64) -> Result<Vec<ChangedFile>, GithubError> {
        let url = self.repo_url(&format!("pulls/{number}/files"));
        let mut page = 1_u32;
        let mut rows = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: Vec<ChangedFile> = self
                .request_json("list changed files", || {
                    self.http.get(&url).query(&[
                        ("per_page", "100"),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.len();
            rows.extend(chunk);
            if chunk_len < PAGE_SIZE {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(rows)
    }

    async fn get_pull_request_diff(&self, number: u64) -> Result<String, GithubError> {
        let url = self.repo_url(&format!("pulls/{number}"));
        self.request_text("get pull request diff", || {
            self.http
                .get(&url)
                .header(reqwest::header::ACCEPT, "application/vnd.github.v3.diff")
        })
        .await
    }

    async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun, GithubError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}"));
        let raw: RawWorkflowRun = self
            .request_json("get workflow run", || self.http.get(&url))
            .await?;
        Ok(raw.into())
    }

    async fn find_failed_run_for_sha(
        &self,
        sha: &str,
    ) -> Result<Option<WorkflowRun>, GithubError> {
        let url = self.repo_url("actions/runs");
        let list: RawWorkflowRunList = self
            .request_json("list workflow runs", || {
                self.http
                    .get(&url)
                    .query(&[("head_sha", sha), ("per_page", "20")])
            })
            .await?;
        Ok(list
            .workflow_runs
            .into_iter()
            .map(WorkflowRun::from)
            .find(WorkflowRun::is_failed))
    }

    async fn list_failed_jobs(&self, run_id: u64) -> Result<Vec<WorkflowJob>, GithubError> {
        let url = self.repo_url(&format!("actions/runs/{run_id}/jobs"));
        let mut page = 1_u32;
        let mut jobs = Vec::new();
        loop {
            let page_value = page.to_string();
            let chunk: RawJobList = self
                .request_json("list workflow jobs", || {
                    self.http.get(&url).query(&[
                        ("filter", "latest"),
                        ("per_page", "100"),
                        ("page", page_value.as_str()),
                    ])
                })
                .await?;
            let chunk_len = chunk.jobs.len();
            jobs.extend(chunk.jobs.into_iter().map(WorkflowJob::from));
            if chunk_len < PAGE_SIZE || jobs.len() as u64 >= chunk.total_count {
                break;
            }
            page = page.saturating_add(1);
        }
        Ok(jobs.into_iter().filter(WorkflowJob::is_failed).collect())
    }

    async fn get_job_log(&self, job_id: u64) -> Result<String, GithubError> {
        let url = self.repo_url(&format!("actions/jobs/{job_id}/logs"));
        self.request_text("download job log", || self.http.get(&url))
            .await
    }

    async fn get_file(&self, path: &str, git_ref: &str) -> Result<Option<RepoFile>, GithubError> {
        let operation = "get file contents";
        let url = self.repo_url(&format!("contents/{}", path.trim_start_matches('/')));
        let raw = match self
            .request_json::<RawContent, _>(operation, || {
                self.http.get(&url).query(&[("ref", git_ref)])
            })
            .await
        {
            Ok(raw) => raw,
            Err(error) if error.is_not_found() => return Ok(None),
            Err(error) => return Err(error),
        };
        let content = decode_base64_content(operation, &raw)?;
        Ok(Some(RepoFile {
            path: raw.path,
            sha: raw.sha,
            content,
        }))
    }

    async fn get_branch_sha(&self, branch: &str) -> Result<String, GithubError> {
        let url = self.repo_url(&format!("git/ref/heads/{branch}"));
        let raw: RawGitRef = self
            .request_json("get branch ref", || self.http.get(&url))
            .await?;
        Ok(raw.object.sha)
    }

    async fn create_branch(&self, branch: &str, from_sha: &str) -> Result<(), GithubError> {
        let url = self.repo_url("git/refs");
        let payload = json!({ "ref": format!("refs/heads/{branch}"), "sha": from_sha });
        self.send_with_retry("create branch", || self.http.post(&url).json(&payload))
            .await?;
        tracing::info!(repo = %self.repo, branch, "created branch");
        Ok(())
    }

    async fn put_file(
        &self,
        branch: &str,
        path: &str,
        content: &str,
        message: &str,
        previous_sha: Option<&str>,
    ) -> Result<String, GithubError> {
        let url = self.repo_url(&format!("contents/{}", path.trim_start_matches('/')));
        let mut payload = json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = previous_sha {
            payload["sha"] = json!(sha);
        }
        let written: RawContentWrite = self
            .request_json("commit file", || self.http.put(&url).json(&payload))
            .await?;
        Ok(written.commit.sha)
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<CreatedPullRequest, GithubError> {
        let url = self.repo_url("pulls");
        let payload = json!({
            "title": title,
            "head": head,
            "base": base,
            "body": body,
            "maintainer_can_modify": true,
        });
        self.request_json("create pull request", || self.http.post(&url).json(&payload))
            .await
    }

    async fn request_reviewers(
        &self,
        number: u64,
        reviewers: &[String],
    ) -> Result<(), GithubError> {
        if reviewers.is_empty() {
            return Ok(());
        }
        let url = self.repo_url(&format!("pulls/{number}/requested_reviewers"));
        let payload = json!({ "reviewers": reviewers });
        self.send_with_retry("request reviewers", || self.http.post(&url).json(&payload))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client(server: &MockServer, attempts: usize) -> GithubApiClient {
        GithubApiClient::new(
            GithubClientConfig {
                api_base: server.base_url(),
                token: Some("ghp_testtoken".to_string()),
                request_timeout_ms: 5_000,
                retry_max_attempts: attempts,
                retry_base_delay_ms: 1,
                max_retry_delay_ms: 5,
            },
            RepoRef::parse("octo/widgets").expect("repo"),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn functional_get_pull_request_maps_head_and_base() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/pulls/42")
                .header("authorization", "Bearer ghp_testtoken");
            then.status(200).json_body(serde_json::json!({
                "number": 42,
                "title": "Fix parser",
                "html_url": "https://github.com/octo/widgets/pull/42",
                "state": "open",
                "head": {"sha": "abc123", "ref": "feature"},
                "base": {"sha": "def456", "ref": "main"}
            }));
        });
        let pr = client(&server, 1).get_pull_request(42).await.expect("pr");
        mock.assert();
        assert_eq!(pr.head_sha, "abc123");
        assert_eq!(pr.head_ref, "feature");
        assert_eq!(pr.base_ref, "main");
    }

    #[tokio::test]
    async fn integration_rate_limited_request_retries_then_succeeds() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/actions/runs/99")
                .header(RETRY_ATTEMPT_HEADER, "0");
            then.status(429).header("retry-after", "0");
        });
        let ok = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/actions/runs/99")
                .header(RETRY_ATTEMPT_HEADER, "1");
            then.status(200).json_body(serde_json::json!({
                "id": 99,
                "name": "ci",
                "head_sha": "abc",
                "conclusion": "failure",
                "html_url": "https://github.com/octo/widgets/actions/runs/99",
                "pull_requests": [{"number": 7}]
            }));
        });
        let run = client(&server, 3).get_workflow_run(99).await.expect("run");
        limited.assert();
        ok.assert();
        assert!(run.is_failed());
        assert_eq!(run.pull_request_numbers, vec![7]);
    }

    #[tokio::test]
    async fn functional_exhausted_rate_limit_surfaces_rate_limited() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(GET).path("/repos/octo/widgets/pulls/1");
            then.status(403)
                .header("x-ratelimit-remaining", "0")
                .body("API rate limit exceeded");
        });
        let error = client(&server, 3)
            .get_pull_request(1)
            .await
            .expect_err("rate limited");
        limited.assert_calls(3);
        assert!(matches!(
            error,
            GithubError::RateLimited { attempts: 3, .. }
        ));
    }

    #[tokio::test]
    async fn regression_secondary_rate_limit_body_is_rate_limited() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/octo/widgets/pulls/1");
            then.status(403)
                .body("You have exceeded a secondary rate limit. Please wait.");
        });
        let error = client(&server, 2)
            .get_pull_request(1)
            .await
            .expect_err("secondary limit");
        assert!(error.is_rate_limited());
    }

    #[tokio::test]
    async fn regression_client_errors_are_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/repos/octo/widgets/pulls/5");
            then.status(422).body("Validation Failed");
        });
        let error = client(&server, 4)
            .get_pull_request(5)
            .await
            .expect_err("422");
        mock.assert_calls(1);
        assert!(matches!(error, GithubError::Status { status: 422, .. }));
    }

    #[tokio::test]
    async fn functional_get_logs_downloads_failed_jobs_only() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/actions/runs/10/jobs")
                .query_param("filter", "latest");
            then.status(200).json_body(serde_json::json!({
                "total_count": 2,
                "jobs": [
                    {"id": 1, "name": "lint", "conclusion": "success", "steps": []},
                    {"id": 2, "name": "test", "conclusion": "failure",
                     "steps": [{"name": "cargo test", "conclusion": "failure"}]}
                ]
            }));
        });
        let log = server.mock(|when, then| {
            when.method(GET).path("/repos/octo/widgets/actions/jobs/2/logs");
            then.status(200).body("error: test failed");
        });
        let logs = client(&server, 1).get_logs(10).await.expect("logs");
        log.assert();
        assert_eq!(logs.jobs.len(), 1);
        assert_eq!(logs.jobs[0].job_name, "test");
        assert_eq!(logs.jobs[0].failed_steps, vec!["cargo test".to_string()]);
        assert!(logs.combined_text().contains("error: test failed"));
    }

    #[tokio::test]
    async fn functional_get_file_decodes_base64_and_maps_missing_to_none() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/octo/widgets/contents/src/lib.rs")
                .query_param("ref", "abc");
            then.status(200).json_body(serde_json::json!({
                "path": "src/lib.rs",
                "sha": "blob1",
                "encoding": "base64",
                "content": "Zm4gbWFp\nbigpIHt9\n"
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/repos/octo/widgets/contents/missing.txt");
            then.status(404).body("{\"message\":\"Not Found\"}");
        });
        let github = client(&server, 1);
        let file = github
            .get_file("src/lib.rs", "abc")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(file.content, "fn main() {}");
        assert_eq!(file.sha, "blob1");
        assert!(github.get_file("missing.txt", "abc").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn functional_write_calls_send_expected_payloads() {
        let server = MockServer::start();
        let branch = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/octo/widgets/git/refs")
                .json_body(serde_json::json!({"ref": "refs/heads/triage/fix-1", "sha": "abc"}));
            then.status(201).json_body(serde_json::json!({"ref": "refs/heads/triage/fix-1"}));
        });
        let commit = server.mock(|when, then| {
            when.method(PUT)
                .path("/repos/octo/widgets/contents/tests/test_math.py")
                .json_body_includes(
                    serde_json::json!({"branch": "triage/fix-1", "sha": "blob1"}).to_string(),
                );
            then.status(200).json_body(serde_json::json!({"commit": {"sha": "c0ffee"}}));
        });
        let pr = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/octo/widgets/pulls")
                .json_body_includes(
                    serde_json::json!({"head": "triage/fix-1", "base": "main"}).to_string(),
                );
            then.status(201).json_body(serde_json::json!({
                "number": 77,
                "html_url": "https://github.com/octo/widgets/pull/77"
            }));
        });
        let reviewers = server.mock(|when, then| {
            when.method(POST)
                .path("/repos/octo/widgets/pulls/77/requested_reviewers")
                .json_body(serde_json::json!({"reviewers": ["alice"]}));
            then.status(201).json_body(serde_json::json!({}));
        });

        let github = client(&server, 1);
        github.create_branch("triage/fix-1", "abc").await.expect("branch");
        let commit_sha = github
            .put_file("triage/fix-1", "tests/test_math.py", "x = 1\n", "fix", Some("blob1"))
            .await
            .expect("commit");
        let created = github
            .create_pull_request("triage/fix-1", "main", "Fix", "body")
            .await
            .expect("pr");
        github
            .request_reviewers(created.number, &["alice".to_string()])
            .await
            .expect("reviewers");

        branch.assert();
        commit.assert();
        pr.assert();
        reviewers.assert();
        assert_eq!(commit_sha, "c0ffee");
        assert_eq!(created.number, 77);
    }
}
