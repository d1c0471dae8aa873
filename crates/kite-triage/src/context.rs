use kite_github::{GithubError, RunLogs, SourceHost, WorkflowRun};

use crate::triage_types::{FailureRef, StageRecord, StageStatus, TriageContext};

pub const FETCH_STAGE: &str = "fetch_context";

#[derive(Debug, Default)]
struct FetchIssues {
    failed: Vec<String>,
    degraded: Vec<String>,
}

impl FetchIssues {
    fn record(&mut self, what: &str, error: &GithubError, required: bool) {
        let line = format!("{what}: {error}");
        tracing::warn!(stage = FETCH_STAGE, error = %error, "{what}");
        if required || error.is_rate_limited() {
            self.failed.push(line);
        } else {
            self.degraded.push(line);
        }
    }

    fn into_stage(self) -> StageRecord {
        let (status, detail) = if !self.failed.is_empty() {
            let mut lines = self.failed;
            lines.extend(self.degraded);
            (StageStatus::Failed, lines.join("; "))
        } else if !self.degraded.is_empty() {
            (StageStatus::Degraded, self.degraded.join("; "))
        } else {
            (StageStatus::Ok, "fetched logs, diff, and changed files".to_string())
        };
        StageRecord {
            stage: FETCH_STAGE.to_string(),
            status,
            detail,
        }
    }
}

/// Gathers logs, diff, and changed files for `reference`, keeping whatever succeeds.
pub async fn fetch_context(
    host: &dyn SourceHost,
    reference: FailureRef,
) -> (TriageContext, StageRecord) {
    let mut context = TriageContext::default();
    let mut issues = FetchIssues::default();
    match reference {
        FailureRef::PullRequest(number) => {
            fetch_pull_request_context(host, number, &mut context, &mut issues).await
        }
        FailureRef::WorkflowRun(run_id) => {
            fetch_run_context(host, run_id, &mut context, &mut issues).await
        }
    }
    (context, issues.into_stage())
}

async fn fetch_pull_request_context(
    host: &dyn SourceHost,
    number: u64,
    context: &mut TriageContext,
    issues: &mut FetchIssues,
) {
    context.pull_request = Some(number);
    let pull_request = match host.get_pull_request(number).await {
        Ok(pull_request) => pull_request,
        Err(error) => {
            issues.record(&format!("could not load pull request #{number}"), &error, true);
            return;
        }
    };
    context.pull_request_url = Some(pull_request.html_url.clone());
    context.commit_sha = Some(pull_request.head_sha.clone());
    context.head_ref = Some(pull_request.head_ref.clone());
    context.base_ref = Some(pull_request.base_ref.clone());

    fetch_change_set(host, number, context, issues).await;

    match host.find_failed_run_for_sha(&pull_request.head_sha).await {
        Ok(Some(run)) => fetch_run_logs(host, &run, context, issues).await,
        Ok(None) => issues.degraded.push(format!(
            "no failed workflow run found for head {}",
            short_sha(&pull_request.head_sha)
        )),
        Err(error) => issues.record("could not look up workflow runs", &error, true),
    }
}

async fn fetch_run_context(
    host: &dyn SourceHost,
    run_id: u64,
    context: &mut TriageContext,
    issues: &mut FetchIssues,
) {
    context.run_id = Some(run_id);
    let run = match host.get_workflow_run(run_id).await {
        Ok(run) => run,
        Err(error) => {
            issues.record(&format!("could not load workflow run {run_id}"), &error, true);
            return;
        }
    };
    context.commit_sha = Some(run.head_sha.clone());
    context.head_ref = run.head_branch.clone();
    fetch_run_logs(host, &run, context, issues).await;

    if let Some(number) = run.pull_request_numbers.first().copied() {
        context.pull_request = Some(number);
        match host.get_pull_request(number).await {
            Ok(pull_request) => {
                context.pull_request_url = Some(pull_request.html_url);
                context.head_ref = Some(pull_request.head_ref);
                context.base_ref = Some(pull_request.base_ref);
            }
            Err(error) => {
                issues.record(&format!("could not load pull request #{number}"), &error, false)
            }
        }
        fetch_change_set(host, number, context, issues).await;
    }
}

async fn fetch_change_set(
    host: &dyn SourceHost,
    number: u64,
    context: &mut TriageContext,
    issues: &mut FetchIssues,
) {
    match host.list_changed_files(number).await {
        Ok(files) => context.changed_files = files,
        Err(error) => issues.record("could not list changed files", &error, false),
    }
    match host.get_pull_request_diff(number).await {
        Ok(diff) => context.diff = Some(diff),
        Err(error) => issues.record("could not fetch pull request diff", &error, false),
    }
}

async fn fetch_run_logs(
    host: &dyn SourceHost,
    run: &WorkflowRun,
    context: &mut TriageContext,
    issues: &mut FetchIssues,
) {
    context.run_id = Some(run.id);
    context.run_url = Some(run.html_url.clone());
    match host.get_logs(run.id).await {
        Ok(logs) => apply_logs(logs, context, issues),
        Err(error) => issues.record(&format!("could not fetch logs for run {}", run.id), &error, true),
    }
}

fn apply_logs(logs: RunLogs, context: &mut TriageContext, issues: &mut FetchIssues) {
    if logs.jobs.is_empty() {
        issues
            .degraded
            .push(format!("workflow run {} has no failed jobs", logs.run_id));
    }
    context.failed_jobs = logs.jobs.iter().map(|job| job.job_name.clone()).collect();
    context.log_text = logs.combined_text();
    tracing::debug!(
        stage = FETCH_STAGE,
        run_id = logs.run_id,
        log = %kite_safety::redact_secrets(&context.log_text),
        "fetched failed job logs"
    );
}

pub(crate) fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}
