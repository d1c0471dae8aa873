use kite_github::{GithubError, SourceHost};
use kite_safety::{redact_secrets, redact_truncated};
use sha2::{Digest, Sha256};

use crate::context::short_sha;
use crate::triage_types::{
    FailureRecord, FixProposal, PullRequestOutcome, RootCause, TriageContext,
};

const BRANCH_HASH_CHARS: usize = 8;
const MAX_TITLE_CHARS: usize = 100;

/// `<prefix><8 hex chars>` derived from the run's correlation id and the diff.
pub fn fix_branch_name(prefix: &str, correlation_id: &str, diff: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(correlation_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(diff.as_bytes());
    let digest = hasher.finalize();
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("{prefix}{}", &hex[..BRANCH_HASH_CHARS])
}

#[derive(Debug, Clone)]
pub struct FixPullRequest<'a> {
    pub proposal: &'a FixProposal,
    pub context: &'a TriageContext,
    pub root_cause: &'a RootCause,
    pub failures: &'a [FailureRecord],
    pub correlation_id: &'a str,
    pub branch_prefix: &'a str,
    pub reviewers: &'a [String],
}

fn pull_request_title(proposal: &FixProposal) -> String {
    let title = redact_secrets(&format!("triage: {}", proposal.summary));
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title;
    }
    redact_truncated(&title, MAX_TITLE_CHARS.saturating_sub(3))
}

/// Structured body in problem, cause, change, test plan order.
pub fn render_pull_request_body(request: &FixPullRequest<'_>) -> String {
    let mut body = String::from("## Problem\n\n");
    let failing = request
        .failures
        .iter()
        .filter_map(|failure| failure.test_name.as_deref())
        .collect::<Vec<_>>();
    if failing.is_empty() {
        body.push_str("CI failed");
    } else {
        body.push_str(&format!("Failing: `{}`", failing.join("`, `")));
    }
    if let Some(sha) = request.context.commit_sha.as_deref() {
        body.push_str(&format!(" at {}", short_sha(sha)));
    }
    body.push_str(".\n");
    if let Some(run_url) = request.context.run_url.as_deref() {
        body.push_str(&format!("\nWorkflow run: {run_url}\n"));
    }

    body.push_str(&format!(
        "\n## Cause\n\n`{}` ({} confidence): {}\n",
        request.root_cause.category,
        request.root_cause.confidence.as_str(),
        request.root_cause.evidence
    ));

    body.push_str(&format!("\n## Change\n\n{}\n\n", request.proposal.summary));
    for path in &request.proposal.target_files {
        body.push_str(&format!("- `{path}`\n"));
    }

    body.push_str(&format!("\n## Test plan\n\n{}\n", request.proposal.test_plan));
    body.push_str(&format!(
        "\n---\nOpened by kite triage, correlation id `{}`.\n",
        request.correlation_id
    ));
    redact_secrets(&body)
}

/// Creates the fix branch, commits the proposal's edits, and opens the pull request.
///
/// Callers must only invoke this after authorization and a passing safety gate.
pub async fn open_fix_pull_request(
    host: &dyn SourceHost,
    request: &FixPullRequest<'_>,
) -> Result<PullRequestOutcome, GithubError> {
    let Some(diff) = request.proposal.diff.as_deref() else {
        return Ok(PullRequestOutcome::skipped("proposal has no diff"));
    };
    if request.proposal.edits.is_empty() {
        return Ok(PullRequestOutcome::skipped(
            "proposal has no file edits to commit",
        ));
    }
    let (Some(from_sha), Some(base)) = (
        request.context.commit_sha.as_deref(),
        request
            .context
            .head_ref
            .as_deref()
            .or(request.context.base_ref.as_deref()),
    ) else {
        return Ok(PullRequestOutcome::skipped(
            "no branch or commit to base the fix on",
        ));
    };

    let branch = fix_branch_name(request.branch_prefix, request.correlation_id, diff);
    host.create_branch(&branch, from_sha).await?;
    for edit in &request.proposal.edits {
        host.put_file(
            &branch,
            &edit.path,
            &edit.new_content,
            &format!("triage: update {}", edit.path),
            edit.previous_sha.as_deref(),
        )
        .await?;
    }
    let created = host
        .create_pull_request(
            &branch,
            base,
            &pull_request_title(request.proposal),
            &render_pull_request_body(request),
        )
        .await?;
    tracing::info!(
        number = created.number,
        branch = %branch,
        correlation_id = request.correlation_id,
        "opened fix pull request"
    );

    let mut warnings = Vec::new();
    if let Err(error) = host.request_reviewers(created.number, request.reviewers).await {
        tracing::warn!(number = created.number, error = %error, "reviewer request failed");
        warnings.push(format!("could not request reviewers: {error}"));
    }
    Ok(PullRequestOutcome {
        opened: true,
        branch: Some(branch),
        number: Some(created.number),
        url: Some(created.html_url),
        skipped_reason: None,
        warnings,
    })
}
