//! The triage run: resolve, fetch, extract, classify, propose, gate, open PR, emit.
//!
//! Only an unresolvable reference or an artifact write failure aborts the run. Every other
//! stage failure is recorded in the report's stage ledger and the run continues with what
//! it has, so artifacts are always emitted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{SecondsFormat, Utc};
use kite_core::{current_unix_timestamp_ms, CancellationToken};
use kite_github::SourceHost;
use kite_safety::SecretRedactor;
use sha2::{Digest, Sha256};

use crate::artifacts::{emit_artifacts, ArtifactPaths};
use crate::classify::classify_root_cause;
use crate::context::{fetch_context, FETCH_STAGE};
use crate::extract::{extract_failures, GENERIC_FAILURE_MESSAGE};
use crate::fix_pr::{fix_branch_name, open_fix_pull_request, FixPullRequest};
use crate::propose::{playbook, propose_fix, ProposalSettings};
use crate::reference::resolve_failure_ref;
use crate::safety_gate::{run_safety_gate, SafetyGateRequest};
use crate::triage_config::TriageConfig;
use crate::triage_types::{
    Confidence, GateOutcome, PullRequestOutcome, RootCauseCategory, StageRecord, StageStatus,
    TriageContext, TriageError, TriageReport,
};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_WARNINGS: i32 = 2;
pub const EXIT_INTERRUPTED: i32 = 130;

pub const EXTRACT_STAGE: &str = "extract_failures";
pub const CLASSIFY_STAGE: &str = "classify_root_cause";
pub const PROPOSE_STAGE: &str = "propose_fix";
pub const GATE_STAGE: &str = "safety_gate";
pub const PULL_REQUEST_STAGE: &str = "fix_pull_request";
pub const EMIT_STAGE: &str = "emit_artifacts";

const NOT_REQUESTED: &str = "automatic fixing was not requested";
pub const RUN_INTERRUPTED: &str = "run interrupted";

#[derive(Debug, Clone)]
pub struct TriageRequest {
    pub failure_ref: String,
    pub auto_fix: bool,
    pub dry_run: bool,
    /// Parent directory; each run writes into `<output_dir>/<correlation id>/`.
    pub output_dir: PathBuf,
    pub workdir: PathBuf,
    /// Added to the configured reviewers.
    pub reviewers: Vec<String>,
    pub cancellation: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct TriageOutcome {
    pub report: TriageReport,
    pub artifacts: ArtifactPaths,
}

impl TriageOutcome {
    pub fn exit_code(&self) -> i32 {
        let report = &self.report;
        if report.interrupted {
            return EXIT_INTERRUPTED;
        }
        if report.incomplete {
            return EXIT_FATAL;
        }
        let gate_downgrade = report.auto_fix && report.gate.evaluated && !report.gate.passed;
        if report.root_cause.confidence != Confidence::High
            || report.has_degraded_stage()
            || gate_downgrade
        {
            EXIT_WARNINGS
        } else {
            EXIT_SUCCESS
        }
    }
}

/// `triage-<unix ms>-<8 hex chars>`, unique per process invocation.
pub fn new_correlation_id(repo: &str, failure_ref: &str, now_unix_ms: u64) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(repo.as_bytes());
    hasher.update(b"\n");
    hasher.update(failure_ref.as_bytes());
    hasher.update(now_unix_ms.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    let digest = hasher.finalize();
    let hash = digest
        .iter()
        .take(4)
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("triage-{now_unix_ms}-{hash}")
}

fn stage(name: &str, status: StageStatus, detail: impl Into<String>) -> StageRecord {
    StageRecord {
        stage: name.to_string(),
        status,
        detail: detail.into(),
    }
}

/// Runs one triage against `host`'s repository.
///
/// Cancelling `request.cancellation` skips every stage that has not started and kills a
/// running gate check; a pull request write sequence already under way is finished. The
/// partial report is emitted either way.
pub async fn run_triage(
    host: &dyn SourceHost,
    config: &TriageConfig,
    request: &TriageRequest,
    redactor: &SecretRedactor,
) -> Result<TriageOutcome, TriageError> {
    let reference = resolve_failure_ref(&request.failure_ref, host.repo())?;
    let repo = host.repo().as_slug();
    let correlation_id =
        new_correlation_id(&repo, &request.failure_ref, current_unix_timestamp_ms());
    tracing::info!(correlation_id = %correlation_id, repo = %repo, reference = %reference, "triage started");

    let mut stages = vec![stage(
        "resolve_reference",
        StageStatus::Ok,
        reference.to_string(),
    )];
    let record = |stages: &mut Vec<StageRecord>, entry: StageRecord| {
        tracing::info!(
            correlation_id = %correlation_id,
            stage = %entry.stage,
            status = entry.status.as_str(),
            detail = %redactor.redact(&entry.detail),
            "triage stage finished"
        );
        stages.push(entry);
    };
    let cancellation = &request.cancellation;
    let mut interrupted = false;
    let mut stop_before = |stages: &mut Vec<StageRecord>, name: &str| {
        if !interrupted && cancellation.is_cancelled() {
            tracing::warn!(correlation_id = %correlation_id, stage = name, "triage interrupted");
            interrupted = true;
        }
        if interrupted {
            record(stages, stage(name, StageStatus::Skipped, RUN_INTERRUPTED));
        }
        interrupted
    };

    let fetched = if stop_before(&mut stages, FETCH_STAGE) {
        None
    } else {
        cancellation
            .run_until_cancelled(fetch_context(host, reference))
            .await
    };
    let context = match fetched {
        Some((context, fetch_stage)) => {
            record(&mut stages, fetch_stage);
            context
        }
        None => {
            if !stages.iter().any(|entry| entry.stage == FETCH_STAGE) {
                stop_before(&mut stages, FETCH_STAGE);
            }
            TriageContext::default()
        }
    };

    let failures = if stop_before(&mut stages, EXTRACT_STAGE) {
        Vec::new()
    } else if context.log_text.trim().is_empty() {
        record(
            &mut stages,
            stage(EXTRACT_STAGE, StageStatus::Skipped, "no log text to analyze"),
        );
        Vec::new()
    } else {
        let failures = extract_failures(&context.log_text, config.analysis.excerpt_lines);
        let generic_only = failures.len() == 1 && failures[0].error_message == GENERIC_FAILURE_MESSAGE;
        record(
            &mut stages,
            if generic_only {
                stage(
                    EXTRACT_STAGE,
                    StageStatus::Degraded,
                    "no recognized failure signature; kept the raw log tail",
                )
            } else {
                stage(
                    EXTRACT_STAGE,
                    StageStatus::Ok,
                    format!("{} failure record(s)", failures.len()),
                )
            },
        );
        failures
    };

    let root_cause = if stop_before(&mut stages, CLASSIFY_STAGE) {
        classify_root_cause(&[], redactor)
    } else {
        let root_cause = classify_root_cause(&failures, redactor);
        record(
            &mut stages,
            stage(
                CLASSIFY_STAGE,
                if root_cause.category == RootCauseCategory::Unknown {
                    StageStatus::Degraded
                } else {
                    StageStatus::Ok
                },
                format!(
                    "{} ({} confidence, {} hypothesis(es))",
                    root_cause.category,
                    root_cause.confidence.as_str(),
                    root_cause.hypotheses.len()
                ),
            ),
        );
        root_cause
    };

    let settings = ProposalSettings {
        extra_sensitive_markers: config.analysis.extra_sensitive_markers.clone(),
    };
    let proposed = if stop_before(&mut stages, PROPOSE_STAGE) {
        None
    } else {
        cancellation
            .run_until_cancelled(propose_fix(host, &context, &failures, &root_cause, &settings))
            .await
    };
    let mut proposal = match proposed {
        Some((proposal, notes)) => {
            record(
                &mut stages,
                stage(
                    PROPOSE_STAGE,
                    if notes.is_empty() {
                        StageStatus::Ok
                    } else {
                        StageStatus::Degraded
                    },
                    if notes.is_empty() {
                        format!(
                            "{} with {} risk",
                            proposal.kind.as_str(),
                            proposal.risk_level.as_str()
                        )
                    } else {
                        notes.join("; ")
                    },
                ),
            );
            proposal
        }
        None => {
            if !stages.iter().any(|entry| entry.stage == PROPOSE_STAGE) {
                stop_before(&mut stages, PROPOSE_STAGE);
            }
            playbook(&root_cause, &context, &failures, &host.repo().name)
        }
    };

    let artifact_dir = request.output_dir.join(&correlation_id);
    let gate = if !request.auto_fix {
        record(&mut stages, stage(GATE_STAGE, StageStatus::Skipped, NOT_REQUESTED));
        GateOutcome::default()
    } else if stop_before(&mut stages, GATE_STAGE) {
        GateOutcome::default()
    } else {
        let changed_paths = context
            .changed_files
            .iter()
            .map(|file| file.filename.clone())
            .collect::<Vec<_>>();
        let gate_proposal = proposal.clone();
        let checks = config.checks.clone();
        let workdir = request.workdir.clone();
        let scratch_dir = artifact_dir.join("gate");
        let gate_cancellation = cancellation.clone();
        let evaluated = tokio::task::spawn_blocking(move || {
            run_safety_gate(&SafetyGateRequest {
                proposal: &gate_proposal,
                checks: &checks,
                workdir: &workdir,
                scratch_dir: &scratch_dir,
                changed_paths: &changed_paths,
                cancellation: gate_cancellation,
            })
        })
        .await;
        let gate = evaluated.unwrap_or_else(|error| GateOutcome {
            evaluated: true,
            passed: false,
            reasons: vec![format!("safety gate did not complete: {error}")],
            checks: Vec::new(),
        });
        if gate.passed {
            record(
                &mut stages,
                stage(GATE_STAGE, StageStatus::Ok, "all checks passed"),
            );
        } else {
            record(
                &mut stages,
                stage(
                    GATE_STAGE,
                    StageStatus::Degraded,
                    format!("blocked: {}", gate.reasons.join("; ")),
                ),
            );
            if proposal.diff.is_some() {
                proposal = proposal.into_playbook("safety gate blocked automatic application");
            }
        }
        gate
    };

    let mut reviewers = config.fix.reviewers.clone();
    for reviewer in &request.reviewers {
        if !reviewers.contains(reviewer) {
            reviewers.push(reviewer.clone());
        }
    }
    let pull_request = if !request.auto_fix {
        PullRequestOutcome::skipped(NOT_REQUESTED)
    } else if stop_before(&mut stages, PULL_REQUEST_STAGE) {
        PullRequestOutcome::skipped(RUN_INTERRUPTED)
    } else if !gate.passed {
        PullRequestOutcome::skipped("safety gate did not pass")
    } else if request.dry_run {
        let branch = fix_branch_name(
            &config.fix.branch_prefix,
            &correlation_id,
            proposal.diff.as_deref().unwrap_or_default(),
        );
        PullRequestOutcome::skipped(format!("dry run; would open a pull request from {branch}"))
    } else {
        let fix_request = FixPullRequest {
            proposal: &proposal,
            context: &context,
            root_cause: &root_cause,
            failures: &failures,
            correlation_id: &correlation_id,
            branch_prefix: &config.fix.branch_prefix,
            reviewers: &reviewers,
        };
        match open_fix_pull_request(host, &fix_request).await {
            Ok(outcome) => outcome,
            Err(error) => {
                let outcome = PullRequestOutcome::skipped(format!("failed: {error}"));
                record(
                    &mut stages,
                    stage(PULL_REQUEST_STAGE, StageStatus::Failed, error.to_string()),
                );
                outcome
            }
        }
    };
    if !stages.iter().any(|entry| entry.stage == PULL_REQUEST_STAGE) {
        let entry = match (pull_request.opened, pull_request.warnings.is_empty()) {
            (true, true) => stage(
                PULL_REQUEST_STAGE,
                StageStatus::Ok,
                pull_request.url.clone().unwrap_or_default(),
            ),
            (true, false) => stage(
                PULL_REQUEST_STAGE,
                StageStatus::Degraded,
                pull_request.warnings.join("; "),
            ),
            (false, _) => stage(
                PULL_REQUEST_STAGE,
                StageStatus::Skipped,
                pull_request.skipped_reason.clone().unwrap_or_default(),
            ),
        };
        record(&mut stages, entry);
    }

    let interrupted = interrupted || cancellation.is_cancelled();
    record(
        &mut stages,
        stage(
            EMIT_STAGE,
            StageStatus::Ok,
            artifact_dir.display().to_string(),
        ),
    );
    let incomplete = interrupted
        || stages
            .iter()
            .any(|entry| entry.status == StageStatus::Failed);
    let report = TriageReport {
        correlation_id,
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        repo,
        reference,
        auto_fix: request.auto_fix,
        dry_run: request.dry_run,
        context,
        failures,
        root_cause,
        fix: proposal,
        gate,
        pull_request,
        stages,
        incomplete,
        interrupted,
    };
    let artifacts = emit_artifacts(&artifact_dir, &report, redactor)?;
    Ok(TriageOutcome { report, artifacts })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use kite_core::CancellationToken;
    use kite_github::{
        ChangedFile, CreatedPullRequest, GithubError, PullRequest, RepoFile, RepoRef, SourceHost,
        WorkflowJob, WorkflowRun,
    };
    use kite_safety::SecretRedactor;
    use tempfile::tempdir;

    use super::{
        new_correlation_id, run_triage, TriageRequest, EXIT_FATAL, EXIT_INTERRUPTED, EXIT_SUCCESS,
        EXIT_WARNINGS, EXTRACT_STAGE, GATE_STAGE, PROPOSE_STAGE, PULL_REQUEST_STAGE,
        RUN_INTERRUPTED,
    };
    use crate::context::FETCH_STAGE;
    use crate::triage_config::TriageConfig;
    use crate::triage_types::{
        Confidence, FixKind, RiskLevel, RootCauseCategory, StageStatus, TriageError,
    };

    const RUN_ID: u64 = 9_100_000_001;
    const HEAD_SHA: &str = "0123456789abcdef0123456789abcdef01234567";

    const PYTEST_LOG: &str = "\
=================================== FAILURES ===================================
___________________________________ test_add ___________________________________

    def test_add():
>       assert add(2, 2) == 5
E       assert 4 == 5
E        +  where 4 = add(2, 2)

tests/test_math.py:7: AssertionError
=========================== short test summary info ============================
FAILED tests/test_math.py::test_add - assert 4 == 5
##[error]Process completed with exit code 1.
";

    const TEST_FILE: &str = "from app.math import add\n\n\n\n\ndef test_add():\n    assert add(2, 2) == 5\n";

    const CREDENTIALS_LOG: &str = "\
Run aws s3 sync ./dist s3://acme-widgets-site
Error: Unable to locate credentials. You can configure credentials by running \"aws configure\".
##[error]Process completed with exit code 1.
";

    struct FakeHost {
        repo: RepoRef,
        log: String,
        rate_limited: bool,
        cancel_on_log: Option<CancellationToken>,
        writes: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn new(log: &str) -> Self {
            Self {
                repo: RepoRef {
                    owner: "acme".to_string(),
                    name: "widgets".to_string(),
                },
                log: log.to_string(),
                rate_limited: false,
                cancel_on_log: None,
                writes: Mutex::new(Vec::new()),
            }
        }

        fn writes(&self) -> Vec<String> {
            self.writes.lock().expect("writes lock").clone()
        }

        fn write(&self, call: String) {
            self.writes.lock().expect("writes lock").push(call);
        }
    }

    #[async_trait]
    impl SourceHost for FakeHost {
        fn repo(&self) -> &RepoRef {
            &self.repo
        }

        async fn get_pull_request(&self, number: u64) -> Result<PullRequest, GithubError> {
            Err(GithubError::Status {
                operation: format!("get pull request {number}"),
                status: 404,
                body: "Not Found".to_string(),
            })
        }

        async fn list_changed_files(&self, _number: u64) -> Result<Vec<ChangedFile>, GithubError> {
            Ok(Vec::new())
        }

        async fn get_pull_request_diff(&self, _number: u64) -> Result<String, GithubError> {
            Ok(String::new())
        }

        async fn get_workflow_run(&self, run_id: u64) -> Result<WorkflowRun, GithubError> {
            if self.rate_limited {
                return Err(GithubError::RateLimited {
                    operation: format!("get workflow run {run_id}"),
                    attempts: 5,
                });
            }
            Ok(WorkflowRun {
                id: run_id,
                name: "ci".to_string(),
                head_sha: HEAD_SHA.to_string(),
                head_branch: Some("feature/math".to_string()),
                status: Some("completed".to_string()),
                conclusion: Some("failure".to_string()),
                html_url: format!("https://github.com/acme/widgets/actions/runs/{run_id}"),
                pull_request_numbers: Vec::new(),
            })
        }

        async fn find_failed_run_for_sha(
            &self,
            _sha: &str,
        ) -> Result<Option<WorkflowRun>, GithubError> {
            Ok(None)
        }

        async fn list_failed_jobs(&self, _run_id: u64) -> Result<Vec<WorkflowJob>, GithubError> {
            Ok(vec![WorkflowJob {
                id: 42,
                name: "test".to_string(),
                conclusion: Some("failure".to_string()),
                html_url: None,
                failed_steps: vec!["Run tests".to_string()],
            }])
        }

        async fn get_job_log(&self, _job_id: u64) -> Result<String, GithubError> {
            if let Some(token) = &self.cancel_on_log {
                token.cancel();
            }
            Ok(self.log.clone())
        }

        async fn get_file(
            &self,
            path: &str,
            _git_ref: &str,
        ) -> Result<Option<RepoFile>, GithubError> {
            Ok((path == "tests/test_math.py").then(|| RepoFile {
                path: path.to_string(),
                sha: "blob-test-math".to_string(),
                content: TEST_FILE.to_string(),
            }))
        }

        async fn get_branch_sha(&self, _branch: &str) -> Result<String, GithubError> {
            Ok(HEAD_SHA.to_string())
        }

        async fn create_branch(&self, branch: &str, from_sha: &str) -> Result<(), GithubError> {
            self.write(format!("create_branch {branch} {from_sha}"));
            Ok(())
        }

        async fn put_file(
            &self,
            branch: &str,
            path: &str,
            content: &str,
            _message: &str,
            _previous_sha: Option<&str>,
        ) -> Result<String, GithubError> {
            self.write(format!("put_file {branch} {path} {}", content.len()));
            Ok("commit-1".to_string())
        }

        async fn create_pull_request(
            &self,
            head: &str,
            base: &str,
            _title: &str,
            _body: &str,
        ) -> Result<CreatedPullRequest, GithubError> {
            self.write(format!("create_pull_request {head} {base}"));
            Ok(CreatedPullRequest {
                number: 77,
                html_url: "https://github.com/acme/widgets/pull/77".to_string(),
            })
        }

        async fn request_reviewers(
            &self,
            number: u64,
            reviewers: &[String],
        ) -> Result<(), GithubError> {
            self.write(format!("request_reviewers {number} {}", reviewers.join(",")));
            Ok(())
        }
    }

    fn config() -> TriageConfig {
        TriageConfig {
            checks: Vec::new(),
            ..TriageConfig::default()
        }
    }

    fn request(output_dir: &std::path::Path, workdir: &std::path::Path) -> TriageRequest {
        TriageRequest {
            failure_ref: RUN_ID.to_string(),
            auto_fix: false,
            dry_run: false,
            output_dir: output_dir.to_path_buf(),
            workdir: workdir.to_path_buf(),
            reviewers: Vec::new(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Writes the failing test file the gate patches; false when `git` is unavailable.
    fn seed_checkout(workdir: &std::path::Path) -> bool {
        let git_available = std::process::Command::new("git")
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);
        std::fs::create_dir_all(workdir.join("tests")).expect("mkdir");
        std::fs::write(workdir.join("tests/test_math.py"), TEST_FILE).expect("seed");
        git_available
    }

    #[test]
    fn unit_correlation_ids_are_prefixed_and_unique() {
        let first = new_correlation_id("acme/widgets", "7", 1_700_000_000_000);
        let second = new_correlation_id("acme/widgets", "7", 1_700_000_000_000);
        assert!(first.starts_with("triage-1700000000000-"));
        assert_eq!(first.len(), "triage-1700000000000-".len() + 8);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn functional_assertion_failure_yields_low_risk_patch_without_pull_request() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let host = FakeHost::new(PYTEST_LOG);

        let outcome = run_triage(
            &host,
            &config(),
            &request(output.path(), workdir.path()),
            &SecretRedactor::new(),
        )
        .await
        .expect("triage");

        let report = &outcome.report;
        assert_eq!(report.root_cause.category, RootCauseCategory::TestFailure);
        assert_eq!(report.root_cause.confidence, Confidence::High);
        assert_eq!(report.fix.kind, FixKind::Patch);
        assert_eq!(report.fix.risk_level, RiskLevel::Low);
        assert!(report
            .fix
            .diff
            .as_deref()
            .is_some_and(|diff| diff.contains("+    assert add(2, 2) == 4")));
        assert!(!report.pull_request.opened);
        assert!(host.writes().is_empty());
        let patch = outcome.artifacts.patch.as_ref().expect("patch artifact");
        assert!(patch.starts_with(output.path().join(&report.correlation_id)));
        assert!(std::fs::read_to_string(patch)
            .expect("patch")
            .contains("-    assert add(2, 2) == 5"));
        assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn integration_auto_fix_opens_pull_request_after_gate_passes() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        if !seed_checkout(workdir.path()) {
            return;
        }
        let host = FakeHost::new(PYTEST_LOG);
        let mut request = request(output.path(), workdir.path());
        request.auto_fix = true;
        request.reviewers = vec!["octocat".to_string()];

        let outcome = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect("triage");

        assert!(outcome.report.gate.passed);
        assert!(outcome.report.pull_request.opened);
        assert_eq!(outcome.report.pull_request.number, Some(77));
        let writes = host.writes();
        assert_eq!(writes.len(), 4);
        assert!(writes[0].starts_with("create_branch triage/fix-"));
        assert!(writes[0].ends_with(HEAD_SHA));
        assert!(writes[1].contains("tests/test_math.py"));
        assert!(writes[2].ends_with(" feature/math"));
        assert_eq!(writes[3], "request_reviewers 77 octocat");
        assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    }

    #[tokio::test]
    async fn functional_dry_run_reports_the_would_be_branch_without_writes() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        if !seed_checkout(workdir.path()) {
            return;
        }
        let host = FakeHost::new(PYTEST_LOG);
        let mut request = request(output.path(), workdir.path());
        request.auto_fix = true;
        request.dry_run = true;

        let outcome = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect("triage");

        assert!(host.writes().is_empty());
        assert!(outcome
            .report
            .pull_request
            .skipped_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("dry run; would open a pull request from triage/fix-")));
        assert!(outcome.artifacts.patch.is_some());
    }

    #[tokio::test]
    async fn integration_credentials_failure_is_high_risk_playbook_only() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let host = FakeHost::new(CREDENTIALS_LOG);
        let mut request = request(output.path(), workdir.path());
        request.auto_fix = true;

        let outcome = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect("triage");

        let report = &outcome.report;
        assert_eq!(report.root_cause.category, RootCauseCategory::EnvironmentMismatch);
        assert_eq!(report.fix.kind, FixKind::Playbook);
        assert_eq!(report.fix.risk_level, RiskLevel::High);
        assert!(report.fix.diff.is_none());
        assert!(report
            .fix
            .summary
            .starts_with("Manual remediation required"));
        assert!(outcome.artifacts.patch.is_none());
        assert!(!report.gate.passed);
        let gate_stage = report
            .stages
            .iter()
            .find(|stage| stage.stage == GATE_STAGE)
            .expect("gate stage");
        assert_eq!(gate_stage.status, StageStatus::Degraded);
        let pr_stage = report
            .stages
            .iter()
            .find(|stage| stage.stage == PULL_REQUEST_STAGE)
            .expect("pull request stage");
        assert_eq!(pr_stage.status, StageStatus::Skipped);
        assert!(host.writes().is_empty());
        assert_eq!(outcome.exit_code(), EXIT_WARNINGS);
    }

    #[tokio::test]
    async fn regression_unresolvable_reference_writes_no_artifacts() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let host = FakeHost::new(PYTEST_LOG);
        let mut request = request(output.path(), workdir.path());
        request.failure_ref = "https://github.com/other/repo/pull/3".to_string();

        let error = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect_err("foreign repository");
        assert!(matches!(error, TriageError::UnresolvableReference { .. }));
        assert_eq!(
            std::fs::read_dir(output.path()).expect("output dir").count(),
            0
        );
    }

    #[tokio::test]
    async fn regression_rate_limited_fetch_still_emits_incomplete_report() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let mut host = FakeHost::new(PYTEST_LOG);
        host.rate_limited = true;

        let outcome = run_triage(
            &host,
            &config(),
            &request(output.path(), workdir.path()),
            &SecretRedactor::new(),
        )
        .await
        .expect("triage");

        assert!(outcome.report.incomplete);
        assert!(outcome.artifacts.markdown.exists());
        assert!(outcome.artifacts.json.exists());
        assert_eq!(outcome.report.root_cause.category, RootCauseCategory::Unknown);
        assert_eq!(outcome.exit_code(), EXIT_FATAL);
    }

    #[tokio::test]
    async fn regression_interrupt_after_fetch_emits_partial_report_and_exit_130() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let mut request = request(output.path(), workdir.path());
        request.auto_fix = true;
        let mut host = FakeHost::new(PYTEST_LOG);
        host.cancel_on_log = Some(request.cancellation.clone());

        let outcome = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect("triage");

        let report = &outcome.report;
        assert!(report.interrupted);
        assert!(report.incomplete);
        assert_eq!(report.context.run_id, Some(RUN_ID));
        let status_of = |name: &str| {
            report
                .stages
                .iter()
                .find(|entry| entry.stage == name)
                .map(|entry| (entry.status, entry.detail.clone()))
                .expect(name)
        };
        assert_eq!(status_of(FETCH_STAGE).0, StageStatus::Ok);
        for name in [EXTRACT_STAGE, PROPOSE_STAGE, GATE_STAGE, PULL_REQUEST_STAGE] {
            assert_eq!(
                status_of(name),
                (StageStatus::Skipped, RUN_INTERRUPTED.to_string())
            );
        }
        assert!(host.writes().is_empty());
        assert!(report.fix.diff.is_none());
        let json: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&outcome.artifacts.json).expect("report.json"),
        )
        .expect("json");
        assert_eq!(json["interrupted"], true);
        assert!(std::fs::read_to_string(&outcome.artifacts.markdown)
            .expect("report.md")
            .contains("| Status | interrupted |"));
        assert_eq!(outcome.exit_code(), EXIT_INTERRUPTED);
    }

    #[tokio::test]
    async fn functional_cancelled_before_fetch_still_writes_artifacts() {
        let output = tempdir().expect("output");
        let workdir = tempdir().expect("workdir");
        let host = FakeHost::new(PYTEST_LOG);
        let request = request(output.path(), workdir.path());
        request.cancellation.cancel();

        let outcome = run_triage(&host, &config(), &request, &SecretRedactor::new())
            .await
            .expect("triage");

        assert!(outcome.report.interrupted);
        assert_eq!(outcome.report.root_cause.category, RootCauseCategory::Unknown);
        assert_eq!(outcome.report.fix.kind, FixKind::Playbook);
        assert!(outcome.artifacts.markdown.exists());
        assert!(outcome.artifacts.json.exists());
        assert_eq!(outcome.exit_code(), EXIT_INTERRUPTED);
    }
}
