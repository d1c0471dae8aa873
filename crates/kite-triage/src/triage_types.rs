use std::fmt;
use std::path::PathBuf;

use kite_github::{ChangedFile, GithubError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("unresolvable failure reference '{reference}': {reason}")]
    UnresolvableReference { reference: String, reason: String },
    #[error(transparent)]
    Github(#[from] GithubError),
    #[error("failed to write {path}: {message}")]
    Io { path: PathBuf, message: String },
    #[error("invalid triage configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FailureRef {
    PullRequest(u64),
    WorkflowRun(u64),
}

impl fmt::Display for FailureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PullRequest(number) => write!(f, "pull request #{number}"),
            Self::WorkflowRun(id) => write!(f, "workflow run {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub file: String,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Expected-versus-actual values reported by a failed assertion.
pub struct AssertionMismatch {
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub test_name: Option<String>,
    pub error_message: String,
    pub stack_frames: Vec<StackFrame>,
    pub raw_log_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<AssertionMismatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    TestFailure,
    MissingDependency,
    EnvironmentMismatch,
    RuntimeError,
    JobFailure,
    Unknown,
}

impl RootCauseCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TestFailure => "test_failure",
            Self::MissingDependency => "missing_dependency",
            Self::EnvironmentMismatch => "environment_mismatch",
            Self::RuntimeError => "runtime_error",
            Self::JobFailure => "job_failure",
            Self::Unknown => "unknown",
        }
    }

    /// Catch-all categories never count toward a confident classification.
    pub fn is_fallback(self) -> bool {
        matches!(self, Self::JobFailure | Self::Unknown)
    }
}

impl fmt::Display for RootCauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    pub category: RootCauseCategory,
    /// Number of failure records attributed to this category.
    pub score: usize,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCause {
    pub category: RootCauseCategory,
    pub confidence: Confidence,
    pub evidence: String,
    /// Every matched category, strongest first.
    pub hypotheses: Vec<Hypothesis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    Patch,
    ConfigChange,
    Revert,
    Playbook,
}

impl FixKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::ConfigChange => "config_change",
            Self::Revert => "revert",
            Self::Playbook => "playbook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Full new contents for one file, used when committing a fix branch.
pub struct FileEdit {
    pub path: String,
    pub previous_sha: Option<String>,
    pub new_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixProposal {
    #[serde(rename = "type")]
    pub kind: FixKind,
    pub summary: String,
    pub target_files: Vec<String>,
    pub diff: Option<String>,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub risk_reasons: Vec<String>,
    pub test_plan: String,
    #[serde(skip)]
    pub edits: Vec<FileEdit>,
}

impl FixProposal {
    /// Downgrades to a no-diff playbook, keeping the explanation.
    pub fn into_playbook(mut self, reason: impl Into<String>) -> Self {
        self.kind = FixKind::Playbook;
        self.diff = None;
        self.edits.clear();
        self.risk_reasons.push(reason.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    Degraded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub status: StageStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub command: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateOutcome {
    pub evaluated: bool,
    pub passed: bool,
    pub reasons: Vec<String>,
    pub checks: Vec<CheckResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PullRequestOutcome {
    pub opened: bool,
    pub branch: Option<String>,
    pub number: Option<u64>,
    pub url: Option<String>,
    pub skipped_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PullRequestOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            skipped_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Source-host facts gathered for one triage run.
pub struct TriageContext {
    pub pull_request: Option<u64>,
    pub pull_request_url: Option<String>,
    pub run_id: Option<u64>,
    pub run_url: Option<String>,
    pub commit_sha: Option<String>,
    pub head_ref: Option<String>,
    pub base_ref: Option<String>,
    pub changed_files: Vec<ChangedFile>,
    #[serde(skip)]
    pub diff: Option<String>,
    pub failed_jobs: Vec<String>,
    #[serde(skip)]
    pub log_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Write-once result of a triage run, emitted as report artifacts.
pub struct TriageReport {
    pub correlation_id: String,
    pub generated_at: String,
    pub repo: String,
    pub reference: FailureRef,
    pub auto_fix: bool,
    pub dry_run: bool,
    pub context: TriageContext,
    pub failures: Vec<FailureRecord>,
    pub root_cause: RootCause,
    pub fix: FixProposal,
    pub gate: GateOutcome,
    pub pull_request: PullRequestOutcome,
    pub stages: Vec<StageRecord>,
    pub incomplete: bool,
    /// Set when the run was cancelled; stages after the interruption are `skipped`.
    #[serde(default)]
    pub interrupted: bool,
}

impl TriageReport {
    pub fn has_degraded_stage(&self) -> bool {
        self.stages
            .iter()
            .any(|stage| stage.status == StageStatus::Degraded)
    }
}
