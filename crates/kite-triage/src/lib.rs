//! CI failure triage: fetch a failing pull request or workflow run, extract and classify
//! its failures, propose a fix, gate it, and optionally open a fix pull request.

pub mod artifacts;
pub mod classify;
pub mod context;
pub mod extract;
pub mod fix_pr;
pub mod patch;
pub mod pipeline;
pub mod propose;
pub mod reference;
pub mod report;
pub mod safety_gate;
pub mod triage_config;
pub mod triage_types;

pub use artifacts::{emit_artifacts, ArtifactPaths};
pub use classify::{classify_root_cause, ClassificationRule, RuleChain};
pub use context::fetch_context;
pub use extract::{extract_failures, DEFAULT_EXCERPT_LINES};
pub use fix_pr::{open_fix_pull_request, FixPullRequest};
pub use pipeline::{
    new_correlation_id, run_triage, TriageOutcome, TriageRequest, EXIT_FATAL, EXIT_INTERRUPTED,
    EXIT_SUCCESS, EXIT_WARNINGS, RUN_INTERRUPTED,
};
pub use propose::{propose_fix, ProposalSettings};
pub use reference::resolve_failure_ref;
pub use report::{render_markdown, render_playbook};
pub use safety_gate::{run_safety_gate, SafetyGateRequest};
pub use triage_config::{
    default_gate_checks, generate_config, load_triage_config, render_default_config, GateCheck,
    TriageConfig,
};
pub use triage_types::{
    Confidence, FailureRecord, FailureRef, FixKind, FixProposal, RiskLevel, RootCause,
    RootCauseCategory, StageStatus, TriageError, TriageReport,
};
