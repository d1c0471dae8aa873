use crate::triage_types::{
    CheckStatus, Confidence, FixKind, RiskLevel, RootCauseCategory, TriageReport,
};

fn code_block(text: &str, language: &str) -> String {
    let fence = if text.contains("```") { "~~~~" } else { "```" };
    format!("{fence}{language}\n{}\n{fence}\n", text.trim_end_matches('\n'))
}

fn check_status_label(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Passed => "passed",
        CheckStatus::Failed => "failed",
        CheckStatus::TimedOut => "timed out",
        CheckStatus::Skipped => "skipped",
    }
}

/// Human-readable report; secrets are masked by the artifact writer, not here.
pub fn render_markdown(report: &TriageReport) -> String {
    let mut out = format!("# Triage report: {} {}\n\n", report.repo, report.reference);
    out.push_str("| Field | Value |\n|---|---|\n");
    out.push_str(&format!("| Correlation id | `{}` |\n", report.correlation_id));
    out.push_str(&format!("| Generated at | {} |\n", report.generated_at));
    if let Some(sha) = report.context.commit_sha.as_deref() {
        out.push_str(&format!("| Commit | `{sha}` |\n"));
    }
    if let Some(url) = report.context.pull_request_url.as_deref() {
        out.push_str(&format!("| Pull request | {url} |\n"));
    }
    if let Some(url) = report.context.run_url.as_deref() {
        out.push_str(&format!("| Workflow run | {url} |\n"));
    }
    out.push_str(&format!(
        "| Status | {} |\n",
        if report.interrupted {
            "interrupted"
        } else if report.incomplete {
            "incomplete"
        } else {
            "complete"
        }
    ));

    out.push_str("\n## Root cause\n\n");
    out.push_str(&format!(
        "**{}** with **{}** confidence.\n\n{}\n",
        report.root_cause.category,
        report.root_cause.confidence.as_str(),
        report.root_cause.evidence
    ));
    if report.root_cause.hypotheses.len() > 1 || report.root_cause.confidence != Confidence::High {
        out.push_str("\n### Hypotheses (strongest first)\n\n");
        if report.root_cause.hypotheses.is_empty() {
            out.push_str("No failure signature matched any known category.\n");
        }
        for (rank, hypothesis) in report.root_cause.hypotheses.iter().enumerate() {
            out.push_str(&format!(
                "{}. `{}`: {} record(s)\n",
                rank + 1,
                hypothesis.category,
                hypothesis.score
            ));
            for evidence in &hypothesis.evidence {
                out.push_str(&format!("   - {evidence}\n"));
            }
        }
    }

    out.push_str(&format!("\n## Failures ({})\n\n", report.failures.len()));
    if report.failures.is_empty() {
        out.push_str("No failure output was available to analyze.\n");
    }
    for failure in &report.failures {
        let title = failure.test_name.as_deref().unwrap_or("(no test name)");
        out.push_str(&format!("### {title}\n\n"));
        out.push_str(&code_block(&failure.error_message, "text"));
        if !failure.stack_frames.is_empty() {
            out.push_str("\nFrames:\n");
            for frame in &failure.stack_frames {
                match frame.line {
                    Some(line) => out.push_str(&format!("- `{}:{line}`\n", frame.file)),
                    None => out.push_str(&format!("- `{}`\n", frame.file)),
                }
            }
        }
        if !failure.raw_log_excerpt.is_empty() {
            out.push_str("\n<details><summary>Log excerpt</summary>\n\n");
            out.push_str(&code_block(&failure.raw_log_excerpt, "text"));
            out.push_str("\n</details>\n");
        }
        out.push('\n');
    }

    let fix = &report.fix;
    out.push_str("## Proposed fix\n\n");
    out.push_str(&format!(
        "- Type: `{}`\n- Risk: `{}`\n- Summary: {}\n",
        fix.kind.as_str(),
        fix.risk_level.as_str(),
        fix.summary
    ));
    for reason in &fix.risk_reasons {
        out.push_str(&format!("- Risk note: {reason}\n"));
    }
    if !fix.target_files.is_empty() {
        out.push_str(&format!(
            "- Target files: {}\n",
            fix.target_files
                .iter()
                .map(|path| format!("`{path}`"))
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if let Some(diff) = fix.diff.as_deref() {
        out.push('\n');
        out.push_str(&code_block(diff, "diff"));
    }
    out.push_str("\n### Test plan\n\n");
    out.push_str(&fix.test_plan);
    out.push('\n');

    out.push_str("\n## Safety gate\n\n");
    if !report.gate.evaluated {
        out.push_str("Not evaluated (automatic fixing was not requested).\n");
    } else {
        out.push_str(if report.gate.passed {
            "Passed.\n"
        } else {
            "Blocked; output downgraded to the playbook.\n"
        });
        for reason in &report.gate.reasons {
            out.push_str(&format!("- {reason}\n"));
        }
        for check in &report.gate.checks {
            let first_line = check.detail.lines().next().unwrap_or_default();
            out.push_str(&format!(
                "- `{}` {}: {first_line}\n",
                check.name,
                check_status_label(check.status)
            ));
        }
    }

    out.push_str("\n## Pull request\n\n");
    let pull_request = &report.pull_request;
    match (pull_request.opened, pull_request.url.as_deref()) {
        (true, Some(url)) => out.push_str(&format!(
            "Opened {url} from branch `{}`.\n",
            pull_request.branch.as_deref().unwrap_or_default()
        )),
        _ => out.push_str(&format!(
            "Not opened: {}.\n",
            pull_request
                .skipped_reason
                .as_deref()
                .unwrap_or("not requested")
        )),
    }
    for warning in &pull_request.warnings {
        out.push_str(&format!("- {warning}\n"));
    }

    out.push_str("\n## Stages\n\n| Stage | Status | Detail |\n|---|---|---|\n");
    for stage in &report.stages {
        out.push_str(&format!(
            "| {} | {} | {} |\n",
            stage.stage,
            stage.status.as_str(),
            stage.detail.replace('|', "\\|").replace('\n', " ")
        ));
    }
    out
}

fn category_steps(category: RootCauseCategory) -> &'static [&'static str] {
    match category {
        RootCauseCategory::TestFailure => &[
            "Reproduce the failing test locally with the command in the test plan.",
            "Decide whether the code under test or the expectation is wrong.",
            "Fix the wrong side and keep the assertion as specific as before.",
        ],
        RootCauseCategory::MissingDependency => &[
            "Identify the missing package named in the failure output.",
            "Declare it in the project's dependency manifest with a pinned or bounded version.",
            "Make sure the CI install step installs from that manifest.",
        ],
        RootCauseCategory::EnvironmentMismatch => &[
            "Compare the runtime, tool versions, and services the job expects with what the runner provides.",
            "Check timeouts, disk and memory limits, and network access used by the failing step.",
            "Pin versions in the workflow or adjust limits, then re-run.",
        ],
        RootCauseCategory::RuntimeError => &[
            "Open the innermost stack frame listed under Failures.",
            "Reproduce the exception with the same input and guard or fix the faulty code path.",
            "Add a regression test covering the input that raised.",
        ],
        RootCauseCategory::JobFailure | RootCauseCategory::Unknown => &[
            "Open the failed job log and find the first error line of the failing step.",
            "Re-run the step's command locally with the same environment.",
            "Record the recognized signature so future triage can classify it.",
        ],
    }
}

/// Plain-text remediation steps meant to be followed or pasted by hand.
pub fn render_playbook(report: &TriageReport) -> String {
    let fix = &report.fix;
    let mut out = format!(
        "Remediation playbook for {} {} (correlation id {})\n",
        report.repo, report.reference, report.correlation_id
    );
    out.push_str(&format!(
        "Root cause: {} ({} confidence)\n",
        report.root_cause.category,
        report.root_cause.confidence.as_str()
    ));
    out.push_str(&format!("Summary: {}\n", fix.summary));
    if fix.risk_level != RiskLevel::Low {
        out.push_str(&format!(
            "Risk: {}; apply only after human review.\n",
            fix.risk_level.as_str()
        ));
    }
    for reason in &fix.risk_reasons {
        out.push_str(&format!("  - {reason}\n"));
    }

    out.push_str("\nSteps:\n");
    let mut step = 1;
    if let Some(sha) = report.context.commit_sha.as_deref() {
        out.push_str(&format!("{step}. git fetch origin && git checkout {sha}\n"));
        step += 1;
    }
    if fix.diff.is_some() && fix.kind != FixKind::Playbook {
        out.push_str(&format!(
            "{step}. git apply fix.patch   # {} of {}\n",
            fix.kind.as_str(),
            fix.target_files.join(", ")
        ));
        step += 1;
    } else {
        for line in category_steps(report.root_cause.category) {
            out.push_str(&format!("{step}. {line}\n"));
            step += 1;
        }
    }
    out.push_str(&format!("{step}. Verify:\n"));
    for line in fix.test_plan.lines() {
        out.push_str(&format!("   {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{render_markdown, render_playbook};
    use crate::triage_types::{
        Confidence, FailureRef, FixKind, FixProposal, GateOutcome, Hypothesis,
        PullRequestOutcome, RiskLevel, RootCause, RootCauseCategory, StageRecord, StageStatus,
        TriageContext, TriageReport,
    };

    fn sample_report() -> TriageReport {
        TriageReport {
            correlation_id: "triage-1700000000000-abcd1234".to_string(),
            generated_at: "2024-05-01T10:00:00Z".to_string(),
            repo: "acme/widgets".to_string(),
            reference: FailureRef::WorkflowRun(99_000_001),
            auto_fix: false,
            dry_run: false,
            context: TriageContext {
                commit_sha: Some("abcdef1234567890".to_string()),
                ..TriageContext::default()
            },
            failures: Vec::new(),
            root_cause: RootCause {
                category: RootCauseCategory::RuntimeError,
                confidence: Confidence::Medium,
                evidence: "KeyError: 'name'".to_string(),
                hypotheses: vec![
                    Hypothesis {
                        category: RootCauseCategory::RuntimeError,
                        score: 2,
                        evidence: vec!["KeyError: 'name'".to_string()],
                    },
                    Hypothesis {
                        category: RootCauseCategory::EnvironmentMismatch,
                        score: 1,
                        evidence: vec!["ECONNREFUSED".to_string()],
                    },
                ],
            },
            fix: FixProposal {
                kind: FixKind::Playbook,
                summary: "Fix the uncaught exception".to_string(),
                target_files: Vec::new(),
                diff: None,
                risk_level: RiskLevel::Medium,
                risk_reasons: Vec::new(),
                test_plan: "1. re-run the workflow and confirm it passes".to_string(),
                edits: Vec::new(),
            },
            gate: GateOutcome::default(),
            pull_request: PullRequestOutcome::skipped("automatic fixing was not requested"),
            stages: vec![StageRecord {
                stage: "fetch_context".to_string(),
                status: StageStatus::Degraded,
                detail: "no failed jobs | odd".to_string(),
            }],
            incomplete: false,
            interrupted: false,
        }
    }

    #[test]
    fn functional_markdown_lists_ranked_hypotheses_and_stage_ledger() {
        let markdown = render_markdown(&sample_report());
        assert!(markdown.starts_with("# Triage report: acme/widgets workflow run 99000001"));
        assert!(markdown.contains("**runtime_error** with **medium** confidence"));
        let first = markdown.find("1. `runtime_error`").expect("first hypothesis");
        let second = markdown
            .find("2. `environment_mismatch`")
            .expect("second hypothesis");
        assert!(first < second);
        assert!(markdown.contains("| fetch_context | degraded | no failed jobs \\| odd |"));
        assert!(markdown.contains("Not opened: automatic fixing was not requested."));
    }

    #[test]
    fn functional_playbook_without_diff_lists_category_steps() {
        let playbook = render_playbook(&sample_report());
        assert!(playbook.contains("1. git fetch origin && git checkout abcdef1234567890"));
        assert!(playbook.contains("2. Open the innermost stack frame"));
        assert!(playbook.contains("Risk: medium; apply only after human review."));
        assert!(playbook.contains("   1. re-run the workflow and confirm it passes"));
        assert!(!playbook.contains("git apply"));
    }
}
