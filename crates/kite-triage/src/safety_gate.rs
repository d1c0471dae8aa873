//! Hard gate in front of every repository write.
//!
//! A fix may reach pull-request creation only when it is low risk, carries a diff, applies
//! cleanly, and every relevant local check passes against the patched tree. The workdir is
//! copied into the scratch directory, the diff is applied to the copy, and checks run there
//! as child processes bounded by `wait-timeout`. The workdir itself is never modified.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use kite_core::CancellationToken;
use kite_safety::redact_secrets;
use wait_timeout::ChildExt;

use crate::triage_config::GateCheck;
use crate::triage_types::{CheckResult, CheckStatus, FixProposal, GateOutcome, RiskLevel};

pub const GIT_APPLY_CHECK_NAME: &str = "git-apply";
pub const GIT_APPLY_TIMEOUT_MS: u64 = 60_000;
const PATCHED_TREE_DIR: &str = "tree";
const DETAIL_TAIL_LINES: usize = 15;
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const INTERRUPTED_DETAIL: &str = "interrupted";

#[derive(Debug, Clone)]
pub struct SafetyGateRequest<'a> {
    pub proposal: &'a FixProposal,
    pub checks: &'a [GateCheck],
    /// Checkout the diff is applied to; read only.
    pub workdir: &'a Path,
    /// Directory receiving the candidate patch, the patched copy, and check logs.
    pub scratch_dir: &'a Path,
    pub changed_paths: &'a [String],
    /// Checked between checks and while a check runs; a cancelled check is killed.
    pub cancellation: CancellationToken,
}

fn log_file_name(name: &str) -> String {
    let sanitized = name
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '-' })
        .collect::<String>();
    format!("check-{sanitized}.log")
}

fn output_tail(path: &Path) -> String {
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = redact_secrets(&String::from_utf8_lossy(&bytes));
    let lines = text.lines().collect::<Vec<_>>();
    let from = lines.len().saturating_sub(DETAIL_TAIL_LINES);
    lines[from..].join("\n")
}

/// Check logs live next to the report, so they get the same masking.
fn redact_log_file(path: &Path) {
    let Ok(bytes) = std::fs::read(path) else {
        return;
    };
    let text = String::from_utf8_lossy(&bytes);
    let redacted = redact_secrets(&text);
    if redacted != text {
        let _ = std::fs::write(path, redacted);
    }
}

fn run_check_command(
    name: &str,
    argv: &[String],
    workdir: &Path,
    log_path: &Path,
    timeout_ms: u64,
    cancellation: &CancellationToken,
) -> CheckResult {
    let command_line = shell_words::join(argv);
    let result = |status: CheckStatus, detail: String| CheckResult {
        name: name.to_string(),
        command: command_line.clone(),
        status,
        detail,
    };
    let Some((program, args)) = argv.split_first() else {
        return result(CheckStatus::Failed, "empty command".to_string());
    };

    let (stdout, stderr) = match File::create(log_path)
        .and_then(|file| file.try_clone().map(|clone| (file, clone)))
    {
        Ok((stdout, stderr)) => (Stdio::from(stdout), Stdio::from(stderr)),
        Err(_) => (Stdio::null(), Stdio::null()),
    };
    let mut child = match Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
    {
        Ok(child) => child,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            return result(
                CheckStatus::Skipped,
                format!("executable '{program}' not found"),
            );
        }
        Err(error) => {
            return result(CheckStatus::Failed, format!("failed to spawn: {error}"));
        }
    };

    let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1));
    let status = loop {
        let now = Instant::now();
        let interrupted = cancellation.is_cancelled();
        if interrupted || now >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            redact_log_file(log_path);
            return if interrupted {
                result(CheckStatus::Failed, INTERRUPTED_DETAIL.to_string())
            } else {
                result(
                    CheckStatus::TimedOut,
                    format!("timed out after {timeout_ms} ms"),
                )
            };
        }
        match child.wait_timeout((deadline - now).min(CANCEL_POLL_INTERVAL)) {
            Ok(Some(status)) => break status,
            Ok(None) => continue,
            Err(error) => {
                let _ = child.kill();
                let _ = child.wait();
                return result(CheckStatus::Failed, format!("failed while waiting: {error}"));
            }
        }
    };

    redact_log_file(log_path);
    if status.success() {
        return result(CheckStatus::Passed, "exit code 0".to_string());
    }
    let code = status
        .code()
        .map(|code| format!("exit code {code}"))
        .unwrap_or_else(|| "terminated by signal".to_string());
    let tail = output_tail(log_path);
    let detail = if tail.is_empty() {
        code
    } else {
        format!("{code}\n{tail}")
    };
    result(CheckStatus::Failed, detail)
}

/// Copies `from` into `to`, leaving out `.git` and anything under `skip`.
fn copy_tree(from: &Path, to: &Path, skip: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        if entry.file_name() == ".git" || source.starts_with(skip) {
            continue;
        }
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_tree(&source, &target, skip)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(std::fs::read_link(&source)?, &target)?;
        } else {
            std::fs::copy(&source, &target)?;
        }
    }
    Ok(())
}

/// Materializes the patched tree; `Err` carries the failed `git-apply` result.
fn prepare_patched_tree(
    request: &SafetyGateRequest<'_>,
    diff: &str,
) -> Result<(PathBuf, CheckResult), CheckResult> {
    let failed = |detail: String| CheckResult {
        name: GIT_APPLY_CHECK_NAME.to_string(),
        command: "git apply".to_string(),
        status: CheckStatus::Failed,
        detail,
    };
    let scratch_dir = std::fs::canonicalize(request.scratch_dir)
        .unwrap_or_else(|_| request.scratch_dir.to_path_buf());
    let tree = scratch_dir.join(PATCHED_TREE_DIR);
    let patch_path = scratch_dir.join("candidate.patch");
    if tree.exists() {
        std::fs::remove_dir_all(&tree)
            .map_err(|error| failed(format!("failed to clear {}: {error}", tree.display())))?;
    }
    std::fs::write(&patch_path, diff)
        .map_err(|error| failed(format!("failed to stage candidate patch: {error}")))?;
    let workdir = std::fs::canonicalize(request.workdir)
        .unwrap_or_else(|_| request.workdir.to_path_buf());
    copy_tree(&workdir, &tree, &scratch_dir).map_err(|error| {
        failed(format!(
            "failed to copy {}: {error}",
            request.workdir.display()
        ))
    })?;
    tracing::debug!(tree = %tree.display(), "copied workdir for the safety gate");

    // A private repository keeps `git apply` from resolving paths against an enclosing one.
    let init = run_check_command(
        GIT_APPLY_CHECK_NAME,
        &["git".to_string(), "init".to_string(), "-q".to_string()],
        &tree,
        &scratch_dir.join(log_file_name("git-init")),
        GIT_APPLY_TIMEOUT_MS,
        &request.cancellation,
    );
    if init.status != CheckStatus::Passed {
        return Err(failed(format!("cannot verify the diff: {}", init.detail)));
    }
    let applied = run_check_command(
        GIT_APPLY_CHECK_NAME,
        &[
            "git".to_string(),
            "apply".to_string(),
            patch_path.display().to_string(),
        ],
        &tree,
        &scratch_dir.join(log_file_name(GIT_APPLY_CHECK_NAME)),
        GIT_APPLY_TIMEOUT_MS,
        &request.cancellation,
    );
    let _ = std::fs::remove_file(&patch_path);
    match applied.status {
        CheckStatus::Passed => Ok((tree, applied)),
        _ => Err(failed(format!("diff does not apply: {}", applied.detail))),
    }
}

/// Evaluates the gate; `passed` is true only when nothing blocked or failed.
pub fn run_safety_gate(request: &SafetyGateRequest<'_>) -> GateOutcome {
    let mut outcome = GateOutcome {
        evaluated: true,
        ..GateOutcome::default()
    };
    let proposal = request.proposal;
    if proposal.risk_level != RiskLevel::Low {
        outcome
            .reasons
            .push(format!("risk level is {}", proposal.risk_level.as_str()));
    }
    let Some(diff) = proposal.diff.as_deref().filter(|diff| !diff.trim().is_empty()) else {
        outcome.reasons.push("no diff to apply".to_string());
        return outcome;
    };
    if !outcome.reasons.is_empty() {
        return outcome;
    }

    if let Err(error) = std::fs::create_dir_all(request.scratch_dir) {
        outcome.reasons.push(format!(
            "failed to create {}: {error}",
            request.scratch_dir.display()
        ));
        return outcome;
    }

    let tree = match prepare_patched_tree(request, diff) {
        Ok((tree, applied)) => {
            outcome.checks.push(applied);
            tree
        }
        Err(failed) => {
            let _ = std::fs::remove_dir_all(request.scratch_dir.join(PATCHED_TREE_DIR));
            outcome.reasons.push(format!(
                "check '{}' did not pass: {}",
                failed.name,
                failed.detail.lines().next().unwrap_or_default()
            ));
            outcome.checks.push(failed);
            return outcome;
        }
    };

    let mut relevant = proposal.target_files.clone();
    for path in request.changed_paths {
        if !relevant.contains(path) {
            relevant.push(path.clone());
        }
    }
    for check in request.checks {
        if request.cancellation.is_cancelled() {
            outcome.checks.push(CheckResult {
                name: check.name.clone(),
                command: check.command.clone(),
                status: CheckStatus::Skipped,
                detail: INTERRUPTED_DETAIL.to_string(),
            });
            continue;
        }
        if !check.applies_to_any(&relevant) {
            outcome.checks.push(CheckResult {
                name: check.name.clone(),
                command: check.command.clone(),
                status: CheckStatus::Skipped,
                detail: "no changed file matches".to_string(),
            });
            continue;
        }
        let result = match shell_words::split(&check.command) {
            Ok(argv) => run_check_command(
                &check.name,
                &argv,
                &tree,
                &request.scratch_dir.join(log_file_name(&check.name)),
                check.timeout_ms,
                &request.cancellation,
            ),
            Err(error) => CheckResult {
                name: check.name.clone(),
                command: check.command.clone(),
                status: CheckStatus::Failed,
                detail: format!("invalid command: {error}"),
            },
        };
        tracing::info!(
            check = %result.name,
            status = ?result.status,
            "safety gate check finished"
        );
        outcome.checks.push(result);
    }

    for check in &outcome.checks {
        if matches!(check.status, CheckStatus::Failed | CheckStatus::TimedOut) {
            let first_line = check.detail.lines().next().unwrap_or_default();
            outcome
                .reasons
                .push(format!("check '{}' did not pass: {first_line}", check.name));
        }
    }
    if let Err(error) = std::fs::remove_dir_all(&tree) {
        tracing::warn!(tree = %tree.display(), error = %error, "failed to remove patched tree");
    }
    outcome.passed = outcome.reasons.is_empty();
    outcome
}
