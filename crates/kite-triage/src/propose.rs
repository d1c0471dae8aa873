//! Turns a classified failure into a risk-rated [`FixProposal`].

use std::sync::OnceLock;

use kite_github::{ChangedFile, SourceHost};
use kite_safety::SecretRedactor;
use regex::Regex;

use crate::patch::{append_lines, replace_line, reverse_file_patch};
use crate::triage_types::{
    Confidence, FailureRecord, FileEdit, FixKind, FixProposal, RiskLevel, RootCause,
    RootCauseCategory, TriageContext,
};

const REQUIREMENTS_FILE: &str = "requirements.txt";
const MAX_ASSERTION_VALUE_CHARS: usize = 200;

#[derive(Debug, Clone, Default)]
pub struct ProposalSettings {
    /// Case-insensitive substrings that mark a path or log line as sensitive.
    pub extra_sensitive_markers: Vec<String>,
}

struct SensitivePatterns {
    paths: Vec<(&'static str, Regex)>,
    text: Option<Regex>,
    assertion_line: Option<Regex>,
    missing_module: Option<Regex>,
    missing_node_module: Option<Regex>,
}

fn sensitive_patterns() -> &'static SensitivePatterns {
    static PATTERNS: OnceLock<SensitivePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| SensitivePatterns {
        paths: [
            ("workflow definition", r"^\.github/workflows/"),
            ("container build", r"(?i)(?:^|/)(?:Dockerfile|docker-compose[^/]*)$"),
            ("terraform", r"(?i)\.tf(?:vars)?$|(?:^|/)terraform/"),
            (
                "deployment config",
                r"(?i)(?:^|/)(?:k8s|kubernetes|helm|charts|deploy|deployment|infra|infrastructure|ansible)/",
            ),
            ("environment file", r"(?:^|/)\.env(?:\.|$)"),
            ("credential material", r"(?i)secret|credential|\.pem$|\.key$|id_rsa|id_ed25519"),
            ("ownership rules", r"(?:^|/)CODEOWNERS$"),
            ("permission policy", r"(?i)(?:^|/)iam[/_.-]|permissions?\.(?:ya?ml|json)$"),
        ]
        .into_iter()
        .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|regex| (label, regex)))
        .collect(),
        text: Regex::new(
            r"(?i)\b(?:AWS_(?:ACCESS_KEY_ID|SECRET_ACCESS_KEY|SESSION_TOKEN)|GOOGLE_APPLICATION_CREDENTIALS|AZURE_CLIENT_SECRET|credentials?|kubeconfig|service account|deploy key|ssh key|private key|assume ?role|iam role|secrets\.[A-Z_]+|permission denied|access denied|unauthorized|forbidden|resource not accessible by integration)\b",
        )
        .ok(),
        assertion_line: Regex::new(r"(?i)assert|expect|==|should|tobe|toequal").ok(),
        missing_module: Regex::new(r"No module named '(?P<module>[A-Za-z0-9_.]+)'").ok(),
        missing_node_module: Regex::new(r"Cannot find module '(?P<module>[^'./][^']*)'").ok(),
    })
}

/// Reasons `paths` or the failure text count as infrastructure, permission, or credential territory.
pub fn sensitive_markers(
    paths: &[String],
    failures: &[FailureRecord],
    settings: &ProposalSettings,
) -> Vec<String> {
    let patterns = sensitive_patterns();
    let mut markers = Vec::new();
    let mut push = |marker: String| {
        if !markers.contains(&marker) {
            markers.push(marker);
        }
    };
    let extra = settings
        .extra_sensitive_markers
        .iter()
        .map(|marker| marker.trim().to_ascii_lowercase())
        .filter(|marker| !marker.is_empty())
        .collect::<Vec<_>>();

    for path in paths {
        for (label, regex) in &patterns.paths {
            if regex.is_match(path) {
                push(format!("{label} ({path})"));
            }
        }
        let lowered = path.to_ascii_lowercase();
        for marker in &extra {
            if lowered.contains(marker.as_str()) {
                push(format!("configured marker '{marker}' ({path})"));
            }
        }
    }

    let redactor = SecretRedactor::new();
    for failure in failures {
        for text in [&failure.error_message, &failure.raw_log_excerpt] {
            if let Some(found) = patterns.text.as_ref().and_then(|regex| regex.find(text)) {
                push(format!(
                    "log mentions '{}'",
                    found.as_str().to_ascii_lowercase()
                ));
            }
            if redactor.contains_secret(text) {
                push("secret-like value in log output".to_string());
            }
            let lowered = text.to_ascii_lowercase();
            for marker in &extra {
                if lowered.contains(marker.as_str()) {
                    push(format!("log mentions configured marker '{marker}'"));
                }
            }
        }
    }
    markers
}

/// Maps a log path (possibly an absolute runner path) onto a repository path.
pub fn normalize_repo_path(raw: &str, repo_name: &str, changed: &[ChangedFile]) -> Option<String> {
    let raw = raw.trim().trim_start_matches("./");
    if raw.is_empty() {
        return None;
    }
    let runner_prefix = format!("/{repo_name}/{repo_name}/");
    if let Some((_, relative)) = raw.split_once(&runner_prefix) {
        return Some(relative.to_string());
    }
    if let Some(file) = changed.iter().find(|file| {
        raw == file.filename
            || raw.ends_with(&format!("/{}", file.filename))
            || (!raw.contains('/') && file.filename.ends_with(&format!("/{raw}")))
    }) {
        return Some(file.filename.clone());
    }
    if raw.starts_with('/') {
        return None;
    }
    Some(raw.to_string())
}

fn unquote(value: &str) -> Option<(char, &str)> {
    let quote = value.chars().next().filter(|ch| *ch == '\'' || *ch == '"')?;
    let inner = value.strip_prefix(quote)?.strip_suffix(quote)?;
    Some((quote, inner))
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.'
}

/// Rewrites the single occurrence of `expected` on `line` to `actual`.
pub fn replace_expectation(line: &str, expected: &str, actual: &str) -> Option<String> {
    if expected.is_empty()
        || expected == actual
        || actual.contains('\n')
        || actual.chars().count() > MAX_ASSERTION_VALUE_CHARS
    {
        return None;
    }
    let patterns = sensitive_patterns();
    if !patterns
        .assertion_line
        .as_ref()
        .is_some_and(|regex| regex.is_match(line))
    {
        return None;
    }

    let replacements = match (unquote(expected), unquote(actual)) {
        (Some((_, expected_inner)), Some((_, actual_inner))) => ['\'', '"']
            .into_iter()
            .map(|quote| {
                (
                    format!("{quote}{expected_inner}{quote}"),
                    format!("{quote}{actual_inner}{quote}"),
                )
            })
            .collect::<Vec<_>>(),
        (None, None) => vec![(expected.to_string(), actual.to_string())],
        _ => return None,
    };

    let bytes = line.as_bytes();
    let mut found: Vec<(usize, usize, &str)> = Vec::new();
    for (needle, replacement) in &replacements {
        for (start, _) in line.match_indices(needle.as_str()) {
            let end = start + needle.len();
            let bounded_left = start == 0 || !is_word_byte(bytes[start - 1]);
            let bounded_right = end == bytes.len() || !is_word_byte(bytes[end]);
            if bounded_left && bounded_right {
                found.push((start, end, replacement.as_str()));
            }
        }
    }
    match found.as_slice() {
        [(start, end, replacement)] => {
            Some(format!("{}{}{}", &line[..*start], replacement, &line[*end..]))
        }
        _ => None,
    }
}

/// Shell commands that re-run the failing tests, followed by a workflow re-run note.
pub fn build_test_plan(context: &TriageContext, failures: &[FailureRecord]) -> String {
    let mut steps = Vec::new();
    for failure in failures {
        let Some(test_name) = failure.test_name.as_deref() else {
            continue;
        };
        let file = failure
            .stack_frames
            .first()
            .map(|frame| frame.file.as_str())
            .unwrap_or_default();
        let step = if test_name.contains("::") && (file.ends_with(".py") || test_name.contains(".py::")) {
            format!("python -m pytest {}", shell_quote(test_name))
        } else if file.ends_with(".rs") {
            format!("cargo test {} -- --exact", shell_quote(test_name))
        } else if file.ends_with(".go") {
            format!("go test ./... -run {}", shell_quote(&format!("^{test_name}$")))
        } else if [".js", ".jsx", ".ts", ".tsx"]
            .iter()
            .any(|extension| file.ends_with(extension))
        {
            format!(
                "npx jest -t {}",
                shell_quote(test_name.rsplit(" › ").next().unwrap_or(test_name))
            )
        } else {
            format!("re-run test {test_name}")
        };
        if !steps.contains(&step) {
            steps.push(step);
        }
    }
    if steps.is_empty() {
        steps.push("re-run the failing job locally with the same command the workflow uses".to_string());
    }
    match context.run_url.as_deref() {
        Some(run_url) => steps.push(format!("re-run the workflow and confirm it passes: {run_url}")),
        None => steps.push("re-run the workflow and confirm it passes".to_string()),
    }
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| format!("{}. {step}", index + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn shell_quote(value: &str) -> String {
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "_-./:^$".contains(ch))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

fn failure_paths(
    context: &TriageContext,
    failures: &[FailureRecord],
    repo_name: &str,
) -> Vec<String> {
    let mut paths = Vec::new();
    for frame in failures.iter().flat_map(|failure| failure.stack_frames.iter()) {
        if let Some(path) = normalize_repo_path(&frame.file, repo_name, &context.changed_files) {
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}

/// Category playbook used when no concrete change can be built.
pub(crate) fn playbook(
    cause: &RootCause,
    context: &TriageContext,
    failures: &[FailureRecord],
    repo_name: &str,
) -> FixProposal {
    let summary = match cause.category {
        RootCauseCategory::TestFailure => {
            "Review the failing assertions and decide whether the code or the expectation is wrong"
        }
        RootCauseCategory::MissingDependency => {
            "Declare and install the missing dependency, then re-run the job"
        }
        RootCauseCategory::EnvironmentMismatch => {
            "Align the CI environment (runtime versions, services, limits, access) with what the job expects"
        }
        RootCauseCategory::RuntimeError => {
            "Fix the uncaught exception at the innermost frame of the stack trace"
        }
        RootCauseCategory::JobFailure => {
            "Inspect the failing step's command output; no specific failure signature was recognized"
        }
        RootCauseCategory::Unknown => {
            "Investigate the job log manually; the failure could not be classified"
        }
    };
    FixProposal {
        kind: FixKind::Playbook,
        summary: summary.to_string(),
        target_files: failure_paths(context, failures, repo_name),
        diff: None,
        risk_level: RiskLevel::Medium,
        risk_reasons: Vec::new(),
        test_plan: build_test_plan(context, failures),
        edits: Vec::new(),
    }
}

async fn assertion_patch(
    host: &dyn SourceHost,
    context: &TriageContext,
    failures: &[FailureRecord],
    notes: &mut Vec<String>,
) -> Option<FixProposal> {
    let commit = context.commit_sha.as_deref()?;
    let repo_name = host.repo().name.clone();
    for failure in failures {
        let Some(assertion) = failure.assertion.as_ref() else {
            continue;
        };
        let Some((frame, path)) = failure.stack_frames.iter().find_map(|frame| {
            frame.line?;
            normalize_repo_path(&frame.file, &repo_name, &context.changed_files)
                .map(|path| (frame, path))
        }) else {
            continue;
        };
        let line_number = usize::try_from(frame.line.unwrap_or_default()).ok()?;
        let file = match host.get_file(&path, commit).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                notes.push(format!("{path} not found at {commit}"));
                continue;
            }
            Err(error) => {
                notes.push(format!("could not fetch {path}: {error}"));
                continue;
            }
        };
        let Some(source_line) = file.content.split('\n').nth(line_number.saturating_sub(1)) else {
            continue;
        };
        let source_line = source_line.trim_end_matches('\r');
        let Some(new_line) =
            replace_expectation(source_line, &assertion.expected, &assertion.actual)
        else {
            continue;
        };
        let Some((diff, new_content)) = replace_line(&path, &file.content, line_number, &new_line)
        else {
            continue;
        };
        return Some(FixProposal {
            kind: FixKind::Patch,
            summary: format!(
                "Update the stale expectation at {path}:{line_number} from {} to {}",
                assertion.expected, assertion.actual
            ),
            target_files: vec![path.clone()],
            diff: Some(diff),
            risk_level: RiskLevel::Low,
            risk_reasons: Vec::new(),
            test_plan: build_test_plan(context, std::slice::from_ref(failure)),
            edits: vec![FileEdit {
                path,
                previous_sha: Some(file.sha),
                new_content,
            }],
        });
    }
    None
}

/// Import name to distribution name where they differ.
fn python_distribution(module: &str) -> &str {
    match module {
        "yaml" => "PyYAML",
        "cv2" => "opencv-python",
        "PIL" => "Pillow",
        "sklearn" => "scikit-learn",
        "bs4" => "beautifulsoup4",
        "dateutil" => "python-dateutil",
        "dotenv" => "python-dotenv",
        "jwt" => "PyJWT",
        other => other,
    }
}

fn requirement_listed(content: &str, distribution: &str) -> bool {
    let wanted = distribution.to_ascii_lowercase().replace('_', "-");
    content.lines().any(|line| {
        let name = line
            .trim()
            .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.'))
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
            .replace('_', "-");
        !name.is_empty() && name == wanted
    })
}

async fn dependency_change(
    host: &dyn SourceHost,
    context: &TriageContext,
    failures: &[FailureRecord],
    notes: &mut Vec<String>,
) -> Option<FixProposal> {
    let patterns = sensitive_patterns();
    let module = failures.iter().find_map(|failure| {
        [&failure.error_message, &failure.raw_log_excerpt]
            .into_iter()
            .find_map(|text| {
                patterns
                    .missing_module
                    .as_ref()?
                    .captures(text)?
                    .name("module")
                    .map(|found| found.as_str().to_string())
            })
    })?;
    let top_level = module.split('.').next().unwrap_or(module.as_str());
    let distribution = python_distribution(top_level).to_string();
    let commit = context.commit_sha.as_deref()?;
    let requirements = match host.get_file(REQUIREMENTS_FILE, commit).await {
        Ok(Some(file)) => file,
        Ok(None) => return None,
        Err(error) => {
            notes.push(format!("could not fetch {REQUIREMENTS_FILE}: {error}"));
            return None;
        }
    };
    if requirement_listed(&requirements.content, &distribution) {
        notes.push(format!(
            "{distribution} is already listed in {REQUIREMENTS_FILE}; check the install step"
        ));
        return None;
    }
    let (diff, new_content) = append_lines(
        REQUIREMENTS_FILE,
        &requirements.content,
        std::slice::from_ref(&distribution),
    )?;
    Some(FixProposal {
        kind: FixKind::ConfigChange,
        summary: format!(
            "Declare {distribution} in {REQUIREMENTS_FILE} (import '{module}' is not installed)"
        ),
        target_files: vec![REQUIREMENTS_FILE.to_string()],
        diff: Some(diff),
        risk_level: RiskLevel::Medium,
        risk_reasons: vec!["adds a new third-party dependency".to_string()],
        test_plan: format!(
            "1. pip install -r {REQUIREMENTS_FILE}\n2. python -c \"import {module}\"\n{}",
            renumber(&build_test_plan(context, failures), 2)
        ),
        edits: vec![FileEdit {
            path: REQUIREMENTS_FILE.to_string(),
            previous_sha: Some(requirements.sha),
            new_content,
        }],
    })
}

fn renumber(plan: &str, offset: usize) -> String {
    plan.lines()
        .enumerate()
        .map(|(index, line)| {
            let text = line
                .split_once(". ")
                .map(|(_, text)| text)
                .unwrap_or(line);
            format!("{}. {text}", index + 1 + offset)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn revert_change(
    context: &TriageContext,
    failures: &[FailureRecord],
    repo_name: &str,
) -> Option<FixProposal> {
    let frames = failure_paths(context, failures, repo_name);
    let (file, patch) = frames.iter().find_map(|path| {
        context
            .changed_files
            .iter()
            .find(|file| &file.filename == path && file.status == "modified")
            .and_then(|file| file.patch.as_deref().map(|patch| (file, patch)))
    })?;
    let diff = reverse_file_patch(&file.filename, patch)?;
    Some(FixProposal {
        kind: FixKind::Revert,
        summary: format!(
            "Revert this change to {}, where the uncaught exception is raised",
            file.filename
        ),
        target_files: vec![file.filename.clone()],
        diff: Some(diff),
        risk_level: RiskLevel::Medium,
        risk_reasons: vec!["reverts intentional work from the pull request".to_string()],
        test_plan: build_test_plan(context, failures),
        edits: Vec::new(),
    })
}

/// Builds the proposal for `cause`; returns it with notes on anything that degraded it.
pub async fn propose_fix(
    host: &dyn SourceHost,
    context: &TriageContext,
    failures: &[FailureRecord],
    cause: &RootCause,
    settings: &ProposalSettings,
) -> (FixProposal, Vec<String>) {
    let mut notes = Vec::new();
    let repo_name = host.repo().name.clone();
    let concrete = match cause.category {
        RootCauseCategory::TestFailure => {
            assertion_patch(host, context, failures, &mut notes).await
        }
        RootCauseCategory::MissingDependency => {
            dependency_change(host, context, failures, &mut notes).await
        }
        RootCauseCategory::RuntimeError => revert_change(context, failures, &repo_name),
        _ => None,
    };
    let mut proposal = concrete.unwrap_or_else(|| {
        let mut fallback = playbook(cause, context, failures, &repo_name);
        if cause.category == RootCauseCategory::MissingDependency {
            if let Some(module) = failures.iter().find_map(|failure| {
                sensitive_patterns()
                    .missing_node_module
                    .as_ref()?
                    .captures(&failure.error_message)?
                    .name("module")
                    .map(|found| found.as_str().to_string())
            }) {
                fallback.summary = format!("Add '{module}' to package.json dependencies (npm install {module} --save)");
            }
        }
        fallback
    });

    if cause.confidence != Confidence::High && proposal.risk_level == RiskLevel::Low {
        proposal.risk_level = RiskLevel::Medium;
        proposal.risk_reasons.push(format!(
            "root cause confidence is {}",
            cause.confidence.as_str()
        ));
    }

    let mut inspected = proposal.target_files.clone();
    for path in failure_paths(context, failures, &repo_name) {
        if !inspected.contains(&path) {
            inspected.push(path);
        }
    }
    let markers = sensitive_markers(&inspected, failures, settings);
    if !markers.is_empty() {
        proposal.risk_level = RiskLevel::High;
        proposal = proposal.into_playbook(format!(
            "touches infrastructure, permissions, or credentials: {}",
            markers.join(", ")
        ));
        proposal.summary = format!(
            "Manual remediation required; automated changes are disabled here. {}",
            playbook(cause, context, failures, &repo_name).summary
        );
    }
    (proposal, notes)
}
