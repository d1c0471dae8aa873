use kite_github::RepoRef;
use url::Url;

use crate::triage_types::{FailureRef, TriageError};

/// Bare numbers up to this many digits are pull request numbers; longer ones are run ids.
pub const MAX_PULL_REQUEST_DIGITS: usize = 7;

/// Resolves a PR number, `#123`, run id, or GitHub pull/run URL for `repo`.
pub fn resolve_failure_ref(raw: &str, repo: &RepoRef) -> Result<FailureRef, TriageError> {
    let trimmed = raw.trim();
    let unresolvable = |reason: &str| TriageError::UnresolvableReference {
        reference: trimmed.to_string(),
        reason: reason.to_string(),
    };
    if trimmed.is_empty() {
        return Err(unresolvable("reference is empty"));
    }

    if trimmed.contains("://") {
        return resolve_url(trimmed, repo).map_err(|reason| unresolvable(&reason));
    }

    let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(unresolvable(
            "expected a pull request number, a run id, or a pull request/run URL",
        ));
    }
    let value = parse_nonzero(digits).ok_or_else(|| unresolvable("id must be a positive integer"))?;
    if trimmed.starts_with('#') || digits.len() <= MAX_PULL_REQUEST_DIGITS {
        Ok(FailureRef::PullRequest(value))
    } else {
        Ok(FailureRef::WorkflowRun(value))
    }
}

fn parse_nonzero(digits: &str) -> Option<u64> {
    digits.parse::<u64>().ok().filter(|value| *value > 0)
}

fn resolve_url(raw: &str, repo: &RepoRef) -> Result<FailureRef, String> {
    let url = Url::parse(raw).map_err(|error| format!("invalid URL: {error}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported URL scheme '{}'", url.scheme()));
    }
    let segments = url
        .path_segments()
        .map(|segments| {
            segments
                .filter(|segment| !segment.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if segments.len() < 4 {
        return Err("URL does not point at a pull request or workflow run".to_string());
    }

    let owner = segments[0];
    let name = segments[1];
    if !owner.eq_ignore_ascii_case(&repo.owner) || !name.eq_ignore_ascii_case(&repo.name) {
        return Err(format!(
            "URL belongs to {owner}/{name}, not {}",
            repo.as_slug()
        ));
    }

    match (segments[2], segments[3], segments.get(4)) {
        ("pull", number, _) => parse_nonzero(number)
            .map(FailureRef::PullRequest)
            .ok_or_else(|| format!("invalid pull request number '{number}'")),
        ("actions", "runs", Some(run_id)) => parse_nonzero(run_id)
            .map(FailureRef::WorkflowRun)
            .ok_or_else(|| format!("invalid run id '{run_id}'")),
        _ => Err("URL does not point at a pull request or workflow run".to_string()),
    }
}
