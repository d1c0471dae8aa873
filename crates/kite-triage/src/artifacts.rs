use std::path::{Path, PathBuf};

use kite_core::write_text_atomic;
use kite_safety::{redact_json_value, SecretRedactor};
use serde::Serialize;

use crate::report::{render_markdown, render_playbook};
use crate::triage_types::{TriageError, TriageReport};

pub const REPORT_MARKDOWN_FILE: &str = "report.md";
pub const REPORT_JSON_FILE: &str = "report.json";
pub const PATCH_FILE: &str = "fix.patch";
pub const PLAYBOOK_FILE: &str = "playbook.txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    pub markdown: PathBuf,
    pub json: PathBuf,
    pub patch: Option<PathBuf>,
    pub playbook: PathBuf,
}

fn write_redacted(
    path: &Path,
    content: &str,
    redactor: &SecretRedactor,
) -> Result<(), TriageError> {
    let redacted = redactor.redact(content);
    if redactor.contains_secret(&redacted) {
        tracing::warn!(path = %path.display(), "artifact still matches a secret pattern after redaction");
    }
    write_text_atomic(path, &redacted).map_err(|error| TriageError::Io {
        path: path.to_path_buf(),
        message: format!("{error:#}"),
    })
}

/// Writes the Markdown and JSON reports, the playbook, and the patch when one exists.
///
/// Every artifact passes through `redactor` first.
pub fn emit_artifacts(
    directory: &Path,
    report: &TriageReport,
    redactor: &SecretRedactor,
) -> Result<ArtifactPaths, TriageError> {
    let markdown = directory.join(REPORT_MARKDOWN_FILE);
    write_redacted(&markdown, &render_markdown(report), redactor)?;

    let json = directory.join(REPORT_JSON_FILE);
    let mut value = serde_json::to_value(report).map_err(|error| TriageError::Io {
        path: json.clone(),
        message: format!("failed to serialize report: {error}"),
    })?;
    redact_json_value(redactor, &mut value);
    let rendered = serde_json::to_string_pretty(&value).map_err(|error| TriageError::Io {
        path: json.clone(),
        message: format!("failed to serialize report: {error}"),
    })?;
    write_redacted(&json, &format!("{rendered}\n"), redactor)?;

    let patch = match report.fix.diff.as_deref() {
        Some(diff) => {
            let path = directory.join(PATCH_FILE);
            write_redacted(&path, diff, redactor)?;
            Some(path)
        }
        None => None,
    };

    let playbook = directory.join(PLAYBOOK_FILE);
    write_redacted(&playbook, &render_playbook(report), redactor)?;

    tracing::info!(
        directory = %directory.display(),
        patch = patch.is_some(),
        "wrote triage artifacts"
    );
    Ok(ArtifactPaths {
        directory: directory.to_path_buf(),
        markdown,
        json,
        patch,
        playbook,
    })
}
