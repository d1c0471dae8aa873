use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use kite_core::write_text_atomic;
use kite_github::{GithubClientConfig, DEFAULT_GITHUB_API_BASE};
use serde::{Deserialize, Serialize};

use crate::extract::DEFAULT_EXCERPT_LINES;

pub const DEFAULT_BRANCH_PREFIX: &str = "triage/fix-";
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 300_000;

const CONFIG_HEADER: &str = "# kite triage configuration\n# Generated by `triage generate-config`; every key is optional.\n\n";

fn default_check_timeout_ms() -> u64 {
    DEFAULT_CHECK_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for GithubSettings {
    fn default() -> Self {
        let client = GithubClientConfig::default();
        Self {
            api_base: DEFAULT_GITHUB_API_BASE.to_string(),
            request_timeout_ms: client.request_timeout_ms,
            retry_max_attempts: client.retry_max_attempts,
            retry_base_delay_ms: client.retry_base_delay_ms,
            max_retry_delay_ms: client.max_retry_delay_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixSettings {
    pub branch_prefix: String,
    pub reviewers: Vec<String>,
}

impl Default for FixSettings {
    fn default() -> Self {
        Self {
            branch_prefix: DEFAULT_BRANCH_PREFIX.to_string(),
            reviewers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub excerpt_lines: usize,
    pub extra_sensitive_markers: Vec<String>,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            excerpt_lines: DEFAULT_EXCERPT_LINES,
            extra_sensitive_markers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// A local verification command run by the safety gate.
pub struct GateCheck {
    pub name: String,
    pub command: String,
    /// File suffixes that make this check relevant; empty means always.
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default = "default_check_timeout_ms")]
    pub timeout_ms: u64,
}

impl GateCheck {
    pub fn new(name: &str, command: &str, applies_to: &[&str], timeout_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            applies_to: applies_to.iter().map(|suffix| suffix.to_string()).collect(),
            timeout_ms,
        }
    }

    pub fn applies_to_any(&self, paths: &[String]) -> bool {
        self.applies_to.is_empty()
            || paths.iter().any(|path| {
                self.applies_to
                    .iter()
                    .any(|suffix| path.ends_with(suffix.as_str()))
            })
    }
}

pub fn default_gate_checks() -> Vec<GateCheck> {
    vec![
        GateCheck::new("rust-check", "cargo check --all-targets --quiet", &[".rs"], 600_000),
        GateCheck::new("python-compile", "python3 -m compileall -q .", &[".py"], 300_000),
        GateCheck::new(
            "node-lint",
            "npx --no-install eslint .",
            &[".js", ".jsx", ".ts", ".tsx"],
            300_000,
        ),
        GateCheck::new("go-vet", "go vet ./...", &[".go"], 300_000),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub github: GithubSettings,
    pub fix: FixSettings,
    pub analysis: AnalysisSettings,
    pub checks: Vec<GateCheck>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            github: GithubSettings::default(),
            fix: FixSettings::default(),
            analysis: AnalysisSettings::default(),
            checks: default_gate_checks(),
        }
    }
}

impl TriageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.github.retry_max_attempts == 0 {
            bail!("github.retry_max_attempts must be at least 1");
        }
        if self.analysis.excerpt_lines == 0 {
            bail!("analysis.excerpt_lines must be at least 1");
        }
        let prefix = self.fix.branch_prefix.trim();
        if prefix.is_empty()
            || prefix
                .chars()
                .any(|ch| ch.is_whitespace() || "~^:?*[\\".contains(ch))
            || prefix.contains("..")
        {
            bail!(
                "fix.branch_prefix '{}' is not a valid branch name prefix",
                self.fix.branch_prefix
            );
        }
        let mut names = BTreeSet::new();
        for check in &self.checks {
            if check.name.trim().is_empty() {
                bail!("every [[checks]] entry needs a name");
            }
            if !names.insert(check.name.as_str()) {
                bail!("duplicate check name '{}'", check.name);
            }
            let argv = shell_words::split(&check.command)
                .with_context(|| format!("check '{}' has an invalid command", check.name))?;
            if argv.is_empty() {
                bail!("check '{}' has an empty command", check.name);
            }
        }
        Ok(())
    }

    /// Client settings, with the CLI's token and optional API base override applied.
    pub fn github_client_config(
        &self,
        token: Option<String>,
        api_base_override: Option<String>,
    ) -> GithubClientConfig {
        GithubClientConfig {
            api_base: api_base_override.unwrap_or_else(|| self.github.api_base.clone()),
            token,
            request_timeout_ms: self.github.request_timeout_ms,
            retry_max_attempts: self.github.retry_max_attempts,
            retry_base_delay_ms: self.github.retry_base_delay_ms,
            max_retry_delay_ms: self.github.max_retry_delay_ms,
        }
    }
}

pub fn load_triage_config(path: &Path) -> Result<TriageConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read triage config {}", path.display()))?;
    let config: TriageConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse triage config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid triage config {}", path.display()))?;
    Ok(config)
}

pub fn render_default_config() -> Result<String> {
    let body = toml::to_string_pretty(&TriageConfig::default())
        .context("failed to render default triage config")?;
    Ok(format!("{CONFIG_HEADER}{body}"))
}

/// Writes the default config to `path`; an existing file is never overwritten.
pub fn generate_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "refusing to overwrite existing config {}",
            path.display()
        );
    }
    write_text_atomic(path, &render_default_config()?)
}

#[cfg(test)]
mod tests {
    use super::{
        generate_config, load_triage_config, render_default_config, GateCheck, TriageConfig,
        DEFAULT_BRANCH_PREFIX,
    };

    #[test]
    fn functional_generated_config_round_trips_through_loader() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("conf/triage.toml");
        generate_config(&path).expect("generate");
        let loaded = load_triage_config(&path).expect("load");
        assert_eq!(loaded, TriageConfig::default());
        assert!(std::fs::read_to_string(&path)
            .expect("read")
            .starts_with("# kite triage configuration"));
    }

    #[test]
    fn regression_generate_config_refuses_to_overwrite() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("triage.toml");
        std::fs::write(&path, "keep = true\n").expect("seed");
        let error = generate_config(&path).expect_err("must refuse");
        assert!(error.to_string().contains("refusing to overwrite"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "keep = true\n");
    }

    #[test]
    fn functional_partial_config_keeps_defaults() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("triage.toml");
        std::fs::write(
            &path,
            "[fix]\nreviewers = [\"octocat\"]\n\n[[checks]]\nname = \"unit\"\ncommand = \"make test\"\n",
        )
        .expect("write");
        let config = load_triage_config(&path).expect("load");
        assert_eq!(config.fix.branch_prefix, DEFAULT_BRANCH_PREFIX);
        assert_eq!(config.fix.reviewers, vec!["octocat".to_string()]);
        assert_eq!(config.checks.len(), 1);
        assert_eq!(config.checks[0].timeout_ms, 300_000);
        assert_eq!(config.github.retry_max_attempts, 5);
    }

    #[test]
    fn regression_invalid_values_are_rejected() {
        let mut config = TriageConfig::default();
        config.fix.branch_prefix = "bad prefix".to_string();
        assert!(config.validate().is_err());

        let mut config = TriageConfig::default();
        config.checks.push(GateCheck::new("rust-check", "cargo test", &[], 1));
        assert!(config
            .validate()
            .expect_err("duplicate")
            .to_string()
            .contains("duplicate check name"));

        let mut config = TriageConfig::default();
        config.checks = vec![GateCheck::new("quotes", "sh -c 'unterminated", &[], 1)];
        assert!(config.validate().is_err());
        assert!(render_default_config().expect("render").contains("[[checks]]"));
    }

    #[test]
    fn unit_gate_check_suffix_matching() {
        let check = GateCheck::new("py", "true", &[".py"], 1);
        assert!(check.applies_to_any(&["src/app.py".to_string()]));
        assert!(!check.applies_to_any(&["src/app.rs".to_string()]));
        assert!(GateCheck::new("all", "true", &[], 1).applies_to_any(&[]));
    }
}
