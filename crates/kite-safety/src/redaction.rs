use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

/// Fixed prefix of every masked secret.
pub const MASK_PREFIX: &str = "********";
pub const MASK_VISIBLE_SUFFIX_CHARS: usize = 4;

const MIN_KNOWN_SECRET_CHARS: usize = 6;
const SECRET_GROUP: &str = "secret";

#[derive(Debug, Clone)]
/// One named secret shape. When the regex has a `secret` group only that group is masked.
pub struct SecretPattern {
    pub name: &'static str,
    regex: Regex,
}

impl SecretPattern {
    fn new(name: &'static str, pattern: &str) -> Option<Self> {
        Regex::new(pattern).ok().map(|regex| Self { name, regex })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

fn builtin_patterns() -> Vec<SecretPattern> {
    [
        (
            "private_key_block",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----",
        ),
        ("github_token", r"\bgh[pousr]_[A-Za-z0-9]{20,}\b"),
        ("github_fine_grained_pat", r"\bgithub_pat_[A-Za-z0-9_]{20,}\b"),
        ("aws_access_key_id", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        ("slack_token", r"\bxox[abprs]-[A-Za-z0-9-]{10,}\b"),
        ("api_secret_key", r"\bsk-[A-Za-z0-9_-]{20,}\b"),
        (
            "jwt",
            r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\b",
        ),
        (
            "bearer_token",
            r"(?i)\bbearer\s+(?P<secret>[A-Za-z0-9._~+/=-]{12,})",
        ),
        (
            "url_credentials",
            r"(?i)\b[a-z][a-z0-9+.-]*://[^/\s:@]+:(?P<secret>[^@\s/]{6,})@",
        ),
        (
            "assigned_secret",
            r#"(?i)\b[A-Z0-9_.-]*(?:SECRET|TOKEN|PASSWORD|PASSWD|API[_-]?KEY|ACCESS[_-]?KEY|PRIVATE[_-]?KEY|CREDENTIALS?)[A-Z0-9_.-]*["']?\s*[:=]\s*["']?(?P<secret>[^\s"',;]{8,})"#,
        ),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| SecretPattern::new(name, pattern))
    .collect()
}

/// Masks `raw` to a fixed-length form showing only its last four characters.
pub fn mask_secret(raw: &str) -> String {
    let chars = raw.chars().collect::<Vec<_>>();
    let visible_from = chars.len().saturating_sub(MASK_VISIBLE_SUFFIX_CHARS);
    let suffix = chars[visible_from..].iter().collect::<String>();
    format!("{MASK_PREFIX}{suffix}")
}

#[derive(Debug, Clone)]
/// Pattern catalog plus exact secret values known to the current run.
pub struct SecretRedactor {
    patterns: Vec<SecretPattern>,
    known_secrets: Vec<String>,
}

impl Default for SecretRedactor {
    fn default() -> Self {
        Self {
            patterns: builtin_patterns(),
            known_secrets: Vec::new(),
        }
    }
}

impl SecretRedactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds sensitive-looking environment values (`*_KEY`, `*_TOKEN`, `*_SECRET`, `*_PASSWORD`).
    pub fn with_env_secrets(mut self) -> Self {
        for (name, value) in std::env::vars() {
            let upper = name.to_ascii_uppercase();
            let is_sensitive = upper.ends_with("_KEY")
                || upper.ends_with("_TOKEN")
                || upper.ends_with("_SECRET")
                || upper.ends_with("_PASSWORD");
            if is_sensitive {
                self = self.with_known_secret(value);
            }
        }
        self
    }

    pub fn with_known_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into().trim().to_string();
        if secret.chars().count() >= MIN_KNOWN_SECRET_CHARS && !self.known_secrets.contains(&secret)
        {
            self.known_secrets.push(secret);
            // Longest first so a secret that contains another is masked whole.
            self.known_secrets
                .sort_by(|left, right| right.len().cmp(&left.len()));
        }
        self
    }

    pub fn patterns(&self) -> &[SecretPattern] {
        &self.patterns
    }

    pub fn contains_secret(&self, text: &str) -> bool {
        self.known_secrets
            .iter()
            .any(|secret| text.contains(secret.as_str()))
            || self.patterns.iter().any(|pattern| {
                pattern
                    .regex
                    .captures_iter(text)
                    .any(|captures| !is_already_masked(secret_span(&captures)))
            })
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for secret in &self.known_secrets {
            if redacted.contains(secret.as_str()) {
                redacted = redacted.replace(secret.as_str(), &mask_secret(secret));
            }
        }
        for pattern in &self.patterns {
            redacted = pattern
                .regex
                .replace_all(&redacted, |captures: &Captures<'_>| {
                    mask_captures(captures)
                })
                .into_owned();
        }
        redacted
    }

    /// Redacts all of `text`, then cuts it to `max_chars` characters plus `...`.
    pub fn redact_truncated(&self, text: &str, max_chars: usize) -> String {
        truncate_chars(&self.redact(text), max_chars)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated = text.chars().take(max_chars).collect::<String>();
    truncated.push_str("...");
    truncated
}

fn secret_span<'t>(captures: &Captures<'t>) -> &'t str {
    captures
        .name(SECRET_GROUP)
        .or_else(|| captures.get(0))
        .map(|found| found.as_str())
        .unwrap_or_default()
}

fn is_already_masked(value: &str) -> bool {
    value.starts_with(MASK_PREFIX)
        && value.chars().count() <= MASK_PREFIX.len() + MASK_VISIBLE_SUFFIX_CHARS
}

fn mask_captures(captures: &Captures<'_>) -> String {
    let Some(whole) = captures.get(0) else {
        return String::new();
    };
    match captures.name(SECRET_GROUP) {
        Some(secret) => {
            let relative_start = secret.start() - whole.start();
            let relative_end = secret.end() - whole.start();
            let whole_text = whole.as_str();
            format!(
                "{}{}{}",
                &whole_text[..relative_start],
                mask_secret(secret.as_str()),
                &whole_text[relative_end..]
            )
        }
        None => mask_secret(whole.as_str()),
    }
}

/// Redacts with the process-wide catalog, including sensitive environment values.
pub fn redact_secrets(text: &str) -> String {
    static REDACTOR: OnceLock<SecretRedactor> = OnceLock::new();
    REDACTOR
        .get_or_init(|| SecretRedactor::new().with_env_secrets())
        .redact(text)
}

/// [`redact_secrets`] followed by truncation; a secret straddling the cut is masked whole.
pub fn redact_truncated(text: &str, max_chars: usize) -> String {
    truncate_chars(&redact_secrets(text), max_chars)
}

/// Applies `redactor` to every string inside a JSON document.
pub fn redact_json_value(redactor: &SecretRedactor, value: &mut Value) {
    match value {
        Value::String(text) => {
            let redacted = redactor.redact(text);
            if redacted != *text {
                *text = redacted;
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_json_value(redactor, item);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                redact_json_value(redactor, item);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
