//! Ordered rule chain mapping failure records to a root-cause category.
//!
//! Each record is attributed to the first rule matching its error message, or failing
//! that, the first rule matching its log excerpt. Confidence is `high` only when exactly
//! one non-fallback category collects records.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use kite_safety::SecretRedactor;
use regex::Regex;

use crate::triage_types::{Confidence, FailureRecord, Hypothesis, RootCause, RootCauseCategory};

const MAX_EVIDENCE_PER_HYPOTHESIS: usize = 3;
const MAX_EVIDENCE_CHARS: usize = 240;
pub const UNCLASSIFIED_EVIDENCE: &str =
    "could not classify root cause: no known failure signature matched";

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub name: &'static str,
    pub category: RootCauseCategory,
    patterns: Vec<Regex>,
}

impl ClassificationRule {
    /// Builds a rule; patterns that fail to compile are dropped.
    pub fn new(name: &'static str, category: RootCauseCategory, patterns: &[&str]) -> Self {
        Self {
            name,
            category,
            patterns: patterns
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
        }
    }

    /// First line of `text` any pattern matches.
    pub fn matching_line<'t>(&self, text: &'t str) -> Option<&'t str> {
        text.lines()
            .find(|line| self.patterns.iter().any(|pattern| pattern.is_match(line)))
    }
}

#[derive(Debug, Clone)]
pub struct RuleChain {
    rules: Vec<ClassificationRule>,
}

impl Default for RuleChain {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

fn default_rules() -> Vec<ClassificationRule> {
    vec![
        ClassificationRule::new(
            "dependency_not_found",
            RootCauseCategory::MissingDependency,
            &[
                r"(?:ModuleNotFoundError|ImportError): No module named",
                r"Cannot find module '[^'./][^']*'",
                r"TS2307: Cannot find module",
                r"error\[E0432\]: unresolved import",
                r"error\[E0433\]: failed to resolve: use of undeclared crate",
                r"(?i)no matching distribution found for",
                r"(?i)could not find a version that satisfies the requirement",
                r"(?i)no matching package named|failed to select a version for the requirement",
                r"npm ERR! (?:404|code E404|code ERESOLVE)",
                r"cannot find package|no required module provides package",
                r"(?i)could not resolve dependencies",
            ],
        ),
        ClassificationRule::new(
            "assertion_failure",
            RootCauseCategory::TestFailure,
            &[
                r"AssertionError|AssertionFailedError|ComparisonFailure",
                r"^\s*assert .+",
                r"(?i)assertion .*failed|assertion failed",
                r"expect\(received\)|^\s*Expected:",
                r"^\s*--- FAIL:",
                r"^FAILED \S+::",
                r"\bgot\b.*\bwant\b|=\s*\S+;\s*want\b",
            ],
        ),
        ClassificationRule::new(
            "environment_signature",
            RootCauseCategory::EnvironmentMismatch,
            &[
                r"(?i)timed out|timeout of \d+ms exceeded|deadline exceeded|\bTimeout >",
                r"(?i)exceeded the maximum execution time|the operation was canceled",
                r"(?i)no space left on device|out of memory|oom-?killed|exit code 137",
                r"(?i)command not found",
                r#"(?i)requires python|unsupported (?:python|node) version|the engine "node" is incompatible"#,
                r"(?i)connection refused|ECONNREFUSED|ETIMEDOUT|could not resolve host|temporary failure in name resolution",
                r"(?i)permission denied|unable to locate credentials|credentials? (?:not found|missing|expired)|access denied|bad credentials",
                r"GLIBC_\d",
            ],
        ),
        ClassificationRule::new(
            "uncaught_runtime_exception",
            RootCauseCategory::RuntimeError,
            &[
                r"Traceback \(most recent call last\)",
                r"\b(?:TypeError|ValueError|KeyError|IndexError|AttributeError|NameError|ZeroDivisionError|RuntimeError|RecursionError|UnboundLocalError|ReferenceError|RangeError|NullPointerException|IllegalStateException|IllegalArgumentException|ClassCastException)\b",
                r"panicked at|^panic: ",
                r"(?i)segmentation fault|SIGSEGV|core dumped",
                r"(?i)uncaught exception|unhandled (?:promise )?rejection",
            ],
        ),
        ClassificationRule::new(
            "nonzero_exit",
            RootCauseCategory::JobFailure,
            &[
                r"(?i)process completed with exit code [1-9]",
                r"(?i)exit(?:ed with)? (?:code|status) [1-9]",
                r"^npm ERR!",
                r"^make(?:\[\d+\])?: \*\*\*",
                r"^(?:error|ERROR|Error): ",
            ],
        ),
    ]
}

fn evidence_line(record: &FailureRecord, line: &str, redactor: &SecretRedactor) -> String {
    let line = redactor.redact_truncated(line.trim(), MAX_EVIDENCE_CHARS);
    match record.test_name.as_deref() {
        Some(test_name) => format!("{}: {line}", redactor.redact(test_name)),
        None => line,
    }
}

impl RuleChain {
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// Adds `rule` at the end of the chain.
    pub fn with_rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Rule index and evidence line attributed to `record`, if any rule matches.
    fn attribute(
        &self,
        record: &FailureRecord,
        redactor: &SecretRedactor,
    ) -> Option<(usize, String)> {
        [record.error_message.as_str(), record.raw_log_excerpt.as_str()]
            .into_iter()
            .find_map(|text| {
                self.rules.iter().enumerate().find_map(|(index, rule)| {
                    rule.matching_line(text)
                        .map(|line| (index, evidence_line(record, line, redactor)))
                })
            })
    }

    /// Evidence lines are redacted with `redactor` before they are shortened.
    pub fn classify(&self, records: &[FailureRecord], redactor: &SecretRedactor) -> RootCause {
        // Keyed by (category, first rule index) so ties rank in chain order.
        let mut by_category: BTreeMap<RootCauseCategory, (usize, Vec<String>, usize)> =
            BTreeMap::new();
        for record in records {
            let Some((rule_index, evidence)) = self.attribute(record, redactor) else {
                continue;
            };
            let category = self.rules[rule_index].category;
            let entry = by_category
                .entry(category)
                .or_insert_with(|| (0, Vec::new(), rule_index));
            entry.0 += 1;
            entry.2 = entry.2.min(rule_index);
            if entry.1.len() < MAX_EVIDENCE_PER_HYPOTHESIS && !entry.1.contains(&evidence) {
                entry.1.push(evidence);
            }
        }

        let mut ranked = by_category
            .into_iter()
            .map(|(category, (score, evidence, rule_index))| (rule_index, Hypothesis {
                category,
                score,
                evidence,
            }))
            .collect::<Vec<_>>();
        ranked.sort_by(|(left_rule, left), (right_rule, right)| {
            left.category
                .is_fallback()
                .cmp(&right.category.is_fallback())
                .then(right.score.cmp(&left.score))
                .then(left_rule.cmp(right_rule))
        });
        let hypotheses = ranked
            .into_iter()
            .map(|(_, hypothesis)| hypothesis)
            .collect::<Vec<_>>();

        let specific = hypotheses
            .iter()
            .filter(|hypothesis| !hypothesis.category.is_fallback())
            .count();
        let confidence = match specific {
            1 => Confidence::High,
            0 => Confidence::Low,
            _ => Confidence::Medium,
        };
        let (category, evidence) = match hypotheses.first() {
            Some(primary) => (primary.category, primary.evidence.join("; ")),
            None => (
                RootCauseCategory::Unknown,
                UNCLASSIFIED_EVIDENCE.to_string(),
            ),
        };
        RootCause {
            category,
            confidence,
            evidence,
            hypotheses,
        }
    }
}

/// Classifies `records` with the built-in rule chain.
pub fn classify_root_cause(records: &[FailureRecord], redactor: &SecretRedactor) -> RootCause {
    static CHAIN: OnceLock<RuleChain> = OnceLock::new();
    CHAIN.get_or_init(RuleChain::default).classify(records, redactor)
}
