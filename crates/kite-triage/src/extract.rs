//! Log scanning that turns CI output into [`FailureRecord`]s.
//!
//! Each scanner recognizes one family of output (pytest, Python tracebacks, Rust test
//! harness and compiler, Jest, Node, Go, and bare command failures). Records found by
//! several scanners are deduplicated by line range; text with no recognized signature
//! yields a single generic record holding the log tail.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::triage_types::{AssertionMismatch, FailureRecord, StackFrame};

pub const DEFAULT_EXCERPT_LINES: usize = 40;
pub const MAX_FAILURE_RECORDS: usize = 25;
pub const GENERIC_FAILURE_MESSAGE: &str = "no recognized failure signature in log output";
const MAX_MESSAGE_LINES: usize = 6;

struct LogPatterns {
    timestamp: Option<Regex>,
    ansi: Option<Regex>,
    pytest_header: Option<Regex>,
    pytest_error_line: Option<Regex>,
    pytest_location: Option<Regex>,
    pytest_summary: Option<Regex>,
    python_compare: Option<Regex>,
    traceback_frame: Option<Regex>,
    rust_test_header: Option<Regex>,
    rust_panic: Option<Regex>,
    rust_panic_legacy: Option<Regex>,
    rust_side: Option<Regex>,
    compiler_error: Option<Regex>,
    compiler_location: Option<Regex>,
    typescript_error: Option<Regex>,
    jest_header: Option<Regex>,
    jest_value: Option<Regex>,
    jest_code: Option<Regex>,
    js_frame: Option<Regex>,
    js_error: Option<Regex>,
    go_fail: Option<Regex>,
    go_location: Option<Regex>,
    go_got_want: Option<Regex>,
    command_failures: Vec<Regex>,
}

fn log_patterns() -> &'static LogPatterns {
    static PATTERNS: OnceLock<LogPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LogPatterns {
        timestamp: Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z ?").ok(),
        ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").ok(),
        pytest_header: Regex::new(r"^_{3,} (?P<name>\S.*?) _{3,}$").ok(),
        pytest_error_line: Regex::new(r"^E\s+(?P<message>.*)$").ok(),
        pytest_location: Regex::new(r"^(?P<file>[^\s:]+\.py):(?P<line>\d+): (?P<exc>\w+)$").ok(),
        pytest_summary: Regex::new(r"^(?:FAILED|ERROR) (?P<id>\S+::\S+)(?: - (?P<message>.+))?$")
            .ok(),
        python_compare: Regex::new(
            r"^(?:AssertionError:\s*)?assert (?P<actual>.+?) == (?P<expected>.+)$",
        )
        .ok(),
        traceback_frame: Regex::new(r#"^\s*File "(?P<file>[^"]+)", line (?P<line>\d+)"#).ok(),
        rust_test_header: Regex::new(r"^---- (?P<test>\S+) stdout ----$").ok(),
        rust_panic: Regex::new(r"panicked at (?P<file>[^\s:'][^\s:]*):(?P<line>\d+):\d+:?\s*$")
            .ok(),
        rust_panic_legacy: Regex::new(
            r"panicked at '(?P<message>.*)', (?P<file>[^\s:]+):(?P<line>\d+):\d+",
        )
        .ok(),
        rust_side: Regex::new(r"^\s*(?P<side>left|right)\s*:\s*(?P<value>.+?),?\s*$").ok(),
        compiler_error: Regex::new(r"^error(?:\[E\d{4}\])?: (?P<message>.+)$").ok(),
        compiler_location: Regex::new(r"^\s*--> (?P<file>[^\s:]+):(?P<line>\d+):\d+").ok(),
        typescript_error: Regex::new(
            r"^(?P<file>[^\s(]+)\((?P<line>\d+),\d+\): error (?P<message>TS\d+: .+)$",
        )
        .ok(),
        jest_header: Regex::new(r"^\s*● (?P<test>.+)$").ok(),
        jest_value: Regex::new(r"^\s*(?P<side>Expected|Received):\s*(?P<value>.+?)\s*$").ok(),
        jest_code: Regex::new(r"^\s*>?\s*\d*\s*\|").ok(),
        js_frame: Regex::new(r"^\s*at (?:.*\()?(?P<file>[^\s()]+?):(?P<line>\d+):\d+\)?\s*$").ok(),
        js_error: Regex::new(r"^(?:Uncaught )?(?P<message>(?:[A-Z][A-Za-z]*)?Error: .+)$").ok(),
        go_fail: Regex::new(r"^\s*--- FAIL: (?P<test>\S+)").ok(),
        go_location: Regex::new(r"^\s+(?P<file>[\w./-]+\.go):(?P<line>\d+): (?P<message>.+)$")
            .ok(),
        go_got_want: Regex::new(
            r"(?:got|=)\s*(?P<actual>[^\s,;]+)[,;]?\s*(?:want|expected)\s*(?P<expected>[^\s,;]+)",
        )
        .ok(),
        command_failures: [
            r"^##\[error\](?P<message>.+)$",
            r"^npm ERR! (?P<message>.+)$",
            r"^ERROR: (?P<message>.+)$",
            r"^error: (?P<message>.+)$",
            r"^Error: (?P<message>.+)$",
            r"^make(?:\[\d+\])?: \*\*\* (?P<message>.+)$",
            r"^(?P<message>.*\b(?:exited with|exit status|exit code) [1-9]\d*.*)$",
            r"^(?P<message>.*: command not found)$",
            r"^(?P<message>.*\bNo space left on device.*)$",
        ]
        .into_iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect(),
    })
}

fn captures<'t>(regex: &Option<Regex>, text: &'t str) -> Option<Captures<'t>> {
    regex.as_ref()?.captures(text)
}

fn group<'t>(captures: &Captures<'t>, name: &str) -> &'t str {
    captures
        .name(name)
        .map(|found| found.as_str())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default)]
struct Candidate {
    start: usize,
    end: usize,
    structured: bool,
    test_name: Option<String>,
    message_lines: Vec<String>,
    frames: Vec<StackFrame>,
    expected: Option<String>,
    actual: Option<String>,
}

impl Candidate {
    fn block(start: usize, test_name: Option<String>) -> Self {
        Self {
            start,
            end: start,
            structured: true,
            test_name,
            ..Self::default()
        }
    }

    fn push_message(&mut self, line: &str) {
        let line = line.trim();
        if !line.is_empty() && self.message_lines.len() < MAX_MESSAGE_LINES {
            self.message_lines.push(line.to_string());
        }
    }

    fn push_frame(&mut self, file: &str, line: &str) {
        let frame = StackFrame {
            file: file.to_string(),
            line: line.parse::<u32>().ok(),
        };
        if !self.frames.contains(&frame) {
            self.frames.push(frame);
        }
    }

    fn set_assertion(&mut self, expected: &str, actual: &str) {
        if self.expected.is_none() && self.actual.is_none() {
            self.expected = Some(clean_value(expected));
            self.actual = Some(clean_value(actual));
        }
    }

    fn message(&self) -> String {
        if self.message_lines.is_empty() {
            "test failed".to_string()
        } else {
            self.message_lines.join("\n")
        }
    }

    fn contains(&self, other: &Candidate) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    fn into_record(self, lines: &[String], excerpt_lines: usize) -> FailureRecord {
        let end = self.end.min(lines.len().saturating_sub(1)).max(self.start);
        let excerpt = lines
            .get(self.start..=end)
            .unwrap_or_default()
            .iter()
            .take(excerpt_lines.max(1))
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let message = self.message();
        let assertion = match (self.expected, self.actual) {
            (Some(expected), Some(actual)) => Some(AssertionMismatch { expected, actual }),
            _ => None,
        };
        FailureRecord {
            test_name: self.test_name,
            error_message: message,
            stack_frames: self.frames,
            raw_log_excerpt: excerpt,
            assertion,
        }
    }
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(',')
        .trim_matches('`')
        .trim()
        .to_string()
}

fn finish(candidates: &mut Vec<Candidate>, candidate: Option<Candidate>) {
    if let Some(candidate) = candidate {
        candidates.push(candidate);
    }
}

fn is_block_boundary(line: &str) -> bool {
    line.starts_with("##[")
}

fn clean_lines(log_text: &str, patterns: &LogPatterns) -> Vec<String> {
    log_text
        .lines()
        .map(|raw| {
            let mut line = raw.trim_end_matches('\r').to_string();
            if let Some(ansi) = patterns.ansi.as_ref() {
                line = ansi.replace_all(&line, "").into_owned();
            }
            if let Some(timestamp) = patterns.timestamp.as_ref() {
                line = timestamp.replace(&line, "").into_owned();
            }
            line
        })
        .collect()
}

fn scan_pytest(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut current: Option<Candidate> = None;
    for (index, line) in lines.iter().enumerate() {
        if let Some(header) = captures(&patterns.pytest_header, line) {
            finish(&mut candidates, current.take());
            current = Some(Candidate::block(index, Some(group(&header, "name").to_string())));
            continue;
        }
        if line.starts_with("====") || is_block_boundary(line) {
            finish(&mut candidates, current.take());
            continue;
        }
        let Some(candidate) = current.as_mut() else {
            continue;
        };
        candidate.end = index;
        if let Some(error) = captures(&patterns.pytest_error_line, line) {
            let message = group(&error, "message").trim();
            candidate.push_message(message);
            if let Some(compare) = captures(&patterns.python_compare, message) {
                candidate.set_assertion(group(&compare, "expected"), group(&compare, "actual"));
            }
        } else if let Some(location) = captures(&patterns.pytest_location, line) {
            candidate.push_frame(group(&location, "file"), group(&location, "line"));
            if candidate.message_lines.is_empty() {
                candidate.push_message(group(&location, "exc"));
            }
        }
    }
    finish(&mut candidates, current);

    for (index, line) in lines.iter().enumerate() {
        let Some(summary) = captures(&patterns.pytest_summary, line) else {
            continue;
        };
        let id = group(&summary, "id");
        let matching = candidates.iter_mut().find(|candidate| {
            candidate
                .test_name
                .as_deref()
                .is_some_and(|name| id.ends_with(&name.replace('.', "::")))
        });
        if let Some(existing) = matching {
            existing.test_name = Some(id.to_string());
            continue;
        }
        let mut candidate = Candidate::block(index, Some(id.to_string()));
        if let Some(message) = summary.name("message").map(|found| found.as_str()) {
            candidate.push_message(message);
            if let Some(compare) = captures(&patterns.python_compare, message.trim()) {
                candidate.set_assertion(group(&compare, "expected"), group(&compare, "actual"));
            }
        }
        if let Some(file) = id.split("::").next().filter(|file| file.ends_with(".py")) {
            candidate.push_frame(file, "");
        }
        candidates.push(candidate);
    }
    candidates
}

fn scan_python_tracebacks(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut index = 0;
    while index < lines.len() {
        if !lines[index]
            .trim_start()
            .starts_with("Traceback (most recent call last):")
        {
            index += 1;
            continue;
        }
        let mut candidate = Candidate::block(index, None);
        let mut cursor = index + 1;
        while cursor < lines.len() {
            let line = &lines[cursor];
            if is_block_boundary(line) {
                break;
            }
            candidate.end = cursor;
            if let Some(frame) = captures(&patterns.traceback_frame, line) {
                candidate.push_frame(group(&frame, "file"), group(&frame, "line"));
            } else if !line.trim().is_empty() && !line.starts_with(char::is_whitespace) {
                candidate.push_message(line);
                break;
            }
            cursor += 1;
        }
        if candidate.message_lines.is_empty() {
            candidate.push_message("uncaught Python exception");
        }
        index = candidate.end + 1;
        candidates.push(candidate);
    }
    candidates
}

fn scan_rust(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut current: Option<Candidate> = None;
    let mut standalone = false;
    for (index, line) in lines.iter().enumerate() {
        if let Some(header) = captures(&patterns.rust_test_header, line) {
            finish(&mut candidates, current.take());
            current = Some(Candidate::block(index, Some(group(&header, "test").to_string())));
            standalone = false;
            continue;
        }
        if line.starts_with("failures:")
            || line.starts_with("test result:")
            || is_block_boundary(line)
            || (standalone && line.trim().is_empty())
        {
            finish(&mut candidates, current.take());
            standalone = false;
            continue;
        }
        let panic = captures(&patterns.rust_panic_legacy, line)
            .or_else(|| captures(&patterns.rust_panic, line));
        if let Some(panic) = panic {
            let candidate = current.get_or_insert_with(|| {
                standalone = true;
                Candidate::block(index, None)
            });
            candidate.end = index;
            candidate.push_frame(group(&panic, "file"), group(&panic, "line"));
            if let Some(message) = panic.name("message") {
                candidate.push_message(message.as_str());
            }
            continue;
        }
        let Some(candidate) = current.as_mut() else {
            continue;
        };
        candidate.end = index;
        if let Some(side) = captures(&patterns.rust_side, line) {
            match group(&side, "side") {
                "left" => candidate.actual = Some(clean_value(group(&side, "value"))),
                _ => candidate.expected = Some(clean_value(group(&side, "value"))),
            }
        } else if !line.starts_with("note: ") && !candidate.frames.is_empty() {
            candidate.push_message(line);
        }
    }
    finish(&mut candidates, current);
    candidates
}

fn scan_compiler_errors(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if let Some(error) = captures(&patterns.typescript_error, line) {
            let mut candidate = Candidate::block(index, None);
            candidate.push_message(group(&error, "message"));
            candidate.push_frame(group(&error, "file"), group(&error, "line"));
            candidates.push(candidate);
            continue;
        }
        if captures(&patterns.compiler_error, line).is_none() {
            continue;
        }
        let location = lines
            .iter()
            .enumerate()
            .skip(index + 1)
            .take(3)
            .find_map(|(offset, next)| {
                captures(&patterns.compiler_location, next).map(|found| (offset, found))
            });
        if let Some((location_index, location)) = location {
            let mut candidate = Candidate::block(index, None);
            candidate.end = location_index;
            candidate.push_message(line);
            candidate.push_frame(group(&location, "file"), group(&location, "line"));
            candidates.push(candidate);
        }
    }
    candidates
}

fn is_internal_js_frame(file: &str) -> bool {
    file.contains("node_modules") || file.starts_with("node:") || file.starts_with("internal/")
}

fn scan_jest(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut current: Option<Candidate> = None;
    for (index, line) in lines.iter().enumerate() {
        if let Some(header) = captures(&patterns.jest_header, line) {
            finish(&mut candidates, current.take());
            current = Some(Candidate::block(
                index,
                Some(group(&header, "test").trim().to_string()),
            ));
            continue;
        }
        let trimmed = line.trim_start();
        if trimmed.starts_with("Test Suites:")
            || trimmed.starts_with("Tests:")
            || is_block_boundary(line)
        {
            finish(&mut candidates, current.take());
            continue;
        }
        let Some(candidate) = current.as_mut() else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        candidate.end = index;
        if let Some(frame) = captures(&patterns.js_frame, line) {
            let file = group(&frame, "file");
            if !is_internal_js_frame(file) {
                candidate.push_frame(file, group(&frame, "line"));
            }
            continue;
        }
        if captures(&patterns.jest_code, line).is_some() {
            continue;
        }
        if let Some(value) = captures(&patterns.jest_value, line) {
            match group(&value, "side") {
                "Expected" => candidate.expected = Some(clean_value(group(&value, "value"))),
                _ => candidate.actual = Some(clean_value(group(&value, "value"))),
            }
        }
        candidate.push_message(line);
    }
    finish(&mut candidates, current);
    candidates
}

fn scan_js_errors(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(error) = captures(&patterns.js_error, line.trim()) else {
            continue;
        };
        let mut candidate = Candidate::block(index, None);
        candidate.push_message(group(&error, "message"));
        for (offset, next) in lines.iter().enumerate().skip(index + 1) {
            let Some(frame) = captures(&patterns.js_frame, next) else {
                break;
            };
            candidate.end = offset;
            let file = group(&frame, "file");
            if !is_internal_js_frame(file) {
                candidate.push_frame(file, group(&frame, "line"));
            }
        }
        if candidate.end > index {
            candidates.push(candidate);
        }
    }
    candidates
}

fn scan_go(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(fail) = captures(&patterns.go_fail, line) else {
            continue;
        };
        let mut candidate = Candidate::block(index, Some(group(&fail, "test").to_string()));
        for (offset, next) in lines.iter().enumerate().skip(index + 1) {
            let Some(location) = captures(&patterns.go_location, next) else {
                break;
            };
            candidate.end = offset;
            let message = group(&location, "message");
            candidate.push_frame(group(&location, "file"), group(&location, "line"));
            candidate.push_message(message);
            if let Some(compare) = captures(&patterns.go_got_want, message) {
                candidate.set_assertion(group(&compare, "expected"), group(&compare, "actual"));
            }
        }
        candidates.push(candidate);
    }
    candidates
}

fn scan_command_failures(lines: &[String], patterns: &LogPatterns) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut previous_pattern: Option<(usize, usize)> = None;
    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let matched = patterns
            .command_failures
            .iter()
            .enumerate()
            .find_map(|(pattern_index, regex)| {
                regex
                    .captures(trimmed)
                    .map(|found| (pattern_index, group(&found, "message").to_string()))
            });
        let Some((pattern_index, message)) = matched else {
            previous_pattern = None;
            continue;
        };
        let continues_group = previous_pattern
            .is_some_and(|(last_pattern, last_index)| {
                last_pattern == pattern_index && last_index + 1 == index
            });
        previous_pattern = Some((pattern_index, index));
        if continues_group {
            if let Some(last) = candidates.last_mut() {
                last.end = index;
                last.push_message(&message);
                continue;
            }
        }
        candidates.push(Candidate {
            start: index.saturating_sub(2),
            end: index,
            structured: false,
            message_lines: vec![message],
            ..Candidate::default()
        });
    }
    candidates
}

fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let keep = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            !candidates.iter().enumerate().any(|(other_index, other)| {
                if other_index == index || !other.contains(candidate) {
                    return false;
                }
                let covered_by_named = candidate.test_name.is_none() && other.test_name.is_some();
                let covered_by_block = !candidate.structured && other.structured;
                covered_by_named || covered_by_block
            })
        })
        .collect::<Vec<_>>();

    let mut kept: Vec<Candidate> = Vec::new();
    for (candidate, keep) in candidates.into_iter().zip(keep) {
        if !keep {
            continue;
        }
        let duplicate = kept.iter().any(|existing| {
            existing.test_name == candidate.test_name && existing.message() == candidate.message()
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept.sort_by_key(|candidate| (candidate.start, candidate.end));
    kept
}

/// Extracts every recognized failure from `log_text`; empty input yields no records.
pub fn extract_failures(log_text: &str, excerpt_lines: usize) -> Vec<FailureRecord> {
    let patterns = log_patterns();
    let lines = clean_lines(log_text, patterns);
    if lines.iter().all(|line| line.trim().is_empty()) {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    candidates.extend(scan_pytest(&lines, patterns));
    candidates.extend(scan_python_tracebacks(&lines, patterns));
    candidates.extend(scan_rust(&lines, patterns));
    candidates.extend(scan_compiler_errors(&lines, patterns));
    candidates.extend(scan_jest(&lines, patterns));
    candidates.extend(scan_js_errors(&lines, patterns));
    candidates.extend(scan_go(&lines, patterns));
    candidates.extend(scan_command_failures(&lines, patterns));

    let records = dedupe(candidates)
        .into_iter()
        .take(MAX_FAILURE_RECORDS)
        .map(|candidate| candidate.into_record(&lines, excerpt_lines))
        .collect::<Vec<_>>();
    if !records.is_empty() {
        return records;
    }

    let tail = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();
    let from = tail.len().saturating_sub(excerpt_lines.max(1));
    vec![FailureRecord {
        test_name: None,
        error_message: GENERIC_FAILURE_MESSAGE.to_string(),
        stack_frames: Vec::new(),
        raw_log_excerpt: tail[from..].join("\n"),
        assertion: None,
    }]
}

#[cfg(test)]
mod tests {
    use super::{extract_failures, DEFAULT_EXCERPT_LINES, GENERIC_FAILURE_MESSAGE};
    use crate::triage_types::{AssertionMismatch, StackFrame};

    const PYTEST_LOG: &str = "\
2024-05-01T10:00:00.0000000Z ============================= FAILURES =============================
2024-05-01T10:00:00.0000000Z ___________________________ test_add ___________________________
2024-05-01T10:00:00.0000000Z
2024-05-01T10:00:00.0000000Z     def test_add():
2024-05-01T10:00:00.0000000Z >       assert add(2, 2) == 5
2024-05-01T10:00:00.0000000Z E       assert 4 == 5
2024-05-01T10:00:00.0000000Z E        +  where 4 = add(2, 2)
2024-05-01T10:00:00.0000000Z
2024-05-01T10:00:00.0000000Z tests/test_math.py:7: AssertionError
2024-05-01T10:00:00.0000000Z =========================== short test summary info ============================
2024-05-01T10:00:00.0000000Z FAILED tests/test_math.py::test_add - assert 4 == 5
2024-05-01T10:00:00.0000000Z ##[error]Process completed with exit code 1.
";

    #[test]
    fn functional_pytest_block_yields_named_record_with_frame_and_assertion() {
        let records = extract_failures(PYTEST_LOG, DEFAULT_EXCERPT_LINES);
        let test = records
            .iter()
            .find(|record| record.test_name.is_some())
            .expect("pytest record");
        assert_eq!(test.test_name.as_deref(), Some("tests/test_math.py::test_add"));
        assert!(test.error_message.starts_with("assert 4 == 5"));
        assert_eq!(
            test.stack_frames,
            vec![StackFrame {
                file: "tests/test_math.py".to_string(),
                line: Some(7)
            }]
        );
        assert_eq!(
            test.assertion,
            Some(AssertionMismatch {
                expected: "5".to_string(),
                actual: "4".to_string()
            })
        );
        assert!(test.raw_log_excerpt.contains("assert add(2, 2) == 5"));
        assert!(!test.raw_log_excerpt.contains("2024-05-01T"));
        assert!(records
            .iter()
            .any(|record| record.error_message == "Process completed with exit code 1."));
    }

    #[test]
    fn functional_python_traceback_captures_frames_and_exception() {
        let log = "\
Run python -m app
Traceback (most recent call last):
  File \"/home/runner/work/widgets/widgets/app/main.py\", line 3, in <module>
    import requests
ModuleNotFoundError: No module named 'requests'
";
        let records = extract_failures(log, DEFAULT_EXCERPT_LINES);
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].error_message,
            "ModuleNotFoundError: No module named 'requests'"
        );
        assert_eq!(records[0].stack_frames[0].line, Some(3));
    }

    #[test]
    fn functional_rust_test_panic_reads_left_and_right_values() {
        let log = "\
---- tests::adds_numbers stdout ----
thread 'tests::adds_numbers' panicked at src/lib.rs:12:9:
assertion `left == right` failed
  left: 4
 right: 5
note: run with `RUST_BACKTRACE=1` environment variable to display a backtrace

failures:
    tests::adds_numbers
";
        let records = extract_failures(log, DEFAULT_EXCERPT_LINES);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.test_name.as_deref(), Some("tests::adds_numbers"));
        assert_eq!(record.error_message, "assertion `left == right` failed");
        assert_eq!(record.stack_frames[0].file, "src/lib.rs");
        assert_eq!(
            record.assertion,
            Some(AssertionMismatch {
                expected: "5".to_string(),
                actual: "4".to_string()
            })
        );
    }

    #[test]
    fn functional_jest_block_collects_expected_received_and_source_frame() {
        let log = "\
  ● math › adds numbers

    expect(received).toBe(expected) // Object.is equality

    Expected: 5
    Received: 4

      3 | test('adds numbers', () => {
    > 4 |   expect(add(2, 2)).toBe(5);
        |                     ^

      at Object.<anonymous> (src/math.test.js:4:21)
      at Promise.then.completed (node_modules/jest-circus/build/utils.js:298:28)

Test Suites: 1 failed, 1 total
";
        let records = extract_failures(log, DEFAULT_EXCERPT_LINES);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.test_name.as_deref(), Some("math › adds numbers"));
        assert_eq!(
            record.stack_frames,
            vec![StackFrame {
                file: "src/math.test.js".to_string(),
                line: Some(4)
            }]
        );
        assert_eq!(record.assertion.as_ref().map(|a| a.actual.as_str()), Some("4"));
    }

    #[test]
    fn functional_go_failure_reads_got_want() {
        let log = "\
--- FAIL: TestAdd (0.00s)
    math_test.go:12: Add(2, 2) = 4; want 5
FAIL
";
        let records = extract_failures(log, DEFAULT_EXCERPT_LINES);
        assert_eq!(records[0].test_name.as_deref(), Some("TestAdd"));
        assert_eq!(
            records[0].assertion,
            Some(AssertionMismatch {
                expected: "5".to_string(),
                actual: "4".to_string()
            })
        );
    }

    #[test]
    fn functional_compiler_error_with_location_is_a_record() {
        let log = "\
error[E0432]: unresolved import `serde_yaml`
 --> src/config.rs:3:5
  |
3 | use serde_yaml::Value;
  |     ^^^^^^^^^^ use of undeclared crate or module `serde_yaml`
";
        let records = extract_failures(log, DEFAULT_EXCERPT_LINES);
        assert_eq!(records.len(), 1);
        assert!(records[0].error_message.contains("unresolved import"));
        assert_eq!(records[0].stack_frames[0].file, "src/config.rs");
    }

    #[test]
    fn regression_unrecognized_output_yields_single_generic_record() {
        let log = "step one\nstep two\nsomething odd happened\n";
        let records = extract_failures(log, 2);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_message, GENERIC_FAILURE_MESSAGE);
        assert_eq!(records[0].raw_log_excerpt, "step two\nsomething odd happened");
        assert!(extract_failures("  \n", 2).is_empty());
    }

    #[test]
    fn regression_same_log_extracts_identically() {
        assert_eq!(
            extract_failures(PYTEST_LOG, DEFAULT_EXCERPT_LINES),
            extract_failures(PYTEST_LOG, DEFAULT_EXCERPT_LINES)
        );
    }
}
