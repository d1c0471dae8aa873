#![no_main]

use kite_github::RepoRef;
use kite_safety::SecretRedactor;
use kite_triage::extract::MAX_FAILURE_RECORDS;
use kite_triage::{extract_failures, resolve_failure_ref, DEFAULT_EXCERPT_LINES};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let records = extract_failures(&raw, DEFAULT_EXCERPT_LINES);
    assert!(records.len() <= MAX_FAILURE_RECORDS);
    if raw.trim().is_empty() {
        assert!(records.is_empty());
    }

    let redactor = SecretRedactor::new();
    for record in &records {
        let _ = redactor.redact(&record.raw_log_excerpt);
    }

    if let Some(first_line) = raw.lines().next() {
        let repo = RepoRef {
            owner: "acme".to_string(),
            name: "widgets".to_string(),
        };
        let _ = resolve_failure_ref(first_line, &repo);
    }
});
