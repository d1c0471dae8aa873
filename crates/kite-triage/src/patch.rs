//! Minimal unified-diff construction for generated fixes.

use std::sync::OnceLock;

use regex::Regex;

const CONTEXT_LINES: usize = 3;
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

fn diff_header(path: &str) -> String {
    format!("diff --git a/{path} b/{path}\n--- a/{path}\n+++ b/{path}\n")
}

struct SplitContent<'a> {
    lines: Vec<&'a str>,
    trailing_newline: bool,
}

fn split_content(content: &str) -> SplitContent<'_> {
    let trailing_newline = content.ends_with('\n');
    let body = content.strip_suffix('\n').unwrap_or(content);
    let lines = if body.is_empty() && trailing_newline {
        vec![""]
    } else if body.is_empty() {
        Vec::new()
    } else {
        body.split('\n').collect()
    };
    SplitContent {
        lines,
        trailing_newline,
    }
}

fn push_line(out: &mut String, prefix: char, line: &str, last_without_newline: bool) {
    out.push(prefix);
    out.push_str(line);
    out.push('\n');
    if last_without_newline {
        out.push_str(NO_NEWLINE_MARKER);
        out.push('\n');
    }
}

/// Replaces 1-based `line_number` with `new_line`; returns the diff and the new file contents.
pub fn replace_line(
    path: &str,
    content: &str,
    line_number: usize,
    new_line: &str,
) -> Option<(String, String)> {
    let split = split_content(content);
    let index = line_number.checked_sub(1)?;
    let old_line = *split.lines.get(index)?;
    if old_line == new_line || new_line.contains('\n') {
        return None;
    }
    let last = split.lines.len() - 1;
    let start = index.saturating_sub(CONTEXT_LINES);
    let end = (index + CONTEXT_LINES).min(last);
    let count = end - start + 1;

    let mut diff = diff_header(path);
    diff.push_str(&format!(
        "@@ -{},{count} +{},{count} @@\n",
        start + 1,
        start + 1
    ));
    for (offset, line) in split.lines[start..=end].iter().enumerate() {
        let position = start + offset;
        let unterminated = position == last && !split.trailing_newline;
        if position == index {
            push_line(&mut diff, '-', line, unterminated);
            push_line(&mut diff, '+', new_line, unterminated);
        } else {
            push_line(&mut diff, ' ', line, unterminated);
        }
    }

    let mut lines = split.lines.clone();
    lines[index] = new_line;
    let mut new_content = lines.join("\n");
    if split.trailing_newline {
        new_content.push('\n');
    }
    Some((diff, new_content))
}

/// Appends `new_lines` at the end of the file, terminating the previous last line if needed.
pub fn append_lines(path: &str, content: &str, new_lines: &[String]) -> Option<(String, String)> {
    if new_lines.is_empty() || new_lines.iter().any(|line| line.contains('\n')) {
        return None;
    }
    let split = split_content(content);
    let mut diff = diff_header(path);
    let mut new_content = String::new();

    if split.lines.is_empty() {
        diff.push_str(&format!("@@ -0,0 +1,{} @@\n", new_lines.len()));
    } else {
        let last = split.lines.len() - 1;
        let start = split.lines.len().saturating_sub(CONTEXT_LINES);
        let old_count = split.lines.len() - start;
        diff.push_str(&format!(
            "@@ -{},{old_count} +{},{} @@\n",
            start + 1,
            start + 1,
            old_count + new_lines.len()
        ));
        for (offset, line) in split.lines[start..].iter().enumerate() {
            if start + offset == last && !split.trailing_newline {
                push_line(&mut diff, '-', line, true);
                push_line(&mut diff, '+', line, false);
            } else {
                push_line(&mut diff, ' ', line, false);
            }
        }
        new_content.push_str(&split.lines.join("\n"));
        new_content.push('\n');
    }
    for line in new_lines {
        push_line(&mut diff, '+', line, false);
        new_content.push_str(line);
        new_content.push('\n');
    }
    Some((diff, new_content))
}

fn hunk_header() -> Option<&'static Regex> {
    static HUNK: OnceLock<Option<Regex>> = OnceLock::new();
    HUNK.get_or_init(|| {
        Regex::new(r"^@@ -(?P<old_start>\d+)(?:,(?P<old_count>\d+))? \+(?P<new_start>\d+)(?:,(?P<new_count>\d+))? @@(?P<rest>.*)$").ok()
    })
    .as_ref()
}

/// Inverts a per-file patch (hunks only, as returned by the pull request files API).
pub fn reverse_file_patch(path: &str, patch: &str) -> Option<String> {
    let header = hunk_header()?;
    let mut diff = diff_header(path);
    let mut hunks = 0_usize;
    for line in patch.lines() {
        if let Some(captures) = header.captures(line) {
            let field = |name: &str| {
                captures
                    .name(name)
                    .map(|found| found.as_str())
                    .unwrap_or("1")
            };
            diff.push_str(&format!(
                "@@ -{},{} +{},{} @@{}\n",
                field("new_start"),
                field("new_count"),
                field("old_start"),
                field("old_count"),
                captures.name("rest").map(|found| found.as_str()).unwrap_or("")
            ));
            hunks += 1;
            continue;
        }
        if hunks == 0 {
            continue;
        }
        match line.chars().next() {
            Some('+') => push_line(&mut diff, '-', &line[1..], false),
            Some('-') => push_line(&mut diff, '+', &line[1..], false),
            Some(' ') => push_line(&mut diff, ' ', &line[1..], false),
            Some('\\') => {
                diff.push_str(line);
                diff.push('\n');
            }
            _ => push_line(&mut diff, ' ', line, false),
        }
    }
    (hunks > 0).then_some(diff)
}

/// Paths touched by a unified diff, in order of appearance.
pub fn diff_paths(diff: &str) -> Vec<String> {
    let mut paths = Vec::new();
    for line in diff.lines() {
        if let Some(path) = line.strip_prefix("+++ b/") {
            let path = path.trim().to_string();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
    }
    paths
}
