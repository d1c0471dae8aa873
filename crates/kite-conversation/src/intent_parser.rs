//! Heuristic turn parser for profile edits.
//!
//! A turn is split into clauses on newlines and `;`. Each clause is matched against a
//! small set of phrasings (`set X to Y`, `X: Y`, `clear X`, a bare URL, free text for
//! single-field sections). Anything it cannot place becomes a clarification question;
//! whatever it could place is still returned so the caller can merge it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use kite_safety::redact_truncated;
use regex::Regex;
use url::Url;

use crate::conversation_types::{AttachmentRef, TargetSection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Text,
    List,
    Url,
    Media,
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    label: &'static str,
    section: TargetSection,
    aliases: &'static [&'static str],
    max_chars: usize,
    kind: FieldKind,
}

const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec {
        name: "display_name",
        label: "display name",
        section: TargetSection::Profile,
        aliases: &["display name", "displayname", "name", "nickname"],
        max_chars: 50,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "headline",
        label: "headline",
        section: TargetSection::Profile,
        aliases: &["headline", "title", "tagline", "job title"],
        max_chars: 120,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "location",
        label: "location",
        section: TargetSection::Profile,
        aliases: &["location", "city", "country", "where i live"],
        max_chars: 80,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "pronouns",
        label: "pronouns",
        section: TargetSection::Profile,
        aliases: &["pronouns", "pronoun"],
        max_chars: 30,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "bio",
        label: "bio",
        section: TargetSection::About,
        aliases: &["bio", "about", "about me", "summary", "description"],
        max_chars: 500,
        kind: FieldKind::Text,
    },
    FieldSpec {
        name: "website",
        label: "website",
        section: TargetSection::Links,
        aliases: &["website", "site", "homepage", "home page", "portfolio", "blog"],
        max_chars: 200,
        kind: FieldKind::Url,
    },
    FieldSpec {
        name: "github",
        label: "GitHub link",
        section: TargetSection::Links,
        aliases: &["github", "git hub"],
        max_chars: 200,
        kind: FieldKind::Url,
    },
    FieldSpec {
        name: "linkedin",
        label: "LinkedIn link",
        section: TargetSection::Links,
        aliases: &["linkedin", "linked in"],
        max_chars: 200,
        kind: FieldKind::Url,
    },
    FieldSpec {
        name: "twitter",
        label: "X/Twitter link",
        section: TargetSection::Links,
        aliases: &["twitter", "x"],
        max_chars: 200,
        kind: FieldKind::Url,
    },
    FieldSpec {
        name: "avatar",
        label: "avatar",
        section: TargetSection::Media,
        aliases: &[
            "avatar",
            "profile picture",
            "profile photo",
            "profile pic",
            "pfp",
            "icon",
        ],
        max_chars: 500,
        kind: FieldKind::Media,
    },
    FieldSpec {
        name: "banner",
        label: "banner",
        section: TargetSection::Media,
        aliases: &["banner", "cover", "cover photo", "cover image", "header image", "header"],
        max_chars: 500,
        kind: FieldKind::Media,
    },
    FieldSpec {
        name: "skills",
        label: "skills",
        section: TargetSection::Skills,
        aliases: &["skills", "skill", "skill set", "expertise", "tech stack", "stack"],
        max_chars: 300,
        kind: FieldKind::List,
    },
];

const ATTACHMENT_REFERENCES: &[&str] = &[
    "this",
    "this one",
    "this image",
    "this picture",
    "this photo",
    "it",
    "attached",
    "the attached image",
    "the attachment",
    "attachment",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// What one turn contributed: field updates, placed attachments, and open questions.
pub struct ParsedTurn {
    pub updates: BTreeMap<String, String>,
    pub attachments: Vec<AttachmentRef>,
    pub clarification_questions: Vec<String>,
}

impl ParsedTurn {
    pub fn needs_clarification(&self) -> bool {
        !self.clarification_questions.is_empty()
    }

    fn ask(&mut self, question: String) {
        if !self.clarification_questions.contains(&question) {
            self.clarification_questions.push(question);
        }
    }
}

struct ClausePatterns {
    set_to: Option<Regex>,
    set_without_value: Option<Regex>,
    clear: Option<Regex>,
    key_value: Option<Regex>,
    handle: Option<Regex>,
}

fn clause_patterns() -> &'static ClausePatterns {
    static PATTERNS: OnceLock<ClausePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ClausePatterns {
        set_to: Regex::new(
            r"(?i)^(?:please\s+)?(?:set|change|update|make|edit|use)\s+(?:my\s+|the\s+)?(?P<field>[a-z][a-z0-9 _/-]*?)\s+(?:to|as|=|into)\s+(?P<value>.+)$",
        )
        .ok(),
        set_without_value: Regex::new(
            r"(?i)^(?:please\s+)?(?:set|change|update|edit)\s+(?:my\s+|the\s+)?(?P<field>[a-z][a-z0-9 _/-]*)$",
        )
        .ok(),
        clear: Regex::new(
            r"(?i)^(?:please\s+)?(?:clear|remove|delete|unset)\s+(?:my\s+|the\s+)?(?P<field>[a-z][a-z0-9 _/-]*)$",
        )
        .ok(),
        key_value: Regex::new(r"(?i)^(?P<field>[a-z][a-z0-9 _/-]{0,30}?)\s*[:=]\s*(?P<value>.+)$")
            .ok(),
        handle: Regex::new(r"^@?[A-Za-z0-9][A-Za-z0-9_.-]{0,38}$").ok(),
    })
}

fn captures<'t>(regex: &Option<Regex>, text: &'t str) -> Option<(String, Option<&'t str>)> {
    let captures = regex.as_ref()?.captures(text)?;
    let field = captures.name("field")?.as_str().to_string();
    let value = captures.name("value").map(|value| value.as_str());
    Some((field, value))
}

fn normalize_field_phrase(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase().replace(['_', '-'], " ");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .strip_prefix("my ")
        .or_else(|| collapsed.strip_prefix("the "))
        .unwrap_or(collapsed.as_str())
        .to_string()
}

fn lookup_field(raw: &str) -> Option<&'static FieldSpec> {
    let phrase = normalize_field_phrase(raw);
    FIELD_SPECS.iter().find(|spec| {
        spec.name.replace('_', " ") == phrase || spec.aliases.iter().any(|alias| *alias == phrase)
    })
}

fn section_fields(section: TargetSection) -> Vec<&'static FieldSpec> {
    FIELD_SPECS
        .iter()
        .filter(|spec| spec.section == section)
        .collect()
}

fn sole_field(section: TargetSection) -> Option<&'static FieldSpec> {
    let fields = section_fields(section);
    match fields.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

fn field_menu(section: TargetSection) -> String {
    let labels = section_fields(section)
        .into_iter()
        .map(|spec| spec.label)
        .collect::<Vec<_>>();
    match labels.split_last() {
        Some((last, [only])) => format!("{only} or {last}"),
        Some((last, rest)) if !rest.is_empty() => format!("{}, or {last}", rest.join(", ")),
        Some((last, _)) => (*last).to_string(),
        None => String::new(),
    }
}

/// Display label for a stored field name, falling back to the raw name.
pub fn field_label(name: &str) -> &str {
    FIELD_SPECS
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.label)
        .unwrap_or(name)
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim();
        }
    }
    trimmed
}

fn parse_web_url(raw: &str) -> Option<Url> {
    let candidate = raw.trim();
    if candidate.chars().any(char::is_whitespace) {
        return None;
    }
    let parsed = Url::parse(candidate)
        .or_else(|_| Url::parse(&format!("https://{candidate}")))
        .ok()?;
    let has_dotted_host = parsed.host_str().is_some_and(|host| host.contains('.'));
    if matches!(parsed.scheme(), "http" | "https") && has_dotted_host {
        Some(parsed)
    } else {
        None
    }
}

fn looks_like_url(raw: &str) -> bool {
    let candidate = raw.trim().to_ascii_lowercase();
    candidate.starts_with("http://") || candidate.starts_with("https://") || candidate.starts_with("www.")
}

fn link_field_for_host(host: &str) -> &'static str {
    let host = host.trim_start_matches("www.");
    if host == "github.com" {
        "github"
    } else if host == "linkedin.com" || host.ends_with(".linkedin.com") {
        "linkedin"
    } else if host == "twitter.com" || host == "x.com" {
        "twitter"
    } else {
        "website"
    }
}

fn handle_url(field: &str, handle: &str) -> Option<String> {
    let handle = handle.trim_start_matches('@');
    match field {
        "github" => Some(format!("https://github.com/{handle}")),
        "linkedin" => Some(format!("https://www.linkedin.com/in/{handle}")),
        "twitter" => Some(format!("https://x.com/{handle}")),
        _ => None,
    }
}

fn normalize_list(value: &str) -> String {
    let mut items: Vec<String> = Vec::new();
    for item in value.split([',', '\n']).map(str::trim).filter(|item| !item.is_empty()) {
        if !items
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(item))
        {
            items.push(item.to_string());
        }
    }
    items.join(", ")
}

struct TurnParser<'a> {
    section: TargetSection,
    offered_attachments: &'a [AttachmentRef],
    placed_fields: Vec<&'static str>,
    free_text: Vec<String>,
    parsed: ParsedTurn,
}

impl<'a> TurnParser<'a> {
    fn new(section: TargetSection, offered_attachments: &'a [AttachmentRef]) -> Self {
        Self {
            section,
            offered_attachments,
            placed_fields: Vec::new(),
            free_text: Vec::new(),
            parsed: ParsedTurn::default(),
        }
    }

    fn place_attachments(&mut self, utterance: &str) {
        if self.offered_attachments.is_empty() {
            return;
        }
        if self.section != TargetSection::Media {
            self.parsed.ask(format!(
                "Attachments can only be used for your avatar or banner. Start /edit-profile with the media section to upload images; should I ignore the {} attachment(s) here?",
                self.offered_attachments.len()
            ));
            return;
        }

        let lowered = utterance.to_ascii_lowercase();
        let mut mentioned = Vec::new();
        for spec in section_fields(TargetSection::Media) {
            let first_mention = spec
                .aliases
                .iter()
                .filter_map(|alias| find_word(&lowered, alias))
                .min();
            if let Some(position) = first_mention {
                mentioned.push((position, spec));
            }
        }
        mentioned.sort_by_key(|(position, _)| *position);

        if mentioned.len() != self.offered_attachments.len() {
            let question = if self.offered_attachments.len() == 1 {
                "Should the attached image be your avatar or your banner?".to_string()
            } else {
                format!(
                    "You attached {} images. Which one is the avatar and which one is the banner?",
                    self.offered_attachments.len()
                )
            };
            self.parsed.ask(question);
            return;
        }

        for ((_, spec), attachment) in mentioned.into_iter().zip(self.offered_attachments) {
            self.parsed
                .updates
                .insert(spec.name.to_string(), attachment.url.clone());
            self.parsed.attachments.push(attachment.clone());
            self.placed_fields.push(spec.name);
        }
    }

    fn parse_clause(&mut self, clause: &str) {
        if !clause.contains("://") && self.clause_only_places_attachment(clause) {
            return;
        }
        let patterns = clause_patterns();
        if let Some((field, Some(value))) = captures(&patterns.set_to, clause) {
            if lookup_field(&field).is_some() || sole_field(self.section).is_none() {
                self.assign(&field, value);
                return;
            }
        }
        if let Some((field, _)) = captures(&patterns.clear, clause) {
            if let Some(spec) = self.resolve_in_section(&field) {
                self.parsed.updates.insert(spec.name.to_string(), String::new());
                return;
            }
        }
        if let Some((field, _)) = captures(&patterns.set_without_value, clause) {
            if let Some(spec) = lookup_field(&field) {
                if spec.section == self.section && self.placed_fields.contains(&spec.name) {
                    return;
                }
                if spec.section == self.section {
                    self.parsed
                        .ask(format!("What should your new {} be?", spec.label));
                } else {
                    self.ask_wrong_section(spec);
                }
                return;
            }
        }
        if looks_like_url(clause) {
            self.assign_bare_url(clause);
            return;
        }
        if let Some((field, Some(value))) = captures(&patterns.key_value, clause) {
            if lookup_field(&field).is_some() {
                self.assign(&field, value);
                return;
            }
        }
        if sole_field(self.section).is_some() {
            self.free_text.push(clause.to_string());
            return;
        }
        self.parsed.ask(format!(
            "I couldn't tell which field \"{}\" should change. Which one do you mean: {}?",
            truncate_for_question(clause),
            field_menu(self.section)
        ));
    }

    fn clause_only_places_attachment(&self, clause: &str) -> bool {
        if self.placed_fields.is_empty() {
            return false;
        }
        let lowered = clause.to_ascii_lowercase();
        self.placed_fields.iter().any(|name| {
            FIELD_SPECS
                .iter()
                .filter(|spec| spec.name == *name)
                .flat_map(|spec| spec.aliases.iter())
                .any(|alias| find_word(&lowered, alias).is_some())
        })
    }

    fn resolve_in_section(&mut self, field: &str) -> Option<&'static FieldSpec> {
        match lookup_field(field) {
            Some(spec) if spec.section == self.section => Some(spec),
            Some(spec) => {
                self.ask_wrong_section(spec);
                None
            }
            None => {
                self.parsed.ask(format!(
                    "Your {} section has no field called \"{}\". Which one do you mean: {}?",
                    self.section,
                    truncate_for_question(field.trim()),
                    field_menu(self.section)
                ));
                None
            }
        }
    }

    fn ask_wrong_section(&mut self, spec: &FieldSpec) {
        self.parsed.ask(format!(
            "Your {} lives in the {} section, not {}. Run /edit-profile with section {} to change it. What would you like to change in {}?",
            spec.label, spec.section, self.section, spec.section, self.section
        ));
    }

    fn assign(&mut self, field: &str, raw_value: &str) {
        let Some(spec) = self.resolve_in_section(field) else {
            return;
        };
        let value = strip_quotes(raw_value);
        if value.is_empty() {
            self.parsed
                .ask(format!("What should your new {} be?", spec.label));
            return;
        }
        match spec.kind {
            FieldKind::Text => self.accept_text(spec, value.to_string()),
            FieldKind::List => self.accept_text(spec, normalize_list(value)),
            FieldKind::Url => self.accept_url(spec, value),
            FieldKind::Media => self.accept_media(spec, value),
        }
    }

    fn accept_text(&mut self, spec: &FieldSpec, value: String) {
        let length = value.chars().count();
        if length > spec.max_chars {
            self.parsed.ask(format!(
                "That {} is {length} characters; the limit is {}. What shorter {} should I use?",
                spec.label, spec.max_chars, spec.label
            ));
            return;
        }
        self.parsed.updates.insert(spec.name.to_string(), value);
    }

    fn accept_url(&mut self, spec: &FieldSpec, value: &str) {
        let url = match parse_web_url(value) {
            Some(url) if looks_like_url(value) || value.contains('/') || value.contains('.') => {
                Some(url.to_string())
            }
            _ => clause_patterns()
                .handle
                .as_ref()
                .filter(|regex| regex.is_match(value))
                .and_then(|_| handle_url(spec.name, value)),
        };
        match url {
            Some(url) => self.accept_text(spec, url),
            None => self.parsed.ask(format!(
                "\"{}\" doesn't look like a valid link. What full URL (starting with https://) should I use for your {}?",
                truncate_for_question(value),
                spec.label
            )),
        }
    }

    fn accept_media(&mut self, spec: &FieldSpec, value: &str) {
        if self.placed_fields.contains(&spec.name) {
            return;
        }
        let lowered = value.to_ascii_lowercase();
        if ATTACHMENT_REFERENCES.contains(&lowered.as_str()) {
            self.parsed.ask(format!(
                "I didn't receive an image for your {}. Attach one or paste an image URL.",
                spec.label
            ));
            return;
        }
        match parse_web_url(value).filter(|_| looks_like_url(value)) {
            Some(url) => self.accept_text(spec, url.to_string()),
            None => self.parsed.ask(format!(
                "Attach an image or paste an image URL for your {}.",
                spec.label
            )),
        }
    }

    fn assign_bare_url(&mut self, clause: &str) {
        let Some(url) = parse_web_url(clause) else {
            self.parsed.ask(format!(
                "\"{}\" doesn't look like a valid link. Could you paste the full URL?",
                truncate_for_question(clause)
            ));
            return;
        };
        match self.section {
            TargetSection::Links => {
                let field = link_field_for_host(url.host_str().unwrap_or_default());
                if let Some(spec) = FIELD_SPECS.iter().find(|spec| spec.name == field) {
                    self.accept_text(spec, url.to_string());
                }
            }
            TargetSection::Media if self.placed_fields.is_empty() => {
                self.parsed.ask(format!(
                    "Should {} be your avatar or your banner?",
                    truncate_for_question(clause)
                ));
            }
            TargetSection::Media => {}
            _ => match sole_field(self.section) {
                Some(_) => self.free_text.push(clause.to_string()),
                None => self.parsed.ask(format!(
                    "Which field should {} go into: {}?",
                    truncate_for_question(clause),
                    field_menu(self.section)
                )),
            },
        }
    }

    fn finish(mut self) -> ParsedTurn {
        if !self.free_text.is_empty() {
            if let Some(spec) = sole_field(self.section) {
                let joined = self.free_text.join("\n");
                match spec.kind {
                    FieldKind::List => self.accept_text(spec, normalize_list(&joined)),
                    _ => self.accept_text(spec, joined),
                }
            }
        }
        if self.parsed.updates.is_empty() && self.parsed.clarification_questions.is_empty() {
            self.parsed.ask(format!(
                "What would you like to change in your {} section? You can edit: {}.",
                self.section,
                field_menu(self.section)
            ));
        }
        self.parsed
    }
}

fn find_word(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    haystack.match_indices(needle).map(|(index, _)| index).find(|index| {
        let before_ok = *index == 0 || !bytes[index - 1].is_ascii_alphanumeric();
        let end = index + needle.len();
        let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
        before_ok && after_ok
    })
}

/// Questions echo user text back into chat, so secrets pasted in a turn stay masked.
fn truncate_for_question(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    redact_truncated(text, MAX_CHARS)
}

/// Parses one user turn for `section`. Deterministic for identical inputs.
pub fn parse_turn(
    section: TargetSection,
    utterance: &str,
    attachments: &[AttachmentRef],
) -> ParsedTurn {
    let mut parser = TurnParser::new(section, attachments);
    parser.place_attachments(utterance);
    for clause in utterance
        .split(['\n', ';'])
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
    {
        parser.parse_clause(clause);
    }
    parser.finish()
}

/// Renders the confirmation preview for the accumulated updates.
pub fn render_preview(
    section: TargetSection,
    pending_updates: &BTreeMap<String, String>,
    attachments: &[AttachmentRef],
) -> String {
    let mut lines = vec![format!(
        "Here's what will change in your {section} section:"
    )];
    for (name, value) in pending_updates {
        let label = field_label(name);
        let rendered = if value.is_empty() {
            "(cleared)".to_string()
        } else if let Some(attachment) = attachments.iter().find(|item| &item.url == value) {
            let filename = if attachment.filename.is_empty() {
                attachment.id.as_str()
            } else {
                attachment.filename.as_str()
            };
            format!("{filename} (attached)")
        } else {
            value.clone()
        };
        lines.push(format!("- {label}: {rendered}"));
    }
    lines.push("Press Confirm to apply or Cancel to discard.".to_string());
    lines.join("\n")
}

/// Short description of the accumulated intent, stored alongside the state.
pub fn describe_intent(section: TargetSection, pending_updates: &BTreeMap<String, String>) -> String {
    let fields = pending_updates
        .iter()
        .map(|(name, value)| {
            if value.is_empty() {
                format!("clear {}", field_label(name))
            } else {
                format!("set {}", field_label(name))
            }
        })
        .collect::<Vec<_>>();
    format!("{section}: {}", fields.join(", "))
}
