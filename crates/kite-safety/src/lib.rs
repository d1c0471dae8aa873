//! Secret redaction shared by every kite surface that emits text.
//!
//! Reports, playbooks, patch files and debug logs pass through [`redact_secrets`]
//! (or a [`SecretRedactor`] carrying run-specific known secrets) before they leave
//! the process. Masked values keep only their last four characters.

mod redaction;

pub use redaction::{
    mask_secret, redact_json_value, redact_secrets, redact_truncated, SecretPattern, SecretRedactor,
    MASK_PREFIX, MASK_VISIBLE_SUFFIX_CHARS,
};
