//! Credential redaction for log output.
//!
//! # Design
//! - Credentials are never logged verbatim; callers log a fingerprint instead.
//! - Fingerprints are stable per credential so log lines can be correlated
//!   across a refresh without revealing the token.
//! - Free text (response bodies, error details) is scrubbed with a fixed set
//!   of patterns before it reaches a log line.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

/// The replacement string used for redacted values.
pub const REDACTED: &str = "[REDACTED]";

const FINGERPRINT_BYTES: usize = 4;

static TEXT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+",
        r#"("(?:access_token|refresh_token|access_credential|refresh_credential|password|token)"\s*:\s*")[^"]*(")"#,
        r"(://[^:/@\s]+:)[^@\s]+(@)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Render a short, stable fingerprint for a credential.
///
/// Empty credentials render as `none`.
#[must_use]
pub fn redact_credential(credential: &str) -> String {
    if credential.is_empty() {
        return "none".to_string();
    }
    let digest = Sha256::digest(credential.as_bytes());
    let hex: String = digest
        .iter()
        .take(FINGERPRINT_BYTES)
        .map(|byte| format!("{byte:02x}"))
        .collect();
    format!("cred#{hex}")
}

/// Scrub bearer tokens, token-bearing JSON fields, and URL passwords.
#[must_use]
pub fn redact_text(input: &str) -> Cow<'_, str> {
    let mut output = Cow::Borrowed(input);
    for pattern in TEXT_PATTERNS.iter() {
        if pattern.is_match(&output) {
            let replaced = pattern
                .replace_all(&output, |caps: &regex::Captures<'_>| {
                    let prefix = caps.get(1).map_or("", |m| m.as_str());
                    let suffix = caps.get(2).map_or("", |m| m.as_str());
                    format!("{prefix}{REDACTED}{suffix}")
                })
                .into_owned();
            output = Cow::Owned(replaced);
        }
    }
    output
}
