//! PII scrubbing for text handed to the downstream language model.
//!
//! Patterns run in a fixed order and each match is replaced by `[NAME]`.
//! Tags contain no digits and no `@`, and every built-in pattern needs one
//! of those, so a second pass over redacted text finds nothing to replace.

use regex::{NoExpand, Regex};
use serde::Deserialize;
use std::borrow::Cow;

/// Built-in patterns, applied in this order.
///
/// Card numbers run before phone numbers so a 16-digit number is never
/// split into a phone match plus leftover digits.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    (
        "EMAIL_ADDRESS",
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
    ),
    (
        "CREDIT_CARD_NUMBER",
        r"\b(?:\d{4}[ -]?){3}\d{4}\b|\b3[47]\d{2}[ -]?\d{6}[ -]?\d{5}\b",
    ),
    ("US_SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    (
        "PHONE_NUMBER",
        r"(?:\+\d{1,2}[-. ]?)?(?:\(\d{3}\) ?|\b\d{3}[-. ])\d{3}[-. ]\d{4}\b",
    ),
    (
        "IP_ADDRESS",
        r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b",
    ),
];

/// A user-supplied pattern, as written in the config file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CustomPattern {
    pub name: String,
    pub regex: String,
}

#[derive(Debug)]
struct RedactionPattern {
    name: String,
    tag: String,
    matcher: Regex,
}

/// Ordered set of compiled redaction patterns.
#[derive(Debug)]
pub struct RedactionPipeline {
    patterns: Vec<RedactionPattern>,
}

fn is_tag_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl Default for RedactionPipeline {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl RedactionPipeline {
    /// Built-in patterns followed by `extra`, in order.
    ///
    /// An extra pattern is skipped, with a warning, when its name is not
    /// uppercase snake-case, when it fails to compile, or when it would match
    /// a redaction tag, or when an earlier pattern would match its own tag.
    pub fn new(extra: &[CustomPattern]) -> Self {
        let candidates = BUILTIN_PATTERNS
            .iter()
            .map(|(name, regex)| (name.to_string(), regex.to_string()))
            .chain(extra.iter().map(|s| (s.name.clone(), s.regex.clone())));

        let mut patterns: Vec<RedactionPattern> = Vec::new();
        for (name, regex) in candidates {
            if !is_tag_name(&name) {
                tracing::warn!(pattern = %name, "Redaction pattern name must be UPPER_SNAKE_CASE, skipping");
                continue;
            }
            let matcher = match Regex::new(&regex) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(pattern = %name, error = %e, "Redaction pattern failed to compile, skipping");
                    continue;
                }
            };
            let tag = format!("[{name}]");
            let hits_tag = patterns
                .iter()
                .map(|p| p.tag.as_str())
                .chain(std::iter::once(tag.as_str()))
                .any(|t| matcher.is_match(t))
                || patterns.iter().any(|p| p.matcher.is_match(&tag));
            if hits_tag {
                tracing::warn!(pattern = %name, "Redaction pattern matches a redaction tag, skipping");
                continue;
            }
            patterns.push(RedactionPattern { name, tag, matcher });
        }

        Self { patterns }
    }

    /// Names of active patterns, in application order.
    pub fn pattern_names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name.as_str())
    }

    /// Replace every sensitive span with its category tag.
    ///
    /// Borrows the input when nothing matched.
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern.matcher.replace_all(&out, NoExpand(&pattern.tag)) {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            };
            if let Some(s) = replaced {
                out = Cow::Owned(s);
            }
        }
        out
    }
}
