//! Credential redaction for captured tool output.
//!
//! Every byte of subprocess output passes through [`OutputSanitizer`] before it
//! is returned, logged, or written to disk. Matching is pattern-specific: only
//! credential-shaped text is touched, so account and zone identifiers stay
//! readable in logs.

use regex::{Captures, Regex};
use std::borrow::Cow;

use crate::config::SanitizerConfig;
use crate::error::{ConfigError, HarnessError, Result};

/// Fixed replacement for redacted values.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Name of the capture group holding the secret part of a match.
const SECRET_GROUP: &str = "secret";

/// Literal secrets shorter than this are not redacted by value.
const MIN_LITERAL_SECRET_LEN: usize = 8;

/// Built-in credential patterns, applied in order.
const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    (
        "generic-assignment",
        r#"(?i)"?\b[\w.-]*(?:api[_-]?key|token|secret|password|passwd)[\w.-]*"?\s*[=:]\s*"(?P<secret>[^"\s]+)""#,
    ),
    (
        "credential-transition",
        r#"(?i)\b[\w.-]*(?:api[_-]?key|token|secret|password|passwd|sensitive_value|private_key)[\w.-]*"?\s*[=:]\s*"[^"]*"\s*->\s*"(?P<secret>[^"]+)""#,
    ),
    (
        "bearer-header",
        r"(?i)\bauthorization\s*:\s*bearer\s+(?P<secret>[A-Za-z0-9._~+/=-]+)",
    ),
    ("auth-key-header", r"(?i)\bx-auth-key\s*:\s*(?P<secret>\S+)"),
    ("aws-access-key-id", r"\b(?P<secret>(?:AKIA|ASIA)[0-9A-Z]{16})\b"),
    (
        "aws-secret-access-key",
        r#"(?i)\baws_secret_access_key"?\s*[=:]\s*"?(?P<secret>[A-Za-z0-9/+=]{40})"#,
    ),
    (
        "sensitive-attribute",
        r#"(?i)"?\b(?:sensitive_value|secret_text|private_key|client_secret)"?\s*[=:]\s*"(?P<secret>[^"]+)""#,
    ),
];

const EMAIL_PATTERN: &str = r"(?P<secret>[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,})";

/// A compiled redaction pattern.
#[derive(Debug, Clone)]
struct RedactionPattern {
    /// Pattern name, used in error messages.
    name: String,
    /// Compiled expression.
    regex: Regex,
}

/// Regex-driven redaction of credentials from captured text.
#[derive(Debug, Clone)]
pub struct OutputSanitizer {
    /// Patterns applied in order.
    patterns: Vec<RedactionPattern>,
    /// Exact secret values redacted wherever they appear.
    literals: Vec<String>,
}

impl OutputSanitizer {
    /// Builds a sanitizer from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an extra pattern does not compile.
    pub fn new(config: &SanitizerConfig) -> Result<Self> {
        let mut patterns = Vec::with_capacity(BUILTIN_PATTERNS.len() + 2);

        for (name, pattern) in BUILTIN_PATTERNS {
            patterns.push(compile(name, pattern)?);
        }

        let prefixes: Vec<String> = config
            .env_prefixes
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| regex::escape(p))
            .collect();
        if !prefixes.is_empty() {
            let env_pattern = format!(
                r#"\b(?:{})_[A-Za-z0-9_]+=(?P<secret>"[^"]*"|[^\s"]+)"#,
                prefixes.join("|")
            );
            patterns.push(compile("env-assignment", &env_pattern)?);
        }

        if config.redact_emails {
            patterns.push(compile("email", EMAIL_PATTERN)?);
        }

        for (i, pattern) in config.extra_patterns.iter().enumerate() {
            patterns.push(compile(&format!("sanitizer.extra_patterns[{i}]"), pattern)?);
        }

        Ok(Self {
            patterns,
            literals: Vec::new(),
        })
    }

    /// Adds exact secret values to redact, such as credential values read
    /// from the environment. Short values are ignored.
    #[must_use]
    pub fn with_literal_secrets<I, S>(mut self, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.literals.extend(
            secrets
                .into_iter()
                .map(Into::into)
                .filter(|s| s.len() >= MIN_LITERAL_SECRET_LEN),
        );
        // Longest first so a secret containing another is replaced whole.
        self.literals
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.literals.dedup();
        self
    }

    /// Redacts credentials from `text`.
    ///
    /// Text without any match is returned borrowed and unchanged.
    #[must_use]
    pub fn sanitize<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut current: Cow<'a, str> = Cow::Borrowed(text);

        for literal in &self.literals {
            if current.contains(literal.as_str()) {
                current = Cow::Owned(current.replace(literal.as_str(), REDACTION_MARKER));
            }
        }

        for pattern in &self.patterns {
            if !pattern.regex.is_match(&current) {
                continue;
            }
            let replaced = pattern
                .regex
                .replace_all(&current, |caps: &Captures<'_>| redact_match(caps))
                .into_owned();
            current = Cow::Owned(replaced);
        }

        current
    }

    /// Returns the number of compiled patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Returns the names of the compiled patterns, in application order.
    pub fn pattern_names(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|p| p.name.as_str())
    }
}

fn compile(name: &str, pattern: &str) -> Result<RedactionPattern> {
    let regex = Regex::new(pattern).map_err(|e| {
        HarnessError::Config(ConfigError::InvalidPattern {
            rule: name.to_string(),
            source_file: String::from("sanitizer"),
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
    })?;

    Ok(RedactionPattern {
        name: name.to_string(),
        regex,
    })
}

/// Replaces the `secret` group of a match, or the whole match when the
/// pattern has no such group.
fn redact_match(caps: &Captures<'_>) -> String {
    let Some(whole) = caps.get(0) else {
        return String::new();
    };

    match caps.name(SECRET_GROUP) {
        Some(secret) => {
            let text = whole.as_str();
            let start = secret.start() - whole.start();
            let end = secret.end() - whole.start();
            format!("{}{REDACTION_MARKER}{}", &text[..start], &text[end..])
        }
        None => REDACTION_MARKER.to_string(),
    }
}
