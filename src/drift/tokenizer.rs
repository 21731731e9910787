//! Plan text tokenizer.
//!
//! Turns human-oriented plan output into a typed event stream. The
//! classifier works purely on these events and never looks at raw text
//! patterns itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `# <address> <phrase>`, where the address is a resource address with
/// optional module path, data prefix and index suffixes.
static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^#\s+(?P<address>(?:module\.[A-Za-z_][\w-]*(?:\[[^\]]*\])?\.)*(?:data\.)?[A-Za-z_][\w-]*\.[A-Za-z_][\w-]*(?:\[[^\]]*\])?)\s+(?P<phrase>.+?)\s*$",
    )
    .expect("header pattern is valid")
});

static VERB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:will|must)\s+be\s+(?P<verb>.+)$").expect("verb pattern is valid"));

static BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:-/\+|\+/-|<=|[+~-])\s+(?:resource|data)\s+"[^"]+"\s+"[^"]+"\s*\{"#)
        .expect("block pattern is valid")
});

static SUMMARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Plan:\s+(?:(?P<import>\d+) to import,\s+)?(?P<add>\d+) to add,\s+(?P<change>\d+) to change,\s+(?P<destroy>\d+) to destroy",
    )
    .expect("summary pattern is valid")
});

const COMPUTED_PLACEHOLDER: &str = "(known after apply)";

/// What will happen to a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// `will be created`
    Create,
    /// `will be destroyed`
    Destroy,
    /// `must be replaced`
    Replace,
    /// `will be updated in-place`
    Update,
    /// `will be read during apply`
    Read,
    /// Anything else.
    #[default]
    Unknown,
}

impl ChangeKind {
    /// Maps everything after the address in a resource header, such as
    /// `will be created` or `is tainted, so must be replaced`.
    #[must_use]
    pub fn from_phrase(phrase: &str) -> Self {
        if let Some(verb) = VERB_RE.captures(phrase).and_then(|c| c.name("verb")) {
            return Self::from_verb(verb.as_str());
        }
        if phrase.starts_with("has been deleted") {
            Self::Destroy
        } else if phrase.starts_with("has changed") {
            Self::Update
        } else {
            Self::Unknown
        }
    }

    /// Maps the verb following `will be` or `must be`.
    #[must_use]
    pub fn from_verb(verb: &str) -> Self {
        if verb.starts_with("created") {
            Self::Create
        } else if verb.starts_with("destroyed") {
            Self::Destroy
        } else if verb.starts_with("replaced") {
            Self::Replace
        } else if verb.starts_with("updated in-place") {
            Self::Update
        } else if verb.starts_with("read during apply") {
            Self::Read
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Destroy => "destroy",
            Self::Replace => "replace",
            Self::Update => "update",
            Self::Read => "read",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Leading change marker of a plan line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeMarker {
    /// `+`
    Add,
    /// `-`
    Remove,
    /// `~`
    Update,
    /// `-/+` or `+/-`
    Replace,
    /// `<=`
    Read,
}

impl ChangeMarker {
    /// Splits a marker off the front of a trimmed line. The marker must be
    /// followed by whitespace.
    fn split(line: &str) -> Option<(Self, &str)> {
        let (marker, rest) = if let Some(rest) = line.strip_prefix("-/+").or_else(|| line.strip_prefix("+/-")) {
            (Self::Replace, rest)
        } else if let Some(rest) = line.strip_prefix("<=") {
            (Self::Read, rest)
        } else if let Some(rest) = line.strip_prefix('+') {
            (Self::Add, rest)
        } else if let Some(rest) = line.strip_prefix('-') {
            (Self::Remove, rest)
        } else if let Some(rest) = line.strip_prefix('~') {
            (Self::Update, rest)
        } else {
            return None;
        };

        rest.starts_with(char::is_whitespace)
            .then(|| (marker, rest.trim_start()))
    }
}

/// Resource counts from the `Plan:` line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanSummary {
    /// Resources to import.
    pub import: u32,
    /// Resources to add.
    pub add: u32,
    /// Resources to change in place.
    pub change: u32,
    /// Resources to destroy.
    pub destroy: u32,
}

impl PlanSummary {
    /// Returns true if the plan changes nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.import > 0 {
            write!(f, "{} to import, ", self.import)?;
        }
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

/// One typed plan line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEvent {
    /// `# <address> will be <verb>`, or any other `# <address> …` line.
    ResourceHeader {
        /// Full address, index suffixes included.
        address: String,
        /// Second-to-last address segment.
        resource_type: String,
        /// Last address segment.
        resource_name: String,
        /// Derived from the phrase after the address.
        change_kind: ChangeKind,
    },
    /// A `resource` or `data` block opener. Never drift.
    BlockDeclaration {
        /// Leading marker.
        marker: ChangeMarker,
        /// Trimmed line.
        text: String,
    },
    /// An attribute-level change line.
    AttributeChange {
        /// Leading marker.
        marker: ChangeMarker,
        /// Trimmed line.
        text: String,
        /// The line contains a `->` value transition.
        transition: bool,
        /// The value being introduced is only known after apply.
        computed: bool,
    },
    /// The `Plan: …` line.
    PlanSummary(PlanSummary),
    /// The tool reported that nothing changes.
    NoChanges,
    /// Anything else.
    Other,
}

impl PlanEvent {
    /// Returns true if this event is a change line that counts toward drift.
    ///
    /// Computed values and structural `~ block {` lines without a value
    /// transition do not count.
    #[must_use]
    pub const fn is_detected_change(&self) -> bool {
        match self {
            Self::AttributeChange {
                marker,
                transition,
                computed,
                ..
            } => {
                if *computed {
                    return false;
                }
                match marker {
                    ChangeMarker::Add | ChangeMarker::Remove | ChangeMarker::Replace => true,
                    ChangeMarker::Update => *transition,
                    ChangeMarker::Read => false,
                }
            }
            _ => false,
        }
    }
}

/// Stateless plan line tokenizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanTokenizer;

impl PlanTokenizer {
    /// Creates a tokenizer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Tokenizes every line of `text`, in order.
    pub fn tokenize<'a>(&self, text: &'a str) -> impl Iterator<Item = PlanEvent> + 'a {
        text.lines().map(tokenize_line)
    }
}

/// Tokenizes a single line.
#[must_use]
pub fn tokenize_line(line: &str) -> PlanEvent {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return PlanEvent::Other;
    }

    if trimmed.starts_with('#') {
        return parse_header(trimmed).unwrap_or(PlanEvent::Other);
    }

    if let Some(caps) = SUMMARY_RE.captures(trimmed) {
        let count = |name: &str| {
            caps.name(name)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        return PlanEvent::PlanSummary(PlanSummary {
            import: count("import"),
            add: count("add"),
            change: count("change"),
            destroy: count("destroy"),
        });
    }

    if trimmed.starts_with("No changes.")
        || trimmed.contains("Your infrastructure matches the configuration")
    {
        return PlanEvent::NoChanges;
    }

    let Some((marker, rest)) = ChangeMarker::split(trimmed) else {
        return PlanEvent::Other;
    };

    if BLOCK_RE.is_match(trimmed) {
        return PlanEvent::BlockDeclaration {
            marker,
            text: trimmed.to_string(),
        };
    }

    let transition = rest.contains("->");
    let introduced = if transition {
        rest.rsplit("->").next()
    } else {
        rest.split_once('=').map(|(_, value)| value)
    };
    let computed = introduced.is_some_and(|v| v.trim_start().starts_with(COMPUTED_PLACEHOLDER));

    PlanEvent::AttributeChange {
        marker,
        text: trimmed.to_string(),
        transition,
        computed,
    }
}

fn parse_header(line: &str) -> Option<PlanEvent> {
    let caps = HEADER_RE.captures(line)?;
    let address = caps.name("address")?.as_str().to_string();
    let change_kind = ChangeKind::from_phrase(caps.name("phrase")?.as_str());
    let (resource_type, resource_name) = split_address(&address);

    Some(PlanEvent::ResourceHeader {
        address,
        resource_type,
        resource_name,
        change_kind,
    })
}

/// Returns the resource type and name of an address: the last two
/// dot-separated segments once index suffixes are removed.
#[must_use]
pub fn split_address(address: &str) -> (String, String) {
    let stripped = strip_indexes(address);
    let mut segments = stripped.rsplit('.');
    let name = segments.next().unwrap_or_default();
    match segments.next() {
        Some(resource_type) => (resource_type.to_string(), name.to_string()),
        None => (name.to_string(), String::new()),
    }
}

/// Removes `[...]` index suffixes, including quoted keys containing dots.
fn strip_indexes(address: &str) -> String {
    let mut out = String::with_capacity(address.len());
    let mut depth = 0usize;
    let mut in_quotes = false;

    for c in address.chars() {
        match c {
            '"' if depth > 0 => in_quotes = !in_quotes,
            '[' if !in_quotes => depth += 1,
            ']' if !in_quotes && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}
