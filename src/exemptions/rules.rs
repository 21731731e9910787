//! Compiled exemption rules and the immutable merged rule set.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use crate::drift::ChangeKind;
use crate::error::{ConfigError, HarnessError, Result};

use super::file::{RuleSpec, SettingsSpec};

/// Name of the builtin rule exempting status transitions to `"active"`.
pub const STATUS_BECOMES_ACTIVE: &str = "status-becomes-active";

const STATUS_BECOMES_ACTIVE_PATTERN: &str = r#"^~\s*status\s*=\s*"[^"]*"\s*->\s*"active""#;

/// Names of the builtin rules.
pub const BUILTIN_RULE_NAMES: &[&str] = &[STATUS_BECOMES_ACTIVE];

/// Returns true if `name` is the name of a builtin rule, whether or not a
/// rule file has overridden it.
#[must_use]
pub fn is_builtin_name(name: &str) -> bool {
    BUILTIN_RULE_NAMES.contains(&name)
}

/// Where a rule came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSource {
    /// Shipped with the harness.
    Builtin,
    /// The global rule file.
    Global(PathBuf),
    /// A resource-scoped rule file.
    Resource {
        /// Targeted resource name.
        resource: String,
        /// File path.
        path: PathBuf,
    },
}

impl RuleSource {
    /// Short label for error messages and tables.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Builtin => String::from("builtin"),
            Self::Global(path) | Self::Resource { path, .. } => path.display().to_string(),
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A rule with every pattern compiled.
#[derive(Debug, Clone)]
pub struct ExemptionRule {
    /// Unique name within a merged set.
    pub name: String,
    /// Human-readable purpose.
    pub description: String,
    /// Resource types in scope. Empty means all.
    pub resource_types: BTreeSet<String>,
    /// Address patterns in scope. Empty means all.
    pub resource_name_patterns: Vec<Regex>,
    /// Attribute line patterns.
    pub attribute_patterns: Vec<Regex>,
    /// Exempt whole resources being created.
    pub allow_create: bool,
    /// Exempt whole resources being destroyed.
    pub allow_destroy: bool,
    /// Exempt whole resources being replaced.
    pub allow_replace: bool,
    /// Disabled rules are never evaluated.
    pub enabled: bool,
    /// Provenance.
    pub source: RuleSource,
}

impl ExemptionRule {
    /// Compiles a rule entry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] naming the rule and its source
    /// file if any pattern fails to compile.
    pub fn compile(spec: &RuleSpec, source: RuleSource) -> Result<Self> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        HarnessError::Config(ConfigError::InvalidPattern {
                            rule: spec.name.clone(),
                            source_file: source.label(),
                            pattern: p.clone(),
                            message: e.to_string(),
                        })
                    })
                })
                .collect()
        };

        let resource_name_patterns = compile_all(&spec.resource_name_patterns)?;
        let attribute_patterns = compile_all(&spec.patterns)?;

        Ok(Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            resource_types: spec.resource_types.iter().cloned().collect(),
            resource_name_patterns,
            attribute_patterns,
            allow_create: spec.allow_create,
            allow_destroy: spec.allow_destroy,
            allow_replace: spec.allow_replace,
            enabled: spec.enabled,
            source,
        })
    }

    /// Returns true for rules shipped with the harness.
    #[must_use]
    pub const fn is_builtin(&self) -> bool {
        matches!(self.source, RuleSource::Builtin)
    }

    /// Returns true if the rule scopes to the given resource.
    #[must_use]
    pub fn applies_to(&self, address: &str, resource_type: &str) -> bool {
        if !self.resource_types.is_empty() && !self.resource_types.contains(resource_type) {
            return false;
        }
        self.resource_name_patterns.is_empty()
            || self.resource_name_patterns.iter().any(|p| p.is_match(address))
    }

    /// Returns true if the rule exempts whole resources of this change kind.
    #[must_use]
    pub const fn allows_kind(&self, kind: ChangeKind) -> bool {
        match kind {
            ChangeKind::Create => self.allow_create,
            ChangeKind::Destroy => self.allow_destroy,
            ChangeKind::Replace => self.allow_replace,
            ChangeKind::Update | ChangeKind::Read | ChangeKind::Unknown => false,
        }
    }

    /// Returns true if any attribute pattern matches the trimmed line.
    #[must_use]
    pub fn matches_line(&self, line: &str) -> bool {
        self.attribute_patterns.iter().any(|p| p.is_match(line))
    }

    /// Source text of the attribute patterns.
    pub fn pattern_sources(&self) -> impl Iterator<Item = &str> {
        self.attribute_patterns.iter().map(Regex::as_str)
    }
}

/// Rule entries shipped with the harness, overridable by name.
#[must_use]
pub fn builtin_specs() -> Vec<RuleSpec> {
    vec![RuleSpec {
        name: String::from(STATUS_BECOMES_ACTIVE),
        description: String::from("Status fields settle to \"active\" after provisioning"),
        resource_types: Vec::new(),
        resource_name_patterns: Vec::new(),
        patterns: vec![String::from(STATUS_BECOMES_ACTIVE_PATTERN)],
        allow_create: false,
        allow_destroy: false,
        allow_replace: false,
        enabled: true,
    }]
}

/// Evaluation settings of a merged rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExemptionSettings {
    /// Exemption mode when true, legacy mode otherwise.
    pub apply_exemptions: bool,
    /// Log every exempted line.
    pub verbose: bool,
    /// Report enabled rules with zero matches.
    pub warn_unused: bool,
    /// Load resource-scoped files.
    pub load_resource_scoped: bool,
}

impl ExemptionSettings {
    /// Settings used when no global rule file exists.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            apply_exemptions: false,
            verbose: false,
            warn_unused: false,
            load_resource_scoped: false,
        }
    }
}

impl Default for ExemptionSettings {
    fn default() -> Self {
        SettingsSpec::default().into()
    }
}

impl From<SettingsSpec> for ExemptionSettings {
    fn from(spec: SettingsSpec) -> Self {
        Self {
            apply_exemptions: spec.apply_exemptions,
            verbose: spec.verbose,
            warn_unused: spec.warn_unused,
            load_resource_scoped: spec.load_resource_scoped,
        }
    }
}

/// An immutable, name-keyed merged rule set.
#[derive(Debug, Clone)]
pub struct ExemptionConfig {
    rules: BTreeMap<String, ExemptionRule>,
    settings: ExemptionSettings,
}

impl ExemptionConfig {
    /// Creates a rule set from compiled rules. Later rules replace earlier
    /// ones of the same name.
    #[must_use]
    pub fn new(rules: impl IntoIterator<Item = ExemptionRule>, settings: ExemptionSettings) -> Self {
        let rules = rules.into_iter().map(|r| (r.name.clone(), r)).collect();
        Self { rules, settings }
    }

    /// A disabled rule set holding only the builtin rules.
    ///
    /// # Errors
    ///
    /// Returns an error if a builtin pattern fails to compile.
    pub fn legacy() -> Result<Self> {
        let rules = builtin_specs()
            .iter()
            .map(|spec| ExemptionRule::compile(spec, RuleSource::Builtin))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules, ExemptionSettings::disabled()))
    }

    /// Evaluation settings.
    #[must_use]
    pub const fn settings(&self) -> &ExemptionSettings {
        &self.settings
    }

    /// All rules in name order, disabled ones included.
    pub fn rules(&self) -> impl Iterator<Item = &ExemptionRule> {
        self.rules.values()
    }

    /// Enabled rules in name order.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &ExemptionRule> {
        self.rules.values().filter(|r| r.enabled)
    }

    /// Looks up a rule by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExemptionRule> {
        self.rules.get(name)
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the set holds no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> RuleSpec {
        RuleSpec {
            name: name.to_string(),
            description: String::new(),
            resource_types: Vec::new(),
            resource_name_patterns: Vec::new(),
            patterns: Vec::new(),
            allow_create: false,
            allow_destroy: false,
            allow_replace: false,
            enabled: true,
        }
    }

    #[test]
    fn test_builtin_matches_status_transition_only() {
        let config = ExemptionConfig::legacy().expect("builtins compile");
        let rule = config.get(STATUS_BECOMES_ACTIVE).expect("builtin present");
        assert!(rule.is_builtin());
        assert!(rule.matches_line(r#"~ status = "pending" -> "active""#));
        assert!(!rule.matches_line(r#"~ status = "active" -> "paused""#));
        assert!(!rule.matches_line(r#"~ plan_status = "pending" -> "active""#));
        assert!(!config.settings().apply_exemptions);
    }

    #[test]
    fn test_scope_by_type_and_address() {
        let mut s = spec("scoped");
        s.resource_types = vec![String::from("cloudflare_zone")];
        s.resource_name_patterns = vec![String::from(r"\.primary$")];
        let rule = ExemptionRule::compile(&s, RuleSource::Builtin).expect("compiles");

        assert!(rule.applies_to("module.zone.cloudflare_zone.primary", "cloudflare_zone"));
        assert!(!rule.applies_to("module.zone.cloudflare_zone.secondary", "cloudflare_zone"));
        assert!(!rule.applies_to("cloudflare_record.primary", "cloudflare_record"));
    }

    #[test]
    fn test_allow_flags_map_to_change_kinds() {
        let mut s = spec("creates");
        s.allow_create = true;
        let rule = ExemptionRule::compile(&s, RuleSource::Builtin).expect("compiles");
        assert!(rule.allows_kind(ChangeKind::Create));
        assert!(!rule.allows_kind(ChangeKind::Replace));
        assert!(!rule.allows_kind(ChangeKind::Read));
    }

    #[test]
    fn test_invalid_pattern_names_rule_and_source() {
        let mut s = spec("broken");
        s.patterns = vec![String::from("name_servers[")];
        let err = ExemptionRule::compile(&s, RuleSource::Global(PathBuf::from("global.yaml")))
            .expect_err("pattern is invalid");
        match err {
            HarnessError::Config(ConfigError::InvalidPattern { rule, source_file, .. }) => {
                assert_eq!(rule, "broken");
                assert_eq!(source_file, "global.yaml");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
