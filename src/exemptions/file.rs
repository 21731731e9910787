//! On-disk schema of exemption rule files.
//!
//! A rule file is a YAML document with an optional `settings` block and a
//! list of `exemptions`. Files are parsed independently; merging happens in
//! [`ExemptionRuleStore`](super::ExemptionRuleStore).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, HarnessError, Result};

/// The root structure of a rule file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleFile {
    /// Evaluation settings. Only honoured in the global file.
    #[serde(default)]
    pub settings: Option<SettingsSpec>,
    /// Rule entries.
    #[serde(default)]
    pub exemptions: Vec<RuleSpec>,
}

/// The `settings` block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettingsSpec {
    /// Apply exemption rules. When false the classifier runs in legacy mode.
    #[serde(default = "default_true")]
    pub apply_exemptions: bool,
    /// Log every exempted line.
    #[serde(default)]
    pub verbose: bool,
    /// Report enabled rules that never matched.
    #[serde(default = "default_true")]
    pub warn_unused: bool,
    /// Load `<resource>.yaml` files for targeted resources.
    #[serde(default = "default_true")]
    pub load_resource_scoped: bool,
}

impl Default for SettingsSpec {
    fn default() -> Self {
        Self {
            apply_exemptions: true,
            verbose: false,
            warn_unused: true,
            load_resource_scoped: true,
        }
    }
}

/// A single rule entry as written in a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSpec {
    /// Unique rule name.
    pub name: String,
    /// Human-readable purpose.
    #[serde(default)]
    pub description: String,
    /// Resource types the rule applies to. Empty means all.
    #[serde(default)]
    pub resource_types: Vec<String>,
    /// Regexes matched against the resource address. Empty means all.
    #[serde(default)]
    pub resource_name_patterns: Vec<String>,
    /// Regexes matched against trimmed attribute change lines.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Exempt every line of a resource that will be created.
    #[serde(default)]
    pub allow_create: bool,
    /// Exempt every line of a resource that will be destroyed.
    #[serde(default)]
    pub allow_destroy: bool,
    /// Exempt every line of a resource that will be replaced.
    #[serde(default)]
    pub allow_replace: bool,
    /// Disabled rules are kept in the merged set but never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl RuleFile {
    /// Parses a rule file. `source` is used in error messages only.
    ///
    /// An empty document is an empty rule file.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or a rule name repeats.
    pub fn parse(content: &str, source: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let file: Self = serde_yaml::from_str(content).map_err(|e| {
            HarnessError::Config(ConfigError::parse(
                format!("Invalid exemption file: {e}"),
                source.display().to_string(),
            ))
        })?;

        file.check_unique_names(source)?;
        debug!(
            "Parsed {} exemption(s) from {}",
            file.exemptions.len(),
            source.display()
        );
        Ok(file)
    }

    /// Reads and parses a rule file. A missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarnessError::Config(ConfigError::parse(
                    format!("Failed to read file: {e}"),
                    path.display().to_string(),
                )));
            }
        };

        Self::parse(&content, path).map(Some)
    }

    fn check_unique_names(&self, source: &Path) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.exemptions {
            if rule.name.trim().is_empty() {
                return Err(HarnessError::Config(ConfigError::validation(
                    format!("Exemption without a name in {}", source.display()),
                    "exemptions[].name",
                )));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(HarnessError::Config(ConfigError::DuplicateRule {
                    name: rule.name.clone(),
                    source_file: source.display().to_string(),
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
settings:
  apply_exemptions: true
  warn_unused: false
exemptions:
  - name: zone-specific
    description: Name servers are assigned by the provider
    resource_types: [cloudflare_zone]
    patterns: ["name_servers"]
  - name: allow-new-rulesets
    resource_types: [cloudflare_ruleset]
    allow_create: true
    enabled: false
"#;

    #[test]
    fn test_parse_applies_field_defaults() {
        let file = RuleFile::parse(SAMPLE, Path::new("global.yaml")).expect("valid file");
        let settings = file.settings.expect("settings block");
        assert!(settings.apply_exemptions);
        assert!(!settings.warn_unused);
        assert!(settings.load_resource_scoped);
        assert!(!settings.verbose);

        assert_eq!(file.exemptions.len(), 2);
        assert!(file.exemptions[0].enabled);
        assert!(file.exemptions[0].resource_name_patterns.is_empty());
        assert!(file.exemptions[1].allow_create);
        assert!(!file.exemptions[1].enabled);
    }

    #[test]
    fn test_empty_document_is_empty_file() {
        let file = RuleFile::parse("  \n", Path::new("empty.yaml")).expect("empty is fine");
        assert!(file.settings.is_none());
        assert!(file.exemptions.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = "exemptions:\n  - name: a\n  - name: a\n";
        let err = RuleFile::parse(yaml, Path::new("dup.yaml")).expect_err("duplicate");
        assert!(matches!(
            err,
            HarnessError::Config(ConfigError::DuplicateRule { ref name, .. }) if name == "a"
        ));
    }

    #[test]
    fn test_malformed_yaml_names_file() {
        let err = RuleFile::parse("exemptions: [", Path::new("bad.yaml")).expect_err("malformed");
        match err {
            HarnessError::Config(ConfigError::ParseError { location, .. }) => {
                assert_eq!(location.as_deref(), Some("bad.yaml"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let loaded = RuleFile::load(&dir.path().join("absent.yaml")).expect("missing is ok");
        assert!(loaded.is_none());
    }
}
