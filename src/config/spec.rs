//! Configuration specification types for the validation harness.
//!
//! This module defines the structs that map to the `tf-migrate-e2e.yaml`
//! file. Every section carries serde defaults so an empty file describes a
//! working setup against the conventional `e2e/` layout.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root configuration structure for a validation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Infrastructure tool settings.
    #[serde(default)]
    pub tool: ToolConfig,
    /// External migration tool settings.
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Subprocess runner behaviour.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output redaction settings.
    #[serde(default)]
    pub sanitizer: SanitizerConfig,
    /// Exemption rule file locations.
    #[serde(default)]
    pub exemptions: ExemptionPaths,
    /// Import annotation handling.
    #[serde(default)]
    pub imports: ImportConfig,
    /// Working trees and artifacts.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    /// Credential presence checks.
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Per-phase deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Run-time variables used to resolve `${var.NAME}` placeholders.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

/// Infrastructure tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    /// Binary name or path (e.g. `terraform`, `tofu`).
    #[serde(default = "default_tool_binary")]
    pub binary: String,
    /// File passed as `-backend-config=FILE` to every `init`.
    #[serde(default)]
    pub backend_config: Option<PathBuf>,
    /// CLI config override file for locally built providers.
    ///
    /// Exported to the tool as `TF_CLI_CONFIG_FILE`.
    #[serde(default)]
    pub provider_override: Option<PathBuf>,
}

/// External migration tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrationConfig {
    /// Binary name or path.
    #[serde(default = "default_migration_binary")]
    pub binary: String,
    /// Arguments; `{source}`, `{target}` and `{state}` are substituted.
    #[serde(default = "default_migration_args")]
    pub args: Vec<String>,
    /// File the tool may write into the target tree to describe renamed
    /// resource types.
    #[serde(default = "default_rename_manifest")]
    pub rename_manifest: String,
}

/// Subprocess runner behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Value injected as `-parallelism=N` for plan/apply-class commands.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
    /// Retries of a rate-limited command after its first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base; retry `n` waits `base * n`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Literal substrings that identify a rate-limited failure.
    #[serde(default = "default_rate_limit_markers")]
    pub rate_limit_markers: Vec<String>,
}

/// Output redaction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SanitizerConfig {
    /// Redact email addresses (off by default).
    #[serde(default)]
    pub redact_emails: bool,
    /// Prefixes whose `PREFIX_NAME=value` assignments are redacted.
    #[serde(default = "default_env_prefixes")]
    pub env_prefixes: Vec<String>,
    /// Additional patterns; a `secret` named group limits redaction to it.
    #[serde(default)]
    pub extra_patterns: Vec<String>,
}

/// Exemption rule file locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExemptionPaths {
    /// Global rule file.
    #[serde(default = "default_global_exemptions")]
    pub global_file: PathBuf,
    /// Directory holding `<resource>.yaml` rule files.
    #[serde(default = "default_resource_exemptions_dir")]
    pub resource_dir: PathBuf,
}

/// How import annotations are consumed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Annotations are ignored.
    Off,
    /// Declarative `import` blocks are written into the migrated tree.
    #[default]
    Directives,
    /// Imports are executed through the tool before planning.
    Execute,
}

/// Import annotation handling.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportConfig {
    /// Consumption mode.
    #[serde(default)]
    pub mode: ImportMode,
}

/// Working trees and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Old-version configuration tree.
    #[serde(default = "default_old_dir")]
    pub old_dir: PathBuf,
    /// New-version tree produced by the migration tool.
    #[serde(default = "default_new_dir")]
    pub new_dir: PathBuf,
    /// Scratch directory for logs and state snapshots.
    ///
    /// Defaults to the user cache directory.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    /// Apply the old-version configuration before migrating.
    #[serde(default = "default_true")]
    pub apply_old: bool,
    /// Push the migrated state after initializing the new tree.
    #[serde(default = "default_true")]
    pub push_state: bool,
}

/// Credential presence checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialsConfig {
    /// Variables that must be set and non-empty.
    #[serde(default = "default_required_credentials")]
    pub required: Vec<String>,
}

/// Per-phase deadlines in seconds. `None` means no deadline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Old-version apply.
    #[serde(default)]
    pub apply_old: Option<u64>,
    /// Migration tool run.
    #[serde(default)]
    pub migrate: Option<u64>,
    /// New-version init and plan.
    #[serde(default)]
    pub plan_new: Option<u64>,
    /// New-version apply.
    #[serde(default)]
    pub apply_new: Option<u64>,
    /// Post-apply re-plan.
    #[serde(default)]
    pub stability: Option<u64>,
}

fn default_tool_binary() -> String {
    String::from("terraform")
}

fn default_migration_binary() -> String {
    String::from("tf-migrate")
}

fn default_migration_args() -> Vec<String> {
    ["migrate", "--config-dir", "{target}", "--state-file", "{state}"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_rename_manifest() -> String {
    String::from("tf-migrate-renames.json")
}

const fn default_parallelism() -> u32 {
    5
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_backoff_base_ms() -> u64 {
    5_000
}

fn default_rate_limit_markers() -> Vec<String> {
    vec![String::from("Rate limited"), String::from("429 Too Many Requests")]
}

fn default_env_prefixes() -> Vec<String> {
    ["CLOUDFLARE", "TF_VAR", "AWS"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_global_exemptions() -> PathBuf {
    PathBuf::from("e2e/drift-exemptions.yaml")
}

fn default_resource_exemptions_dir() -> PathBuf {
    PathBuf::from("e2e/exemptions")
}

fn default_old_dir() -> PathBuf {
    PathBuf::from("e2e/tf/v4")
}

fn default_new_dir() -> PathBuf {
    PathBuf::from("e2e/tf/v5")
}

const fn default_true() -> bool {
    true
}

fn default_required_credentials() -> Vec<String> {
    ["CLOUDFLARE_API_TOKEN", "CLOUDFLARE_ACCOUNT_ID", "CLOUDFLARE_ZONE_ID"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: default_tool_binary(),
            backend_config: None,
            provider_override: None,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            binary: default_migration_binary(),
            args: default_migration_args(),
            rename_manifest: default_rename_manifest(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            rate_limit_markers: default_rate_limit_markers(),
        }
    }
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            redact_emails: false,
            env_prefixes: default_env_prefixes(),
            extra_patterns: Vec::new(),
        }
    }
}

impl Default for ExemptionPaths {
    fn default() -> Self {
        Self {
            global_file: default_global_exemptions(),
            resource_dir: default_resource_exemptions_dir(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            old_dir: default_old_dir(),
            new_dir: default_new_dir(),
            artifacts_dir: None,
            apply_old: true,
            push_state: true,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            required: default_required_credentials(),
        }
    }
}

impl HarnessConfig {
    /// Resolves every relative path in the configuration against `base`.
    pub fn resolve_paths(&mut self, base: &std::path::Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        join(&mut self.exemptions.global_file);
        join(&mut self.exemptions.resource_dir);
        join(&mut self.workspace.old_dir);
        join(&mut self.workspace.new_dir);
        if let Some(dir) = self.workspace.artifacts_dir.as_mut() {
            join(dir);
        }
        if let Some(file) = self.tool.backend_config.as_mut() {
            join(file);
        }
        if let Some(file) = self.tool.provider_override.as_mut() {
            join(file);
        }
    }

    /// Returns the artifacts root, falling back to the user cache directory.
    #[must_use]
    pub fn artifacts_root(&self) -> PathBuf {
        self.workspace.artifacts_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tf-migrate-e2e")
        })
    }
}

impl TimeoutConfig {
    /// Returns the deadline for a phase key, if one is configured.
    #[must_use]
    pub fn for_phase(&self, phase: &str) -> Option<u64> {
        match phase {
            "apply-old" => self.apply_old,
            "migrate" => self.migrate,
            "plan-new" => self.plan_new,
            "apply-new" => self.apply_new,
            "stability" => self.stability,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_conventional_layout() {
        let config = HarnessConfig::default();
        assert_eq!(config.tool.binary, "terraform");
        assert_eq!(config.runner.parallelism, 5);
        assert_eq!(config.runner.max_retries, 3);
        assert!(!config.sanitizer.redact_emails);
        assert_eq!(config.imports.mode, ImportMode::Directives);
        assert!(config.workspace.apply_old);
    }

    #[test]
    fn test_resolve_paths_keeps_absolute() {
        let mut config = HarnessConfig::default();
        config.workspace.old_dir = PathBuf::from("/abs/v4");
        config.resolve_paths(std::path::Path::new("/repo"));
        assert_eq!(config.workspace.old_dir, PathBuf::from("/abs/v4"));
        assert_eq!(config.workspace.new_dir, PathBuf::from("/repo/e2e/tf/v5"));
    }

    #[test]
    fn test_timeout_lookup_by_phase_key() {
        let timeouts = TimeoutConfig {
            apply_new: Some(900),
            ..TimeoutConfig::default()
        };
        assert_eq!(timeouts.for_phase("apply-new"), Some(900));
        assert_eq!(timeouts.for_phase("migrate"), None);
        assert_eq!(timeouts.for_phase("nonsense"), None);
    }
}
