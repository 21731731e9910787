//! Configuration validation for harness settings.
//!
//! This module checks value ranges and cross-field consistency before any
//! external tool is started.

use crate::error::{ConfigError, HarnessError, Result};
use tracing::debug;

use super::spec::{HarnessConfig, ImportMode};

/// Validator for harness configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

/// Parallelism above this is allowed but usually triggers provider rate limits.
const HIGH_PARALLELISM: u32 = 10;

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a harness configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &HarnessConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_binaries(config, &mut result);
        Self::validate_runner(config, &mut result);
        Self::validate_workspace(config, &mut result);
        Self::validate_imports(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(HarnessError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_binaries(config: &HarnessConfig, result: &mut ValidationResult) {
        if config.tool.binary.trim().is_empty() {
            result.push_error("tool.binary", "Tool binary cannot be empty");
        }
        if config.migration.binary.trim().is_empty() {
            result.push_error("migration.binary", "Migration binary cannot be empty");
        }
        if !config
            .migration
            .args
            .iter()
            .any(|a| a.contains("{target}") || a.contains("{source}"))
        {
            result.warnings.push(String::from(
                "migration.args never references {target} or {source}; the tool runs in the target tree",
            ));
        }
    }

    fn validate_runner(config: &HarnessConfig, result: &mut ValidationResult) {
        let runner = &config.runner;

        if runner.parallelism == 0 {
            result.push_error("runner.parallelism", "Parallelism must be at least 1");
        } else if runner.parallelism > HIGH_PARALLELISM {
            result.warnings.push(format!(
                "runner.parallelism={} is high and may trigger provider rate limits",
                runner.parallelism
            ));
        }

        if runner.max_retries == 0 {
            result
                .warnings
                .push(String::from("runner.max_retries=0 disables rate limit retries"));
        }

        if runner.rate_limit_markers.iter().any(|m| m.trim().is_empty()) {
            result.push_error(
                "runner.rate_limit_markers",
                "Rate limit markers cannot be empty strings",
            );
        }
    }

    fn validate_workspace(config: &HarnessConfig, result: &mut ValidationResult) {
        let workspace = &config.workspace;

        if workspace.old_dir == workspace.new_dir {
            result.push_error(
                "workspace.new_dir",
                "Old and new working trees must be different directories",
            );
        }

        if workspace.new_dir.starts_with(&workspace.old_dir) {
            result.warnings.push(String::from(
                "workspace.new_dir is nested inside workspace.old_dir; the old tree will contain the migrated copy",
            ));
        }

        if !workspace.apply_old && workspace.push_state {
            result.warnings.push(String::from(
                "workspace.push_state has no effect when workspace.apply_old is disabled",
            ));
        }
    }

    fn validate_imports(config: &HarnessConfig, result: &mut ValidationResult) {
        if config.imports.mode == ImportMode::Execute && config.variables.is_empty() {
            result.warnings.push(String::from(
                "imports.mode=execute with no variables; placeholders must come from TF_VAR_* environment",
            ));
        }
    }
}

impl ValidationResult {
    /// Returns true if no errors were recorded.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn push_error(&mut self, field: &str, message: &str) {
        self.errors.push(ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        });
    }
}
