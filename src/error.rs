//! Error types for the migration validation harness.
//!
//! This module provides the error hierarchy for every stage of a validation
//! run: configuration and rule loading, credential checks, subprocess
//! execution, import resolution, and orchestration.
//!
//! Detected drift is deliberately absent from this hierarchy. Drift is a
//! verdict carried by a report, not a failure of the harness.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the validation harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Required environment is incomplete.
    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// An external tool invocation failed.
    #[error("Subprocess error: {0}")]
    Subprocess(#[from] SubprocessError),

    /// Import annotation resolution errors.
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Orchestration errors.
    #[error("Orchestration error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration and rule-file errors. Always fatal at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A rule pattern failed to compile.
    #[error("Invalid pattern '{pattern}' in exemption '{rule}' ({source_file}): {message}")]
    InvalidPattern {
        /// Name of the rule holding the pattern.
        rule: String,
        /// File the rule was loaded from.
        source_file: String,
        /// The offending pattern text.
        pattern: String,
        /// Compiler message.
        message: String,
    },

    /// The same rule name appears twice within a single file.
    #[error("Duplicate exemption name '{name}' in {source_file}")]
    DuplicateRule {
        /// The duplicated name.
        name: String,
        /// File containing both entries.
        source_file: String,
    },
}

/// Environment errors, raised before any infrastructure is touched.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// One or more required variables are unset or empty.
    #[error("Missing required environment variables: {}", names.join(", "))]
    MissingVariables {
        /// Names of all missing variables.
        names: Vec<String>,
    },
}

/// External tool invocation errors.
///
/// Every `output` field holds sanitized text.
#[derive(Debug, Error)]
pub enum SubprocessError {
    /// The process could not be started.
    #[error("Failed to start '{command}': {message}")]
    SpawnFailed {
        /// Rendered command line.
        command: String,
        /// OS error description.
        message: String,
    },

    /// The process exited with a non-zero status.
    #[error("'{command}' exited with {}", exit_code.map_or_else(|| String::from("signal"), |c| format!("code {c}")))]
    NonZeroExit {
        /// Rendered command line.
        command: String,
        /// Exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
        /// Combined, sanitized stdout and stderr.
        output: String,
    },

    /// Rate limiting persisted through every retry.
    #[error("'{command}' still rate limited after {attempts} attempts")]
    RateLimited {
        /// Rendered command line.
        command: String,
        /// Number of attempts made.
        attempts: u32,
        /// Combined, sanitized output of the last attempt.
        output: String,
    },

    /// The process exceeded its deadline and was killed.
    #[error("'{command}' timed out after {timeout_secs}s")]
    TimedOut {
        /// Rendered command line.
        command: String,
        /// Deadline that was exceeded.
        timeout_secs: u64,
    },
}

/// Import annotation errors.
#[derive(Debug, Error)]
pub enum ImportError {
    /// A placeholder could not be resolved for an executed import.
    #[error("Unresolved variable '{name}' in import address for {address}")]
    UnresolvedVariable {
        /// Variable name inside `${var.NAME}`.
        name: String,
        /// Target resource address.
        address: String,
    },

    /// The configuration tree could not be scanned.
    #[error("Failed to scan {path}: {message}")]
    ScanFailed {
        /// Path being scanned.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Orchestration errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A phase exceeded its deadline.
    #[error("Phase '{phase}' exceeded its {timeout_secs}s deadline")]
    PhaseTimedOut {
        /// Phase name.
        phase: String,
        /// Deadline in seconds.
        timeout_secs: u64,
    },

    /// A working tree is missing or unusable.
    #[error("Invalid working tree {path}: {reason}")]
    InvalidWorkingTree {
        /// Tree path.
        path: PathBuf,
        /// Why the tree is unusable.
        reason: String,
    },

    /// The run was cancelled from outside.
    #[error("Run cancelled during phase '{phase}'")]
    Cancelled {
        /// Phase that was running.
        phase: String,
    },
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Subprocess(SubprocessError::RateLimited { .. }))
    }

    /// Returns the sanitized tool output attached to this error, if any.
    #[must_use]
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Subprocess(
                SubprocessError::NonZeroExit { output, .. }
                | SubprocessError::RateLimited { output, .. },
            ) => Some(output),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error tied to a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

impl SubprocessError {
    /// Returns the rendered command line of the failed invocation.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::SpawnFailed { command, .. }
            | Self::NonZeroExit { command, .. }
            | Self::RateLimited { command, .. }
            | Self::TimedOut { command, .. } => command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_variables_lists_every_name() {
        let err = EnvironmentError::MissingVariables {
            names: vec!["CLOUDFLARE_API_TOKEN".into(), "CLOUDFLARE_ACCOUNT_ID".into()],
        };
        let text = err.to_string();
        assert!(text.contains("CLOUDFLARE_API_TOKEN"));
        assert!(text.contains("CLOUDFLARE_ACCOUNT_ID"));
    }

    #[test]
    fn test_only_rate_limit_is_retryable() {
        let limited = HarnessError::Subprocess(SubprocessError::RateLimited {
            command: "terraform apply".into(),
            attempts: 3,
            output: String::new(),
        });
        let failed = HarnessError::Subprocess(SubprocessError::NonZeroExit {
            command: "terraform apply".into(),
            exit_code: Some(1),
            output: "boom".into(),
        });
        assert!(limited.is_retryable());
        assert!(!failed.is_retryable());
        assert_eq!(failed.captured_output(), Some("boom"));
    }

    #[test]
    fn test_exit_message_mentions_signal_when_no_code() {
        let err = SubprocessError::NonZeroExit {
            command: "terraform plan".into(),
            exit_code: None,
            output: String::new(),
        };
        assert!(err.to_string().contains("signal"));
        assert_eq!(err.command(), "terraform plan");
    }
}
