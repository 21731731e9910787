//! Configuration parser for loading harness configuration files.
//!
//! This module handles loading configuration from YAML files, `.env` files
//! and environment variables, with proper precedence and error handling.

use crate::error::{ConfigError, EnvironmentError, HarnessError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::spec::HarnessConfig;

/// Configuration parser for loading harness configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// Relative paths inside the file are resolved against the base path, or
    /// the file's own directory when no base path was set.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<HarnessConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(HarnessError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(ConfigError::parse(
                format!("Failed to read file: {e}"),
                path.display().to_string(),
            ))
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;

        let base = self
            .base_path
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);

        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// An empty document yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<HarnessConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }

        let config: HarnessConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            HarnessError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration: tool={}, migration={}",
            config.tool.binary, config.migration.binary
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables are checked in the format `TFM_E2E_<KEY>`
    /// (e.g., `TFM_E2E_TERRAFORM_BINARY`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// holds a malformed number.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<HarnessConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric override cannot be parsed.
    pub fn apply_env_overrides(config: &mut HarnessConfig) -> Result<()> {
        if let Ok(binary) = std::env::var("TFM_E2E_TERRAFORM_BINARY") {
            debug!("Overriding tool.binary from environment");
            config.tool.binary = binary;
        }

        if let Ok(binary) = std::env::var("TFM_E2E_MIGRATE_BINARY") {
            debug!("Overriding migration.binary from environment");
            config.migration.binary = binary;
        }

        if let Ok(dir) = std::env::var("TFM_E2E_ARTIFACTS_DIR") {
            debug!("Overriding workspace.artifacts_dir from environment");
            config.workspace.artifacts_dir = Some(PathBuf::from(dir));
        }

        if let Ok(value) = std::env::var("TFM_E2E_PARALLELISM") {
            debug!("Overriding runner.parallelism from environment");
            config.runner.parallelism = value.parse().map_err(|e| {
                HarnessError::Config(ConfigError::validation(
                    format!("TFM_E2E_PARALLELISM '{value}' is not a number: {e}"),
                    "runner.parallelism",
                ))
            })?;
        }

        if config.tool.provider_override.is_none() {
            if let Ok(path) = std::env::var("TF_CLI_CONFIG_FILE") {
                debug!("Using TF_CLI_CONFIG_FILE as provider override");
                config.tool.provider_override = Some(PathBuf::from(path));
            }
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                HarnessError::Config(ConfigError::parse(
                    format!("Failed to load .env file: {e}"),
                    env_path.display().to_string(),
                ))
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Checks that every required credential variable is set and non-empty.
///
/// All missing names are reported at once.
///
/// # Errors
///
/// Returns an [`EnvironmentError`] listing the missing variables.
pub fn check_required_env<S: AsRef<str>>(required: &[S]) -> Result<()> {
    check_required_with(required, |name| std::env::var(name).ok())
}

/// Variant of [`check_required_env`] with an injectable lookup.
///
/// # Errors
///
/// Returns an [`EnvironmentError`] listing the missing variables.
pub fn check_required_with<S, F>(required: &[S], lookup: F) -> Result<()>
where
    S: AsRef<str>,
    F: Fn(&str) -> Option<String>,
{
    let missing: Vec<String> = required
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| lookup(name).is_none_or(|v| v.trim().is_empty()))
        .map(str::to_string)
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    warn!("Missing required credentials: {}", missing.join(", "));
    Err(HarnessError::Environment(EnvironmentError::MissingVariables {
        names: missing,
    }))
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "tf-migrate-e2e.yaml",
    "tf-migrate-e2e.yml",
    "e2e/tf-migrate-e2e.yaml",
];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(HarnessError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
