//! Configuration module for the validation harness.
//!
//! This module handles all harness configuration:
//! - Parsing and deserializing `tf-migrate-e2e.yaml`
//! - Environment and `.env` overrides, credential presence checks
//! - Validation of configuration values

mod spec;
mod parser;
mod validator;

pub use spec::{
    CredentialsConfig, ExemptionPaths, HarnessConfig, ImportConfig, ImportMode, MigrationConfig,
    RunnerConfig, SanitizerConfig, TimeoutConfig, ToolConfig, WorkspaceConfig,
};
pub use parser::{check_required_env, check_required_with, find_config_file, ConfigParser};
pub use validator::{ConfigValidator, ValidationResult};
