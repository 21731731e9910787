//! The external migration tool.
//!
//! The migration engine is a black box: the harness only builds its command
//! line and, when the tool offers it, reads the resource type renames it
//! performed. Rename metadata is an optional capability; a tool without it
//! yields `None`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::MigrationConfig;
use crate::error::{ConfigError, HarnessError, Result};
use crate::runner::Invocation;

/// A resource type renamed by the migration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceRename {
    /// Old-version resource type.
    pub from: String,
    /// New-version resource type.
    pub to: String,
}

#[derive(Debug, Deserialize)]
struct RenameManifest {
    #[serde(default)]
    renames: Vec<ResourceRename>,
}

/// A configuration and state migration tool.
#[async_trait]
pub trait MigrationTool: Send + Sync {
    /// Tool name for logs.
    fn name(&self) -> &str;

    /// Builds the invocation migrating `source` into `target`, with the old
    /// state snapshot at `state`.
    fn invocation(&self, source: &Path, target: &Path, state: &Path) -> Invocation;

    /// Returns the resource type renames performed on `target`, if the tool
    /// exposes them.
    async fn renames(&self, _target: &Path) -> Result<Option<Vec<ResourceRename>>> {
        Ok(None)
    }
}

/// The migration tool as an external executable.
#[derive(Debug, Clone)]
pub struct ExternalMigrationTool {
    /// Binary name or path.
    binary: String,
    /// Argument templates.
    args: Vec<String>,
    /// Rename manifest file name inside the target tree.
    rename_manifest: Option<String>,
}

impl ExternalMigrationTool {
    /// Creates a tool description.
    #[must_use]
    pub fn new(binary: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            rename_manifest: None,
        }
    }

    /// Creates a tool from configuration.
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        let tool = Self::new(config.binary.clone(), config.args.clone());
        if config.rename_manifest.is_empty() {
            tool
        } else {
            tool.with_rename_manifest(config.rename_manifest.clone())
        }
    }

    /// Declares the file through which the tool reports renames.
    #[must_use]
    pub fn with_rename_manifest(mut self, file: impl Into<String>) -> Self {
        self.rename_manifest = Some(file.into());
        self
    }

    fn manifest_path(&self, target: &Path) -> Option<PathBuf> {
        self.rename_manifest.as_ref().map(|f| target.join(f))
    }
}

#[async_trait]
impl MigrationTool for ExternalMigrationTool {
    fn name(&self) -> &str {
        &self.binary
    }

    fn invocation(&self, source: &Path, target: &Path, state: &Path) -> Invocation {
        let args = self.args.iter().map(|arg| {
            arg.replace("{source}", &source.display().to_string())
                .replace("{target}", &target.display().to_string())
                .replace("{state}", &state.display().to_string())
        });
        Invocation::external(self.binary.clone(), args, target)
    }

    async fn renames(&self, target: &Path) -> Result<Option<Vec<ResourceRename>>> {
        let Some(path) = self.manifest_path(target) else {
            return Ok(None);
        };

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No rename manifest at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let manifest: RenameManifest = serde_json::from_str(&content).map_err(|e| {
            HarnessError::Config(ConfigError::parse(
                format!("Invalid rename manifest: {e}"),
                path.display().to_string(),
            ))
        })?;
        Ok(Some(manifest.renames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ExternalMigrationTool {
        ExternalMigrationTool::from_config(&MigrationConfig::default())
    }

    #[test]
    fn test_invocation_substitutes_placeholders() {
        let inv = tool().invocation(Path::new("/w/v4"), Path::new("/w/v5"), Path::new("/a/v4-state.json"));
        assert_eq!(inv.program, "tf-migrate");
        assert_eq!(
            inv.args,
            vec!["migrate", "--config-dir", "/w/v5", "--state-file", "/a/v4-state.json"]
        );
        assert_eq!(inv.working_dir, PathBuf::from("/w/v5"));
        assert!(inv.verb.is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest_means_no_capability() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        assert!(tool().renames(dir.path()).await.expect("ok").is_none());

        let bare = ExternalMigrationTool::new("tf-migrate", Vec::new());
        assert!(bare.renames(dir.path()).await.expect("ok").is_none());
    }

    #[tokio::test]
    async fn test_manifest_renames_are_read() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("tf-migrate-renames.json"),
            r#"{"renames":[{"from":"cloudflare_record","to":"cloudflare_dns_record"}]}"#,
        )
        .expect("write manifest");

        let renames = tool().renames(dir.path()).await.expect("ok").expect("manifest present");
        assert_eq!(
            renames,
            vec![ResourceRename {
                from: String::from("cloudflare_record"),
                to: String::from("cloudflare_dns_record"),
            }]
        );
    }
}
