//! Persisted run artifacts.
//!
//! Plan logs, apply logs and state snapshots are written to a per-run scratch
//! directory. All of them may contain resource attribute values, so every
//! artifact is created with owner-only permissions on unix.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::Result;

/// Kinds of persisted artifacts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Captured output of a tool command.
    Log,
    /// Full state snapshot.
    StateSnapshot,
    /// Saved binary plan.
    PlanFile,
    /// Final validation report.
    Report,
}

/// A file written during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    /// What the file holds.
    pub kind: ArtifactKind,
    /// Where it was written.
    pub path: PathBuf,
    /// SHA-256 of the content, for snapshots and reports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Writes `content` to `path` with owner-only permissions, creating parent
/// directories as needed. An existing file is truncated.
///
/// # Errors
///
/// Returns an error if the file cannot be created or written.
pub async fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(content).await?;
    file.sync_all().await?;

    // `mode` only applies at creation; tighten files that already existed.
    restrict_private(path).await?;

    debug!("Wrote {} bytes to {}", content.len(), path.display());
    Ok(())
}

/// Tightens an existing file to owner-only permissions. Used for files an
/// external tool wrote, such as saved plans. A no-op off unix.
///
/// # Errors
///
/// Returns an error if the file does not exist or cannot be changed.
pub async fn restrict_private(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    fs::metadata(path).await?;
    Ok(())
}

/// Returns the hex-encoded SHA-256 of `content`.
#[must_use]
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_private_creates_parents() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("run/logs/plan.log");

        write_private(&path, b"hello").await.expect("write should succeed");

        let content = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(content, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, "old").expect("pre-create file");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("loosen permissions");

        write_private(&path, b"{}").await.expect("write should succeed");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restrict_private_tightens_tool_written_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("new.tfplan");
        std::fs::write(&path, "plan").expect("tool writes plan");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .expect("default tool mode");

        restrict_private(&path).await.expect("chmod should succeed");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read_to_string(&path).expect("content kept"), "plan");
    }

    #[tokio::test]
    async fn test_restrict_private_missing_file_fails() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        assert!(restrict_private(&dir.path().join("absent.tfplan")).await.is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(
            fingerprint(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
