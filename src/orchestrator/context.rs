//! Per-run scratch state.
//!
//! [`RunContext`] is owned by the caller and written only by the
//! orchestrator. It keeps whatever progress a run made when a phase fails,
//! times out, or is cancelled: phase statuses, artifacts written so far and
//! whether the migrated state was pushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::artifacts::{ArtifactKind, ArtifactRecord};
use crate::config::HarnessConfig;
use crate::drift::DriftReport;
use crate::imports::ImportOutcome;
use crate::migrate::ResourceRename;

use super::phases::{Checkpoint, Phase, PhaseStatus};

/// Status and timing of one phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseRecord {
    /// The phase.
    pub phase: Phase,
    /// Latest status.
    pub status: PhaseStatus,
    /// When the phase started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Error or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Classification result at a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointResult {
    /// Which checkpoint.
    pub checkpoint: Checkpoint,
    /// Drift found at the checkpoint.
    pub report: DriftReport,
    /// Log holding the classified plan.
    pub plan_log: PathBuf,
}

/// Scratch state of one validation run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run identifier, also the name of the artifacts directory.
    pub run_id: String,
    /// Host the run executes on.
    pub host: String,
    /// When the run context was created.
    pub started_at: DateTime<Utc>,
    /// Old-version tree.
    pub old_dir: PathBuf,
    /// New-version tree.
    pub new_dir: PathBuf,
    /// Directory for this run's artifacts.
    pub artifacts_dir: PathBuf,
    /// Environment overrides for every tool invocation.
    pub env: BTreeMap<String, String>,
    /// Module targets; empty means the whole configuration.
    pub targets: Vec<String>,
    /// Phase records in execution order.
    pub phases: Vec<PhaseRecord>,
    /// Files written so far.
    pub artifacts: Vec<ArtifactRecord>,
    /// Old-version state snapshot.
    pub old_state: Option<PathBuf>,
    /// New-version state snapshot.
    pub new_state: Option<PathBuf>,
    /// Saved new-version plan.
    pub plan_file: Option<PathBuf>,
    /// The migrated state was pushed to the backend.
    pub state_pushed: bool,
    /// Renames reported by the migration tool, if it exposes them.
    pub renames: Option<Vec<ResourceRename>>,
    /// Generated import directives file.
    pub directives_file: Option<PathBuf>,
    /// Executed imports.
    pub imports: Vec<(String, ImportOutcome)>,
    /// Checkpoint results.
    pub checkpoints: Vec<CheckpointResult>,
}

impl RunContext {
    /// Creates a context for a new run.
    ///
    /// Configured variables are exported to the tool as `TF_VAR_<NAME>`.
    #[must_use]
    pub fn new(config: &HarnessConfig, targets: Vec<String>) -> Self {
        let started_at = Utc::now();
        let short_id = Uuid::new_v4().simple().to_string();
        let run_id = format!(
            "{}-{}",
            started_at.format("%Y%m%dT%H%M%SZ"),
            &short_id[..8]
        );

        let env = config
            .variables
            .iter()
            .map(|(k, v)| (format!("TF_VAR_{k}"), v.clone()))
            .collect();

        let host = hostname::get().map_or_else(
            |_| String::from("unknown"),
            |h| h.to_string_lossy().into_owned(),
        );

        Self {
            artifacts_dir: config.artifacts_root().join(&run_id),
            run_id,
            host,
            started_at,
            old_dir: config.workspace.old_dir.clone(),
            new_dir: config.workspace.new_dir.clone(),
            env,
            targets,
            phases: Vec::new(),
            artifacts: Vec::new(),
            old_state: None,
            new_state: None,
            plan_file: None,
            state_pushed: false,
            renames: None,
            directives_file: None,
            imports: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Overrides the artifacts directory.
    #[must_use]
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = dir.into();
        self
    }

    /// Marks a phase as running.
    pub fn begin(&mut self, phase: Phase) {
        let now = Utc::now();
        let record = self.record_mut(phase);
        record.status = PhaseStatus::Running;
        record.started_at = Some(now);
        record.finished_at = None;
        record.message = None;
    }

    /// Records the end of a phase.
    pub fn finish(&mut self, phase: Phase, status: PhaseStatus, message: Option<String>) {
        let now = Utc::now();
        let record = self.record_mut(phase);
        record.status = status;
        record.finished_at = Some(now);
        record.message = message;
    }

    /// Records a phase that was not run.
    pub fn skip(&mut self, phase: Phase, reason: impl Into<String>) {
        self.finish(phase, PhaseStatus::Skipped, Some(reason.into()));
    }

    /// Marks every running phase as cancelled. Used when the run future is
    /// dropped from outside.
    pub fn mark_cancelled(&mut self) {
        let now = Utc::now();
        for record in &mut self.phases {
            if record.status == PhaseStatus::Running {
                record.status = PhaseStatus::Cancelled;
                record.finished_at = Some(now);
                record.message = Some(String::from("cancelled"));
            }
        }
    }

    /// Latest status of a phase, if it was reached.
    #[must_use]
    pub fn status(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phases.iter().find(|r| r.phase == phase).map(|r| r.status)
    }

    /// Records a written artifact.
    pub fn record_artifact(&mut self, kind: ArtifactKind, path: &Path, sha256: Option<String>) {
        self.artifacts.push(ArtifactRecord {
            kind,
            path: path.to_path_buf(),
            sha256,
        });
    }

    /// Path of the log for one step of a phase.
    #[must_use]
    pub fn log_path(&self, phase: Phase, step: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{}-{step}.log", phase.key()))
    }

    /// Checkpoint result, if recorded.
    #[must_use]
    pub fn checkpoint(&self, checkpoint: Checkpoint) -> Option<&CheckpointResult> {
        self.checkpoints.iter().find(|c| c.checkpoint == checkpoint)
    }

    /// Classification filter: the single target, if exactly one is set.
    #[must_use]
    pub fn filter(&self) -> Option<&str> {
        match self.targets.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    fn record_mut(&mut self, phase: Phase) -> &mut PhaseRecord {
        let index = match self.phases.iter().position(|r| r.phase == phase) {
            Some(index) => index,
            None => {
                self.phases.push(PhaseRecord {
                    phase,
                    status: PhaseStatus::Running,
                    started_at: None,
                    finished_at: None,
                    message: None,
                });
                self.phases.len() - 1
            }
        };
        &mut self.phases[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> RunContext {
        let mut config = HarnessConfig::default();
        config.variables.insert(String::from("zone_id"), String::from("z1"));
        config.workspace.artifacts_dir = Some(PathBuf::from("/tmp/artifacts"));
        RunContext::new(&config, vec![String::from("zone")])
    }

    #[test]
    fn test_new_context_layout() {
        let ctx = context();
        assert!(ctx.artifacts_dir.starts_with("/tmp/artifacts"));
        assert!(ctx.artifacts_dir.ends_with(&ctx.run_id));
        assert_eq!(ctx.env.get("TF_VAR_zone_id").map(String::as_str), Some("z1"));
        assert_eq!(ctx.filter(), Some("zone"));
        assert_eq!(
            ctx.log_path(Phase::PlanNew, "plan"),
            ctx.artifacts_dir.join("plan-new-plan.log")
        );
    }

    #[test]
    fn test_phase_lifecycle() {
        let mut ctx = context();
        ctx.begin(Phase::Credentials);
        assert_eq!(ctx.status(Phase::Credentials), Some(PhaseStatus::Running));
        ctx.finish(Phase::Credentials, PhaseStatus::Succeeded, None);
        ctx.skip(Phase::ApplyOld, "disabled");
        ctx.begin(Phase::Migrate);
        ctx.mark_cancelled();

        assert_eq!(ctx.phases.len(), 3);
        assert_eq!(ctx.status(Phase::Credentials), Some(PhaseStatus::Succeeded));
        assert_eq!(ctx.status(Phase::ApplyOld), Some(PhaseStatus::Skipped));
        assert_eq!(ctx.status(Phase::Migrate), Some(PhaseStatus::Cancelled));
        assert_eq!(ctx.status(Phase::Stability), None);
    }
}
