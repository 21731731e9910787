//! Final validation report and verdict aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::artifacts::ArtifactRecord;
use crate::exemptions::is_builtin_name;
use crate::imports::ImportOutcome;
use crate::migrate::ResourceRename;

use super::context::{CheckpointResult, PhaseRecord, RunContext};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No drift at any checkpoint.
    Pass,
    /// Only exempted drift, or rule hygiene warnings.
    Warn,
    /// Real drift at some checkpoint.
    Fail,
    /// The run aborted before a verdict could be reached.
    Error,
}

impl Verdict {
    /// Combines checkpoint results. An empty list passes.
    ///
    /// Lines absorbed by builtin rules count as computed, not as warnings.
    #[must_use]
    pub fn from_checkpoints(checkpoints: &[CheckpointResult]) -> Self {
        if checkpoints.iter().any(|c| c.report.has_real_drift()) {
            Self::Fail
        } else if checkpoints.iter().any(|c| {
            c.report.exempted_drift.iter().any(|e| !is_builtin_name(&e.rule))
                || !c.report.unused_exemptions.is_empty()
        }) {
            Self::Warn
        } else {
            Self::Pass
        }
    }

    /// Returns true for verdicts that do not fail the run.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Pass | Self::Warn)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pass => "PASS",
            Self::Warn => "PASS (with warnings)",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// The persisted outcome of a validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    /// Run identifier.
    pub run_id: String,
    /// Host the run executed on.
    pub host: String,
    /// Overall verdict.
    pub verdict: Verdict,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the report was produced.
    pub finished_at: DateTime<Utc>,
    /// Module targets.
    pub targets: Vec<String>,
    /// Phase records.
    pub phases: Vec<PhaseRecord>,
    /// Checkpoint results.
    pub checkpoints: Vec<CheckpointResult>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// Error that aborted the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Files written during the run.
    pub artifacts: Vec<ArtifactRecord>,
    /// Whether the migrated state was pushed.
    pub state_pushed: bool,
    /// Renames reported by the migration tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renames: Option<Vec<ResourceRename>>,
    /// Executed imports.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<(String, ImportOutcome)>,
}

impl ValidationReport {
    /// Builds a report from the run context. With an `error` the verdict is
    /// [`Verdict::Error`] regardless of checkpoint results.
    #[must_use]
    pub fn from_context(ctx: &RunContext, error: Option<String>) -> Self {
        let verdict = if error.is_some() {
            Verdict::Error
        } else {
            Verdict::from_checkpoints(&ctx.checkpoints)
        };

        Self {
            run_id: ctx.run_id.clone(),
            host: ctx.host.clone(),
            verdict,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            targets: ctx.targets.clone(),
            phases: ctx.phases.clone(),
            checkpoints: ctx.checkpoints.clone(),
            warnings: collect_warnings(&ctx.checkpoints),
            error,
            artifacts: ctx.artifacts.clone(),
            state_pushed: ctx.state_pushed,
            renames: ctx.renames.clone(),
            imports: ctx.imports.clone(),
        }
    }

    /// Total real drift lines across checkpoints.
    #[must_use]
    pub fn real_drift_count(&self) -> usize {
        self.checkpoints.iter().map(|c| c.report.real_drift.len()).sum()
    }

    /// Total exempted lines across checkpoints.
    #[must_use]
    pub fn exempted_count(&self) -> usize {
        self.checkpoints.iter().map(|c| c.report.exempted_drift.len()).sum()
    }
}

fn collect_warnings(checkpoints: &[CheckpointResult]) -> Vec<String> {
    let mut warnings = Vec::new();
    for result in checkpoints {
        let report = &result.report;
        for (rule, count) in &report.triggered_exemptions {
            if is_builtin_name(rule) {
                continue;
            }
            warnings.push(format!(
                "{}: {count} change(s) exempted by '{rule}'",
                result.checkpoint
            ));
        }
        for rule in &report.unused_exemptions {
            warnings.push(format!("{}: exemption '{rule}' never matched", result.checkpoint));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::{ChangeKind, DriftLine, DriftReport, ExemptedLine};
    use crate::orchestrator::Checkpoint;
    use std::path::PathBuf;

    fn line(text: &str) -> DriftLine {
        DriftLine {
            address: Some(String::from("cloudflare_zone.z")),
            change_kind: ChangeKind::Update,
            line: text.to_string(),
            line_no: 1,
        }
    }

    fn result(checkpoint: Checkpoint, report: DriftReport) -> CheckpointResult {
        CheckpointResult {
            checkpoint,
            report,
            plan_log: PathBuf::from("plan.log"),
        }
    }

    #[test]
    fn test_real_drift_at_any_checkpoint_fails() {
        let mut drifted = DriftReport::default();
        drifted.real_drift.push(line("~ plan = \"free\" -> \"pro\""));
        let checkpoints = vec![
            result(Checkpoint::Initial, DriftReport::clean()),
            result(Checkpoint::PostApply, drifted),
        ];
        assert_eq!(Verdict::from_checkpoints(&checkpoints), Verdict::Fail);
    }

    #[test]
    fn test_exempted_only_is_warning() {
        let mut exempted = DriftReport {
            only_computed_changes: true,
            ..DriftReport::default()
        };
        exempted.exempted_drift.push(ExemptedLine {
            drift: line("~ name_servers = [] -> [\"a\"]"),
            rule: String::from("zone-specific"),
            whole_resource: false,
        });
        exempted.triggered_exemptions.insert(String::from("zone-specific"), 1);

        let checkpoints = vec![result(Checkpoint::Initial, exempted)];
        let verdict = Verdict::from_checkpoints(&checkpoints);
        assert_eq!(verdict, Verdict::Warn);
        assert!(verdict.is_success());

        let warnings = collect_warnings(&checkpoints);
        assert_eq!(warnings, vec!["initial: 1 change(s) exempted by 'zone-specific'"]);
    }

    #[test]
    fn test_clean_checkpoints_pass() {
        let checkpoints = vec![
            result(Checkpoint::Initial, DriftReport::clean()),
            result(Checkpoint::PostApply, DriftReport::clean()),
        ];
        assert_eq!(Verdict::from_checkpoints(&checkpoints), Verdict::Pass);
        assert!(!Verdict::Error.is_success());
    }

    #[test]
    fn test_builtin_exemptions_do_not_warn() {
        let mut report = DriftReport {
            only_computed_changes: true,
            ..DriftReport::default()
        };
        report.exempted_drift.push(ExemptedLine {
            drift: line("~ status = \"pending\" -> \"active\""),
            rule: String::from(crate::exemptions::STATUS_BECOMES_ACTIVE),
            whole_resource: false,
        });
        let checkpoints = vec![result(Checkpoint::Initial, report)];
        assert_eq!(Verdict::from_checkpoints(&checkpoints), Verdict::Pass);
        assert!(collect_warnings(&checkpoints).is_empty());
    }
}
