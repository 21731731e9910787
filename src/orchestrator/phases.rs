//! Phases of a validation run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of a validation run, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// Required credentials are present.
    Credentials,
    /// The old-version configuration is applied and its state captured.
    ApplyOld,
    /// The migration tool produces the new-version tree.
    Migrate,
    /// The new-version tree is initialized and planned.
    PlanNew,
    /// The new-version plan is applied and its state captured.
    ApplyNew,
    /// The new-version tree is planned again against its own state.
    Stability,
    /// Checkpoint results are combined into a verdict.
    Aggregate,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Self; 7] = [
        Self::Credentials,
        Self::ApplyOld,
        Self::Migrate,
        Self::PlanNew,
        Self::ApplyNew,
        Self::Stability,
        Self::Aggregate,
    ];

    /// Stable key used in artifact names and timeout configuration.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Credentials => "credentials",
            Self::ApplyOld => "apply-old",
            Self::Migrate => "migrate",
            Self::PlanNew => "plan-new",
            Self::ApplyNew => "apply-new",
            Self::Stability => "stability",
            Self::Aggregate => "aggregate",
        }
    }

    /// Whether the phase talks to real infrastructure.
    #[must_use]
    pub const fn touches_infrastructure(self) -> bool {
        !matches!(self, Self::Credentials | Self::Aggregate)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Outcome of a phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Started but not finished.
    Running,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Not run by configuration.
    Skipped,
    /// Aborted at its deadline.
    TimedOut,
    /// Aborted from outside.
    Cancelled,
}

impl PhaseStatus {
    /// Returns true if the phase ended without running to completion.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Cancelled)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Points at which the new-version plan is classified.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Checkpoint {
    /// First plan of the migrated tree.
    Initial,
    /// Re-plan after the migrated tree was applied.
    PostApply,
}

impl Checkpoint {
    /// Stable key.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::PostApply => "post-apply",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_keys_match_timeout_config() {
        let timeouts = crate::config::TimeoutConfig {
            apply_old: Some(1),
            migrate: Some(2),
            plan_new: Some(3),
            apply_new: Some(4),
            stability: Some(5),
        };
        let configured: Vec<Option<u64>> =
            Phase::ALL.iter().map(|p| timeouts.for_phase(p.key())).collect();
        assert_eq!(
            configured,
            vec![None, Some(1), Some(2), Some(3), Some(4), Some(5), None]
        );
    }

    #[test]
    fn test_phases_are_ordered() {
        let mut sorted = Phase::ALL;
        sorted.sort();
        assert_eq!(sorted, Phase::ALL);
        assert!(!Phase::Credentials.touches_infrastructure());
        assert!(Phase::ApplyOld.touches_infrastructure());
    }
}
