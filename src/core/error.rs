//! Error taxonomy for resolution, ledger, and step execution.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for chainplan core operations.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors that can occur while resolving, running, or recording a campaign.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The campaign file failed structural validation.
    #[error("campaign invalid: {0}")]
    Validation(String),

    /// The step graph contains at least one cycle.
    #[error("dependency cycle detected involving: {}", .steps.join(", "))]
    CycleDetected { steps: Vec<String> },

    /// A step references a dependency that is not declared.
    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    /// A terminal entry already exists for this step.
    #[error("step '{step}' already has a terminal ledger entry ({existing})")]
    DuplicateTerminal { step: String, existing: String },

    /// An earlier run recorded a failure that nobody has cleared.
    #[error("step '{step}' failed in a previous run ({detail}); clear it before resuming")]
    PriorStepFailed { step: String, detail: String },

    /// Parameters for a step could not be bound.
    #[error("step '{step}': cannot bind arguments: {detail}")]
    Binding { step: String, detail: String },

    /// The resource client reported an error for this step.
    #[error("step '{step}' failed: {detail}")]
    RemoteOperationFailed { step: String, detail: String },

    /// The resource client did not answer within the step timeout.
    #[error("step '{step}' timed out after {}s", .after.as_secs_f64())]
    Timeout { step: String, after: Duration },

    /// The operator interrupted the run; honored between steps.
    #[error("campaign cancelled before step '{next}'")]
    Cancelled { next: String },

    /// Writing exported identities failed. Never rolls back the campaign.
    #[error("export to {} failed: {detail}", .path.display())]
    ExportFailed { path: PathBuf, detail: String },

    /// Clear was requested for a step that is not failed or in flight.
    #[error("step '{step}' cannot be cleared: {reason}")]
    NotCleared { step: String, reason: String },

    /// The ledger file could not be read or written.
    #[error("ledger I/O error on {}: {source}", .path.display())]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger file contains a record that cannot be replayed.
    #[error("ledger {} corrupt at line {line}: {detail}", .path.display())]
    LedgerCorrupt {
        path: PathBuf,
        line: usize,
        detail: String,
    },
}

impl DeployError {
    /// True for errors raised before any remote call is made.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::CycleDetected { .. } | Self::UnknownDependency { .. }
        )
    }

    /// True for step-level failures that were recorded as `Failed` in the ledger.
    pub fn is_step_failure(&self) -> bool {
        matches!(
            self,
            Self::Binding { .. } | Self::RemoteOperationFailed { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_cycle_display_names_steps() {
        let e = DeployError::CycleDetected {
            steps: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(e.to_string(), "dependency cycle detected involving: a, b");
        assert!(e.is_resolution_error());
    }

    #[test]
    fn test_error_timeout_display() {
        let e = DeployError::Timeout {
            step: "strategy".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(e.to_string(), "step 'strategy' timed out after 30s");
        assert!(e.is_step_failure());
        assert!(!e.is_resolution_error());
    }

    #[test]
    fn test_error_prior_failed_is_not_step_failure() {
        let e = DeployError::PriorStepFailed {
            step: "x".to_string(),
            detail: "boom".to_string(),
        };
        assert!(!e.is_step_failure());
        assert!(e.to_string().contains("clear it"));
    }
}
