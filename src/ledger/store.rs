//! Ledger: current step outcomes rebuilt from the JSONL log.
//!
//! Every mutation is checked against the in-memory view, appended and synced
//! to disk, and only then applied in memory, all under one lock. A rejected
//! call therefore changes neither the file nor the view.

use super::eventlog;
use chrono::Utc;
use crate::core::error::{DeployError, Result};
use crate::core::types::*;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Default)]
struct LedgerState {
    outcomes: IndexMap<String, StepOutcome>,
    records: usize,
}

impl LedgerState {
    /// Reject a record that would break the one-terminal-entry invariant.
    fn check(&self, event: &LedgerEvent) -> std::result::Result<(), DeployError> {
        match event {
            LedgerEvent::CampaignStarted { .. } | LedgerEvent::CampaignCompleted { .. } => Ok(()),
            LedgerEvent::StepInFlight { step, .. }
            | LedgerEvent::StepSucceeded { step, .. }
            | LedgerEvent::StepFailed { step, .. } => self.reject_terminal(step),
            LedgerEvent::StepCleared { step, .. } => self.check_clearable(step).map(|_| ()),
        }
    }

    /// Apply one record to the view.
    fn apply(&mut self, record: &LedgerRecord) -> std::result::Result<(), DeployError> {
        self.check(&record.event)?;
        let ts = record.ts;
        match &record.event {
            LedgerEvent::CampaignStarted { .. } | LedgerEvent::CampaignCompleted { .. } => {}
            LedgerEvent::StepInFlight {
                step, spec_hash, ..
            } => {
                self.outcomes.insert(
                    step.clone(),
                    StepOutcome {
                        step: step.clone(),
                        status: StepStatus::InFlight,
                        identity: None,
                        error: None,
                        timestamp: ts,
                        spec_hash: Some(spec_hash.clone()),
                    },
                );
            }
            LedgerEvent::StepSucceeded {
                step,
                identity,
                spec_hash,
                ..
            } => {
                self.outcomes.insert(
                    step.clone(),
                    StepOutcome {
                        step: step.clone(),
                        status: StepStatus::Succeeded,
                        identity: identity.clone(),
                        error: None,
                        timestamp: ts,
                        spec_hash: Some(spec_hash.clone()),
                    },
                );
            }
            LedgerEvent::StepFailed {
                step,
                spec_hash,
                error,
                ..
            } => {
                self.outcomes.insert(
                    step.clone(),
                    StepOutcome {
                        step: step.clone(),
                        status: StepStatus::Failed,
                        identity: None,
                        error: Some(error.clone()),
                        timestamp: ts,
                        spec_hash: Some(spec_hash.clone()),
                    },
                );
            }
            LedgerEvent::StepCleared { step, .. } => {
                self.outcomes.shift_remove(step);
            }
        }
        self.records += 1;
        Ok(())
    }

    fn reject_terminal(&self, step: &str) -> std::result::Result<(), DeployError> {
        match self.outcomes.get(step) {
            Some(existing) if existing.status.is_terminal() => Err(DeployError::DuplicateTerminal {
                step: step.to_string(),
                existing: existing.status.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn check_clearable(&self, step: &str) -> std::result::Result<StepStatus, DeployError> {
        match self.outcomes.get(step).map(|o| o.status) {
            Some(status @ (StepStatus::Failed | StepStatus::InFlight)) => Ok(status),
            Some(StepStatus::Succeeded) => Err(DeployError::NotCleared {
                step: step.to_string(),
                reason: "succeeded steps keep their identity".to_string(),
            }),
            Some(StepStatus::Pending) | None => Err(DeployError::NotCleared {
                step: step.to_string(),
                reason: "no ledger entry".to_string(),
            }),
        }
    }
}

/// Durable record of step outcomes; the source of truth for resume.
#[derive(Debug)]
pub struct Ledger {
    path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl Ledger {
    /// Open a ledger file, replaying it if it exists.
    pub fn open(path: &Path) -> Result<Self> {
        let mut state = LedgerState::default();
        if path.exists() {
            let log = eventlog::read_records(path)?;
            for (line, record) in &log.records {
                state
                    .apply(record)
                    .map_err(|e| DeployError::LedgerCorrupt {
                        path: path.to_path_buf(),
                        line: *line,
                        detail: e.to_string(),
                    })?;
            }
            if let Some(len) = log.torn_at {
                warn!(
                    ledger = %path.display(),
                    "dropping torn final ledger record left by an interrupted write"
                );
                eventlog::truncate_torn(path, len)?;
            }
            if log.unterminated {
                warn!(
                    ledger = %path.display(),
                    "completing final ledger record whose newline was lost"
                );
                eventlog::terminate_line(path)?;
            }
        }
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    /// A ledger that lives only for this process (simulations and tests).
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, event: LedgerEvent) -> Result<()> {
        self.commit_record(eventlog::stamp(event))
    }

    /// Check, persist, then apply. The lock is held across all three.
    fn commit_record(&self, record: LedgerRecord) -> Result<()> {
        let mut state = self.lock();
        state.check(&record.event)?;
        if let Some(ref path) = self.path {
            eventlog::append_record(path, &record)?;
        }
        state.apply(&record)
    }

    /// Current outcome for a step; `None` means pending.
    pub fn get(&self, step: &str) -> Option<StepOutcome> {
        self.lock().outcomes.get(step).cloned()
    }

    /// All recorded outcomes in first-seen order.
    pub fn outcomes(&self) -> Vec<StepOutcome> {
        self.lock().outcomes.values().cloned().collect()
    }

    /// Identities of every succeeded deploy step.
    pub fn identities(&self) -> IndexMap<String, Identity> {
        self.lock()
            .outcomes
            .iter()
            .filter(|(_, o)| o.status == StepStatus::Succeeded)
            .filter_map(|(id, o)| o.identity.clone().map(|i| (id.clone(), i)))
            .collect()
    }

    /// True when no record has ever been written.
    pub fn is_empty(&self) -> bool {
        self.lock().records == 0
    }

    /// Number of records replayed or written.
    pub fn record_count(&self) -> usize {
        self.lock().records
    }

    pub fn record_campaign_started(&self, campaign: &str, run_id: &str) -> Result<()> {
        self.commit(LedgerEvent::CampaignStarted {
            campaign: campaign.to_string(),
            run_id: run_id.to_string(),
            chainplan_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    pub fn record_campaign_completed(
        &self,
        campaign: &str,
        run_id: &str,
        steps_executed: u32,
        steps_skipped: u32,
        total_seconds: f64,
    ) -> Result<()> {
        self.commit(LedgerEvent::CampaignCompleted {
            campaign: campaign.to_string(),
            run_id: run_id.to_string(),
            steps_executed,
            steps_skipped,
            total_seconds,
        })
    }

    /// Mark a step as dispatched.
    pub fn record_in_flight(&self, step: &str, run_id: &str, spec_hash: &str) -> Result<()> {
        self.commit(LedgerEvent::StepInFlight {
            step: step.to_string(),
            run_id: run_id.to_string(),
            spec_hash: spec_hash.to_string(),
        })
    }

    /// Record the single terminal outcome of a step.
    /// Fails with `DuplicateTerminal` if one already exists.
    pub fn record_terminal(
        &self,
        step: &str,
        run_id: &str,
        spec_hash: &str,
        outcome: TerminalOutcome,
    ) -> Result<StepOutcome> {
        let ts = Utc::now();
        let (event, view) = match outcome {
            TerminalOutcome::Succeeded {
                identity,
                duration_seconds,
            } => (
                LedgerEvent::StepSucceeded {
                    step: step.to_string(),
                    run_id: run_id.to_string(),
                    identity: identity.clone(),
                    spec_hash: spec_hash.to_string(),
                    duration_seconds,
                },
                StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Succeeded,
                    identity,
                    error: None,
                    timestamp: ts,
                    spec_hash: Some(spec_hash.to_string()),
                },
            ),
            TerminalOutcome::Failed { error } => (
                LedgerEvent::StepFailed {
                    step: step.to_string(),
                    run_id: run_id.to_string(),
                    spec_hash: spec_hash.to_string(),
                    error: error.clone(),
                },
                StepOutcome {
                    step: step.to_string(),
                    status: StepStatus::Failed,
                    identity: None,
                    error: Some(error),
                    timestamp: ts,
                    spec_hash: Some(spec_hash.to_string()),
                },
            ),
        };
        self.commit_record(LedgerRecord { ts, event })?;
        Ok(view)
    }

    /// Void a failed or dangling in-flight entry so the step runs again.
    /// Returns the status that was cleared.
    pub fn clear(&self, step: &str) -> Result<StepStatus> {
        let previous = self.lock().check_clearable(step)?;
        self.commit(LedgerEvent::StepCleared {
            step: step.to_string(),
            previous,
        })?;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::eventlog::ledger_path;

    fn succeeded(identity: &str) -> TerminalOutcome {
        TerminalOutcome::Succeeded {
            identity: Some(Identity::new(identity)),
            duration_seconds: 0.2,
        }
    }

    #[test]
    fn test_store_pending_is_absent() {
        let ledger = Ledger::in_memory();
        assert!(ledger.get("token").is_none());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_store_in_flight_then_success() {
        let ledger = Ledger::in_memory();
        ledger.record_in_flight("token", "r-1", "blake3:a").unwrap();
        assert_eq!(ledger.get("token").unwrap().status, StepStatus::InFlight);

        let out = ledger
            .record_terminal("token", "r-1", "blake3:a", succeeded("0xT"))
            .unwrap();
        assert_eq!(out.status, StepStatus::Succeeded);
        assert_eq!(out.identity, Some(Identity::new("0xT")));
        assert!(out.error.is_none());
        assert_eq!(ledger.identities()["token"], Identity::new("0xT"));
    }

    #[test]
    fn test_store_duplicate_terminal_rejected_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        let ledger = Ledger::open(&path).unwrap();
        ledger
            .record_terminal("token", "r-1", "blake3:a", succeeded("0xT"))
            .unwrap();
        let before_file = std::fs::read_to_string(&path).unwrap();
        let before = ledger.get("token").unwrap();

        let err = ledger
            .record_terminal("token", "r-2", "blake3:a", succeeded("0xOTHER"))
            .unwrap_err();
        assert!(matches!(err, DeployError::DuplicateTerminal { .. }));
        assert_eq!(ledger.get("token").unwrap(), before);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before_file);

        let err = ledger
            .record_terminal(
                "token",
                "r-2",
                "blake3:a",
                TerminalOutcome::Failed { error: "x".into() },
            )
            .unwrap_err();
        assert!(matches!(err, DeployError::DuplicateTerminal { .. }));
    }

    #[test]
    fn test_store_in_flight_after_terminal_rejected() {
        let ledger = Ledger::in_memory();
        ledger.record_terminal("a", "r", "h", succeeded("0x1")).unwrap();
        assert!(matches!(
            ledger.record_in_flight("a", "r", "h"),
            Err(DeployError::DuplicateTerminal { .. })
        ));
    }

    #[test]
    fn test_store_failure_keeps_spec_hash() {
        let ledger = Ledger::in_memory();
        ledger.record_in_flight("s", "r", "blake3:s").unwrap();
        let out = ledger
            .record_terminal(
                "s",
                "r",
                "blake3:s",
                TerminalOutcome::Failed {
                    error: "revert".into(),
                },
            )
            .unwrap();
        assert_eq!(out.status, StepStatus::Failed);
        assert_eq!(out.error.as_deref(), Some("revert"));
        assert_eq!(out.spec_hash.as_deref(), Some("blake3:s"));
        assert!(out.identity.is_none());
    }

    #[test]
    fn test_store_replay_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.record_campaign_started("c", "r-1").unwrap();
            ledger.record_in_flight("token", "r-1", "h1").unwrap();
            ledger
                .record_terminal("token", "r-1", "h1", succeeded("0xT"))
                .unwrap();
            ledger.record_in_flight("oracle", "r-1", "h2").unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.record_count(), 4);
        assert_eq!(ledger.get("token").unwrap().status, StepStatus::Succeeded);
        assert_eq!(ledger.get("oracle").unwrap().status, StepStatus::InFlight);
        assert_eq!(ledger.identities().len(), 1);
        let order: Vec<_> = ledger.outcomes().into_iter().map(|o| o.step).collect();
        assert_eq!(order, vec!["token", "oracle"]);
    }

    #[test]
    fn test_store_terminal_outcome_matches_view() {
        let ledger = Ledger::in_memory();
        ledger.record_in_flight("s", "r", "h").unwrap();
        let out = ledger
            .record_terminal(
                "s",
                "r",
                "h",
                TerminalOutcome::Failed {
                    error: "revert".into(),
                },
            )
            .unwrap();
        assert_eq!(ledger.get("s").unwrap(), out);
    }

    #[test]
    fn test_store_lost_newline_is_repaired_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        let record = eventlog::stamp(LedgerEvent::StepSucceeded {
            step: "token".to_string(),
            run_id: "r-1".to_string(),
            identity: Some(Identity::new("0xT")),
            spec_hash: "h".to_string(),
            duration_seconds: 0.1,
        });
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&record).unwrap()).unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.get("token").unwrap().status, StepStatus::Succeeded);
        ledger.record_in_flight("oracle", "r-2", "h2").unwrap();
        drop(ledger);

        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.record_count(), 2);
        assert_eq!(reopened.identities()["token"], Identity::new("0xT"));
        assert_eq!(reopened.get("oracle").unwrap().status, StepStatus::InFlight);
    }

    #[test]
    fn test_store_torn_multibyte_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.record_terminal("a", "r", "h", succeeded("0x1")).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"{\"ts\":\"2026\",\"error\":\"caf\xC3");
        std::fs::write(&path, &bytes).unwrap();

        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.record_count(), 1);
        ledger.record_in_flight("b", "r", "h").unwrap();
        drop(ledger);
        assert_eq!(Ledger::open(&path).unwrap().record_count(), 2);
    }

    #[test]
    fn test_store_replay_duplicate_terminal_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        for identity in ["0x1", "0x2"] {
            eventlog::append_record(
                &path,
                &eventlog::stamp(LedgerEvent::StepSucceeded {
                    step: "a".to_string(),
                    run_id: "r".to_string(),
                    identity: Some(Identity::new(identity)),
                    spec_hash: "h".to_string(),
                    duration_seconds: 0.0,
                }),
            )
            .unwrap();
        }
        match Ledger::open(&path).unwrap_err() {
            DeployError::LedgerCorrupt { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_store_clear_failed_then_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let path = ledger_path(dir.path(), "c");
        let ledger = Ledger::open(&path).unwrap();
        ledger.record_in_flight("s", "r-1", "h").unwrap();
        ledger
            .record_terminal(
                "s",
                "r-1",
                "h",
                TerminalOutcome::Failed {
                    error: "boom".into(),
                },
            )
            .unwrap();
        assert_eq!(ledger.clear("s").unwrap(), StepStatus::Failed);
        assert!(ledger.get("s").is_none());

        ledger.record_in_flight("s", "r-2", "h").unwrap();
        ledger.record_terminal("s", "r-2", "h", succeeded("0xS")).unwrap();

        let reopened = Ledger::open(&path).unwrap();
        assert_eq!(reopened.get("s").unwrap().identity, Some(Identity::new("0xS")));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("step_failed"));
        assert!(content.contains("step_cleared"));
    }

    #[test]
    fn test_store_clear_refuses_succeeded_and_unknown() {
        let ledger = Ledger::in_memory();
        ledger.record_terminal("a", "r", "h", succeeded("0x1")).unwrap();
        assert!(matches!(ledger.clear("a"), Err(DeployError::NotCleared { .. })));
        assert!(matches!(ledger.clear("zz"), Err(DeployError::NotCleared { .. })));
        assert_eq!(ledger.record_count(), 1);
    }

    #[test]
    fn test_store_clear_in_flight() {
        let ledger = Ledger::in_memory();
        ledger.record_in_flight("a", "r", "h").unwrap();
        assert_eq!(ledger.clear("a").unwrap(), StepStatus::InFlight);
        assert!(ledger.get("a").is_none());
    }

    #[test]
    fn test_store_concurrent_terminal_single_winner() {
        let ledger = std::sync::Arc::new(Ledger::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = std::sync::Arc::clone(&ledger);
                std::thread::spawn(move || {
                    ledger
                        .record_terminal("a", "r", "h", succeeded(&format!("0x{}", i)))
                        .is_ok()
                })
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(ledger.record_count(), 1);
    }
}
