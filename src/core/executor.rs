//! Execution engine: walks the plan one step at a time.
//!
//! For each step: consult ledger → bind → record in-flight → dispatch with
//! timeout → record terminal outcome. Succeeded steps are skipped, a failed
//! step stops the run, and a recorded failure blocks later runs until the
//! operator clears it.

use super::error::{DeployError, Result};
use super::resolver;
use super::types::*;
use crate::client::{self, ResourceClient};
use crate::ledger::{eventlog, hasher, Ledger};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interrupt flag, checked between steps only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for a run.
pub struct RunConfig<'a> {
    pub plan: &'a Plan,
    pub params: &'a IndexMap<String, serde_json::Value>,
    pub ledger: &'a Ledger,
    /// Default bound on a single remote call; steps may override it
    pub timeout: Duration,
    pub cancel: CancelFlag,
}

/// Run the plan against the ledger, resuming after any succeeded steps.
pub async fn run<C: ResourceClient + ?Sized>(
    cfg: &RunConfig<'_>,
    client: &mut C,
) -> Result<RunReport> {
    let start = Instant::now();
    let run_id = eventlog::generate_run_id();
    let campaign = cfg.plan.campaign.as_str();

    cfg.ledger.record_campaign_started(campaign, &run_id)?;
    info!(campaign, run_id = %run_id, steps = cfg.plan.len(), "campaign started");

    let mut identities = cfg.ledger.identities();
    let mut executed = Vec::new();
    let mut skipped = Vec::new();

    for step in &cfg.plan.steps {
        let spec_hash = hasher::hash_spec(&step.id, &step.spec);

        if let Some(outcome) = cfg.ledger.get(&step.id) {
            match outcome.status {
                StepStatus::Succeeded => {
                    if outcome.spec_hash.as_deref() != Some(spec_hash.as_str()) {
                        warn!(
                            step = %step.id,
                            "definition changed since this step succeeded; keeping recorded outcome"
                        );
                    }
                    debug!(
                        step = %step.id,
                        identity = ?outcome.identity,
                        "already succeeded, skipping"
                    );
                    skipped.push(step.id.clone());
                    continue;
                }
                StepStatus::Failed => {
                    let detail = outcome.error.unwrap_or_default();
                    error!(
                        step = %step.id,
                        %detail,
                        "step failed in an earlier run and was not cleared"
                    );
                    return Err(DeployError::PriorStepFailed {
                        step: step.id.clone(),
                        detail,
                    });
                }
                StepStatus::InFlight => {
                    warn!(
                        step = %step.id,
                        since = %outcome.timestamp,
                        "step was in flight when an earlier run stopped; its remote effect is unknown, dispatching again"
                    );
                }
                StepStatus::Pending => {}
            }
        }

        if cfg.cancel.is_cancelled() {
            warn!(next = %step.id, "cancellation requested, stopping between steps");
            return Err(DeployError::Cancelled {
                next: step.id.clone(),
            });
        }

        execute_step(cfg, client, step, &spec_hash, &run_id, &mut identities).await?;
        executed.push(step.id.clone());
    }

    let duration = start.elapsed();
    cfg.ledger.record_campaign_completed(
        campaign,
        &run_id,
        count(&executed),
        count(&skipped),
        duration.as_secs_f64(),
    )?;
    info!(
        campaign,
        executed = executed.len(),
        skipped = skipped.len(),
        seconds = duration.as_secs_f64(),
        "campaign completed"
    );

    let identities = cfg
        .plan
        .steps
        .iter()
        .filter_map(|s| identities.get(&s.id).map(|i| (s.id.clone(), i.clone())))
        .collect();

    Ok(RunReport {
        run_id,
        executed,
        skipped,
        identities,
        duration,
    })
}

fn count(ids: &[String]) -> u32 {
    u32::try_from(ids.len()).unwrap_or(u32::MAX)
}

/// Timeout for one step: its own override or the run default.
pub fn step_timeout(spec: &StepSpec, default: Duration) -> Duration {
    spec.timeout_secs.map(Duration::from_secs).unwrap_or(default)
}

/// Dispatch a single step and record its terminal outcome.
async fn execute_step<C: ResourceClient + ?Sized>(
    cfg: &RunConfig<'_>,
    client: &mut C,
    step: &PlanStep,
    spec_hash: &str,
    run_id: &str,
    identities: &mut IndexMap<String, Identity>,
) -> Result<()> {
    cfg.ledger.record_in_flight(&step.id, run_id, spec_hash)?;
    info!(step = %step.id, kind = %step.spec.kind, "dispatching");

    let step_start = Instant::now();
    let result = dispatch_bound(cfg, client, step, identities).await;
    let duration_seconds = step_start.elapsed().as_secs_f64();

    match result {
        Ok(identity) => {
            cfg.ledger.record_terminal(
                &step.id,
                run_id,
                spec_hash,
                TerminalOutcome::Succeeded {
                    identity: identity.clone(),
                    duration_seconds,
                },
            )?;
            match identity {
                Some(id) => {
                    info!(step = %step.id, identity = %id, seconds = duration_seconds, "succeeded");
                    identities.insert(step.id.clone(), id);
                }
                None => info!(step = %step.id, seconds = duration_seconds, "succeeded"),
            }
            Ok(())
        }
        Err(e) => {
            cfg.ledger.record_terminal(
                &step.id,
                run_id,
                spec_hash,
                TerminalOutcome::Failed {
                    error: e.to_string(),
                },
            )?;
            error!(step = %step.id, error = %e, "step failed, halting campaign");
            Err(e)
        }
    }
}

/// Bind arguments from known identities, then call the client under timeout.
async fn dispatch_bound<C: ResourceClient + ?Sized>(
    cfg: &RunConfig<'_>,
    client: &mut C,
    step: &PlanStep,
    identities: &IndexMap<String, Identity>,
) -> Result<Option<Identity>> {
    let call = resolver::bind_step(step, cfg.params, identities)?;
    debug!(step = %step.id, call = ?call, "bound");

    let timeout = step_timeout(&step.spec, cfg.timeout);
    let identity = match tokio::time::timeout(timeout, client::dispatch(client, &call)).await {
        Ok(Ok(identity)) => identity,
        Ok(Err(e)) => {
            return Err(DeployError::RemoteOperationFailed {
                step: step.id.clone(),
                detail: e.to_string(),
            })
        }
        Err(_) => {
            return Err(DeployError::Timeout {
                step: step.id.clone(),
                after: timeout,
            })
        }
    };

    match (step.spec.kind, identity) {
        (StepKind::Deploy, None) => Err(DeployError::RemoteOperationFailed {
            step: step.id.clone(),
            detail: "deploy returned no identity".to_string(),
        }),
        (StepKind::Deploy, some) => Ok(some),
        (StepKind::Action, _) => Ok(None),
    }
}
