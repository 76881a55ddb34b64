//! Plan preview: diff the plan against the ledger.
//!
//! Shows what the next run would do with each step without dispatching
//! anything. A recorded failure blocks itself and every step after it until
//! the operator clears it.

use super::types::*;
use crate::ledger::{hasher, Ledger};

/// Per-step actions a run would take right now.
pub fn preview(plan: &Plan, ledger: &Ledger) -> Vec<PreviewEntry> {
    let mut entries = Vec::with_capacity(plan.len());
    let mut blocked_by: Option<&str> = None;

    for step in &plan.steps {
        let outcome = ledger.get(&step.id);
        let (action, changed) = determine_action(step, outcome.as_ref(), blocked_by.is_some());
        if action == PlannedAction::Blocked && blocked_by.is_none() {
            blocked_by = Some(step.id.as_str());
        }
        let description = describe_action(step, action, outcome.as_ref(), blocked_by);
        entries.push(PreviewEntry {
            step: step.id.clone(),
            action,
            changed,
            description,
        });
    }
    entries
}

/// Count entries per action, in display order.
pub fn summarize(entries: &[PreviewEntry]) -> Vec<(PlannedAction, usize)> {
    [
        PlannedAction::Deploy,
        PlannedAction::Invoke,
        PlannedAction::Retry,
        PlannedAction::Skip,
        PlannedAction::Blocked,
    ]
    .into_iter()
    .map(|a| (a, entries.iter().filter(|e| e.action == a).count()))
    .filter(|(_, n)| *n > 0)
    .collect()
}

fn determine_action(
    step: &PlanStep,
    outcome: Option<&StepOutcome>,
    after_failure: bool,
) -> (PlannedAction, bool) {
    match outcome.map(|o| o.status) {
        Some(StepStatus::Succeeded) => {
            let current = hasher::hash_spec(&step.id, &step.spec);
            let recorded = outcome.and_then(|o| o.spec_hash.as_deref());
            (PlannedAction::Skip, recorded != Some(current.as_str()))
        }
        Some(StepStatus::Failed) => (PlannedAction::Blocked, false),
        _ if after_failure => (PlannedAction::Blocked, false),
        Some(StepStatus::InFlight) => (PlannedAction::Retry, false),
        Some(StepStatus::Pending) | None => match step.spec.kind {
            StepKind::Deploy => (PlannedAction::Deploy, false),
            StepKind::Action => (PlannedAction::Invoke, false),
        },
    }
}

fn describe_action(
    step: &PlanStep,
    action: PlannedAction,
    outcome: Option<&StepOutcome>,
    blocked_by: Option<&str>,
) -> String {
    let spec = &step.spec;
    let what = match spec.kind {
        StepKind::Deploy => format!("deploy {}", spec.contract.as_deref().unwrap_or("?")),
        StepKind::Action => format!(
            "{}.{}",
            spec.target.as_deref().unwrap_or("?"),
            spec.method.as_deref().unwrap_or("?")
        ),
    };
    match action {
        PlannedAction::Deploy | PlannedAction::Invoke => match spec.description {
            Some(ref d) => format!("{} ({})", what, d),
            None => what,
        },
        PlannedAction::Skip => match outcome.and_then(|o| o.identity.as_ref()) {
            Some(id) => format!("{} at {}", what, id),
            None => format!("{} done", what),
        },
        PlannedAction::Retry => {
            format!("{} was in flight when a run stopped; outcome unknown", what)
        }
        PlannedAction::Blocked => match (outcome.map(|o| o.status), blocked_by) {
            (Some(StepStatus::Failed), Some(first)) if first == step.id => format!(
                "{} failed: {} (clear it to retry)",
                what,
                outcome.and_then(|o| o.error.as_deref()).unwrap_or("unknown error")
            ),
            (_, Some(first)) => format!("{} waits on failed step '{}'", what, first),
            _ => what,
        },
    }
}
