//! Campaign, step, ledger, and plan types.
//!
//! Defines the YAML schema for campaign files, the step outcome model kept in
//! the ledger, and the JSONL ledger records. All persisted types derive
//! Serialize/Deserialize.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// Top-level campaign.yaml
// ============================================================================

/// Root configuration: one canonical step graph per campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Campaign name; also names the ledger directory
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Literal values available to `{{params.KEY}}` templates
    #[serde(default)]
    pub params: IndexMap<String, serde_json::Value>,

    /// Network selection handed to the resource client
    #[serde(default)]
    pub network: Option<NetworkConfig>,

    /// How to reach the resource client
    #[serde(default)]
    pub client: ClientConfig,

    /// Step declarations (order-preserving; order breaks resolver ties)
    pub steps: IndexMap<String, StepSpec>,

    /// Identities to publish after a successful campaign
    #[serde(default)]
    pub export: Option<ExportConfig>,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

/// Network the client deploys to. Names secrets, never holds them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name understood by the bridge program
    pub name: String,

    /// Environment variable that holds the RPC endpoint
    #[serde(default)]
    pub rpc_url_env: Option<String>,

    /// Expected chain id
    #[serde(default)]
    pub chain_id: Option<u64>,
}

/// External bridge program used by the command client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Program to run for each deploy/invoke call
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments passed before the request
    #[serde(default)]
    pub args: Vec<String>,

    /// Non-secret environment for the bridge program
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

// ============================================================================
// Steps
// ============================================================================

/// A single deployment or post-deploy action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Deploy a resource or invoke a method on one
    pub kind: StepKind,

    /// Steps whose terminal success must be recorded first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Contract (artifact) name for deploy steps
    #[serde(default)]
    pub contract: Option<String>,

    /// Step whose identity receives the call (action steps)
    #[serde(default)]
    pub target: Option<String>,

    /// Method invoked on the target (action steps)
    #[serde(default)]
    pub method: Option<String>,

    /// Argument templates, bound just before dispatch
    #[serde(default)]
    pub args: Vec<serde_json::Value>,

    /// Per-step timeout override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Human-readable note shown by `plan`
    #[serde(default)]
    pub description: Option<String>,
}

/// Step kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Deploy,
    Action,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => write!(f, "deploy"),
            Self::Action => write!(f, "action"),
        }
    }
}

// ============================================================================
// Policy / export
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Default timeout for a single remote call
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Run the exporter after a fully successful campaign
    #[serde(default = "default_true")]
    pub export_on_success: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            export_on_success: true,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Where and how produced identities are published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output file
    pub path: String,

    /// Output format
    #[serde(default)]
    pub format: ExportFormat,

    /// Export key → deploy step id
    pub identities: IndexMap<String, String>,
}

/// Export file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    #[default]
    Typescript,
    Env,
    Json,
}

// ============================================================================
// Identities and outcomes
// ============================================================================

/// Opaque handle produced by a successful deploy (e.g. a contract address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Step lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::InFlight => write!(f, "IN-FLIGHT"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Current ledger view of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub step: String,
    pub status: StepStatus,
    /// Present iff succeeded and the step is a deploy
    pub identity: Option<Identity>,
    /// Present iff failed
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// BLAKE3 digest of the step definition that produced this outcome
    pub spec_hash: Option<String>,
}

/// Terminal result handed to `Ledger::record_terminal`.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Succeeded {
        identity: Option<Identity>,
        duration_seconds: f64,
    },
    Failed {
        error: String,
    },
}

/// Concrete call produced by binding a step's templates.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundCall {
    Deploy {
        contract: String,
        args: Vec<serde_json::Value>,
    },
    Invoke {
        target: Identity,
        method: String,
        args: Vec<serde_json::Value>,
    },
}

// ============================================================================
// Plan
// ============================================================================

/// One step in resolved order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub id: String,
    pub spec: StepSpec,
}

/// Steps in an order where every dependency precedes its dependents.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub campaign: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Step ids in execution order.
    pub fn ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Position of a step in the plan.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// What a run would do with a step, given the current ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Deploy,
    Invoke,
    Skip,
    Retry,
    Blocked,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => write!(f, "DEPLOY"),
            Self::Invoke => write!(f, "INVOKE"),
            Self::Skip => write!(f, "SKIP"),
            Self::Retry => write!(f, "RETRY"),
            Self::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// One line of a plan preview.
#[derive(Debug, Clone)]
pub struct PreviewEntry {
    pub step: String,
    pub action: PlannedAction,
    /// Succeeded earlier under a different definition
    pub changed: bool,
    pub description: String,
}

// ============================================================================
// Ledger records
// ============================================================================

/// Record in the append-only JSONL ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    CampaignStarted {
        campaign: String,
        run_id: String,
        chainplan_version: String,
    },
    StepInFlight {
        step: String,
        run_id: String,
        spec_hash: String,
    },
    StepSucceeded {
        step: String,
        run_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        identity: Option<Identity>,
        spec_hash: String,
        duration_seconds: f64,
    },
    StepFailed {
        step: String,
        run_id: String,
        spec_hash: String,
        error: String,
    },
    StepCleared {
        step: String,
        previous: StepStatus,
    },
    CampaignCompleted {
        campaign: String,
        run_id: String,
        steps_executed: u32,
        steps_skipped: u32,
        total_seconds: f64,
    },
}

/// Timestamped ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

// ============================================================================
// Run result
// ============================================================================

/// Result of one engine run that reached the end of the plan.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    /// Every identity known at the end of the run, in plan order
    pub identities: IndexMap<String, Identity>,
    pub duration: Duration,
}

// ============================================================================
// Tests
// ============================================================================
