//! CLI subcommands: init, validate, plan, start, resume, status, clear, export.

use crate::client::{CommandClient, ResourceClient, SimulatedClient};
use crate::core::executor::{self, CancelFlag, RunConfig};
use crate::core::{parser, planner, resolver, types};
use crate::export;
use crate::ledger::{eventlog, Ledger};
use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};

#[derive(Parser, Debug)]
#[command(
    name = "chainplan",
    version,
    about = "Dependency-ordered, resumable contract deployment campaigns"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scaffold a campaign file and state directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate campaign.yaml without contacting the network
    Validate {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,
    },

    /// Show what the next run would do with each step
    Plan {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Start a new campaign against an empty ledger
    Start {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Per-step timeout in seconds (overrides policy.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,

        /// Run against a simulated client and an in-memory ledger
        #[arg(long)]
        simulate: bool,
    },

    /// Continue a campaign from its ledger
    Resume {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Per-step timeout in seconds (overrides policy.timeout_secs)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show recorded step outcomes in plan order
    Status {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Void a failed or in-flight entry so the step runs again
    Clear {
        /// Step id to clear
        step: String,

        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Re-run the exporter from the ledger
    Export {
        /// Path to campaign.yaml
        #[arg(short, long, default_value = "campaign.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub async fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Start {
            file,
            state_dir,
            timeout,
            simulate,
        } => cmd_start(&file, &state_dir, timeout, simulate).await,
        Commands::Resume {
            file,
            state_dir,
            timeout,
        } => cmd_resume(&file, &state_dir, timeout).await,
        Commands::Status { file, state_dir } => cmd_status(&file, &state_dir),
        Commands::Clear {
            step,
            file,
            state_dir,
        } => cmd_clear(&file, &state_dir, &step),
        Commands::Export { file, state_dir } => cmd_export(&file, &state_dir),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "chainplan",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: my-campaign
description: "Managed by chainplan"

params: {}

network:
  name: localhost

client:
  command: ./scripts/bridge.sh

policy:
  timeout_secs: 300
  export_on_success: true

steps:
  token:
    kind: deploy
    contract: Token
    args: ["Example Token", "EXT"]
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("campaign.yaml");
    if config_path.exists() {
        bail!("{} already exists", config_path.display());
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("cannot create state dir {}", state_dir.display()))?;
    std::fs::write(&config_path, INIT_TEMPLATE)
        .with_context(|| format!("cannot write {}", config_path.display()))?;

    println!("Initialized chainplan campaign at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        let plan = resolver::build_plan(&config)?;
        println!(
            "OK: {} ({} steps, order: {})",
            config.name,
            plan.len(),
            plan.ids().join(" → ")
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        bail!("{} validation error(s)", errors.len())
    }
}

/// Directory that relative export paths are resolved against.
fn campaign_dir(file: &Path) -> PathBuf {
    match file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Load, validate and resolve a campaign.
fn load_plan(file: &Path) -> Result<(types::CampaignConfig, types::Plan)> {
    let config = parser::load_campaign(file)?;
    let plan = resolver::build_plan(&config)?;
    Ok((config, plan))
}

/// Open the campaign ledger if one exists on disk.
fn open_existing_ledger(state_dir: &Path, campaign: &str) -> Result<Option<Ledger>> {
    let path = eventlog::ledger_path(state_dir, campaign);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(Ledger::open(&path)?))
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<()> {
    let (config, plan) = load_plan(file)?;
    let ledger = open_existing_ledger(state_dir, &config.name)?.unwrap_or_else(Ledger::in_memory);
    let entries = planner::preview(&plan, &ledger);

    println!("Planning: {} ({} steps)", plan.campaign, plan.len());
    println!();
    for (i, entry) in entries.iter().enumerate() {
        let marker = if entry.changed { " (definition changed)" } else { "" };
        println!(
            "  {:>2}. {:<8} {}: {}{}",
            i + 1,
            entry.action,
            entry.step,
            entry.description,
            marker
        );
    }
    println!();
    let summary: Vec<String> = planner::summarize(&entries)
        .into_iter()
        .map(|(action, n)| format!("{} {}", n, action.to_string().to_lowercase()))
        .collect();
    println!("Plan: {}.", summary.join(", "));
    Ok(())
}

fn effective_timeout(config: &types::CampaignConfig, timeout: Option<u64>) -> Result<Duration> {
    let secs = timeout.unwrap_or(config.policy.timeout_secs);
    if secs == 0 {
        bail!("--timeout must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

async fn cmd_start(
    file: &Path,
    state_dir: &Path,
    timeout: Option<u64>,
    simulate: bool,
) -> Result<()> {
    let (config, plan) = load_plan(file)?;
    let timeout = effective_timeout(&config, timeout)?;

    if simulate {
        let ledger = Ledger::in_memory();
        let mut client = SimulatedClient::new();
        run_campaign(&config, &plan, &ledger, &mut client, timeout).await?;
        println!("Simulation only: no ledger written, nothing exported.");
        return Ok(());
    }

    let path = eventlog::ledger_path(state_dir, &config.name);
    let ledger = Ledger::open(&path)?;
    if !ledger.is_empty() {
        bail!(
            "ledger {} already has {} record(s); use `chainplan resume`",
            path.display(),
            ledger.record_count()
        );
    }
    let mut client = CommandClient::from_config(&config)?;
    run_campaign(&config, &plan, &ledger, &mut client, timeout).await?;
    export_after_run(&config, &ledger, file);
    Ok(())
}

async fn cmd_resume(file: &Path, state_dir: &Path, timeout: Option<u64>) -> Result<()> {
    let (config, plan) = load_plan(file)?;
    let timeout = effective_timeout(&config, timeout)?;

    let Some(ledger) = open_existing_ledger(state_dir, &config.name)? else {
        bail!(
            "no ledger for campaign '{}' under {}; use `chainplan start`",
            config.name,
            state_dir.display()
        );
    };
    let mut client = CommandClient::from_config(&config)?;
    run_campaign(&config, &plan, &ledger, &mut client, timeout).await?;
    export_after_run(&config, &ledger, file);
    Ok(())
}

/// Run the engine with Ctrl-C wired to the cancellation flag.
async fn run_campaign<C: ResourceClient + ?Sized>(
    config: &types::CampaignConfig,
    plan: &types::Plan,
    ledger: &Ledger,
    client: &mut C,
    timeout: Duration,
) -> Result<types::RunReport> {
    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current step");
            on_signal.cancel();
        }
    });

    let cfg = RunConfig {
        plan,
        params: &config.params,
        ledger,
        timeout,
        cancel,
    };
    let result = executor::run(&cfg, client).await;
    watcher.abort();

    let report = result.with_context(|| format!("campaign '{}' halted", config.name))?;
    for (step, identity) in &report.identities {
        println!("  {}: {}", step, identity);
    }
    println!();
    println!(
        "Campaign complete: {} executed, {} already done ({:.1}s).",
        report.executed.len(),
        report.skipped.len(),
        report.duration.as_secs_f64()
    );
    Ok(report)
}

/// Exporter after a successful run. Failures are reported, never fatal.
fn export_after_run(config: &types::CampaignConfig, ledger: &Ledger, file: &Path) {
    let Some(ref export_cfg) = config.export else {
        return;
    };
    if !config.policy.export_on_success {
        return;
    }
    match export::export(export_cfg, ledger, &campaign_dir(file)) {
        Ok(path) => println!("Exported identities to {}", path.display()),
        Err(e) => error!(error = %e, "export failed; deployment state is unaffected"),
    }
}

fn cmd_status(file: &Path, state_dir: &Path) -> Result<()> {
    let (config, plan) = load_plan(file)?;
    let Some(ledger) = open_existing_ledger(state_dir, &config.name)? else {
        println!("No ledger for campaign '{}'.", config.name);
        return Ok(());
    };

    println!("Campaign: {} ({} steps)", config.name, plan.len());
    if let Some(path) = ledger.path() {
        println!("  Ledger: {} ({} records)", path.display(), ledger.record_count());
    }
    for step in &plan.steps {
        match ledger.get(&step.id) {
            Some(o) => {
                let detail = match (o.identity.as_ref(), o.error.as_deref()) {
                    (Some(id), _) => format!(" {}", id),
                    (None, Some(err)) => format!(" error: {}", err),
                    (None, None) => String::new(),
                };
                println!(
                    "    {}: {} [{}]{}",
                    step.id,
                    o.status,
                    o.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
                    detail
                );
            }
            None => println!("    {}: {}", step.id, types::StepStatus::Pending),
        }
    }

    let orphans: Vec<String> = ledger
        .outcomes()
        .into_iter()
        .filter(|o| plan.position(&o.step).is_none())
        .map(|o| o.step)
        .collect();
    if !orphans.is_empty() {
        println!("  Recorded but no longer declared: {}", orphans.join(", "));
    }

    let failed = ledger
        .outcomes()
        .iter()
        .filter(|o| o.status == types::StepStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} step(s) failed; clear them before resuming", failed);
    }
    Ok(())
}

fn cmd_clear(file: &Path, state_dir: &Path, step: &str) -> Result<()> {
    let config = parser::load_campaign(file)?;
    let Some(ledger) = open_existing_ledger(state_dir, &config.name)? else {
        bail!("no ledger for campaign '{}'", config.name);
    };
    let previous = ledger.clear(step)?;
    println!("Cleared {} ({}); it will run on the next resume.", step, previous);
    Ok(())
}

fn cmd_export(file: &Path, state_dir: &Path) -> Result<()> {
    let config = parser::load_campaign(file)?;
    let Some(ref export_cfg) = config.export else {
        bail!("campaign '{}' has no export section", config.name);
    };
    let Some(ledger) = open_existing_ledger(state_dir, &config.name)? else {
        bail!("no ledger for campaign '{}'", config.name);
    };
    let path = export::export(export_cfg, &ledger, &campaign_dir(file))?;
    println!("Exported identities to {}", path.display());
    Ok(())
}
