//! Courier - deploy one build artifact to many targets.
//!
//! ## Commands
//!
//! - `deploy`: pack the sources and upload them to every target the trigger selects
//! - `plan`: show which targets a trigger selects, level by level
//! - `pack`: write the deterministic archive to a file and print its hash

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info, warn};

use courier_core::archive::{Archiver, collect_sources};
use courier_core::domain::{RunReport, TargetOutcome, TriggerContext};
use courier_core::impls::LocalObjectStore;
use courier_core::plan::{ResolveError, TargetResolver};
use courier_core::ports::SystemClock;
use courier_core::telemetry::init_tracing;
use courier_core::{CancelHandle, DeployConfig, OrchestratorBuilder};

#[derive(Parser)]
#[command(name = "courier")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic multi-target deployment orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON (log lines on stderr, report on stdout)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack the sources and deploy them to the selected targets
    Deploy {
        #[command(flatten)]
        trigger: TriggerArgs,

        /// Directory standing in for object storage (`<root>/<bucket>/<key>`)
        #[arg(long, env = "COURIER_STORE_ROOT", default_value = ".courier/buckets")]
        store_root: PathBuf,

        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the targets a trigger would deploy, in dependency levels
    Plan {
        #[command(flatten)]
        trigger: TriggerArgs,
    },

    /// Write the archive of the configured sources to a file
    Pack {
        /// Configuration file
        #[arg(short, long, default_value = "courier.toml")]
        config: PathBuf,

        /// Output path for the archive
        #[arg(short, long, default_value = "site.tar.gz")]
        output: PathBuf,
    },
}

#[derive(clap::Args)]
struct TriggerArgs {
    /// Configuration file
    #[arg(short, long, default_value = "courier.toml")]
    config: PathBuf,

    /// Branch that triggered the deployment
    #[arg(short, long, env = "COURIER_BRANCH")]
    branch: String,

    /// Commit being deployed
    #[arg(long, env = "COURIER_COMMIT", default_value = "unknown")]
    commit: String,

    /// Select targets by environment label instead of branch pattern
    #[arg(short, long)]
    environment: Option<String>,
}

impl TriggerArgs {
    fn trigger(&self) -> TriggerContext {
        let trigger = TriggerContext::new(self.branch.clone(), self.commit.clone());
        match &self.environment {
            Some(env) => trigger.with_environment(env.clone()),
            None => trigger,
        }
    }
}

fn load_config(path: &Path) -> Result<DeployConfig> {
    DeployConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let code = match cli.command {
        Commands::Deploy {
            trigger,
            store_root,
            timeout_secs,
        } => deploy(&trigger, &store_root, timeout_secs, cli.json).await?,
        Commands::Plan { trigger } => plan(&trigger, cli.json)?,
        Commands::Pack { config, output } => pack(&config, &output, cli.json)?,
    };

    std::process::exit(code);
}

async fn deploy(
    args: &TriggerArgs,
    store_root: &Path,
    timeout_secs: Option<u64>,
    json: bool,
) -> Result<i32> {
    let config = load_config(&args.config)?;
    let orchestrator = OrchestratorBuilder::from_config(&config)
        .store(Arc::new(LocalObjectStore::new(store_root)))
        .build()
        .context("invalid deployment configuration")?;

    let (handle, signal) = CancelHandle::new();
    let handle = Arc::new(handle);

    tokio::spawn({
        let handle = handle.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                handle.cancel();
            }
        }
    });
    if let Some(secs) = timeout_secs {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "timeout reached, cancelling run");
            handle.cancel();
        });
    }

    let report = orchestrator
        .run_from_dir(
            args.trigger(),
            &config.source.root,
            &config.source.include,
            &signal,
        )
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    println!("run      {}", report.run_id);
    println!("branch   {} @ {}", report.branch, report.commit_sha);
    if let Some(hash) = &report.artifact_hash {
        println!("artifact {}", hash.short());
    }
    println!("state    {:?}", report.state);
    if let Some(failure) = &report.failure {
        println!("error    {}", failure.message);
    }
    if report.targets.is_empty() {
        return;
    }

    println!();
    println!("{:<20} {:<10} {:>8}  DETAIL", "TARGET", "OUTCOME", "ATTEMPTS");
    for t in &report.targets {
        let detail = match (&t.outcome, &t.error) {
            (TargetOutcome::Blocked, _) => format!("blocked by {}", t.blocked_by.join(", ")),
            (TargetOutcome::Succeeded, _) if t.already_present => "already present".to_string(),
            (TargetOutcome::Succeeded, _) => t.destination.to_string(),
            (_, Some(e)) => e.to_string(),
            (_, None) => String::new(),
        };
        println!(
            "{:<20} {:<10} {:>8}  {}",
            t.name,
            format!("{:?}", t.outcome).to_lowercase(),
            t.attempts,
            detail
        );
    }
}

fn plan(args: &TriggerArgs, json: bool) -> Result<i32> {
    let config = load_config(&args.config)?;
    let resolver = TargetResolver::new(config.targets.clone())?;
    let trigger = args.trigger();

    let plan = match resolver.resolve_plan(&trigger) {
        Ok(plan) => plan,
        Err(e @ ResolveError::NoTargetsMatched { .. }) => {
            if config.settings.strict {
                bail!(e);
            }
            info!(reason = %e, "nothing to deploy");
            if json {
                println!("[]");
            } else {
                println!("no targets selected");
            }
            return Ok(0);
        }
        Err(e) => return Err(e).context("cannot resolve targets"),
    };

    if json {
        let levels: Vec<Vec<&str>> = plan
            .levels()
            .iter()
            .map(|level| level.iter().map(|t| t.name.as_str()).collect())
            .collect();
        println!("{}", serde_json::to_string_pretty(&levels)?);
    } else {
        for (depth, level) in plan.levels().iter().enumerate() {
            for t in level {
                println!("{depth}  {:<20} {}", t.name, t.destination);
            }
        }
        for dep in plan.unselected() {
            println!("-  {dep:<20} not selected, dependents will be blocked");
        }
    }
    Ok(0)
}

fn pack(config_path: &Path, output: &Path, json: bool) -> Result<i32> {
    let config = load_config(config_path)?;
    let files = collect_sources(&config.source.root, &config.source.include)?;
    let artifact = Archiver::new(Arc::new(SystemClock)).pack(&files)?;

    std::fs::write(output, artifact.content())
        .with_context(|| format!("failed to write {}", output.display()))?;

    if json {
        let summary = serde_json::json!({
            "output": output.display().to_string(),
            "content_hash": artifact.content_hash(),
            "size": artifact.len(),
            "entries": artifact.entries(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}  {}", artifact.content_hash(), output.display());
        println!("{} files, {} bytes", artifact.entries().len(), artifact.len());
    }
    Ok(0)
}
