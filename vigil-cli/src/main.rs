//! Vigil CLI - run and inspect the vault worker supervisor

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vigil_supervisor::{
    MonitorConfig, Orchestrator, OrchestratorConfig, ProcessSupervisor, ShutdownSignal,
    StatusReporter, SupervisorConfig, VigilConfig, WorkerRegistry, listen_for_signals,
};

/// Root used when none is given on the command line
const DEFAULT_ROOT: &str = "AI_Employee_Vault";

/// File inside the logs directory receiving the supervisor's own log
const SYSTEM_LOG: &str = "system.log";

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Supervise long-running vault watcher processes", long_about = None)]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Supervisor root directory (defaults to ./AI_Employee_Vault)
    root: Option<PathBuf>,

    /// Additional configuration file merged over <root>/vigil.toml
    #[arg(short, long, env = "VIGIL_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every worker and supervise them until interrupted
    Run(RunArgs),
    /// List the configured workers without starting them
    Workers {
        #[command(flatten)]
        args: RunArgs,
        /// Print the resolved definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run(cli.run).await,
        Some(Commands::Run(args)) => run(args).await,
        Some(Commands::Workers { args, json }) => list_workers(&args, json),
        Some(Commands::Version) => {
            println!("vigil {}", env!("CARGO_PKG_VERSION"));
            println!("vigil-supervisor {}", vigil_supervisor::VERSION);
            Ok(())
        }
    }
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    let root = root.unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    if !root.is_dir() {
        bail!("Root directory not found: {}", root.display());
    }
    root.canonicalize()
        .with_context(|| format!("Failed to resolve root directory {}", root.display()))
}

fn load(args: &RunArgs) -> Result<(PathBuf, VigilConfig, WorkerRegistry)> {
    let root = resolve_root(args.root.clone())?;
    let config = VigilConfig::load(&root, args.config.as_deref())
        .context("Failed to load configuration")?;
    let registry =
        WorkerRegistry::from_config(&config, &root).context("Invalid worker definitions")?;
    Ok((root, config, registry))
}

/// Console output plus an ANSI-free copy in `<logs>/system.log`
fn init_tracing(logs_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create logs directory {}", logs_dir.display()))?;

    let log_path = logs_dir.join(SYSTEM_LOG);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();

    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let (root, config, registry) = load(&args)?;
    init_tracing(&config.logs_path(&root))?;

    info!(root = %root.display(), workers = ?registry.ids(), "Vigil supervisor initializing");

    let shutdown = ShutdownSignal::new();
    let listener =
        listen_for_signals(shutdown.clone()).context("Failed to install signal handlers")?;

    let supervisor =
        ProcessSupervisor::new(registry, SupervisorConfig::from_vigil_config(&config, &root));
    let orchestrator = Orchestrator::new(
        supervisor,
        OrchestratorConfig::from_vigil_config(&config),
        MonitorConfig::from_vigil_config(&config),
        StatusReporter::new(config.status_document_path(&root)),
        shutdown,
    );

    let summary = orchestrator.run().await;
    listener.abort();

    for (worker_id, reason) in &summary.start.failed {
        error!(worker = %worker_id, "Worker failed to start: {}", reason);
    }
    let killed = summary.force_killed();
    if !killed.is_empty() {
        warn!(workers = ?killed, "Workers force-killed after grace period");
    }
    info!(
        passes = summary.monitor.passes,
        crashes = summary.monitor.crashes_detected,
        restarts = summary.monitor.restarts,
        "All processes stopped"
    );

    Ok(())
}

fn list_workers(args: &RunArgs, json: bool) -> Result<()> {
    let (_, _, registry) = load(args)?;

    if json {
        let workers: Vec<_> = registry.iter().collect();
        println!("{}", serde_json::to_string_pretty(&workers)?);
        return Ok(());
    }

    for worker in registry.iter() {
        let mut command = vec![worker.command.clone()];
        if let Some(script) = worker.script_path() {
            command.push(script.display().to_string());
        }
        command.extend(worker.args.iter().cloned());
        println!("{:<12} {}", worker.id, worker.description);
        println!("{:<12} $ {}", "", command.join(" "));
        println!("{:<12} cwd: {}", "", worker.working_dir.display());
    }

    Ok(())
}
