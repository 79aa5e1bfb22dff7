use anyhow::{bail, Context};
use cadence::app::{build_controller, handle_fatal_error, init_logging};
use cadence::config::{CadenceConfig, ConfigLoader};
use cadence::console::{self, StatsReporter};
use cadence::controller::{RunPlan, RunState};
use cadence::model::{ActionKind, Target};
use cadence::signal_handler::setup_interrupt_handlers;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Cycle engagement actions across service channels
#[derive(Parser)]
#[command(name = "cadence", version)]
#[command(about = "Cycle bounded, retrying actions across rate-limited service channels", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run and keep cycling until stopped or the cycle limit is hit
    Run {
        #[arg(long, value_enum)]
        mode: Mode,

        /// Action kinds by name or menu number; comma-separated or repeated
        #[arg(short, long)]
        kind: Vec<String>,

        /// File with one content reference per line (stdin when absent)
        #[arg(long)]
        targets: Option<PathBuf>,

        /// File with one account handle per line (stdin when absent)
        #[arg(long)]
        accounts: Option<PathBuf>,

        /// Stop after this many full passes over the targets
        #[arg(long)]
        cycles: Option<u32>,

        /// Replace every channel with a simulated one
        #[arg(long)]
        dry_run: bool,

        /// Emit statistics and the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List configured channels and the kinds they serve
    Channels,
    /// Load and validate the configuration
    CheckConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Content,
    Accounts,
    Combined,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = match cli.command {
        Commands::Run {
            mode,
            kind,
            targets,
            accounts,
            cycles,
            dry_run,
            json,
        } => {
            run(RunArgs {
                config: cli.config,
                verbose,
                mode,
                kinds: kind,
                targets,
                accounts,
                cycles,
                dry_run,
                json,
            })
            .await
        }
        Commands::Channels => list_channels(cli.config, verbose).await,
        Commands::CheckConfig => check_config(cli.config, verbose).await,
    };

    if let Err(e) = result {
        handle_fatal_error(e, verbose);
    }
}

async fn load_config(path: Option<PathBuf>, verbose: u8) -> anyhow::Result<CadenceConfig> {
    let loaded = ConfigLoader::new(path).load().await;
    let configured = loaded.as_ref().ok().and_then(|c| c.log_level.clone());
    init_logging(verbose, configured.as_deref());
    Ok(loaded?)
}

struct RunArgs {
    config: Option<PathBuf>,
    verbose: u8,
    mode: Mode,
    kinds: Vec<String>,
    targets: Option<PathBuf>,
    accounts: Option<PathBuf>,
    cycles: Option<u32>,
    dry_run: bool,
    json: bool,
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config, args.verbose).await?;
    if let Some(cycles) = args.cycles {
        config.run.max_cycles = Some(cycles);
    }

    let plan = match args.mode {
        Mode::Content => {
            let kinds = select_kinds(&args.kinds)?;
            let [kind] = kinds.as_slice() else {
                bail!("content mode takes exactly one --kind");
            };
            RunPlan::content(*kind, content_targets(args.targets.as_deref())?)
        }
        Mode::Accounts => RunPlan::accounts(account_targets(args.accounts.as_deref())?),
        Mode::Combined => {
            let kinds = select_kinds(&args.kinds)?;
            let content = if kinds.iter().any(|k| !k.is_account_kind()) {
                content_targets(args.targets.as_deref())?
            } else {
                Vec::new()
            };
            let accounts = if kinds.iter().any(|k| k.is_account_kind()) {
                account_targets(args.accounts.as_deref())?
            } else {
                Vec::new()
            };
            RunPlan::combined(kinds, content, accounts)
        }
    };

    let stats_interval = config.run.stats_interval;
    let controller = Arc::new(build_controller(&config, args.dry_run)?);
    let run_id = controller.start(plan).await?;
    info!("Run {} started", run_id);

    let stop = controller.stop_signal();
    setup_interrupt_handlers(stop.clone())?;

    let reporter = {
        let controller = controller.clone();
        let stop = stop.clone();
        tokio::spawn(
            StatsReporter::new(stats_interval, args.json)
                .run(move || controller.snapshot(), stop),
        )
    };

    let mut states = controller.subscribe();
    tokio::select! {
        _ = stop.stopped() => {
            if let Err(e) = controller.stop().await {
                warn!("Stop did not complete cleanly: {}", e);
                println!("{}", controller.snapshot());
                return Err(e.into());
            }
        }
        _ = states.wait_for(|s| *s == RunState::Stopped) => {}
    }

    let summary = controller.wait().await.context("run did not finish")?;
    stop.trigger();
    let _ = reporter.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", console::render_summary(&summary));
    }
    Ok(())
}

fn select_kinds(given: &[String]) -> anyhow::Result<Vec<ActionKind>> {
    if !given.is_empty() {
        return Ok(console::parse_kinds(given)?);
    }
    prompt("Select action kinds (names or numbers, blank line to finish):");
    eprintln!("{}", console::kind_menu());
    let items = console::read_list(io::stdin().lock())?;
    Ok(console::parse_kinds(&items)?)
}

fn content_targets(path: Option<&Path>) -> anyhow::Result<Vec<Target>> {
    match path {
        Some(path) => Ok(console::read_content_targets(open(path)?)?),
        None => {
            prompt("Enter content references, one per line (blank line to finish):");
            Ok(console::read_content_targets(io::stdin().lock())?)
        }
    }
}

fn account_targets(path: Option<&Path>) -> anyhow::Result<Vec<Target>> {
    match path {
        Some(path) => Ok(console::read_account_targets(open(path)?)?),
        None => {
            prompt("Enter account handles, one per line (blank line to finish):");
            Ok(console::read_account_targets(io::stdin().lock())?)
        }
    }
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn prompt(message: &str) {
    eprintln!("{message}");
    let _ = io::stderr().flush();
}

async fn list_channels(path: Option<PathBuf>, verbose: u8) -> anyhow::Result<()> {
    let config = load_config(path, verbose).await?;
    if config.channels.is_empty() {
        println!("No channels configured.");
        return Ok(());
    }
    println!("Channels (priority order):");
    for (i, channel) in config.channels.iter().enumerate() {
        let kinds: Vec<String> = channel.kinds().iter().map(|k| k.to_string()).collect();
        println!(
            "  {}. {} [{}] {}",
            i + 1,
            channel.name(),
            channel.type_name(),
            kinds.join(", ")
        );
    }
    Ok(())
}

async fn check_config(path: Option<PathBuf>, verbose: u8) -> anyhow::Result<()> {
    let config = load_config(path, verbose).await?;
    println!(
        "Configuration OK: {} channel(s), {} worker(s), {} repetition(s) per target",
        config.channels.len(),
        config.run.max_workers,
        config.run.repetitions
    );
    Ok(())
}
