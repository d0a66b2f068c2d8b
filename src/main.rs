//! organelle-batch CLI - resumable organelle assembly over an accession table.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use organelle_batch::{
    BatchRunner, BatchState, CheckpointManager, Config, ConsoleProgress, FailureLog,
    FailurePolicy, ItemPipeline, ProcessExecutor, load_dataset,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "organelle-batch")]
#[command(version)]
#[command(about = "Resumable batch driver for per-accession organelle assembly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the dataset, resuming from the checkpoint
    Run {
        /// Input dataset (overrides dataset.path)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Checkpoint file (overrides state.checkpoint)
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Failure log (overrides state.failure_log)
        #[arg(long)]
        failure_log: Option<PathBuf>,

        /// Start at this index instead of the checkpoint
        #[arg(long)]
        from: Option<usize>,

        /// Allow --from past the checkpoint, counting the items in between as done
        #[arg(long, requires = "from")]
        force: bool,

        /// Last index to process (inclusive)
        #[arg(long)]
        end: Option<usize>,

        /// What to do when an item fails
        #[arg(long, value_enum)]
        policy: Option<FailurePolicy>,

        /// Thread hint passed to the tools
        #[arg(short, long)]
        threads: Option<usize>,

        /// Do not run the setup command
        #[arg(long)]
        skip_setup: bool,
    },

    /// Print the commands that would run for one item
    Plan {
        /// Dataset index of the item
        index: usize,

        /// Input dataset (overrides dataset.path)
        #[arg(short, long)]
        dataset: Option<PathBuf>,
    },

    /// Show checkpoint position and recorded failures
    Status {
        /// Input dataset (overrides dataset.path)
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Checkpoint file (overrides state.checkpoint)
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    Config::load(path.map(PathBuf::as_path))
        .with_context(|| format!("Failed to load config from {path:?}"))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print!("{}", Config::example_toml());
        }

        Commands::Validate => {
            let config = load_config(cli.config.as_ref())?;

            info!("Configuration is valid");
            info!("  Dataset: {:?}", config.dataset.path);
            info!(
                "  Targets: {}",
                config
                    .targets
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            info!("  Failure policy: {:?}", config.execution.failure_policy);
        }

        Commands::Plan { index, dataset } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(dataset) = dataset {
                config.dataset.path = dataset;
            }

            let items = load_dataset(&config.dataset.path, &config.dataset)?;
            let item = items.get(index).with_context(|| {
                format!("Index {index} out of range (dataset has {} items)", items.len())
            })?;

            let pipeline = ItemPipeline::new(config);
            if let Some(setup) = pipeline.setup_command() {
                println!("# once per run");
                println!("setup: {setup}");
            }
            let spec = pipeline.plan(item);
            println!("# item {index}: {}", spec.item_id);
            for step in &spec.steps {
                println!("{}: {}", step.name, step.command);
            }
        }

        Commands::Status {
            dataset,
            checkpoint,
        } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(dataset) = dataset {
                config.dataset.path = dataset;
            }
            if let Some(checkpoint) = checkpoint {
                config.state.checkpoint = checkpoint;
            }

            let items = load_dataset(&config.dataset.path, &config.dataset)?;
            let next = CheckpointManager::new(&config.state.checkpoint).load();
            let failures = FailureLog::new(&config.state.failure_log).read_all()?;

            println!("Items:       {}", items.len());
            println!("Next index:  {next}");
            match items.get(next) {
                Some(item) => println!("Next item:   {}", item.id),
                None => println!("Next item:   (dataset exhausted)"),
            }
            println!("Failures:    {}", failures.len());
            for record in &failures {
                println!(
                    "  [{}] {} step '{}': {}",
                    record.index, record.item_id, record.step, record.error
                );
            }
        }

        Commands::Run {
            dataset,
            checkpoint,
            failure_log,
            from,
            force,
            end,
            policy,
            threads,
            skip_setup,
        } => {
            let mut config = load_config(cli.config.as_ref())?;

            // CLI overrides
            if let Some(dataset) = dataset {
                config.dataset.path = dataset;
            }
            if let Some(checkpoint) = checkpoint {
                config.state.checkpoint = checkpoint;
            }
            if let Some(failure_log) = failure_log {
                config.state.failure_log = failure_log;
            }
            if let Some(policy) = policy {
                config.execution.failure_policy = policy;
            }
            if let Some(threads) = threads {
                config.execution.threads = threads;
            }
            config.validate().context("Invalid configuration")?;

            let items = load_dataset(&config.dataset.path, &config.dataset)?;

            let checkpoint = CheckpointManager::new(&config.state.checkpoint);
            let start = from.unwrap_or_else(|| checkpoint.load());
            let mut state = BatchState::new(items, start, end);

            let executor = ProcessExecutor::new(config.execution.shell.clone())
                .with_timeout(config.execution.step_timeout_secs.map(Duration::from_secs));
            let failures = FailureLog::new(&config.state.failure_log);

            let runner = BatchRunner::new(
                ItemPipeline::new(config),
                Arc::new(executor),
                checkpoint,
                failures,
            )
            .skip_setup(skip_setup)
            .allow_skip(force);

            let progress = ConsoleProgress::new(state.total(), start);
            let summary = runner.run(&mut state, &progress, &progress).await?;

            println!("\n=== Batch Complete ===");
            println!("Items:       {}", summary.total);
            println!("Started at:  {}", summary.start);
            println!("Attempted:   {}", summary.attempted);
            println!("Succeeded:   {}", summary.succeeded);
            println!("Failed:      {}", summary.failed.len());
            for id in &summary.failed {
                println!("  - {id}");
            }
            println!("Checkpoint:  {}", summary.next_index);
            println!("Runtime:     {:.1}s", summary.runtime_secs);
        }
    }

    Ok(())
}
