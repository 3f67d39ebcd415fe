//! Kasane Appendr - lease-guarded append-blob writer
//!
//! Appends files or stdin to append blobs and manages leases and lock files.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kasane_appendr::{config::Config, metrics, registry::BlobStorage, telemetry};
use std::path::PathBuf;
use tracing::info;

/// Kasane Appendr - append streams to blobs without exceeding block limits
#[derive(Parser, Debug)]
#[command(name = "kasane-appendr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Print Prometheus metrics to stdout after the command
    #[arg(long, global = true)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append a file (or stdin) to a blob, creating it if needed
    Append(WriteArgs),
    /// Replace a blob's content with a file (or stdin)
    Truncate(WriteArgs),
    /// Acquire or release a blob lease
    #[command(subcommand)]
    Lease(LeaseCommand),
    /// Create or delete an advisory lock file
    #[command(subcommand)]
    Lock(LockCommand),
}

#[derive(Args, Debug)]
struct Target {
    /// Configured storage account name
    #[arg(long)]
    account: String,
    #[arg(long)]
    container: String,
    #[arg(long)]
    blob: String,
}

#[derive(Args, Debug)]
struct WriteArgs {
    #[command(flatten)]
    target: Target,
    /// Input file; stdin when omitted
    #[arg(long)]
    file: Option<PathBuf>,
    /// Lease already held by the caller
    #[arg(long)]
    lease_id: Option<String>,
}

#[derive(Subcommand, Debug)]
enum LeaseCommand {
    /// Acquire an infinite lease and print its id
    Acquire(Target),
    /// Release a lease
    Release {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        lease_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum LockCommand {
    /// Create `<blob>.LOCK`
    Create(Target),
    /// Delete `<blob>.LOCK`
    Delete(Target),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.to_lowercase();
        config.validate()?;
    }

    let _guard = telemetry::init_subscriber(&config.logging, config.tracing.as_ref())?;
    info!("Starting Kasane Appendr v{}", kasane_appendr::VERSION);

    let storage = BlobStorage::new(&config)?;
    let result = run(&storage, cli.command).await;

    // Failed runs still report their error counters
    if cli.print_metrics && config.metrics.enabled {
        print!("{}", metrics::gather_text()?);
    }

    result
}

async fn run(storage: &BlobStorage, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Append(args) => {
            let t = &args.target;
            let lease = args.lease_id.as_deref();
            let outcome = match &args.file {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("Failed to open {:?}", path))?;
                    storage
                        .append_reader(&t.account, &t.container, &t.blob, file, lease)
                        .await?
                }
                None => {
                    storage
                        .append_reader(&t.account, &t.container, &t.blob, tokio::io::stdin(), lease)
                        .await?
                }
            };
            println!("appended {} bytes in {} blocks", outcome.bytes, outcome.blocks);
        }
        Command::Truncate(args) => {
            let t = &args.target;
            let lease = args.lease_id.as_deref();
            let outcome = match &args.file {
                Some(path) => {
                    let file = tokio::fs::File::open(path)
                        .await
                        .with_context(|| format!("Failed to open {:?}", path))?;
                    storage
                        .truncate_reader(&t.account, &t.container, &t.blob, file, lease)
                        .await?
                }
                None => {
                    storage
                        .truncate_reader(&t.account, &t.container, &t.blob, tokio::io::stdin(), lease)
                        .await?
                }
            };
            println!("wrote {} bytes in {} blocks", outcome.bytes, outcome.blocks);
        }
        Command::Lease(LeaseCommand::Acquire(t)) => {
            let lease_id = storage.acquire_lease(&t.account, &t.container, &t.blob).await?;
            println!("{}", lease_id);
        }
        Command::Lease(LeaseCommand::Release { target: t, lease_id }) => {
            storage
                .release_lease(&t.account, &t.container, &t.blob, &lease_id)
                .await?;
            println!("released");
        }
        Command::Lock(LockCommand::Create(t)) => {
            storage.create_lock_file(&t.account, &t.container, &t.blob).await?;
            println!("locked");
        }
        Command::Lock(LockCommand::Delete(t)) => {
            storage.delete_lock_file(&t.account, &t.container, &t.blob).await?;
            println!("unlocked");
        }
    }

    Ok(())
}
