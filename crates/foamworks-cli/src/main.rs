//! Foamworks CLI
//!
//! Thin wrapper around foamworks-core for poking at a local engine data
//! directory: inspect the durable offline queue, clear it, or drop a
//! single stuck operation.
//!
//! ## Usage
//!
//! ```bash
//! # Show data directory summary
//! foamworks info
//!
//! # List pending offline operations
//! foamworks queue list
//!
//! # Show queue count and age
//! foamworks queue status
//!
//! # Drop one operation by id
//! foamworks queue drop <op_id>
//!
//! # Clear the whole queue (requires --force)
//! foamworks queue clear --force
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use foamworks_core::OfflineQueue;

/// Foamworks - offline-first contractor app tooling
#[derive(Parser)]
#[command(name = "foamworks")]
#[command(version = "0.1.0")]
#[command(about = "Foamworks - offline queue inspection")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: ~/.foamworks/data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show data directory and queue summary
    Info,

    /// Offline queue management
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending operations, oldest first
    List,
    /// Show pending count and oldest-entry age
    Status,
    /// Remove a single operation by id
    Drop {
        /// Operation id (as shown by `queue list`)
        op_id: String,
    },
    /// Remove every pending operation
    Clear {
        /// Confirm clearing (required)
        #[arg(long)]
        force: bool,
    },
}

fn setup_logging(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Get the default data directory (~/.foamworks/data)
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foamworks")
        .join("data")
}

fn format_age(timestamp_ms: i64) -> String {
    let age_secs = (chrono::Utc::now().timestamp_millis() - timestamp_ms).max(0) / 1000;
    if age_secs < 60 {
        format!("{}s", age_secs)
    } else if age_secs < 3600 {
        format!("{}m", age_secs / 60)
    } else {
        format!("{}h{}m", age_secs / 3600, (age_secs % 3600) / 60)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let queue = OfflineQueue::open(data_dir.join("offline_queue.redb"))?;

    match cli.command {
        Commands::Info => {
            let status = queue.status()?;
            println!("Foamworks v0.1.0");
            println!();
            println!("Data directory: {}", data_dir.display());
            println!("Pending offline operations: {}", status.count);
            if let Some(oldest) = status.oldest_timestamp {
                println!("Oldest pending change: {} ago", format_age(oldest));
            }
        }

        Commands::Queue { action } => match action {
            QueueAction::List => {
                let ops = queue.list_all()?;
                if ops.is_empty() {
                    println!("Queue is empty.");
                } else {
                    println!("{} pending operation(s):", ops.len());
                    for op in ops {
                        println!();
                        println!("  ID: {}", op.id);
                        println!("  Kind: {:?}", op.kind);
                        println!("  Collection: {}", op.collection);
                        println!("  Age: {}", format_age(op.timestamp));
                        println!("  Retries: {}", op.retry_count);
                    }
                }
            }

            QueueAction::Status => {
                let status = queue.status()?;
                println!("Pending: {}", status.count);
                match status.oldest_timestamp {
                    Some(oldest) => println!("Oldest: {} ago", format_age(oldest)),
                    None => println!("Oldest: -"),
                }
            }

            QueueAction::Drop { op_id } => {
                queue.remove(&op_id)?;
                println!("Dropped {} (if it existed).", op_id);
            }

            QueueAction::Clear { force } => {
                if !force {
                    let status = queue.status()?;
                    println!(
                        "This would drop {} pending operation(s) that have not synced.",
                        status.count
                    );
                    println!("Re-run with --force to confirm.");
                } else {
                    queue.clear()?;
                    println!("Queue cleared.");
                }
            }
        },
    }

    Ok(())
}
