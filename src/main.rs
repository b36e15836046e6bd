//! Command-line interface for target-mongodb
//!
//! ```bash
//! # Read Singer messages from stdin
//! tap-postgres --config tap.json | target-mongodb --config target.json
//!
//! # Replay a captured message file
//! target-mongodb --config target.json --input messages.jsonl
//! ```
//!
//! State lines go to stdout and logs to stderr (`RUST_LOG`, default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use mongodb_sink::{BatchCommitter, MongoConnectionOpts, MongoStore};
use target_mongodb::{target, Config};
use tokio::io::BufReader;

#[derive(Parser)]
#[command(name = "target-mongodb")]
#[command(about = "Singer target that upserts records into MongoDB")]
#[command(long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, env = "TARGET_MONGODB_CONFIG")]
    config: PathBuf,

    /// Read Singer messages from this file instead of stdin
    #[arg(long, value_name = "PATH")]
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // stdout carries Singer state, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;
    tracing::info!(
        "Writing into database '{}' in batches of up to {} records (invalid records: {})",
        config.db_name,
        config.batch_size,
        config.on_invalid_record
    );

    let store = MongoStore::new(MongoConnectionOpts::from(&config));
    let committer = BatchCommitter::new(store).with_policy(config.on_invalid_record);
    let stdout = tokio::io::stdout();

    match cli.input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input file {}", path.display()))?;
            target::run(committer, config.batch_size, BufReader::new(file), stdout).await?;
        }
        None => {
            let stdin = tokio::io::stdin();
            target::run(committer, config.batch_size, BufReader::new(stdin), stdout).await?;
        }
    }

    Ok(())
}
