//! Switchboard CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use switchboard::checkpoint::{CheckpointStore, ThroughputBudget};
use switchboard::config::Config;
use switchboard::db::Db;
use switchboard::dispatch::WorkflowClient;
use switchboard::identity::IdentityStore;
use switchboard::llm::HttpReasoner;
use switchboard::pipeline::{Pipeline, UnitStatus};
use switchboard::prompts::PromptEngine;
use switchboard::InboundItem;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Routes inbound channel messages to downstream agents via a reasoning step")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a batch of inbound items (a JSON array) from a file or stdin.
    Run {
        /// Path to the batch file; reads stdin when omitted.
        #[arg(short, long)]
        batch: Option<std::path::PathBuf>,

        /// Overall batch deadline in seconds.
        #[arg(long, default_value_t = 60)]
        deadline_secs: u64,
    },

    /// Register (or update) a channel binding for a profile.
    Bind {
        profile_id: String,
        user_id: String,
        channel: String,
    },

    /// List the channel bindings of a profile.
    Bindings { profile_id: String },

    /// Delete expired checkpoints.
    Sweep,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load().context("failed to load configuration from environment")?;
    let db = Db::connect(&config.data_dir)
        .await
        .context("failed to open database")?;

    let result = run_command(cli.command, &config, &db).await;

    db.close().await;
    result
}

async fn run_command(command: Command, config: &Config, db: &Db) -> anyhow::Result<()> {
    match command {
        Command::Run {
            batch,
            deadline_secs,
        } => {
            let items = read_batch(batch.as_deref())?;
            tracing::info!(items = items.len(), "processing batch");

            let identity = IdentityStore::new(db.sqlite.clone());
            let checkpoints = Arc::new(CheckpointStore::new(
                db.sqlite.clone(),
                ThroughputBudget::new(
                    config.checkpoint.read_units,
                    config.checkpoint.write_units,
                    Duration::from_millis(config.checkpoint.wait_ceiling_ms),
                ),
                Duration::from_secs(config.checkpoint.ttl_seconds),
            ));
            let reasoner = Arc::new(HttpReasoner::from_config(&config.llm)?);
            let workflow = Arc::new(WorkflowClient::from_config(&config.dispatch)?);
            let prompts = Arc::new(PromptEngine::new()?);

            let pipeline = Pipeline::new(
                identity,
                checkpoints,
                reasoner,
                workflow,
                prompts,
                Arc::new(config.clone()),
            );

            let report = pipeline
                .run_batch(items, Duration::from_secs(deadline_secs))
                .await;

            for outcome in &report.outcomes {
                match &outcome.status {
                    UnitStatus::Completed {
                        execution_id,
                        committed_version,
                    } => println!(
                        "item {}: completed execution={execution_id} version={committed_version}",
                        outcome.index
                    ),
                    UnitStatus::Skipped { reason } => {
                        println!("item {}: skipped ({reason})", outcome.index)
                    }
                    UnitStatus::Failed { stage, error } => {
                        println!("item {}: failed at {stage} ({error})", outcome.index)
                    }
                }
            }
            println!(
                "batch: {} completed, {} skipped, {} failed",
                report.completed(),
                report.skipped(),
                report.failed()
            );

            Ok(())
        }

        Command::Bind {
            profile_id,
            user_id,
            channel,
        } => {
            let identity = IdentityStore::new(db.sqlite.clone());
            identity.bind(&profile_id, &user_id, &channel).await?;
            println!("bound {user_id} ({channel}) to profile {profile_id}");
            Ok(())
        }

        Command::Bindings { profile_id } => {
            let identity = IdentityStore::new(db.sqlite.clone());
            for binding in identity.bindings(&profile_id).await? {
                println!("- UserID: {}, Channel: {}", binding.user_id, binding.channel);
            }
            Ok(())
        }

        Command::Sweep => {
            let checkpoints = CheckpointStore::new(
                db.sqlite.clone(),
                ThroughputBudget::new(
                    config.checkpoint.read_units,
                    config.checkpoint.write_units,
                    Duration::from_millis(config.checkpoint.wait_ceiling_ms),
                ),
                Duration::from_secs(config.checkpoint.ttl_seconds),
            );
            let reclaimed = checkpoints.sweep_expired().await?;
            println!("reclaimed {reclaimed} expired checkpoints");
            Ok(())
        }
    }
}

fn read_batch(path: Option<&std::path::Path>) -> anyhow::Result<Vec<InboundItem>> {
    match path {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open batch file: {}", path.display()))?;
            serde_json::from_reader(std::io::BufReader::new(file))
                .with_context(|| format!("failed to parse batch file: {}", path.display()))
        }
        None => serde_json::from_reader(std::io::stdin().lock())
            .context("failed to parse batch from stdin"),
    }
}
