//! CLI for mqgate
//!
//! Subcommands:
//! - `replay`: feed JSON-lines events through the policy engine
//! - `retained dump`: print the persisted retained messages
//! - `retained purge`: drop one topic from the persisted retained messages

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tracing::{error, info};

use mqgate::broker::PolicyEngine;
use mqgate::config::{DEFAULT_CONFIG_PATH, Settings, load_config_from};
use mqgate::persistence::{RetainUpdate, RetainedWriter, open_store, record};
use mqgate::replay;
use mqgate::utils::logging;

#[derive(Parser)]
#[command(name = "mqgate", version, about)]
struct Cli {
    /// Configuration file; the extension may be left out
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run JSON-lines events through the policy engine, one decision per output line
    Replay {
        /// Event file, or `-` for stdin
        #[arg(default_value = "-")]
        input: String,
    },
    /// Inspect or edit the persisted retained messages
    Retained {
        #[command(subcommand)]
        action: RetainedCommand,
    },
}

#[derive(Subcommand)]
enum RetainedCommand {
    /// Print the retained record as JSON
    Dump,
    /// Remove the retained message of a topic
    Purge { topic: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config_from(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            let _ = logging::init("info", None);
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let _guard = logging::init(&settings.logging.level, settings.logging.directory.as_deref());

    let result = match cli.command {
        Command::Replay { input } => run_replay(&settings, &input).await,
        Command::Retained { action } => match action {
            RetainedCommand::Dump => run_dump(&settings),
            RetainedCommand::Purge { topic } => run_purge(&settings, &topic),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_replay(settings: &Settings, input: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(PolicyEngine::from_settings(settings)?);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        Box::new(BufReader::new(tokio::fs::File::open(input).await?))
    };

    let outcome = tokio::select! {
        summary = replay::run(engine.clone(), reader, tokio::io::stdout()) => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Stopping replay.");
            None
        }
    };
    engine.shutdown();

    if let Some(summary) = outcome {
        let summary = summary?;
        info!(
            events = summary.events,
            errors = summary.errors,
            connects_rejected = summary.connects_rejected,
            publishes_rejected = summary.publishes_rejected,
            subscriptions_rejected = summary.subscriptions_rejected,
            "Replay complete"
        );
    }
    Ok(())
}

fn run_dump(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&settings.retained)?;
    let set = store.load()?;
    println!("{}", record::encode_pretty(&set)?);
    Ok(())
}

fn run_purge(settings: &Settings, topic: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&settings.retained)?;
    let writer = RetainedWriter::open(store, settings.retained.writer_options())?;
    let update = writer.remove(topic);
    writer.flush();
    writer.close();

    match update {
        RetainUpdate::Unchanged => info!(topic, "No retained message for topic"),
        RetainUpdate::Degraded => {
            let reason = writer.status().last_error.unwrap_or_default();
            return Err(format!("could not save after purging {topic}: {reason}").into());
        }
        RetainUpdate::Saved | RetainUpdate::Queued => {
            if writer.status().degraded {
                return Err(format!("could not save after purging {topic}").into());
            }
            info!(topic, remaining = writer.len(), "Retained message purged");
        }
    }
    Ok(())
}
