//! # Relaycast: resumable drip sequences and group broadcasts
//!
//! Usage:
//!   relaycast run                        # Start with ~/.relaycast/config.toml
//!   relaycast run --config ./relay.toml  # Custom config
//!   relaycast run --dry-run              # Console delivery, in-memory state
//!   relaycast check                      # Validate config and exit
//!   relaycast status                     # In-flight checkpoints + last broadcasts
//!   relaycast forget 5511999999999       # Let a recipient trigger again

mod app;

use anyhow::Result;
use clap::{Parser, Subcommand};
use relaycast_core::config::RelayConfig;
use relaycast_core::traits::CheckpointStore;
use relaycast_scheduler::SequenceCatalog;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "relaycast",
    version,
    about = "📨 Relaycast — resumable drip sequences and scheduled group broadcasts"
)]
struct Cli {
    /// Config file (default: ~/.relaycast/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start sequences, broadcasts and the webhook gateway
    Run {
        /// Log sends instead of delivering them; state stays in memory
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the configuration and print a summary
    Check,
    /// Show in-flight checkpoints and last broadcast times
    Status,
    /// Clear a recipient's "already responded" mark
    Forget {
        /// Recipient id (phone number or chat id)
        recipient: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RelayConfig> {
    let config = match path {
        Some(p) => RelayConfig::load_from(p)?,
        None => RelayConfig::load()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "relaycast=debug,relaycast_scheduler=debug,relaycast_channels=debug,relaycast_gateway=debug,tower_http=debug"
    } else {
        "relaycast=info,relaycast_scheduler=info,relaycast_channels=info,relaycast_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Command::Run { dry_run } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            app::run(config, dry_run, cancel).await?;
        }
        Command::Check => check(&config)?,
        Command::Status => status(&config).await?,
        Command::Forget { recipient } => {
            let state = app::StateBackend::open(&config)?;
            if state.forget_responded(&recipient)? {
                println!("✅ {recipient} can trigger sequences again");
            } else {
                println!("ℹ️  {recipient} had no response record");
            }
        }
    }
    Ok(())
}

fn check(config: &RelayConfig) -> Result<()> {
    println!("📨 Relaycast — configuration check\n");
    let catalog = SequenceCatalog::new(config.sequences());
    println!("   Sequences:  {}", catalog.len());
    for seq in catalog.iter() {
        let keyword = seq.keyword.as_deref().unwrap_or("-");
        println!("     • {} ({} steps, keyword: {keyword})", seq.name, seq.len());
    }
    println!("   Drip mode:  {:?}", config.drip.mode()?);
    println!("   Delivery:   {}", config.delivery.provider);
    println!("   Storage:    {:?}", config.storage.backend);

    if config.intake.enabled && catalog.get(&config.intake.sequence).is_none() {
        anyhow::bail!("intake sequence '{}' is not defined", config.intake.sequence);
    }
    relaycast_scheduler::QuietWindow::from_config(&config.broadcast.quiet_window)?;
    let targets = config.broadcast.targets();
    println!(
        "   Broadcast:  {} ({} group(s))",
        if config.broadcast.enabled { "on" } else { "off" },
        targets.len()
    );
    println!("\n✅ Configuration OK");
    Ok(())
}

async fn status(config: &RelayConfig) -> Result<()> {
    let state = app::StateBackend::open(config)?;
    let checkpoints = state.checkpoints().load().await?;
    println!("📍 In-flight sequences: {}", checkpoints.len());
    for cp in &checkpoints {
        println!(
            "   {} → {} @ step {}",
            cp.recipient_id,
            cp.sequence.as_deref().unwrap_or("(default)"),
            cp.step_index
        );
    }

    let sent = state.all_last_sent()?;
    println!("📣 Broadcast groups: {}", sent.len());
    for (group_id, ms) in sent {
        let when = chrono::DateTime::from_timestamp_millis(ms)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| ms.to_string());
        println!("   {group_id} last sent {when}");
    }
    Ok(())
}
