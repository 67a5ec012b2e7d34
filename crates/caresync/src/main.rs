//! csync — operate the CareSync offline-first sync engine from a terminal.

mod platform;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use caresync_core::logging::init_logging;
use caresync_core::sync::NoopSyncScheduler;
use caresync_core::{
    CaresyncConfig, HttpServerApi, OfferToken, RecordKind, SyncEngine, SyncTrigger,
};
use platform::{HeadlessInstallPlatform, HeadlessPushPlatform};

#[derive(Parser)]
#[command(name = "csync", version, about = "CareSync offline-first sync engine")]
struct Cli {
    /// Config file path (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the server base URL.
    #[arg(long, global = true, env = "CARESYNC_SERVER")]
    server: Option<String>,

    /// Override the data directory holding the durable store.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show pending counts, sync phases, and durability.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Drain pending records to the server now.
    Sync {
        /// Restrict to one record kind.
        #[arg(long)]
        kind: Option<RecordKind>,
    },
    /// Capture a record into the durable queue (no network).
    Enqueue {
        kind: RecordKind,
        /// Inline JSON payload.
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,
        /// Read the JSON payload from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Subscribe this device to a notification topic.
    Subscribe { topic: String },
    /// Show the notification permission state.
    Permission,
    /// Inspect or dismiss the install offer.
    Install {
        #[command(subcommand)]
        action: InstallAction,
    },
}

#[derive(Subcommand)]
enum InstallAction {
    /// Show the offer phase and the persisted dismissal flag.
    Show,
    /// Permanently suppress the install offer on this device.
    Dismiss,
}

type CliEngine = SyncEngine<HttpServerApi, HeadlessPushPlatform, HeadlessInstallPlatform>;

fn build_engine(cli: &Cli) -> anyhow::Result<CliEngine> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(caresync_core::config::default_config_path);
    let mut config = CaresyncConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    if let Some(server) = &cli.server {
        config.server_url.clone_from(server);
    }
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = Some(data_dir.clone());
    }

    let server = Arc::new(HttpServerApi::new(config.server_url.clone()));
    let engine = SyncEngine::open(
        &config,
        server,
        HeadlessPushPlatform,
        HeadlessInstallPlatform,
        &NoopSyncScheduler,
    )?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("caresync=info,caresync_core=info");
    let cli = Cli::parse();
    let engine = build_engine(&cli)?;

    match &cli.command {
        Command::Status { json } => {
            let status = engine.status()?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("durability:       {:?}", status.durability);
                println!("last sync failed: {}", status.last_sync_failed);
                for partition in &status.partitions {
                    println!(
                        "{:8} pending={} phase={:?} last_error={}",
                        partition.kind.to_string(),
                        partition.pending,
                        partition.phase,
                        partition.last_error.as_deref().unwrap_or("-"),
                    );
                }
            }
        }
        Command::Sync { kind } => {
            let reports = match kind {
                Some(kind) => vec![engine.sync_now(*kind).await],
                None => engine.drain_all(SyncTrigger::Manual).await,
            };
            for report in reports {
                println!(
                    "{}: {:?} ({}/{} delivered)",
                    report.kind, report.outcome, report.delivered, report.attempted
                );
            }
        }
        Command::Enqueue { kind, json, file } => {
            let raw = match (json, file) {
                (Some(inline), None) => inline.clone(),
                (None, Some(path)) => std::fs::read_to_string(path)
                    .with_context(|| format!("reading payload from {}", path.display()))?,
                _ => bail!("provide a payload via --json or --file"),
            };
            let payload: serde_json::Value =
                serde_json::from_str(&raw).context("payload is not valid JSON")?;
            let record = engine.enqueue(*kind, payload)?;
            println!("captured {} record {}", record.kind, record.id);
        }
        Command::Subscribe { topic } => {
            engine.subscribe(topic).await?;
            println!("subscribed to topic '{topic}'");
        }
        Command::Permission => {
            println!("{:?}", engine.ensure_permission());
        }
        Command::Install { action } => match action {
            InstallAction::Show => {
                let tracker = engine.install();
                println!("phase:                 {:?}", tracker.phase());
                println!("installable:           {}", engine.is_installable());
                println!("dismissed permanently: {}", tracker.dismissed_permanently());
            }
            InstallAction::Dismiss => {
                // No platform offer event reaches a headless host; surface a
                // synthetic offer so the never-ask-again flag can be set.
                let tracker = engine.install();
                tracker.on_offer_available(OfferToken::new(0));
                tracker.dismiss()?;
                println!(
                    "install offer dismissed permanently: {}",
                    tracker.dismissed_permanently()
                );
            }
        },
    }
    Ok(())
}
