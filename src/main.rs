use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use ebk::config::{self, AppConfig};
use ebk::context::AppContext;
use ebk::core::models::human_bytes;
use ebk::core::{CompletedJob, CopyStatus, DriveMarker, Orchestrator};
use ebk::{adapters, logging};
use serde::Serialize;
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "ebk")]
#[command(about = "External Drive Backup Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for a backup drive and copy when a recognized one appears
    Watch(BackupArgs),
    /// Run a single backup now
    Backup(RunArgs),
    /// List removable volumes currently mounted
    Drives,
    /// Show the backup history recorded on attached drives
    Status,
    /// Write a starter config file
    InitConfig,
}

#[derive(Args, Serialize)]
struct BackupArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    source_directory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_delimiter = ',')]
    folders: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    adopt_new_drives: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    json_logs: Option<bool>,
}

#[derive(Args, Serialize)]
struct RunArgs {
    #[command(flatten)]
    #[serde(flatten)]
    common: BackupArgs,

    /// Copy under this directory instead of a detected removable drive
    #[arg(long)]
    #[serde(skip)]
    destination: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::InitConfig) {
        let path = config::write_starter_config()?;
        println!("Wrote starter config to {}", path.display());
        return Ok(());
    }

    let config = match &cli.command {
        Commands::Watch(args) => AppConfig::new(Some(args)),
        Commands::Backup(args) => AppConfig::new(Some(args)),
        _ => AppConfig::new(None::<&BackupArgs>),
    }
    .context("failed to load configuration")?;

    logging::init(config.verbose, config.json_logs);
    let ctx = AppContext::new(config);

    // Ctrl-C requests a cooperative stop; the worker finishes the file it
    // is on and reports what was copied so far.
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Watch(_) => run_watch(ctx).await,
        Commands::Backup(args) => run_backup(ctx, args.destination).await,
        Commands::Drives => run_drives(ctx),
        Commands::Status => run_status(ctx),
        Commands::InitConfig => Ok(()),
    }
}

async fn run_watch(ctx: AppContext) -> Result<()> {
    let provider = adapters::get_provider(&ctx.config);
    Orchestrator::new(ctx, provider)
        .watch()
        .await
        .context("watch loop failed")
}

async fn run_backup(ctx: AppContext, destination: Option<PathBuf>) -> Result<()> {
    let provider = adapters::get_provider(&ctx.config);

    let completed = match destination {
        Some(root) => {
            Orchestrator::new(ctx, provider)
                .backup_to_root(&root)
                .await?
        }
        None => {
            let volumes = provider.list_volumes().unwrap_or_else(|e| {
                warn!(error = %e, "could not list volumes");
                Vec::new()
            });
            let Some(volume) = volumes.into_iter().next() else {
                println!("No removable drives found. Plug one in and try again.");
                return Ok(());
            };

            println!("Backing up to {}", volume.display_name());
            Orchestrator::new(ctx, provider)
                .backup_to_volume(&volume)
                .await?
        }
    };

    print_report(&completed);
    Ok(())
}

fn run_drives(ctx: AppContext) -> Result<()> {
    let provider = adapters::get_provider(&ctx.config);
    let volumes = provider.list_volumes().context("could not list volumes")?;

    if volumes.is_empty() {
        println!("No removable drives detected.");
        return Ok(());
    }

    for volume in volumes {
        println!(
            "{}  {:.1} GB free of {:.1} GB  [{}]",
            volume.display_name(),
            volume.free_gb(),
            volume.capacity_gb(),
            volume.filesystem
        );
    }
    Ok(())
}

fn run_status(ctx: AppContext) -> Result<()> {
    let provider = adapters::get_provider(&ctx.config);
    let volumes = provider.list_volumes().context("could not list volumes")?;

    if volumes.is_empty() {
        println!("No removable drives detected.");
        return Ok(());
    }

    for volume in volumes {
        match DriveMarker::load(&volume.mount_point) {
            Ok(Some(marker)) => println!(
                "{}: {} ({} backup(s) so far)",
                volume.display_name(),
                describe_last_backup(marker.last_backup),
                marker.backup_count
            ),
            Ok(None) => println!("{}: never used for backups", volume.display_name()),
            Err(e) => {
                warn!(volume = %volume.display_name(), error = %e, "could not read drive marker");
            }
        }
    }
    Ok(())
}

fn print_report(completed: &CompletedJob) {
    let report = &completed.report;

    if report.cancelled {
        println!("Backup cancelled.");
    }

    println!(
        "Backed up {} file(s) ({}) to {}",
        report.succeeded,
        human_bytes(report.bytes_copied),
        completed.job.destination.display()
    );

    if !report.failures.is_empty() {
        println!("{} item(s) could not be copied:", report.failures.len());
        for failure in &report.failures {
            if let CopyStatus::Failed { kind, .. } = &failure.status {
                println!("  - {}: {}", failure.item.display(), kind);
            }
        }
    }
}

fn describe_last_backup(last: Option<DateTime<Local>>) -> String {
    let Some(last) = last else {
        return "no backups yet".to_string();
    };

    let days = (Local::now().date_naive() - last.date_naive()).num_days();
    match days {
        0 => "backed up today".to_string(),
        1 => "last backup: yesterday".to_string(),
        2..=6 => format!("last backup: {days} days ago"),
        _ => format!("last backup: {}", last.format("%B %d, %Y")),
    }
}
