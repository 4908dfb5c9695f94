//! Backup Runner - Main entry point
//!
//! Plans, runs and validates split-depth archive backups of the configured
//! folders.

use anyhow::{Context, Result};
use backup_runner::config::Config;
use backup_runner::daemon::shutdown::ShutdownCoordinator;
use backup_runner::executor::{BackupExecutor, RunSummary};
use backup_runner::notify::{LogNotifier, Notifier, TelegramNotifier};
use backup_runner::planner::{plan_source, render};
use backup_runner::validator::{validate_archive, ValidationPolicy, DEFAULT_SAMPLE_LIMIT};
use backup_runner::{utils, SourceSpec};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Only back up the folder with this name
    #[arg(short, long, value_name = "NAME")]
    folder: Option<String>,

    /// Show the configured folders and their plans, run nothing
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up the selected folders (default)
    Run,
    /// Preview the archive plan of the selected folders
    Plan {
        /// Print plans as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate one archive against a source directory
    Validate {
        #[arg(long, value_name = "FILE")]
        archive: PathBuf,

        #[arg(long, value_name = "DIR")]
        source: PathBuf,

        /// Seed for reproducible content sampling
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value_t = DEFAULT_SAMPLE_LIMIT)]
        sample_limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    if let Some(Command::Validate {
        archive,
        source,
        seed,
        sample_limit,
    }) = &args.command
    {
        utils::logger::init(args.log_level.as_deref().unwrap_or("info"), None)?;
        let policy = ValidationPolicy {
            deep_validation: true,
            sample_limit: *sample_limit,
            seed: *seed,
        };
        let result = validate_archive(archive, source, &policy);
        println!("{}", result.summary());
        for path in &result.missing_files {
            println!("  missing: {}", path);
        }
        for path in &result.sampled_mismatches {
            println!("  mismatch: {}", path);
        }
        return Ok(exit_code(!result.is_failed()));
    }

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.dir.as_deref())?;

    tracing::info!(
        "Starting backup-runner v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    if let Some(dir) = &config.log.dir {
        match utils::logger::cleanup_old_logs(dir, config.log.keep_days) {
            Ok(0) => {}
            Ok(removed) => tracing::info!("Removed {} old log file(s)", removed),
            Err(e) => tracing::warn!("Failed to clean up old logs: {}", e),
        }
    }

    let sources = config.selected_sources(args.folder.as_deref())?;

    if args.dry_run {
        print_folders(&config, &sources);
        print_plans(&sources, false)?;
        return Ok(ExitCode::SUCCESS);
    }

    match args.command {
        Some(Command::Plan { json }) => {
            print_plans(&sources, json)?;
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            if sources.is_empty() {
                tracing::warn!("No enabled folders configured, nothing to do");
                return Ok(ExitCode::SUCCESS);
            }

            let shutdown = ShutdownCoordinator::new();
            let token = shutdown.token();
            let watcher = tokio::spawn(async move { shutdown.wait_for_signal().await });

            let summary = match config.telegram.clone() {
                Some(telegram) => {
                    let notifier = TelegramNotifier::new(&telegram)?;
                    run(config, notifier, token, &sources).await
                }
                None => {
                    tracing::warn!("Telegram not configured, notifications go to the log only");
                    run(config, LogNotifier, token, &sources).await
                }
            };

            watcher.abort();
            Ok(exit_code(summary.all_succeeded()))
        }
    }
}

async fn run<N: Notifier>(
    config: Config,
    notifier: N,
    token: CancellationToken,
    sources: &[SourceSpec],
) -> RunSummary {
    BackupExecutor::with_cancel(config, notifier, token)
        .execute_all(sources)
        .await
}

fn print_folders(config: &Config, sources: &[SourceSpec]) {
    println!("Bucket: {} ({})", config.s3.bucket, config.s3.storage_class);
    println!("Tool: {}", config.backup.script_path.display());
    println!("Folders:");
    for source in sources {
        println!(
            "  {} -> {} (split-depth: {})",
            source.name,
            source.path.display(),
            source.split_depth
        );
    }
    println!();
}

fn print_plans(sources: &[SourceSpec], json: bool) -> Result<()> {
    if json {
        let plans: Vec<_> = sources
            .iter()
            .map(|source| match plan_source(source) {
                Ok(plan) => serde_json::to_value(&plan),
                Err(e) => Ok(serde_json::json!({
                    "backup_name": source.name,
                    "root": source.path,
                    "error": e.to_string(),
                })),
            })
            .collect::<serde_json::Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(());
    }

    for source in sources {
        match plan_source(source) {
            Ok(plan) => print!("{}", render::render_plan(&plan)),
            Err(e) => print!("{}", render::render_error(&source.name, &source.path, &e)),
        }
    }
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
