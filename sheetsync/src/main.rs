//! sheetsync - sync Smartsheet workspace data to local JSON snapshots
//!
//! Uses XDG Base Directory specification for file locations:
//! - Snapshots: $XDG_DATA_HOME/sheetsync/ (~/.local/share/sheetsync/)
//! - Logs: $XDG_STATE_HOME/sheetsync/ (~/.local/state/sheetsync/)
//! - Config: $XDG_CONFIG_HOME/sheetsync/config.toml (~/.config/sheetsync/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_writer_guard;
use sheetsync_core::format::{format_timestamp, format_timestamp_opt};
use sheetsync_core::{
    CleanupReport, Config, SecurityMode, SheetId, SheetOutcome, SmartsheetClient, SnapshotStore,
    StatusReport, SyncOrchestrator, SyncRecord, SyncStatus, ValidationReport,
};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sheetsync")]
#[command(about = "Sync Smartsheet workspace data to local JSON snapshots")]
#[command(version)]
#[command(after_help = "Examples:
  sheetsync sync                     Full sync of all sheets
  sheetsync sync --sheets 123 456    Sync specific sheet IDs
  sheetsync status                   Show current status
  sheetsync validate                 Test connection
  sheetsync cleanup --keep 5         Clean up old files")]
struct Args {
    /// TLS and proxy policy; `testing` relaxes checks for local testing
    #[arg(long, value_enum, global = true)]
    security_mode: Option<SecurityModeArg>,

    /// Echo warnings and errors to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Synchronize data from Smartsheet
    Sync {
        /// Specific sheet IDs to sync (default: all sheets)
        #[arg(long, num_args = 1..)]
        sheets: Vec<SheetId>,

        /// Output format
        #[arg(long, value_enum, default_value_t = SyncOutput::Summary)]
        output: SyncOutput,
    },

    /// Show current data status
    Status {
        /// Output format
        #[arg(long, value_enum, default_value_t = StatusFormat::Table)]
        format: StatusFormat,
    },

    /// Validate Smartsheet connection
    Validate,

    /// Clean up old data files
    Cleanup {
        /// Number of latest files to keep
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Sync { .. } => "sync",
            Command::Status { .. } => "status",
            Command::Validate => "validate",
            Command::Cleanup { .. } => "cleanup",
        }
    }

    /// Commands that modify the data directory.
    fn writes(&self) -> bool {
        matches!(self, Command::Sync { .. } | Command::Cleanup { .. })
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SecurityModeArg {
    Enterprise,
    Testing,
}

impl From<SecurityModeArg> for SecurityMode {
    fn from(arg: SecurityModeArg) -> Self {
        match arg {
            SecurityModeArg::Enterprise => SecurityMode::Enterprise,
            SecurityModeArg::Testing => SecurityMode::Testing,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SyncOutput {
    Json,
    Summary,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StatusFormat {
    Json,
    Table,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let Some(command) = &args.command else {
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    };

    match run(&args, command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, command: &Command) -> Result<ExitCode> {
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(mode) = args.security_mode {
        config.security.mode = mode.into();
    }

    let _log_guard = sheetsync_core::logging::init(&config.logging, args.verbose)
        .context("failed to initialize logging")?;

    // Log while the guard is still alive so the file writer flushes it
    execute(&config, command).map_err(|e| {
        tracing::error!(command = command.name(), error = %format!("{:#}", e), "Command failed");
        e
    })
}

fn execute(config: &Config, command: &Command) -> Result<ExitCode> {
    config.validate().context("invalid configuration")?;

    let config_path = Config::config_path();
    tracing::info!(
        command = command.name(),
        security_mode = %config.security.mode,
        config_file = %config_path.display(),
        config_file_found = config_path.exists(),
        "sheetsync starting"
    );

    let data_dir = config.data_dir();
    let _writer_guard = if command.writes() {
        Some(acquire_writer_guard(&data_dir).context("failed to acquire writer lock")?)
    } else {
        None
    };

    let store = SnapshotStore::open(data_dir.clone())
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))?;
    let client = SmartsheetClient::new(config).context("failed to create Smartsheet client")?;
    let orchestrator = SyncOrchestrator::new(Box::new(client), store);

    match command {
        Command::Sync { sheets, output } => handle_sync(&orchestrator, sheets, *output),
        Command::Status { format } => handle_status(&orchestrator, *format),
        Command::Validate => Ok(handle_validate(&orchestrator)),
        Command::Cleanup { keep } => Ok(handle_cleanup(&orchestrator, *keep)),
    }
}

fn handle_sync(
    orchestrator: &SyncOrchestrator,
    sheets: &[SheetId],
    output: SyncOutput,
) -> Result<ExitCode> {
    let pb = if output == SyncOutput::Summary {
        if sheets.is_empty() {
            println!("Starting full workspace sync...");
        } else {
            println!("Starting sync for sheets: {:?}", sheets);
        }
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .context("invalid progress bar template")?
                .progress_chars("#>-"),
        );
        pb
    } else {
        ProgressBar::hidden()
    };

    let on_progress = |current: usize, total: usize, name: &str| {
        if current == 0 {
            pb.set_length(total as u64);
        }
        pb.set_position(current as u64);
        pb.set_message(name.to_string());
    };

    let record = if sheets.is_empty() {
        orchestrator.full_sync_with_progress(on_progress)
    } else {
        orchestrator.sync_specific_sheets_with_progress(sheets, on_progress)
    };

    pb.finish_and_clear();

    match output {
        SyncOutput::Json => println!(
            "{}",
            serde_json::to_string_pretty(&record).context("failed to serialize sync record")?
        ),
        SyncOutput::Summary => print_sync_summary(&record),
    }

    tracing::info!(
        status = record.status.as_str(),
        successful = record.successful_sheets,
        failed = record.failed_sheets,
        "sheetsync sync complete"
    );

    Ok(if record.status == SyncStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn handle_status(orchestrator: &SyncOrchestrator, format: StatusFormat) -> Result<ExitCode> {
    let status = orchestrator.get_status();

    match format {
        StatusFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&status).context("failed to serialize status")?
        ),
        StatusFormat::Table => print_status_table(&status),
    }

    Ok(ExitCode::SUCCESS)
}

fn handle_validate(orchestrator: &SyncOrchestrator) -> ExitCode {
    println!("Validating Smartsheet connection...");

    match orchestrator.validate_connection() {
        ValidationReport::Success {
            workspace_name,
            workspace_id,
            sheet_count,
        } => {
            println!("✓ Connection successful");
            println!("  Workspace: {}", workspace_name);
            println!("  ID: {}", workspace_id);
            println!("  Sheets: {}", sheet_count);
            ExitCode::SUCCESS
        }
        ValidationReport::Failed { error } => {
            println!("✗ Connection failed: {}", error);
            ExitCode::FAILURE
        }
    }
}

fn handle_cleanup(orchestrator: &SyncOrchestrator, keep: usize) -> ExitCode {
    match orchestrator.cleanup_old_data(keep) {
        CleanupReport::Success {
            message,
            removed_files,
        } => {
            println!("✓ {} ({} removed)", message, removed_files);
            ExitCode::SUCCESS
        }
        CleanupReport::Failed { error } => {
            println!("✗ {}", error);
            ExitCode::FAILURE
        }
    }
}

/// Print human-readable sync summary
fn print_sync_summary(record: &SyncRecord) {
    let rule = "=".repeat(50);
    println!("\n{}", rule);
    println!("Sync Summary");
    println!("{}", rule);
    println!("Type: {}", record.sync_type.as_str());
    println!("Status: {}", record.status.as_str());
    println!("Duration: {:.2}s", record.duration_seconds);
    println!("Total sheets: {}", record.total_sheets);
    println!("Successful: {}", record.successful_sheets);
    println!("Failed: {}", record.failed_sheets);

    if !record.sheet_results.is_empty() {
        println!("\nSheet Details:");
        for outcome in &record.sheet_results {
            let name = outcome
                .sheet_name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("ID {}", outcome.sheet_id()));
            match outcome {
                SheetOutcome::Success { row_count, .. } => {
                    println!("  ✓ {} ({} rows)", name, row_count);
                }
                SheetOutcome::Failed { error, .. } => {
                    println!("  ✗ {} - {}", name, error);
                }
            }
        }
    }

    if !record.errors.is_empty() {
        println!("\nErrors:");
        for error in &record.errors {
            println!("  • {}", error);
        }
    }
}

/// Print human-readable status table
fn print_status_table(status: &StatusReport) {
    let rule = "=".repeat(60);
    println!("\n{}", rule);
    println!("Smartsheet Sync Status");
    println!("{}", rule);

    if let Some(workspace) = &status.workspace {
        println!("Workspace: {}", workspace.name);
        println!("ID: {}", workspace.id);
        println!("Last fetched: {}", format_timestamp_opt(Some(workspace.last_fetched)));
    }

    let summary = &status.sheets_summary;
    println!("\nData Summary:");
    println!("  Total sheets: {}", summary.total_sheets);
    println!("  Total size: {} MB", summary.total_size_mb);
    println!("  Last updated: {}", format_timestamp_opt(summary.last_updated));

    if let Some(last_sync) = &status.last_sync {
        println!("\nLast Sync:");
        println!("  Type: {}", last_sync.sync_type.as_str());
        println!("  Status: {}", last_sync.status.as_str());
        println!("  Time: {}", format_timestamp(last_sync.start_time));
        println!("  Duration: {:.2}s", last_sync.duration_seconds);
        println!(
            "  Success rate: {}/{}",
            last_sync.successful_sheets, last_sync.total_sheets
        );
    }

    println!("Total syncs: {}", status.total_syncs);
}
