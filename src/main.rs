use anyhow::{bail, Context};
use bulk_import::config::{get_config_file_path, load_config, load_config_from, save_config};
use bulk_import::events::{ImportEvent, ImportEventBus, ImportEventPayload};
use bulk_import::import::{
    describe_import_error, ImportClient, ImportKind, ImportRunner, ImportSummary, Progress,
};
use bulk_import::logging::{get_history_path, init_logging, read_import_history};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const EVENT_BUS_CAPACITY: usize = 256;
const MAX_ERRORS_SHOWN: usize = 20;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and follow the import until it finishes
    Run {
        /// What the file contains
        #[arg(short, long, value_enum)]
        kind: KindArg,

        /// Project id (required for project-sites)
        #[arg(short, long)]
        project: Option<String>,

        /// CSV or Excel file to import
        file: PathBuf,
    },

    /// Show recently finished imports
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Update the saved connection settings
    Configure {
        #[arg(long)]
        server_url: Option<String>,

        #[arg(long)]
        api_key: Option<String>,

        #[arg(long)]
        tenant_id: Option<String>,

        /// Seconds between job status checks
        #[arg(long)]
        poll_interval: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Sites,
    Inventory,
    ProjectSites,
}

impl KindArg {
    fn into_kind(self, project: Option<String>) -> anyhow::Result<ImportKind> {
        Ok(match (self, project) {
            (KindArg::Sites, _) => ImportKind::Sites,
            (KindArg::Inventory, _) => ImportKind::Inventory,
            (KindArg::ProjectSites, Some(project_id)) => ImportKind::ProjectSites { project_id },
            (KindArg::ProjectSites, None) => bail!("--project is required for project-sites"),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match args.command {
        Command::Run {
            kind,
            project,
            file,
        } => run_import(kind.into_kind(project)?, file).await,
        Command::History { limit } => show_history(limit),
        Command::Configure {
            server_url,
            api_key,
            tenant_id,
            poll_interval,
        } => configure(server_url, api_key, tenant_id, poll_interval),
    }
}

async fn run_import(kind: ImportKind, file: PathBuf) -> anyhow::Result<()> {
    let config = load_config().context("Failed to load config")?;
    let client = ImportClient::from_config(&config)?;
    let bus = ImportEventBus::new(EVENT_BUS_CAPACITY);
    let runner = ImportRunner::new(client, config.poll_settings(), bus.clone())
        .with_history(get_history_path()?);

    let render = tokio::spawn(render_events(bus.subscribe()));

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let result = runner.run_until(kind, &file, cancel).await;
    drop(runner);
    drop(bus);
    let _ = render.await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => bail!(describe_import_error(&e)),
    };
    print_summary(&summary);
    summary.into_result()?;
    Ok(())
}

/// Print one line per event until the bus closes
async fn render_events(mut rx: tokio::sync::broadcast::Receiver<ImportEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };

        match &event.payload {
            ImportEventPayload::Accepted {
                job_id,
                estimated_rows,
            } => match estimated_rows {
                Some(rows) => println!(
                    "Import of {} queued as job {} (~{} rows)",
                    event.kind, job_id, rows
                ),
                None => println!("Import of {} queued as job {}", event.kind, job_id),
            },
            ImportEventPayload::CompletedInline { .. } => {
                println!("Import of {} processed immediately", event.kind)
            }
            ImportEventPayload::Progress { status } => match status.progress {
                Progress::Percent(p) => println!(
                    "[{:>3}%] {} / {} rows ({})",
                    p, status.processed_rows, status.total_rows, status.state
                ),
                Progress::Indeterminate => {
                    println!("[ ...] {} rows processed ({})", status.processed_rows, status.state)
                }
            },
            ImportEventPayload::Aborted { job_id, reason } => {
                println!("Stopped following job {}: {}", job_id, reason)
            }
        }
    }
}

fn print_summary(summary: &ImportSummary) {
    println!();
    println!("File:      {}", summary.file_name);
    println!("Import:    {}", summary.kind);
    if let Some(job_id) = &summary.job_id {
        println!("Job:       {}", job_id);
    }
    println!("Result:    {}", summary.state);
    println!("Succeeded: {}", summary.success_count);
    if summary.skipped > 0 {
        println!("Skipped:   {}", summary.skipped);
    }
    println!("Errors:    {}", summary.error_count);

    for error in summary.errors.iter().take(MAX_ERRORS_SHOWN) {
        println!("  - {}", error);
    }
    let hidden = summary.errors.len().saturating_sub(MAX_ERRORS_SHOWN);
    if hidden > 0 || summary.has_more_errors {
        println!("  ... more errors not shown");
    }
    if let Some(message) = &summary.message {
        println!("{}", message);
    }
}

fn show_history(limit: usize) -> anyhow::Result<()> {
    let entries = read_import_history(Some(limit))?;
    if entries.is_empty() {
        println!("No imports recorded yet");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}  {:<13} {:<9} ok={:<6} errors={:<6} {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.kind,
            format!("{:?}", entry.result),
            entry.success_count,
            entry.error_count,
            entry.file_name,
            entry
                .job_id
                .map(|id| format!(" (job {})", id))
                .unwrap_or_default(),
        );
    }
    Ok(())
}

fn configure(
    server_url: Option<String>,
    api_key: Option<String>,
    tenant_id: Option<String>,
    poll_interval: Option<u64>,
) -> anyhow::Result<()> {
    // Saved values only; environment overrides are not persisted
    let mut config =
        load_config_from(&get_config_file_path()?).context("Failed to load config")?;

    if let Some(url) = server_url {
        config.server_url = Some(url);
        config.require_server_url()?;
    }
    if api_key.is_some() {
        config.api_key = api_key;
    }
    if tenant_id.is_some() {
        config.tenant_id = tenant_id;
    }
    if let Some(secs) = poll_interval {
        config.poll_interval_secs = secs;
    }

    save_config(&config).context("Failed to save config")?;
    println!("Configuration saved");
    Ok(())
}
