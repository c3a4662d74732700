use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use docflow::adapters::{
    ImageThumbnailer, InMemoryFileCatalog, InMemoryJobRepository, LocalStorage,
    PlainTextConverter, SignatureScanner,
};
use docflow::ports::{FileRecord, Storage, UploadMeta};
use docflow::scheduler::{
    EngineDeps, FileId, JobSnapshot, Priority, RetentionSweeper, Scheduler, StageFlags,
    StagePolicy, StageType,
};
use docflow::shutdown::install_shutdown_handler;
use docflow::worker::{standard_registry, Collaborators};
use docflow::{EngineConfig, ThumbnailSize};

#[derive(Parser, Debug)]
#[command(name = "docflow")]
#[command(version)]
#[command(about = "Per-file job orchestration for document post-processing")]
#[command(propagate_version = true)]
struct Args {
    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Ingest local files and run every required stage to completion
    Process(ProcessArgs),

    /// Show which stages a content type requires
    Stages {
        /// MIME type, e.g. "image/jpeg"
        content_type: String,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Parser, Debug)]
struct ProcessArgs {
    /// Files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Directory used as object storage (a temporary directory if omitted)
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Maximum jobs in Processing at once
    #[arg(long, default_value = "3")]
    max_concurrency: usize,

    /// Stages the policy may select (comma-separated). Defaults to all.
    #[arg(long, value_delimiter = ',')]
    stages: Vec<StageType>,

    /// Thumbnail size as WxH; repeat for several sizes
    #[arg(long = "thumbnail-size")]
    thumbnail_sizes: Vec<ThumbnailSize>,

    /// Dispatcher fallback tick in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Retention window for terminal jobs, in days
    #[arg(long, default_value = "30")]
    retention_days: u64,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "300")]
    timeout_secs: u64,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,docflow=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_format);

    match args.command {
        Commands::Process(process_args) => run_process(process_args).await,
        Commands::Stages {
            content_type,
            output,
        } => print_stages(&content_type, &output),
    }
}

// =============================================================================
// Stages
// =============================================================================

#[derive(Serialize)]
struct StageRow {
    stage: StageType,
    priority: Priority,
}

fn print_stages(content_type: &str, output: &OutputFormat) -> anyhow::Result<()> {
    let stages = StagePolicy::default().required_stages(content_type);
    match output {
        OutputFormat::Json => {
            let rows: Vec<StageRow> = stages
                .iter()
                .map(|stage| StageRow {
                    stage: *stage,
                    priority: stage.priority(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            println!("{:<22} PRIORITY", "STAGE");
            println!("{}", "-".repeat(32));
            for stage in stages {
                println!("{:<22} {}", stage.as_str(), stage.priority());
            }
        }
    }
    Ok(())
}

// =============================================================================
// Process
// =============================================================================

fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "rtf" => "application/rtf",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        _ => "application/octet-stream",
    }
}

fn engine_config(args: &ProcessArgs) -> EngineConfig {
    let mut config = EngineConfig::new(args.max_concurrency)
        .with_dispatch_tick_interval(Duration::from_millis(args.tick_ms))
        .with_retention_window(Duration::from_secs(args.retention_days * 24 * 60 * 60));
    if !args.stages.is_empty() {
        config = config.with_enabled_stages(args.stages.iter().copied());
    }
    if !args.thumbnail_sizes.is_empty() {
        config = config.with_thumbnail_sizes(args.thumbnail_sizes.clone());
    }
    config
}

async fn run_process(args: ProcessArgs) -> anyhow::Result<()> {
    let config = engine_config(&args);
    let shutdown = install_shutdown_handler().context("failed to install signal handlers")?;

    // Keep the temporary directory alive until the run is over.
    let temp_dir;
    let storage_root = match &args.storage_dir {
        Some(dir) => dir.clone(),
        None => {
            temp_dir = tempfile::tempdir().context("failed to create storage directory")?;
            temp_dir.path().to_path_buf()
        }
    };

    let storage = Arc::new(LocalStorage::new(&storage_root));
    let catalog = Arc::new(InMemoryFileCatalog::new());
    let repository = Arc::new(InMemoryJobRepository::new());

    let collaborators = Collaborators {
        storage: storage.clone(),
        scanner: Arc::new(SignatureScanner::new()),
        thumbnails: Arc::new(ImageThumbnailer::new()),
        converter: Arc::new(PlainTextConverter::new()),
    };
    let deps = EngineDeps {
        repository: repository.clone(),
        catalog: catalog.clone(),
        registry: standard_registry(&collaborators, config.thumbnail_sizes.clone()),
        policy: StagePolicy::new(StageFlags::from_enabled(config.enabled_stages.iter().copied())),
    };

    let (scheduler, dispatcher) = Scheduler::new(&config, deps, shutdown.clone());
    let dispatcher_handle = tokio::spawn(dispatcher.run());
    let sweeper_handle = tokio::spawn(
        RetentionSweeper::new(repository.clone(), &config).run(shutdown.clone()),
    );

    let mut filenames = HashMap::new();
    let mut file_ids = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content_type = guess_content_type(path).to_string();
        let file_id = FileId::new();
        let size_bytes = data.len() as u64;

        let stored = storage
            .upload(
                Bytes::from(data),
                UploadMeta {
                    key: format!("uploads/{}/{}", file_id, filename),
                    content_type: content_type.clone(),
                },
            )
            .await
            .with_context(|| format!("failed to store {}", path.display()))?;

        catalog
            .register(FileRecord {
                id: file_id,
                filename: filename.clone(),
                content_type,
                storage_key: stored.key,
                size_bytes,
            })
            .await;

        let job_ids = scheduler.process_file(file_id, "cli", None).await?;
        tracing::info!(file = %filename, jobs = job_ids.len(), "File accepted");
        filenames.insert(file_id, filename);
        file_ids.push(file_id);
    }

    let finished = wait_until_terminal(
        &scheduler,
        &file_ids,
        Duration::from_secs(args.timeout_secs),
        &shutdown,
    )
    .await?;

    shutdown.cancel();
    let _ = dispatcher_handle.await;
    let _ = sweeper_handle.await;

    let mut jobs = Vec::new();
    for file_id in &file_ids {
        jobs.extend(scheduler.get_file_jobs(*file_id).await?);
    }
    print_jobs(&jobs, &filenames, &args.output)?;

    if !finished {
        anyhow::bail!("stopped before every job reached a terminal state");
    }
    Ok(())
}

/// Poll until every job of every file is terminal. Returns false on timeout
/// or shutdown.
async fn wait_until_terminal(
    scheduler: &Scheduler,
    file_ids: &[FileId],
    timeout: Duration,
    shutdown: &tokio_util::sync::CancellationToken,
) -> anyhow::Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut done = true;
        for file_id in file_ids {
            let jobs = scheduler.get_file_jobs(*file_id).await?;
            if jobs.iter().any(|job| !job.is_terminal()) {
                done = false;
                break;
            }
        }
        if done {
            return Ok(true);
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(false),
            _ = tokio::time::sleep_until(deadline) => return Ok(false),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}

fn print_jobs(
    jobs: &[JobSnapshot],
    filenames: &HashMap<FileId, String>,
    output: &OutputFormat,
) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(jobs)?);
        }
        OutputFormat::Table => {
            if jobs.is_empty() {
                println!("No jobs created.");
                return Ok(());
            }
            println!(
                "{:<24} {:<22} {:<8} {:<10} {:>4}  ERROR",
                "FILE", "STAGE", "PRIORITY", "STATUS", "PCT"
            );
            println!("{}", "-".repeat(80));
            for job in jobs {
                let filename = filenames
                    .get(&job.file_id)
                    .map(String::as_str)
                    .unwrap_or("?");
                println!(
                    "{:<24} {:<22} {:<8} {:<10} {:>3}%  {}",
                    truncate(filename, 24),
                    job.stage.as_str(),
                    job.priority,
                    job.status,
                    job.progress,
                    job.error_message.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
