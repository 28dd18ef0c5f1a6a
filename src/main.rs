/// Version injected at compile time via CLOUD_COLLECTOR_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUD_COLLECTOR_VERSION") {
    Some(v) => v,
    None => "dev",
};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cloud_collector::collector::{called_collect_apis, list_regions};
use cloud_collector::feedback::LogFeedback;
use cloud_collector::graph::{Account, GraphExport};
use cloud_collector::replay::ReplayFile;
use cloud_collector::resource::ResourceRegistry;
use cloud_collector::{AccountCollector, CollectionReport, CollectorConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Collect all resources of a cloud account into a graph
#[derive(Parser, Debug)]
#[command(name = "cloud-collector", version = VERSION, about, long_about = None)]
struct Args {
    /// Replay file with account, regions, kinds and recorded responses
    #[arg(short, long)]
    input: PathBuf,

    /// Collector configuration (defaults to the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the report and graph here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print the APIs a collection run calls and exit
    #[arg(long)]
    list_apis: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    // RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(LevelFilter::from_level(tracing_level).into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(log_file.is_none())
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloud-collector {} started with log level: {:?}", VERSION, level);
    Ok(Some(guard))
}

/// Everything a run writes out
#[derive(Serialize)]
struct Output {
    report: CollectionReport,
    graph: GraphExport,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_ref())?;

    let config = CollectorConfig::load(args.config.as_deref())?;
    let replay = ReplayFile::load(&args.input)?;
    let registry = Arc::new(ResourceRegistry::from_definitions(&replay.kinds));

    if args.list_apis {
        for api in called_collect_apis(&registry) {
            println!("{api}");
        }
        return Ok(());
    }

    let client = Arc::new(replay.client());
    let regions = if replay.regions.is_empty() {
        list_regions(client.as_ref()).await?
    } else {
        replay.regions.clone()
    };

    let collector = AccountCollector::new(
        config,
        &replay.cloud,
        Account::new(&replay.account.id, &replay.account.name),
        &regions,
        registry,
        client,
        Arc::new(LogFeedback),
    );

    let report = collector.collect().await;
    if !report.skipped_regions.is_empty() {
        tracing::warn!("Skipped regions: {}", report.skipped_regions.join(", "));
    }

    let output = Output {
        report,
        graph: collector.export(),
    };
    let json = serde_json::to_string_pretty(&output)?;
    match &args.output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write output {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}
