//! netfeed - stream tshark packet fields into a Supabase table
//!
//! Reads a live interface or a pcap file through tshark, normalizes each
//! frame into a record and inserts them in batches over the REST API.

use clap::{Args, Parser, Subcommand, ValueEnum};
use netfeed_capture::{find_binary, ReaderSource, TsharkCapture, TsharkConfig};
use netfeed_core::config::load_dotenv;
use netfeed_core::{
    BatchSink, CaptureMode, CaptureSource, ConfigError, ConfigLoader, IngestReport,
    NetfeedConfig, Pipeline, PipelineConfig, ShutdownHandle, StopReason,
};
use netfeed_export::{DryRunSink, JsonlSink, RestSink, RestSinkConfig};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "netfeed")]
#[command(version)]
#[command(about = "Stream tshark packet fields into a Supabase table", long_about = None)]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    format: LogFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "NETFEED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture packets and insert them into storage
    Ingest(IngestArgs),

    /// Show environment, credentials and tshark availability
    Status,

    /// Parse saved `tshark -T fields` output and print records as JSON lines
    Parse {
        /// Input file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stop after this many records (0 = no limit)
        #[arg(long)]
        limit: Option<u64>,
    },
}

/// Options of the ingest command. Each one overrides config file and
/// environment values when given.
#[derive(Args, Debug, Default)]
struct IngestArgs {
    /// Capture mode: file or live
    #[arg(long)]
    mode: Option<CaptureMode>,

    /// Interface to capture on (live mode)
    #[arg(short, long)]
    iface: Option<String>,

    /// Capture file to read (file mode)
    #[arg(short, long)]
    pcap: Option<PathBuf>,

    /// Destination table
    #[arg(long)]
    table: Option<String>,

    /// Records per insert request
    #[arg(long)]
    batch_size: Option<usize>,

    /// Stop after this many records (0 = no limit)
    #[arg(long)]
    limit: Option<u64>,

    /// Parse and batch, but send nothing
    #[arg(long)]
    dry_run: bool,

    /// tshark executable name or path
    #[arg(long)]
    tshark: Option<String>,
}

impl IngestArgs {
    fn apply(self, config: &mut NetfeedConfig) {
        if let Some(mode) = self.mode {
            config.capture.mode = Some(mode);
        }
        if let Some(iface) = self.iface {
            config.capture.interface = Some(iface);
        }
        if let Some(pcap) = self.pcap {
            config.capture.pcap = Some(pcap);
        }
        if let Some(table) = self.table {
            config.storage.table = table;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch.batch_size = batch_size;
        }
        if let Some(limit) = self.limit {
            config.batch.limit = Some(limit);
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(tshark) = self.tshark {
            config.capture.tshark_path = tshark;
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Environment is mutated only here, before any runtime thread exists,
    // and before parsing so `.env` can supply NETFEED_CONFIG
    let dotenv = load_dotenv();
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli, dotenv))
}

async fn run(cli: Cli, dotenv: Option<PathBuf>) -> anyhow::Result<()> {
    let loader = ConfigLoader::new().with_cli_path(cli.config.clone());
    let config_file = loader.find_config_file();
    let loaded = loader.load();

    let config_level = loaded
        .as_ref()
        .map(|config| config.general.log_level.as_str())
        .unwrap_or("info");
    init_logging(cli.verbose, config_level, cli.format)?;

    if let Some(path) = &dotenv {
        info!("Environment loaded from {}", path.display());
    }

    match cli.command {
        Commands::Ingest(args) => {
            let mut config = loaded?;
            args.apply(&mut config);
            ingest_command(config).await
        }
        Commands::Status => {
            status_command(config_file.as_deref(), dotenv.as_deref(), loaded);
            Ok(())
        }
        Commands::Parse {
            input,
            output,
            limit,
        } => parse_command(input, output, limit).await,
    }
}

fn init_logging(verbose: u8, config_level: &str, format: LogFormat) -> anyhow::Result<()> {
    // CLI verbosity wins, then RUST_LOG, then the configured level
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config_level.to_lowercase())),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

/// Pick the sink for a resolved run
fn build_sink(run: &PipelineConfig) -> anyhow::Result<Box<dyn BatchSink>> {
    if run.dry_run {
        return Ok(Box::new(DryRunSink::new(run.table.as_str())));
    }
    let sink = RestSink::new(RestSinkConfig::for_table(&run.storage, &run.table))?;
    info!("Sending to {}", sink.url());
    Ok(Box::new(sink))
}

async fn ingest_command(config: NetfeedConfig) -> anyhow::Result<()> {
    let run = PipelineConfig::resolve(&config)?;
    let sink = build_sink(&run)?;
    let source = TsharkCapture::new(TsharkConfig::from(&run));
    info!("Capturing from {}", source.label());

    let shutdown = ShutdownHandle::new();
    let signals = shutdown.listen_for_signals();
    let result = Pipeline::from_config(&run, Box::new(source), sink, shutdown)
        .run()
        .await;
    signals.abort();

    match result {
        Ok(report) => {
            print_report(&report, run.dry_run);
            Ok(())
        }
        Err(e) => {
            error!("Ingest failed: {}", e);
            error!("Rows sent before the failure: {}", e.rows_sent());
            Err(e.into())
        }
    }
}

fn print_report(report: &IngestReport, dry_run: bool) {
    let verb = if dry_run { "would have sent" } else { "sent" };
    let reason = match report.stopped_by {
        StopReason::EndOfInput => "end of input",
        StopReason::LimitReached => "limit reached",
        StopReason::Cancelled => "interrupted",
    };
    println!(
        "Ingest finished ({}): {} {} rows in {} batches, {} of {} lines discarded",
        reason,
        verb,
        report.rows_sent,
        report.batches_sent,
        report.lines_discarded,
        report.lines_read
    );
}

async fn parse_command(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    limit: Option<u64>,
) -> anyhow::Result<()> {
    let source: Box<dyn CaptureSource> = match &input {
        Some(path) => Box::new(ReaderSource::open(path).await?),
        None => Box::new(ReaderSource::stdin()),
    };
    let sink: Box<dyn BatchSink> = match &output {
        Some(path) => Box::new(JsonlSink::create(path, false)?),
        None => Box::new(JsonlSink::stdout()),
    };

    let shutdown = ShutdownHandle::new();
    let signals = shutdown.listen_for_signals();
    let result = Pipeline::new(source, sink, shutdown)
        .with_limit(limit.filter(|limit| *limit > 0))
        .run()
        .await;
    signals.abort();

    let report = result?;
    info!(
        "Parsed {} records from {} lines ({} discarded)",
        report.rows_sent, report.lines_read, report.lines_discarded
    );
    Ok(())
}

fn status_command(
    config_file: Option<&Path>,
    dotenv: Option<&Path>,
    loaded: Result<NetfeedConfig, ConfigError>,
) {
    println!();
    println!("netfeed v{}", netfeed_core::VERSION);
    println!();
    println!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    #[cfg(unix)]
    println!("Running as root: {}", nix::unistd::geteuid().is_root());

    println!();
    match config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: none (defaults)"),
    }
    match dotenv {
        Some(path) => println!(".env: {}", path.display()),
        None => println!(".env: none"),
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("Config error: {}", e);
            NetfeedConfig::default()
        }
    };

    let tshark = &config.capture.tshark_path;
    match find_binary(tshark) {
        Some(path) => println!("tshark: {}", path.display()),
        None => println!("tshark: not found ({})", tshark),
    }

    println!();
    println!("Storage URL set: {}", is_set(config.storage.url.as_deref()));
    println!(
        "Storage API key set: {}",
        is_set(config.storage.api_key.as_deref())
    );
    println!("Table: {}", config.storage.table);
    println!("Batch size: {}", config.batch.batch_size);
    match config.batch.limit.filter(|limit| *limit > 0) {
        Some(limit) => println!("Limit: {}", limit),
        None => println!("Limit: none"),
    }
    println!("Dry run: {}", config.dry_run);
    println!();
}

fn is_set(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}
