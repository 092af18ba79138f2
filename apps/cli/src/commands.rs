//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use awardsync_core::{Pipeline, PipelineConfig, ProgressReporter, RunReport, SinkSet};
use awardsync_model::normalize;
use awardsync_search::{PageSource, SearchClient, SearchQuery};
use awardsync_shared::{
    AppConfig, FlushMode, OutputMode, PushCredentials, RunConfig, RunOverrides, TablesConfig,
    init_config, load_config, load_config_from, to_rows,
};
use awardsync_sinks::{ClientCredentialsProvider, CsvSink, PushTarget};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// awardsync: federal contract awards → fact + dimension tables.
#[derive(Parser)]
#[command(
    name = "awardsync",
    version,
    about = "Fetch contract awards from the federal spending API and load them as a star schema.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.awardsync/awardsync.toml.
    #[arg(long, global = true, env = "AWARDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fetch awards and write the fact and dimension tables.
    Run(RunArgs),

    /// Fetch the first page and print what one record normalizes to.
    Preview {
        /// Window start (YYYY-MM-DD). Defaults to the fiscal year start.
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// Window end (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end_date: Option<NaiveDate>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Flags for `awardsync run`. Each one overrides its config file value.
#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Window start (YYYY-MM-DD). Defaults to the fiscal year start.
    #[arg(long)]
    start_date: Option<NaiveDate>,

    /// Window end (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end_date: Option<NaiveDate>,

    /// Stop after this many pages.
    #[arg(long)]
    max_pages: Option<u32>,

    /// Flush mode: bulk or batched.
    #[arg(long)]
    flush: Option<FlushMode>,

    /// Rows per flush in batched mode.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Output: file or push.
    #[arg(long)]
    output: Option<OutputMode>,

    /// Directory for CSV output.
    #[arg(short, long = "out")]
    out_dir: Option<PathBuf>,
}

impl From<RunArgs> for RunOverrides {
    fn from(args: RunArgs) -> Self {
        Self {
            start_date: args.start_date,
            end_date: args.end_date,
            max_pages: args.max_pages,
            batch_size: args.batch_size,
            flush: args.flush,
            output: args.output,
            output_dir: args.out_dir,
        }
    }
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "awardsync=info",
        1 => "awardsync=debug",
        _ => "awardsync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Run(args) => cmd_run(config_path.as_deref(), args.into()).await,
        Command::Preview {
            start_date,
            end_date,
        } => {
            let overrides = RunOverrides {
                start_date,
                end_date,
                ..RunOverrides::default()
            };
            cmd_preview(config_path.as_deref(), overrides).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn load(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, overrides: RunOverrides) -> Result<()> {
    let app = load(config_path)?;
    let config = RunConfig::resolve(&app, overrides, today())?;

    info!(
        start = %config.window.start,
        end = %config.window.end,
        output = ?config.output,
        flush = ?config.flush,
        "resolved run configuration"
    );

    // Credentials and token come first so a bad setup fails before any fetch.
    let sinks = build_sinks(&app, &config).await?;
    let client = SearchClient::new(SearchQuery::from(&config))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current page");
            on_signal.cancel();
        }
    });

    let reporter = CliProgress::new();
    let output = Pipeline::new(PipelineConfig::from(&config), &client, sinks)
        .with_progress(&reporter)
        .run(&cancel)
        .await;

    print_summary(&output.report, &config);

    match output.report.failure {
        None => Ok(()),
        Some(failure) => {
            if !output.pending_facts.is_empty() {
                println!("  Unflushed fact rows: {}", output.pending_facts.len());
                println!();
            }
            Err(eyre!(
                "run failed during {:?} (page {}): {}",
                failure.phase,
                failure.page,
                failure.error
            ))
        }
    }
}

async fn build_sinks(app: &AppConfig, config: &RunConfig) -> Result<SinkSet> {
    let tables: &TablesConfig = &config.tables;

    let sinks = match config.output {
        OutputMode::File => {
            let dir = &config.output_dir;
            SinkSet::facts_only(Box::new(CsvSink::new(dir, &tables.facts))).with_dimensions(
                Box::new(CsvSink::new(dir, &tables.recipients)),
                Box::new(CsvSink::new(dir, &tables.agencies)),
                Box::new(CsvSink::new(dir, &tables.sub_agencies)),
            )
        }
        OutputMode::Push => {
            let creds = PushCredentials::from_env(&app.push)?;
            let provider = ClientCredentialsProvider::from_config(&app.push, &creds)?;
            let target = PushTarget::connect(&app.push.api_base, &creds.dataset_id, &provider).await?;
            info!(dataset = %creds.dataset_id, "push target connected");

            SinkSet::facts_only(Box::new(target.sink(&tables.facts)?)).with_dimensions(
                Box::new(target.sink(&tables.recipients)?),
                Box::new(target.sink(&tables.agencies)?),
                Box::new(target.sink(&tables.sub_agencies)?),
            )
        }
    };

    Ok(sinks)
}

fn print_summary(report: &RunReport, config: &RunConfig) {
    println!();
    if report.succeeded() {
        println!("  Run complete.");
    } else {
        println!("  Run failed; partial progress below.");
    }
    println!("  Run ID:        {}", report.run_id);
    println!("  Window:        {} .. {}", config.window.start, config.window.end);
    println!("  Pages:         {}", report.pages_fetched);
    println!("  Records:       {}", report.records_normalized);
    println!(
        "  Facts flushed: {} ({} batches)",
        report.facts_flushed, report.fact_batches
    );
    println!("  Recipients:    {}", report.dimensions.recipients);
    println!("  Agencies:      {}", report.dimensions.agencies);
    println!("  Sub-agencies:  {}", report.dimensions.sub_agencies);
    if let Some(stop) = report.stop_reason {
        println!("  Stopped:       {stop:?}");
    }
    if config.output == OutputMode::File {
        println!("  Output:        {}", config.output_dir.display());
    }
    println!("  Time:          {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// preview
// ---------------------------------------------------------------------------

async fn cmd_preview(config_path: Option<&Path>, overrides: RunOverrides) -> Result<()> {
    let app = load(config_path)?;
    let config = RunConfig::resolve(&app, overrides, today())?;
    let client = SearchClient::new(SearchQuery::from(&config))?;

    let page = client.fetch_page(1).await?;
    let Some(first) = page.records.first() else {
        println!("No records for {} .. {}", config.window.start, config.window.end);
        return Ok(());
    };

    let mut keys: Vec<&str> = first.keys().map(String::as_str).collect();
    keys.sort_unstable();

    println!("Raw keys ({}):", keys.len());
    for key in keys {
        println!("  {key}");
    }

    let normalized = normalize(first);
    let rows = to_rows(std::slice::from_ref(&normalized.fact))?;
    println!();
    println!("Fact row:");
    println!("{}", serde_json::to_string_pretty(&rows[0])?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn page_fetched(&self, page: u32, records: usize) {
        self.spinner
            .set_message(format!("Fetched page {page} ({records} records)"));
    }

    fn batch_flushed(&self, sink: &str, rows: usize) {
        self.spinner.set_message(format!("Flushed {rows} rows → {sink}"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
