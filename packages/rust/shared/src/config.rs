//! Application configuration for awardsync.
//!
//! User config lives at `~/.awardsync/awardsync.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AwardSyncError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "awardsync.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".awardsync";

/// Largest row count the push endpoint accepts in one request.
pub const MAX_PUSH_ROWS: usize = 10_000;

/// Fields requested from the search endpoint when none are configured.
pub const DEFAULT_FIELDS: &[&str] = &[
    "Award ID",
    "Award Amount",
    "Start Date",
    "End Date",
    "Awarding Agency",
    "Awarding Agency Code",
    "Awarding Sub Agency",
    "Awarding Sub Agency Code",
    "Recipient Name",
    "recipient_id",
    "Recipient Location",
];

// ---------------------------------------------------------------------------
// Config structs (matching awardsync.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Search endpoint and filter contract.
    #[serde(default)]
    pub search: SearchConfig,

    /// Paging and flushing.
    #[serde(default)]
    pub run: RunSection,

    /// Where rows go.
    #[serde(default)]
    pub output: OutputConfig,

    /// Remote push dataset settings.
    #[serde(default)]
    pub push: PushConfig,

    /// Output table names.
    #[serde(default)]
    pub tables: TablesConfig,
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Spending-by-award search URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Award type codes to filter on (A-D are contract subtypes).
    #[serde(default = "default_award_type_codes")]
    pub award_type_codes: Vec<String>,

    /// Field projection requested for every page.
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            award_type_codes: default_award_type_codes(),
            fields: default_fields(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.usaspending.gov/api/v2/search/spending_by_award/".into()
}
fn default_award_type_codes() -> Vec<String> {
    ["A", "B", "C", "D"].iter().map(|c| c.to_string()).collect()
}
fn default_fields() -> Vec<String> {
    DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[run]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Stop after this many pages even if more are available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,

    /// Flush once at the end (`bulk`) or every `batch_size` rows (`batched`).
    #[serde(default)]
    pub flush: FlushMode,

    /// Rows per flush in batched mode.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            max_pages: None,
            flush: FlushMode::default(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_batch_size() -> usize {
    500
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `file` writes CSVs, `push` posts rows to the analytics dataset.
    #[serde(default)]
    pub mode: OutputMode,

    /// Directory CSV files are written to.
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> String {
    ".".into()
}

/// `[push]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// REST API base, without trailing slash.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Name of the env var holding the dataset id.
    #[serde(default = "default_dataset_id_env")]
    pub dataset_id_env: String,

    /// Name of the env var holding the directory tenant id.
    #[serde(default = "default_tenant_id_env")]
    pub tenant_id_env: String,

    /// Name of the env var holding the client id.
    #[serde(default = "default_client_id_env")]
    pub client_id_env: String,

    /// Name of the env var holding the client secret (never store the secret itself).
    #[serde(default = "default_client_secret_env")]
    pub client_secret_env: String,

    /// OAuth scope requested for the bearer token.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Token endpoint; `{tenant}` is replaced with the tenant id.
    #[serde(default = "default_token_url_template")]
    pub token_url_template: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            dataset_id_env: default_dataset_id_env(),
            tenant_id_env: default_tenant_id_env(),
            client_id_env: default_client_id_env(),
            client_secret_env: default_client_secret_env(),
            scope: default_scope(),
            token_url_template: default_token_url_template(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.powerbi.com/v1.0/myorg".into()
}
fn default_dataset_id_env() -> String {
    "PBI_DATASET_ID".into()
}
fn default_tenant_id_env() -> String {
    "PBI_TENANT_ID".into()
}
fn default_client_id_env() -> String {
    "PBI_CLIENT_ID".into()
}
fn default_client_secret_env() -> String {
    "PBI_CLIENT_SECRET".into()
}
fn default_scope() -> String {
    "https://analysis.windows.net/powerbi/api/.default".into()
}
fn default_token_url_template() -> String {
    "https://login.microsoftonline.com/{tenant}/oauth2/v2.0/token".into()
}

/// `[tables]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_facts_table")]
    pub facts: String,
    #[serde(default = "default_recipients_table")]
    pub recipients: String,
    #[serde(default = "default_agencies_table")]
    pub agencies: String,
    #[serde(default = "default_sub_agencies_table")]
    pub sub_agencies: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            facts: default_facts_table(),
            recipients: default_recipients_table(),
            agencies: default_agencies_table(),
            sub_agencies: default_sub_agencies_table(),
        }
    }
}

fn default_facts_table() -> String {
    "FactAwards".into()
}
fn default_recipients_table() -> String {
    "DimRecipients".into()
}
fn default_agencies_table() -> String {
    "DimAgencies".into()
}
fn default_sub_agencies_table() -> String {
    "DimSubAgencies".into()
}

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

/// When accumulated fact rows are handed to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Once, after paging ends.
    #[default]
    Bulk,
    /// Every time the buffer reaches the batch size.
    Batched,
}

impl FromStr for FlushMode {
    type Err = AwardSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bulk" => Ok(Self::Bulk),
            "batched" => Ok(Self::Batched),
            other => Err(AwardSyncError::config(format!(
                "unknown flush mode '{other}': expected 'bulk' or 'batched'"
            ))),
        }
    }
}

/// Sink family used for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Local CSV files.
    #[default]
    File,
    /// Remote bulk-insert endpoint.
    Push,
}

impl FromStr for OutputMode {
    type Err = AwardSyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "push" => Ok(Self::Push),
            other => Err(AwardSyncError::config(format!(
                "unknown output mode '{other}': expected 'file' or 'push'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Run config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Closed date range sent as the search `time_period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Build a window, rejecting `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AwardSyncError::validation(format!(
                "start date {start} is after end date {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Federal fiscal year to date: October 1 through `today`.
    pub fn fiscal_year_to_date(today: NaiveDate) -> Self {
        let year = if today.month() >= 10 {
            today.year()
        } else {
            today.year() - 1
        };
        // October 1 exists in every year.
        let start = NaiveDate::from_ymd_opt(year, 10, 1).unwrap_or(today);
        Self { start, end: today }
    }
}

/// Resolved flush behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushPolicy {
    Bulk,
    Batched { batch_size: usize },
}

/// Values supplied on the command line; `None` falls back to the file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub max_pages: Option<u32>,
    pub batch_size: Option<usize>,
    pub flush: Option<FlushMode>,
    pub output: Option<OutputMode>,
    pub output_dir: Option<PathBuf>,
}

/// Runtime configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Search endpoint URL.
    pub endpoint: Url,
    /// Reporting period.
    pub window: DateWindow,
    /// Award type filter.
    pub award_type_codes: Vec<String>,
    /// Field projection.
    pub fields: Vec<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Page cap; `None` pages until the API runs out.
    pub max_pages: Option<u32>,
    /// Flush behaviour.
    pub flush: FlushPolicy,
    /// Sink family.
    pub output: OutputMode,
    /// CSV output directory.
    pub output_dir: PathBuf,
    /// Table names.
    pub tables: TablesConfig,
}

impl RunConfig {
    /// Merge the file config with CLI overrides and validate the result.
    ///
    /// Missing dates default to the fiscal year window ending `today`.
    pub fn resolve(config: &AppConfig, overrides: RunOverrides, today: NaiveDate) -> Result<Self> {
        let endpoint = Url::parse(&config.search.endpoint).map_err(|e| {
            AwardSyncError::config(format!(
                "invalid search endpoint '{}': {e}",
                config.search.endpoint
            ))
        })?;

        let fiscal = DateWindow::fiscal_year_to_date(today);
        let window = DateWindow::new(
            overrides.start_date.unwrap_or(fiscal.start),
            overrides.end_date.unwrap_or(fiscal.end),
        )?;

        if config.search.award_type_codes.is_empty() {
            return Err(AwardSyncError::validation(
                "at least one award type code is required",
            ));
        }
        if config.search.fields.is_empty() {
            return Err(AwardSyncError::validation(
                "the field projection list is empty",
            ));
        }

        let max_pages = overrides.max_pages.or(config.run.max_pages);
        if max_pages == Some(0) {
            return Err(AwardSyncError::validation("max_pages must be at least 1"));
        }

        let batch_size = overrides.batch_size.unwrap_or(config.run.batch_size);
        if batch_size == 0 || batch_size > MAX_PUSH_ROWS {
            return Err(AwardSyncError::validation(format!(
                "batch_size must be between 1 and {MAX_PUSH_ROWS}, got {batch_size}"
            )));
        }

        let flush = match overrides.flush.unwrap_or(config.run.flush) {
            FlushMode::Bulk => FlushPolicy::Bulk,
            FlushMode::Batched => FlushPolicy::Batched { batch_size },
        };

        Ok(Self {
            endpoint,
            window,
            award_type_codes: config.search.award_type_codes.clone(),
            fields: config.search.fields.clone(),
            timeout_secs: config.search.timeout_secs,
            max_pages,
            flush,
            output: overrides.output.unwrap_or(config.output.mode),
            output_dir: overrides
                .output_dir
                .unwrap_or_else(|| PathBuf::from(&config.output.dir)),
            tables: config.tables.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Push credentials
// ---------------------------------------------------------------------------

/// Secrets for push mode, read from the env vars named in `[push]`.
#[derive(Clone)]
pub struct PushCredentials {
    pub dataset_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for PushCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushCredentials")
            .field("dataset_id", &self.dataset_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl PushCredentials {
    /// Read every push credential from the environment.
    pub fn from_env(push: &PushConfig) -> Result<Self> {
        Ok(Self {
            dataset_id: require_env(&push.dataset_id_env)?,
            tenant_id: require_env(&push.tenant_id_env)?,
            client_id: require_env(&push.client_id_env)?,
            client_secret: require_env(&push.client_secret_env)?,
        })
    }
}

fn require_env(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(AwardSyncError::config(format!(
            "push credential not found. Set the {var_name} environment variable."
        ))),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.awardsync/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AwardSyncError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.awardsync/awardsync.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AwardSyncError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        AwardSyncError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AwardSyncError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AwardSyncError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AwardSyncError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
