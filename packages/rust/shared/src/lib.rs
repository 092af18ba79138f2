//! Shared types, error model, and configuration for awardsync.
//!
//! This crate is the foundation depended on by all other awardsync crates.
//! It provides:
//! - [`AwardSyncError`]: the unified error type
//! - Row types ([`FactRow`], [`RecipientRecord`], [`AgencyRecord`], [`SubAgencyRecord`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_FIELDS, DateWindow, FlushMode, FlushPolicy, MAX_PUSH_ROWS, OutputConfig,
    OutputMode, PushConfig, PushCredentials, RunConfig, RunOverrides, RunSection, SearchConfig,
    TablesConfig, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{AwardSyncError, Result};
pub use types::{
    AgencyRecord, FactRow, Location, RawRecord, RecipientRecord, Row, SubAgencyRecord, to_rows,
};
