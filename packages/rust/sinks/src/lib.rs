//! Write targets for normalized rows.
//!
//! This crate provides:
//! - [`Sink`]: "accept a batch of rows, succeed or fail for that batch"
//! - [`CsvSink`]: one local CSV file per table
//! - [`PushSink`] / [`PushTarget`]: remote bulk-insert over HTTP with a bearer token
//! - [`TokenProvider`]: bearer token acquisition for push targets

pub mod csv;
pub mod push;
pub mod token;

use async_trait::async_trait;
use awardsync_shared::{Result, Row};

pub use crate::csv::CsvSink;
pub use push::{PushSink, PushTarget};
pub use token::{ClientCredentialsProvider, StaticToken, TokenProvider};

/// A batch-oriented write target.
///
/// Each `write` call is one delivery: either the whole batch is accepted or
/// the call fails. Writing an empty batch is a no-op.
#[async_trait]
pub trait Sink: Send {
    /// Human-readable target name used in logs and errors.
    fn name(&self) -> &str;

    /// Deliver one batch of rows.
    async fn write(&mut self, rows: &[Row]) -> Result<()>;
}
