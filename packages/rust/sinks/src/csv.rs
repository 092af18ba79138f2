//! Local CSV file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use awardsync_shared::{AwardSyncError, Result, Row};

use crate::Sink;

/// Writes one table to `<dir>/<table>.csv`.
///
/// The header comes from the key order of the first row ever written; later
/// batches are appended in that column order.
#[derive(Debug)]
pub struct CsvSink {
    name: String,
    path: PathBuf,
    columns: Option<Vec<String>>,
    rows_written: usize,
}

impl CsvSink {
    /// Sink for `table` inside `dir`. Nothing touches disk until the first
    /// non-empty write.
    pub fn new(dir: &Path, table: &str) -> Self {
        let file_name = format!("{table}.csv");
        Self {
            path: dir.join(&file_name),
            name: file_name,
            columns: None,
            rows_written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Filesystem failures surface as sink errors naming the path.
    fn fs_error(&self, path: &Path, e: std::io::Error) -> AwardSyncError {
        AwardSyncError::sink(&self.name, format!("{}: {e}", path.display()))
    }

    /// Serialize a batch in memory so it can be appended with one write.
    fn encode(&self, columns: &[String], rows: &[Row], with_header: bool) -> Result<Vec<u8>> {
        let mut writer = ::csv::Writer::from_writer(Vec::new());

        if with_header {
            writer
                .write_record(columns)
                .map_err(|e| AwardSyncError::sink(&self.name, e.to_string()))?;
        }

        for row in rows {
            writer
                .write_record(columns.iter().map(|c| cell(row.get(c))))
                .map_err(|e| AwardSyncError::sink(&self.name, e.to_string()))?;
        }

        writer
            .into_inner()
            .map_err(|e| AwardSyncError::sink(&self.name, e.to_string()))
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, rows: &[Row]) -> Result<()> {
        let Some(first) = rows.first() else {
            return Ok(());
        };

        let fresh = self.columns.is_none();
        let columns: Vec<String> = match &self.columns {
            Some(columns) => columns.clone(),
            None => first.keys().cloned().collect(),
        };

        let bytes = self.encode(&columns, rows, fresh)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.fs_error(parent, e))?;
        }

        let mut file = if fresh {
            File::create(&self.path)
        } else {
            OpenOptions::new().append(true).open(&self.path)
        }
        .map_err(|e| self.fs_error(&self.path, e))?;

        file.write_all(&bytes)
            .and_then(|()| file.flush())
            .map_err(|e| self.fs_error(&self.path, e))?;

        self.columns = Some(columns);
        self.rows_written += rows.len();
        debug!(path = %self.path.display(), rows = rows.len(), total = self.rows_written, "csv batch written");

        Ok(())
    }
}

/// Render a JSON value as a CSV cell.
fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
