//! Run outcome types returned by the pipeline driver.

use std::time::Duration;

use uuid::Uuid;

use awardsync_model::{DimensionCounts, DimensionTables};
use awardsync_shared::{AwardSyncError, FactRow};

/// Driver state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Fetching,
    Normalizing,
    Flushing,
    Done,
    Failed,
}

/// Why paging ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page came back with zero records.
    EmptyPage,
    /// `page_metadata.hasNext` was false.
    NoNextPage,
    /// The configured page cap was reached.
    PageCap,
    /// The caller cancelled between pages.
    Cancelled,
}

/// Where a failed run broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Fetch,
    Flush,
}

/// The error that ended a run, with its location.
#[derive(Debug)]
pub struct RunFailure {
    pub phase: RunPhase,
    /// Page being fetched, or the last page fetched before a flush failed.
    pub page: u32,
    pub error: AwardSyncError,
}

/// Progress summary, complete for both successful and failed runs.
#[derive(Debug)]
pub struct RunReport {
    /// Identifier attached to every log line of the run.
    pub run_id: Uuid,
    /// Pages that returned a successful response (empty pages included).
    pub pages_fetched: u32,
    /// Records turned into fact rows.
    pub records_normalized: usize,
    /// Fact rows a sink accepted.
    pub facts_flushed: usize,
    /// Successful fact-sink calls.
    pub fact_batches: usize,
    /// Dimension table sizes at the end of the run.
    pub dimensions: DimensionCounts,
    /// Set once paging ended normally.
    pub stop_reason: Option<StopReason>,
    /// `Done` or `Failed`.
    pub state: PipelineState,
    /// Set when `state` is `Failed`.
    pub failure: Option<RunFailure>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done && self.failure.is_none()
    }
}

/// Everything a run hands back to its caller.
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    /// Fact rows that were accumulated but never accepted by a sink.
    pub pending_facts: Vec<FactRow>,
    /// Frozen dimension tables.
    pub dimensions: DimensionTables,
}
