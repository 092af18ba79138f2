//! Page loop: fetch → normalize → merge → flush.
//!
//! One driver covers both output styles. `FlushPolicy::Bulk` hands every fact
//! row to the sink once paging ends; `FlushPolicy::Batched` flushes whenever
//! the buffer reaches the batch size. Pages are fetched strictly in order and
//! at most one flush is ever in flight.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use awardsync_model::{DimensionMerger, DimensionTables, Normalized, normalize};
use awardsync_search::{Page, PageSource};
use awardsync_shared::{FactRow, FlushPolicy, Result, Row, RunConfig, to_rows};
use awardsync_sinks::Sink;

use crate::report::{
    PipelineState, RunFailure, RunOutput, RunPhase, RunReport, StopReason,
};

// ---------------------------------------------------------------------------
// Configuration & collaborators
// ---------------------------------------------------------------------------

/// The subset of [`RunConfig`] the driver acts on.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Stop after this many pages.
    pub max_pages: Option<u32>,
    /// When fact rows are flushed.
    pub flush: FlushPolicy,
}

impl From<&RunConfig> for PipelineConfig {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            flush: config.flush,
        }
    }
}

/// Destination for the fact table and, optionally, each dimension table.
pub struct SinkSet {
    pub facts: Box<dyn Sink>,
    pub recipients: Option<Box<dyn Sink>>,
    pub agencies: Option<Box<dyn Sink>>,
    pub sub_agencies: Option<Box<dyn Sink>>,
}

impl SinkSet {
    /// Facts only; dimension tables are returned to the caller but not written.
    pub fn facts_only(facts: Box<dyn Sink>) -> Self {
        Self {
            facts,
            recipients: None,
            agencies: None,
            sub_agencies: None,
        }
    }

    /// Also write the three dimension tables once paging ends.
    pub fn with_dimensions(
        mut self,
        recipients: Box<dyn Sink>,
        agencies: Box<dyn Sink>,
        sub_agencies: Box<dyn Sink>,
    ) -> Self {
        self.recipients = Some(recipients);
        self.agencies = Some(agencies);
        self.sub_agencies = Some(sub_agencies);
        self
    }
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called after each successful page response.
    fn page_fetched(&self, page: u32, records: usize);
    /// Called after a sink accepts a batch.
    fn batch_flushed(&self, sink: &str, rows: usize);
    /// Called once when the run ends, successfully or not.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn page_fetched(&self, _page: u32, _records: usize) {}
    fn batch_flushed(&self, _sink: &str, _rows: usize) {}
    fn done(&self, _report: &RunReport) {}
}

/// Next page to request.
#[derive(Debug, Clone, Copy)]
struct PageCursor {
    page: u32,
    has_next: bool,
}

impl PageCursor {
    fn new() -> Self {
        Self {
            page: 1,
            has_next: true,
        }
    }

    fn advance(&mut self, has_next: bool) {
        self.page += 1;
        self.has_next = has_next;
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One pipeline run. Consumed by [`Pipeline::run`].
pub struct Pipeline<'a> {
    config: PipelineConfig,
    source: &'a dyn PageSource,
    sinks: SinkSet,
    progress: &'a dyn ProgressReporter,
    run_id: Uuid,

    cursor: PageCursor,
    buffer: Vec<FactRow>,
    merger: DimensionMerger,
    frozen: Option<DimensionTables>,

    pages_fetched: u32,
    last_page: u32,
    records_normalized: usize,
    facts_flushed: usize,
    fact_batches: usize,
    stop: Option<StopReason>,
    failure: Option<RunFailure>,
}

impl<'a> Pipeline<'a> {
    /// A batch size of 0 is raised to 1.
    pub fn new(mut config: PipelineConfig, source: &'a dyn PageSource, sinks: SinkSet) -> Self {
        if let FlushPolicy::Batched { batch_size: 0 } = config.flush {
            warn!("batch size 0 is not valid, flushing one row at a time");
            config.flush = FlushPolicy::Batched { batch_size: 1 };
        }

        Self {
            config,
            source,
            sinks,
            progress: &SilentProgress,
            run_id: Uuid::now_v7(),
            cursor: PageCursor::new(),
            buffer: Vec::new(),
            merger: DimensionMerger::new(),
            frozen: None,
            pages_fetched: 0,
            last_page: 0,
            records_normalized: 0,
            facts_flushed: 0,
            fact_batches: 0,
            stop: None,
            failure: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Drive the state machine to `Done` or `Failed`.
    ///
    /// `cancel` is checked before every page request.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub async fn run(mut self, cancel: &CancellationToken) -> RunOutput {
        let start = Instant::now();

        info!(
            max_pages = ?self.config.max_pages,
            flush = ?self.config.flush,
            facts = self.sinks.facts.name(),
            "starting award pipeline"
        );

        let mut state = PipelineState::Fetching;
        let mut current: Option<Page> = None;

        loop {
            let next = match state {
                PipelineState::Fetching => self.fetch_next(cancel, &mut current).await,
                PipelineState::Normalizing => self.normalize_page(current.take()),
                PipelineState::Flushing => self.flush().await,
                PipelineState::Done | PipelineState::Failed => break,
            };
            trace!(from = ?state, to = ?next, "state transition");
            state = next;
        }

        self.finish(state, start)
    }

    async fn fetch_next(
        &mut self,
        cancel: &CancellationToken,
        slot: &mut Option<Page>,
    ) -> PipelineState {
        if cancel.is_cancelled() {
            info!(next_page = self.cursor.page, "cancelled between pages");
            self.stop = Some(StopReason::Cancelled);
            return PipelineState::Flushing;
        }

        let page_no = self.cursor.page;
        match self.source.fetch_page(page_no).await {
            Ok(page) => {
                self.pages_fetched += 1;
                self.last_page = page_no;
                self.progress.page_fetched(page_no, page.records.len());
                debug!(
                    page = page_no,
                    records = page.records.len(),
                    has_next = page.has_next,
                    "page fetched"
                );

                if page.records.is_empty() {
                    self.stop = Some(StopReason::EmptyPage);
                    PipelineState::Flushing
                } else {
                    *slot = Some(page);
                    PipelineState::Normalizing
                }
            }
            Err(error) => {
                warn!(page = page_no, %error, "page fetch failed");
                self.failure = Some(RunFailure {
                    phase: RunPhase::Fetch,
                    page: page_no,
                    error,
                });
                PipelineState::Failed
            }
        }
    }

    fn normalize_page(&mut self, page: Option<Page>) -> PipelineState {
        let Some(page) = page else {
            return PipelineState::Fetching;
        };

        if self.records_normalized == 0 {
            if let Some(first) = page.records.first() {
                let mut keys: Vec<&str> = first.keys().map(String::as_str).collect();
                keys.sort_unstable();
                debug!(?keys, "sample raw record keys");
            }
        }

        for record in &page.records {
            let Normalized { fact, fragments } = normalize(record);
            self.buffer.push(fact);
            self.merger.merge(fragments);
            self.records_normalized += 1;
        }

        let fetched = self.cursor.page;
        self.cursor.advance(page.has_next);

        if !self.cursor.has_next {
            self.stop = Some(StopReason::NoNextPage);
        } else if self.config.max_pages.is_some_and(|cap| fetched >= cap) {
            self.stop = Some(StopReason::PageCap);
        }

        if self.stop.is_some() || self.batch_due() {
            PipelineState::Flushing
        } else {
            PipelineState::Fetching
        }
    }

    fn batch_due(&self) -> bool {
        match self.config.flush {
            FlushPolicy::Batched { batch_size } => self.buffer.len() >= batch_size,
            FlushPolicy::Bulk => false,
        }
    }

    async fn flush(&mut self) -> PipelineState {
        let result = if self.stop.is_some() {
            self.flush_final().await
        } else {
            self.flush_full_batches().await
        };

        match result {
            Ok(()) if self.stop.is_some() => PipelineState::Done,
            Ok(()) => PipelineState::Fetching,
            Err(error) => {
                warn!(%error, flushed = self.facts_flushed, "flush failed");
                self.failure = Some(RunFailure {
                    phase: RunPhase::Flush,
                    page: self.last_page,
                    error,
                });
                PipelineState::Failed
            }
        }
    }

    /// Flush as many full batches as the buffer holds.
    async fn flush_full_batches(&mut self) -> Result<()> {
        if let FlushPolicy::Batched { batch_size } = self.config.flush {
            while batch_size > 0 && self.buffer.len() >= batch_size {
                self.flush_facts(batch_size).await?;
            }
        }
        Ok(())
    }

    /// End of paging: drain the buffer, then freeze and write dimensions.
    async fn flush_final(&mut self) -> Result<()> {
        self.flush_full_batches().await?;
        if !self.buffer.is_empty() {
            self.flush_facts(self.buffer.len()).await?;
        }

        let tables = std::mem::take(&mut self.merger).finish();
        let result = self.flush_dimensions(&tables).await;
        self.frozen = Some(tables);
        result
    }

    /// Hand the oldest `n` buffered rows to the fact sink. The rows leave the
    /// buffer only once the sink accepts them.
    async fn flush_facts(&mut self, n: usize) -> Result<()> {
        let rows = to_rows(&self.buffer[..n])?;
        self.sinks.facts.write(&rows).await?;

        self.buffer.drain(..n);
        self.facts_flushed += n;
        self.fact_batches += 1;
        self.progress.batch_flushed(self.sinks.facts.name(), n);
        debug!(
            sink = self.sinks.facts.name(),
            rows = n,
            total = self.facts_flushed,
            "fact batch flushed"
        );
        Ok(())
    }

    async fn flush_dimensions(&mut self, tables: &DimensionTables) -> Result<()> {
        let chunk = match self.config.flush {
            FlushPolicy::Batched { batch_size } => Some(batch_size),
            FlushPolicy::Bulk => None,
        };
        let progress = self.progress;

        if let Some(sink) = self.sinks.recipients.as_deref_mut() {
            write_table(sink, &to_rows(&tables.recipients)?, chunk, progress).await?;
        }
        if let Some(sink) = self.sinks.agencies.as_deref_mut() {
            write_table(sink, &to_rows(&tables.agencies)?, chunk, progress).await?;
        }
        if let Some(sink) = self.sinks.sub_agencies.as_deref_mut() {
            write_table(sink, &to_rows(&tables.sub_agencies)?, chunk, progress).await?;
        }
        Ok(())
    }

    fn finish(self, state: PipelineState, start: Instant) -> RunOutput {
        let dimensions = match self.frozen {
            Some(tables) => tables,
            None => self.merger.finish(),
        };

        let report = RunReport {
            run_id: self.run_id,
            pages_fetched: self.pages_fetched,
            records_normalized: self.records_normalized,
            facts_flushed: self.facts_flushed,
            fact_batches: self.fact_batches,
            dimensions: dimensions.counts(),
            stop_reason: self.stop,
            state,
            failure: self.failure,
            elapsed: start.elapsed(),
        };

        match &report.failure {
            Some(failure) => warn!(
                phase = ?failure.phase,
                page = failure.page,
                pages_fetched = report.pages_fetched,
                records = report.records_normalized,
                flushed = report.facts_flushed,
                error = %failure.error,
                "award pipeline failed"
            ),
            None => info!(
                stop = ?report.stop_reason,
                pages_fetched = report.pages_fetched,
                records = report.records_normalized,
                flushed = report.facts_flushed,
                recipients = report.dimensions.recipients,
                agencies = report.dimensions.agencies,
                sub_agencies = report.dimensions.sub_agencies,
                elapsed_ms = report.elapsed.as_millis(),
                "award pipeline complete"
            ),
        }

        self.progress.done(&report);

        RunOutput {
            report,
            pending_facts: self.buffer,
            dimensions,
        }
    }
}

/// Write one dimension table, split into `chunk`-sized calls when set.
async fn write_table(
    sink: &mut dyn Sink,
    rows: &[Row],
    chunk: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    if rows.is_empty() {
        debug!(sink = sink.name(), "dimension table empty, nothing to write");
        return Ok(());
    }

    let size = chunk.unwrap_or(rows.len()).max(1);
    for batch in rows.chunks(size) {
        sink.write(batch).await?;
        progress.batch_flushed(sink.name(), batch.len());
    }
    debug!(sink = sink.name(), rows = rows.len(), "dimension table written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use awardsync_shared::{AwardSyncError, RawRecord};
    use serde_json::{Value, json};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Serves scripted responses in order and records requested page numbers.
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Page>>>,
        requested: Mutex<Vec<u32>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Page>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<u32> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn fetch_page(&self, page: u32) -> Result<Page> {
            self.requested.lock().unwrap().push(page);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Page::default()))
        }
    }

    /// Records every accepted batch; can be told to fail on the n-th call.
    #[derive(Clone)]
    struct RecordingSink {
        name: String,
        batches: Arc<Mutex<Vec<Vec<Row>>>>,
        calls: Arc<Mutex<usize>>,
        fail_on_call: Option<usize>,
    }

    impl RecordingSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                batches: Arc::new(Mutex::new(Vec::new())),
                calls: Arc::new(Mutex::new(0)),
                fail_on_call: None,
            }
        }

        fn failing_on(mut self, call: usize) -> Self {
            self.fail_on_call = Some(call);
            self
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }

        fn all_rows(&self) -> Vec<Row> {
            self.batches.lock().unwrap().concat()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, rows: &[Row]) -> Result<()> {
            if rows.is_empty() {
                return Ok(());
            }
            let call = {
                let mut calls = self.calls.lock().unwrap();
                *calls += 1;
                *calls
            };
            if self.fail_on_call == Some(call) {
                return Err(AwardSyncError::sink(&self.name, "rejected"));
            }
            self.batches.lock().unwrap().push(rows.to_vec());
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn award(award_id: &str, recipient_id: Option<&str>, city: Option<&str>) -> RawRecord {
        let value = json!({
            "Award ID": award_id,
            "Award Amount": 1000.0,
            "Start Date": "2024-10-01",
            "End Date": "2025-09-30",
            "Awarding Agency": "Department of Defense",
            "Awarding Agency Code": "097",
            "Awarding Sub Agency": "Department of the Navy",
            "Awarding Sub Agency Code": "1700",
            "Recipient Name": recipient_id.map(|id| format!("Recipient {id}")),
            "recipient_id": recipient_id,
            "Recipient Location": {
                "address_line1": "1 Pier Rd",
                "city_name": city,
                "state_name": "Virginia",
                "country_name": "UNITED STATES"
            }
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn page(records: Vec<RawRecord>, has_next: bool) -> Result<Page> {
        Ok(Page { records, has_next })
    }

    fn awards(prefix: &str, n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| award(&format!("{prefix}{i}"), Some(&format!("R{i}")), None))
            .collect()
    }

    fn bulk(max_pages: Option<u32>) -> PipelineConfig {
        PipelineConfig {
            max_pages,
            flush: FlushPolicy::Bulk,
        }
    }

    fn batched(batch_size: usize) -> PipelineConfig {
        PipelineConfig {
            max_pages: None,
            flush: FlushPolicy::Batched { batch_size },
        }
    }

    // -----------------------------------------------------------------------
    // Scenarios
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn two_pages_merge_recipient_city_from_later_page() {
        let source = ScriptedSource::new(vec![
            page(
                vec![award("A1", Some("R1"), None), award("A2", Some("R2"), Some("NORFOLK"))],
                true,
            ),
            page(vec![award("A3", Some("R1"), Some("ARLINGTON"))], false),
        ]);
        let facts = RecordingSink::new("facts");
        let recipients = RecordingSink::new("recipients");
        let sinks = SinkSet::facts_only(Box::new(facts.clone())).with_dimensions(
            Box::new(recipients.clone()),
            Box::new(RecordingSink::new("agencies")),
            Box::new(RecordingSink::new("sub_agencies")),
        );

        let output = Pipeline::new(bulk(None), &source, sinks)
            .run(&CancellationToken::new())
            .await;

        assert!(output.report.succeeded());
        assert_eq!(output.report.stop_reason, Some(StopReason::NoNextPage));
        assert_eq!(output.report.pages_fetched, 2);
        assert_eq!(output.report.records_normalized, 3);
        assert_eq!(output.report.facts_flushed, 3);
        assert_eq!(facts.batch_sizes(), vec![3]);
        assert!(output.pending_facts.is_empty());

        assert_eq!(output.dimensions.recipients.len(), 2);
        let r1 = &output.dimensions.recipients[0];
        assert_eq!(r1.recipient_id, "R1");
        assert_eq!(r1.city.as_deref(), Some("ARLINGTON"));
        assert_eq!(output.dimensions.agencies.len(), 1);
        assert_eq!(output.dimensions.sub_agencies.len(), 1);

        let written = recipients.all_rows();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0]["City"], "ARLINGTON");
        assert_eq!(source.requested(), vec![1, 2]);
    }

    #[tokio::test]
    async fn empty_page_stops_even_when_has_next_is_true() {
        let source = ScriptedSource::new(vec![
            page(awards("A", 3), true),
            page(vec![], true),
            page(awards("B", 3), true),
        ]);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert!(output.report.succeeded());
        assert_eq!(output.report.stop_reason, Some(StopReason::EmptyPage));
        assert_eq!(output.report.pages_fetched, 2);
        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(facts.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn has_next_false_stops_after_full_page() {
        let source = ScriptedSource::new(vec![page(awards("A", 100), false), page(awards("B", 5), true)]);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(output.report.stop_reason, Some(StopReason::NoNextPage));
        assert_eq!(source.requested(), vec![1]);
        assert_eq!(output.report.records_normalized, 100);
    }

    #[tokio::test]
    async fn page_cap_stops_regardless_of_has_next() {
        let source = ScriptedSource::new(vec![
            page(awards("A", 2), true),
            page(awards("B", 2), true),
            page(awards("C", 2), true),
        ]);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(bulk(Some(2)), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert!(output.report.succeeded());
        assert_eq!(output.report.stop_reason, Some(StopReason::PageCap));
        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(output.report.facts_flushed, 4);
    }

    #[tokio::test]
    async fn fact_count_matches_sum_of_page_sizes() {
        let sizes = [7usize, 1, 13, 4];
        let mut responses: Vec<Result<Page>> = sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| page(awards(&format!("P{i}-"), n), true))
            .collect();
        responses.push(page(vec![], false));
        let source = ScriptedSource::new(responses);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(batched(5), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        let total: usize = sizes.iter().sum();
        assert_eq!(output.report.records_normalized, total);
        assert_eq!(facts.all_rows().len(), total);

        let ids: Vec<String> = facts
            .all_rows()
            .iter()
            .map(|r| r["AwardId"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids.first().map(String::as_str), Some("P0-0"));
        assert_eq!(ids.last().map(String::as_str), Some("P3-3"));
    }

    #[tokio::test]
    async fn batched_mode_flushes_at_batch_size_and_remainder_at_end() {
        let source = ScriptedSource::new(vec![page(awards("A", 3), true), page(awards("B", 2), false)]);
        let facts = RecordingSink::new("facts");
        let recipients = RecordingSink::new("recipients");
        let sinks = SinkSet::facts_only(Box::new(facts.clone())).with_dimensions(
            Box::new(recipients.clone()),
            Box::new(RecordingSink::new("agencies")),
            Box::new(RecordingSink::new("sub_agencies")),
        );

        let output = Pipeline::new(batched(2), &source, sinks)
            .run(&CancellationToken::new())
            .await;

        assert!(output.report.succeeded());
        assert_eq!(facts.batch_sizes(), vec![2, 2, 1]);
        assert_eq!(output.report.fact_batches, 3);
        // R0, R1, R2 are distinct; page 2 repeats R0 and R1.
        assert_eq!(recipients.batch_sizes(), vec![2, 1]);
    }

    #[tokio::test]
    async fn sink_failure_halts_run_and_keeps_earlier_batches() {
        let source = ScriptedSource::new(vec![
            page(awards("A", 2), true),
            page(awards("B", 2), true),
            page(awards("C", 2), false),
        ]);
        let facts = RecordingSink::new("facts").failing_on(2);

        let output = Pipeline::new(batched(2), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert!(!output.report.succeeded());
        assert_eq!(output.report.state, PipelineState::Failed);
        let failure = output.report.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.phase, RunPhase::Flush);
        assert_eq!(failure.page, 2);
        assert!(matches!(failure.error, AwardSyncError::Sink { .. }));

        assert_eq!(source.requested(), vec![1, 2]);
        assert_eq!(facts.batch_sizes(), vec![2]);
        assert_eq!(output.report.facts_flushed, 2);
        assert_eq!(output.report.records_normalized, 4);
        assert_eq!(output.pending_facts.len(), 2);
        assert_eq!(output.pending_facts[0].award_id.as_deref(), Some("B0"));
    }

    #[tokio::test]
    async fn fetch_failure_reports_partial_progress() {
        let source = ScriptedSource::new(vec![
            page(awards("A", 3), true),
            Err(AwardSyncError::Fetch {
                status: 500,
                body: "upstream timeout".into(),
            }),
        ]);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(output.report.state, PipelineState::Failed);
        assert_eq!(output.report.stop_reason, None);
        assert_eq!(output.report.pages_fetched, 1);
        assert_eq!(output.report.records_normalized, 3);
        let failure = output.report.failure.as_ref().unwrap();
        assert_eq!(failure.phase, RunPhase::Fetch);
        assert_eq!(failure.page, 2);

        assert!(facts.batch_sizes().is_empty());
        assert_eq!(output.pending_facts.len(), 3);
        assert_eq!(output.dimensions.recipients.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_page() {
        let source = ScriptedSource::new(vec![page(awards("A", 3), true)]);
        let facts = RecordingSink::new("facts");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&cancel)
            .await;

        assert!(output.report.succeeded());
        assert_eq!(output.report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(output.report.pages_fetched, 0);
        assert!(source.requested().is_empty());
        assert!(facts.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn records_without_ids_still_produce_facts() {
        let mut orphan = award("A9", None, None);
        orphan.remove("Awarding Agency Code");
        orphan.remove("Awarding Sub Agency Code");
        let source = ScriptedSource::new(vec![page(vec![orphan, award("A1", Some("R1"), None)], false)]);
        let facts = RecordingSink::new("facts");

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(facts.all_rows().len(), 2);
        assert_eq!(facts.all_rows()[0]["RecipientId"], Value::Null);
        assert_eq!(output.dimensions.recipients.len(), 1);
        assert_eq!(output.dimensions.agencies.len(), 1);
    }

    #[tokio::test]
    async fn zero_batch_size_flushes_one_row_at_a_time() {
        let source = ScriptedSource::new(vec![page(awards("A", 2), false)]);
        let facts = RecordingSink::new("facts");
        let pipeline = Pipeline::new(batched(0), &source, SinkSet::facts_only(Box::new(facts.clone())));

        let output = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            pipeline.run(&CancellationToken::new()),
        )
        .await
        .expect("run finishes");

        assert!(output.report.succeeded());
        assert_eq!(facts.batch_sizes(), vec![1, 1]);
        assert_eq!(output.report.fact_batches, 2);
    }

    #[tokio::test]
    async fn dimension_sink_failure_fails_run_but_returns_tables() {
        let source = ScriptedSource::new(vec![page(
            vec![award("A1", Some("R1"), None), award("A2", Some("R2"), None)],
            false,
        )]);
        let facts = RecordingSink::new("facts");
        let agencies = RecordingSink::new("agencies");
        let sinks = SinkSet::facts_only(Box::new(facts.clone())).with_dimensions(
            Box::new(RecordingSink::new("recipients").failing_on(1)),
            Box::new(agencies.clone()),
            Box::new(RecordingSink::new("sub_agencies")),
        );

        let output = Pipeline::new(bulk(None), &source, sinks)
            .run(&CancellationToken::new())
            .await;

        assert_eq!(output.report.state, PipelineState::Failed);
        let failure = output.report.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.phase, RunPhase::Flush);
        assert_eq!(failure.page, 1);
        assert!(matches!(failure.error, AwardSyncError::Sink { .. }));

        assert_eq!(facts.batch_sizes(), vec![2]);
        assert_eq!(output.report.facts_flushed, 2);
        assert!(output.pending_facts.is_empty());
        assert!(agencies.batch_sizes().is_empty());

        assert_eq!(output.dimensions.recipients.len(), 2);
        assert_eq!(output.dimensions.agencies.len(), 1);
        assert_eq!(output.report.dimensions.recipients, 2);
    }

    #[tokio::test]
    async fn flush_failure_after_empty_page_names_the_empty_page() {
        let source = ScriptedSource::new(vec![page(awards("A", 2), true), page(vec![], true)]);
        let facts = RecordingSink::new("facts").failing_on(1);

        let output = Pipeline::new(bulk(None), &source, SinkSet::facts_only(Box::new(facts.clone())))
            .run(&CancellationToken::new())
            .await;

        assert_eq!(output.report.stop_reason, Some(StopReason::EmptyPage));
        let failure = output.report.failure.as_ref().expect("failure recorded");
        assert_eq!(failure.phase, RunPhase::Flush);
        assert_eq!(failure.page, 2);
        assert_eq!(output.pending_facts.len(), 2);
    }

    #[tokio::test]
    async fn end_to_end_search_api_into_csv_files() {
        use awardsync_search::{SearchClient, SearchQuery};
        use awardsync_shared::DateWindow;
        use awardsync_sinks::CsvSink;
        use chrono::NaiveDate;
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"page": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [award("A1", Some("R1"), None), award("A2", Some("R2"), Some("NORFOLK"))],
                "page_metadata": {"page": 1, "hasNext": true}
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(body_partial_json(json!({"page": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [award("A3", Some("R1"), Some("ARLINGTON"))],
                "page_metadata": {"page": 2, "hasNext": false}
            })))
            .mount(&server)
            .await;

        let query = SearchQuery {
            endpoint: url::Url::parse(&server.uri()).unwrap(),
            window: DateWindow::new(
                NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 7).unwrap(),
            )
            .unwrap(),
            award_type_codes: vec!["A".into(), "B".into(), "C".into(), "D".into()],
            fields: awardsync_shared::DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            timeout_secs: 5,
        };
        let client = SearchClient::new(query).unwrap();

        let dir = std::env::temp_dir().join(format!("awardsync-e2e-{}", Uuid::now_v7()));
        let sinks = SinkSet::facts_only(Box::new(CsvSink::new(&dir, "FactAwards"))).with_dimensions(
            Box::new(CsvSink::new(&dir, "DimRecipients")),
            Box::new(CsvSink::new(&dir, "DimAgencies")),
            Box::new(CsvSink::new(&dir, "DimSubAgencies")),
        );

        let output = Pipeline::new(bulk(None), &client, sinks)
            .run(&CancellationToken::new())
            .await;
        assert!(output.report.succeeded());

        let facts = std::fs::read_to_string(dir.join("FactAwards.csv")).unwrap();
        let mut lines = facts.lines();
        assert_eq!(
            lines.next(),
            Some("AwardId,RecipientId,AwardAmount,StartDate,EndDate,AwardingAgencyCode,AwardingSubAgencyCode")
        );
        assert_eq!(lines.count(), 3);

        let recipients = std::fs::read_to_string(dir.join("DimRecipients.csv")).unwrap();
        assert_eq!(recipients.lines().count(), 3);
        assert!(recipients.contains("R1,Recipient R1,1 Pier Rd,ARLINGTON,Virginia,,UNITED STATES"));

        let sub_agencies = std::fs::read_to_string(dir.join("DimSubAgencies.csv")).unwrap();
        assert!(sub_agencies.contains("1700,Department of the Navy,097"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
