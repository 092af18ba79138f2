//! Pipeline driver for awardsync.
//!
//! Ties the search client, normalizer, dimension merger, and sinks into one
//! paginated run (see [`pipeline::Pipeline`]).

pub mod pipeline;
pub mod report;

pub use pipeline::{Pipeline, PipelineConfig, ProgressReporter, SilentProgress, SinkSet};
pub use report::{PipelineState, RunFailure, RunOutput, RunPhase, RunReport, StopReason};
