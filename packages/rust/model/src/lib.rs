//! Record normalization and dimension merging for awardsync.
//!
//! - [`normalize`] turns one raw search record into a [`FactRow`](awardsync_shared::FactRow)
//!   and the dimension fragments it carries
//! - [`DimensionMerger`] deduplicates fragments into one record per natural id

pub mod merge;
pub mod normalize;

pub use merge::{
    Dimension, DimensionCounts, DimensionMerger, DimensionTable, DimensionTables, MergeOutcome,
};
pub use normalize::{DimensionFragments, Normalized, flatten_location, normalize};
