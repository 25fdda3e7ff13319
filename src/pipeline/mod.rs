//! Pipeline entry points for synchronizer operations.
//!
//! - `run_sync`: Crawl both sources and reconcile into the local index
//! - `run_estimator`: Fit the id → publish time model and fill estimates
//! - `run_export`: Write the unfiltered and per-locale snapshots
//! - `run_load`: Upsert the index into the remote store
//! - `run_pipeline`: All of the above in order

pub mod estimate;
pub mod extract;
pub mod index;
pub mod load;
#[allow(clippy::module_inception)]
pub mod pipeline;
pub mod sync;

pub use estimate::{EstimatorParams, estimate, fit, run_estimator};
pub use extract::{
    Category, CategoryCounts, ExportSummary, RecordSet, extract, extract_partitions, run_export,
};
pub use index::{IndexSnapshot, RebuildOutcome, composite_key, rebuild};
pub use load::{
    BatchFailure, LoadReport, LoadStatus, bulk_load, bulk_load_summaries, run_load,
};
pub use pipeline::{PipelineOptions, PipelineReport, Stage, run_pipeline};
pub use sync::{ReconcileOutcome, SyncReport, SyncRequest, reconcile, run_sync};
