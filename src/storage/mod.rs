//! Storage abstractions for catalog persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! {data_dir}/
//! ├── records.json          # LocalIndex: canonical records, ascending id
//! ├── state.json            # SyncState: checkpoint and last run
//! ├── invtable.json         # Inverse hash index (sorted u64 keys)
//! ├── estimator.json        # Fitted timestamp model
//! └── exports/
//!     ├── rawdata.json
//!     ├── rawdata-counts.json
//!     ├── rawdata-korean.json
//!     └── rawdata-korean-counts.json
//! ```

mod catalog;
pub mod local;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod remote;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{CanonicalRecord, Conflict, SyncState};
use crate::pipeline::estimate::EstimatorParams;
use crate::pipeline::extract::RecordSet;
use crate::pipeline::index::IndexSnapshot;

pub use catalog::{Change, LocalIndex, MergeOutcome};
pub use local::LocalStorage;
#[cfg(feature = "postgres")]
pub use postgres::PgConnection;
pub use remote::RemoteConnection;

/// Trait for catalog storage backends.
#[async_trait]
pub trait CatalogStorage: Send + Sync {
    /// Load every persisted record; empty when nothing was stored yet.
    async fn load_records(&self) -> Result<Vec<CanonicalRecord>>;

    async fn save_records(&self, records: &[CanonicalRecord]) -> Result<()>;

    /// Load the sync state; defaults on first run.
    async fn load_state(&self) -> Result<SyncState>;

    async fn save_state(&self, state: &SyncState) -> Result<()>;

    async fn load_inverse_index(&self) -> Result<Option<IndexSnapshot>>;

    async fn save_inverse_index(&self, snapshot: &IndexSnapshot) -> Result<()>;

    async fn load_estimator(&self) -> Result<Option<EstimatorParams>>;

    async fn save_estimator(&self, params: &EstimatorParams) -> Result<()>;

    /// Write an extracted record set and its category counts under
    /// `set.file_stem(prefix)`.
    ///
    /// Returns the location of the records file.
    async fn write_export(&self, prefix: &str, set: &RecordSet) -> Result<String>;
}

/// Load the persisted records into a `LocalIndex`.
pub async fn load_index(storage: &dyn CatalogStorage) -> Result<(LocalIndex, Vec<Conflict>)> {
    let records = storage.load_records().await?;
    let (index, conflicts) = LocalIndex::from_records(records);
    for conflict in &conflicts {
        log::warn!("Stored index: {}", conflict);
    }
    Ok((index, conflicts))
}
