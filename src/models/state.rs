//! Persisted synchronization state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Resumption point of the synchronizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    /// Highest primary-source id confirmed fully processed
    #[serde(default)]
    pub primary_checkpoint: u64,

    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,

    /// Pages read from the listing during the last run
    #[serde(default)]
    pub last_secondary_pages: usize,
}
