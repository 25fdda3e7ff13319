// src/models/mod.rs

//! Domain models for the synchronizer.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod conflict;
mod record;
mod source;
mod state;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, EstimatorConfig, ExportConfig, IndexConfig, PathsConfig,
    PrimaryConfig, RemoteConfig, SecondaryConfig,
};
pub use conflict::Conflict;
pub use record::{CanonicalRecord, Origin, Published, TimestampSource};
pub use source::{ListingItem, PrimaryItem, PrimaryObservation, SecondaryObservation};
pub use state::SyncState;

/// Inclusive range of primary-source ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IdRange {
    pub start: u64,
    pub end: u64,
}

impl IdRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }
}
