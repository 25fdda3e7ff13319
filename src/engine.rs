// src/engine.rs

//! Facade over the synchronizer operations.
//!
//! `SyncEngine` owns the configuration, the storage backend and the fetcher,
//! and exposes each pipeline stage as one call. Nothing here reads process
//! arguments or globals; the CLI builds a `Config` and hands it over.

use std::sync::Arc;

use crate::error::Result;
use crate::models::{CanonicalRecord, Config, IdRange};
use crate::pipeline::{
    self, EstimatorParams, ExportSummary, LoadReport, PipelineOptions, PipelineReport,
    RebuildOutcome, RecordSet, SyncReport, SyncRequest,
};
use crate::storage::{CatalogStorage, LocalStorage, RemoteConnection, load_index};
use crate::utils::LogProgress;
use crate::utils::http::{Fetcher, HttpFetcher};

pub struct SyncEngine {
    config: Config,
    storage: Arc<dyn CatalogStorage>,
    fetcher: Arc<dyn Fetcher>,
}

impl SyncEngine {
    /// Engine over `paths.data_dir` and a real HTTP client.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(LocalStorage::new(&config.paths.data_dir));
        let fetcher = Arc::new(HttpFetcher::new(&config.crawler)?);
        Ok(Self::with_parts(config, storage, fetcher))
    }

    pub fn with_parts(
        config: Config,
        storage: Arc<dyn CatalogStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            fetcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &dyn CatalogStorage {
        self.storage.as_ref()
    }

    /// Crawl both sources and reconcile. Unset arguments fall back to config.
    pub async fn sync_from_sources(
        &self,
        range: Option<IdRange>,
        lookup_window: Option<u64>,
        page_limit: Option<usize>,
    ) -> Result<SyncReport> {
        let request = SyncRequest::with_overrides(&self.config, range, lookup_window, page_limit);
        let progress = LogProgress::new("Primary crawl", 500);
        pipeline::run_sync(
            &self.config,
            self.storage(),
            Arc::clone(&self.fetcher),
            request,
            &progress,
        )
        .await
    }

    /// Rebuild the inverse hash index from scratch and persist it.
    pub async fn rebuild_inverse_index(&self) -> Result<RebuildOutcome> {
        let (local, _) = load_index(self.storage()).await?;
        let progress = LogProgress::new("Index rebuild", self.config.index.rebuild_page_size);
        let outcome = pipeline::rebuild(&local, self.config.index.rebuild_page_size, &progress);
        self.storage.save_inverse_index(&outcome.snapshot).await?;
        Ok(outcome)
    }

    pub async fn fit_timestamp_estimator(&self) -> Result<EstimatorParams> {
        pipeline::run_estimator(&self.config, self.storage()).await
    }

    /// Filter the current index without writing anything.
    pub async fn extract_snapshot(
        &self,
        locale: Option<&str>,
        include_secondary_only: bool,
    ) -> Result<RecordSet> {
        let (local, _) = load_index(self.storage()).await?;
        let records = local.to_vec();
        Ok(pipeline::extract(&records, locale, include_secondary_only))
    }

    /// Write the unfiltered set and every configured locale partition.
    pub async fn export_partitions(
        &self,
        include_secondary_only: bool,
    ) -> Result<Vec<ExportSummary>> {
        pipeline::run_export(&self.config, self.storage(), include_secondary_only).await
    }

    /// Upsert `records` into the configured record table.
    pub async fn bulk_load(
        &self,
        records: &[CanonicalRecord],
        batch_size: usize,
        conn: &mut dyn RemoteConnection,
    ) -> LoadReport {
        let progress = LogProgress::new("Remote load", 1);
        pipeline::bulk_load(
            records,
            &self.config.remote.records_table,
            batch_size,
            conn,
            &progress,
        )
        .await
    }

    /// Load the whole index into both remote tables.
    pub async fn init_server(&self, conn: &mut dyn RemoteConnection) -> Result<Vec<LoadReport>> {
        let progress = LogProgress::new("Remote load", 1);
        pipeline::run_load(&self.config, self.storage(), conn, &progress).await
    }

    pub async fn run_pipeline(
        &self,
        options: PipelineOptions,
        conn: Option<&mut dyn RemoteConnection>,
    ) -> Result<PipelineReport> {
        let progress = LogProgress::new("Primary crawl", 500);
        pipeline::run_pipeline(
            &self.config,
            self.storage(),
            Arc::clone(&self.fetcher),
            options,
            conn,
            &progress,
        )
        .await
    }
}
