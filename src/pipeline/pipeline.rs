// src/pipeline/pipeline.rs

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::storage::{CatalogStorage, RemoteConnection};
use crate::utils::http::Fetcher;
use crate::utils::{ProgressReporter, logging};

use super::estimate::{EstimatorParams, run_estimator};
use super::extract::{ExportSummary, run_export};
use super::load::{LoadReport, run_load};
use super::sync::{SyncReport, SyncRequest, run_sync};

/// Stage of a full run, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    PrimaryCrawl,
    SecondaryCrawl,
    Estimate,
    Export,
    RemoteLoad,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrimaryCrawl => "primary crawl",
            Stage::SecondaryCrawl => "secondary crawl",
            Stage::Estimate => "estimate",
            Stage::Export => "export",
            Stage::RemoteLoad => "remote load",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub sync: SyncRequest,
    /// Stop after reconciling
    pub sync_only: bool,
    pub include_secondary_only: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub sync: SyncReport,
    pub estimator: Option<EstimatorParams>,
    pub exports: Vec<ExportSummary>,
    pub loads: Vec<LoadReport>,
    pub failed_stage: Option<Stage>,
}

impl PipelineReport {
    /// Last checkpoint persisted by this run.
    pub fn checkpoint(&self) -> u64 {
        self.sync.state.primary_checkpoint
    }

    fn new(sync: SyncReport) -> Self {
        Self {
            failed_stage: sync.failed_stage(),
            sync,
            estimator: None,
            exports: Vec::new(),
            loads: Vec::new(),
        }
    }
}

/// Run the full pipeline: sync, estimate, export and optionally load.
pub async fn run_pipeline(
    config: &Config,
    storage: &dyn CatalogStorage,
    fetcher: Arc<dyn Fetcher>,
    options: PipelineOptions,
    remote: Option<&mut dyn RemoteConnection>,
    progress: &dyn ProgressReporter,
) -> Result<PipelineReport> {
    logging::header("Catalog synchronization");

    let total_steps = match (options.sync_only, remote.is_some()) {
        (true, _) => 1,
        (false, false) => 3,
        (false, true) => 4,
    };

    logging::step(1, total_steps, "Sync - Crawling both sources");
    let sync = run_sync(config, storage, fetcher, options.sync, progress).await?;
    let mut report = PipelineReport::new(sync);

    if let Some(stage) = report.failed_stage {
        log::error!(
            "Run stopped during {}; checkpoint remains at {}",
            stage,
            report.checkpoint()
        );
        return Ok(report);
    }
    if options.sync_only {
        return Ok(report);
    }

    logging::step(2, total_steps, "Estimate - Fitting publish times");
    report.estimator = match run_estimator(config, storage).await {
        Ok(params) => Some(params),
        Err(AppError::Estimator(message)) => {
            log::warn!("Estimator skipped: {}", message);
            None
        }
        Err(e) => return Err(e),
    };

    logging::step(3, total_steps, "Export - Writing partitions");
    report.exports = run_export(config, storage, options.include_secondary_only).await?;

    if let Some(conn) = remote {
        logging::step(4, total_steps, "Load - Upserting into remote store");
        report.loads = run_load(config, storage, conn, progress).await?;
        if report.loads.iter().any(|load| !load.is_complete()) {
            report.failed_stage = Some(Stage::RemoteLoad);
        }
    }

    logging::summary(
        "Pipeline",
        &[
            ("Checkpoint", report.checkpoint().to_string()),
            ("Changed records", report.sync.updated.len().to_string()),
            ("Conflicts", report.sync.conflicts().len().to_string()),
            ("Exports", report.exports.len().to_string()),
            (
                "Failed stage",
                report
                    .failed_stage
                    .map_or_else(|| "none".to_string(), |s| s.to_string()),
            ),
        ],
    );

    Ok(report)
}
