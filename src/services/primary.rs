// src/services/primary.rs

//! Primary source crawler.
//!
//! Probes the dense id space one id at a time: new ids past the checkpoint,
//! plus a trailing frontier window behind it so late edits and removals are
//! picked up.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Config, IdRange, PrimaryItem, PrimaryObservation};
use crate::utils::http::{Fetcher, RetryPolicy, fetch_with_retry};
use crate::utils::{ProgressReporter, fill_template};

/// Summary of a primary crawl run.
#[derive(Debug, Clone, Default)]
pub struct PrimaryCrawlReport {
    pub observations: Vec<PrimaryObservation>,
    pub previous_checkpoint: u64,
    /// `max(previous, highest id found)`
    pub checkpoint: u64,
    pub planned: usize,
    pub processed: usize,
    pub malformed: usize,
    /// Set when a fetch failed for good and the scan stopped early
    pub aborted: Option<String>,
}

impl PrimaryCrawlReport {
    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }

    pub fn found(&self) -> usize {
        self.observations
            .iter()
            .filter(|o| matches!(o, PrimaryObservation::Found(_)))
            .count()
    }

    pub fn missing(&self) -> usize {
        self.observations.len() - self.found()
    }
}

/// Service for crawling the primary source.
pub struct PrimarySourceCrawler {
    fetcher: Arc<dyn Fetcher>,
    item_url: String,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl PrimarySourceCrawler {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            item_url: config.primary.item_url.clone(),
            retry: RetryPolicy::from_config(&config.crawler),
            request_delay: Duration::from_millis(config.crawler.request_delay_ms),
        }
    }

    /// Ids to probe, ascending and deduplicated.
    ///
    /// Forward span is `range`, or `checkpoint+1 ..= checkpoint+window`; the
    /// frontier `checkpoint-window ..= checkpoint` is always added.
    pub fn plan(checkpoint: u64, range: Option<IdRange>, window: u64) -> Vec<u64> {
        let mut ids = BTreeSet::new();

        let forward = range.unwrap_or_else(|| {
            IdRange::new(checkpoint.saturating_add(1), checkpoint.saturating_add(window))
        });
        if !forward.is_empty() {
            ids.extend(forward.start.max(1)..=forward.end);
        }
        if checkpoint > 0 {
            ids.extend(checkpoint.saturating_sub(window).max(1)..=checkpoint);
        }

        ids.into_iter().collect()
    }

    /// Decode an item body, with or without a `var x = ...;` wrapper.
    pub fn parse_item(id: u64, body: &[u8]) -> Result<PrimaryItem> {
        let text = std::str::from_utf8(body)
            .map_err(|e| AppError::crawl(format!("item #{id}"), e))?;
        let json = strip_assignment(text);
        let item: PrimaryItem =
            serde_json::from_str(json).map_err(|e| AppError::crawl(format!("item #{id}"), e))?;
        if item.id != id {
            return Err(AppError::crawl(
                format!("item #{id}"),
                format!("payload carries id {}", item.id),
            ));
        }
        Ok(item)
    }

    /// Probe every planned id in order.
    ///
    /// Never fails as a whole: a fetch that cannot be completed stops the
    /// scan and is recorded in `aborted`, keeping what was gathered.
    pub async fn crawl(
        &self,
        checkpoint: u64,
        range: Option<IdRange>,
        lookup_window: u64,
        progress: &dyn ProgressReporter,
    ) -> PrimaryCrawlReport {
        let plan = Self::plan(checkpoint, range, lookup_window);
        let total = plan.len();
        log::info!(
            "Primary crawl: {} ids planned (checkpoint {}, window {})",
            total,
            checkpoint,
            lookup_window
        );

        let mut report = PrimaryCrawlReport {
            previous_checkpoint: checkpoint,
            checkpoint,
            planned: total,
            ..PrimaryCrawlReport::default()
        };
        let mut highest_found = 0;

        for (i, id) in plan.into_iter().enumerate() {
            let url = fill_template(&self.item_url, "id", id);
            match fetch_with_retry(self.fetcher.as_ref(), &url, self.retry).await {
                Ok(Some(body)) => match Self::parse_item(id, &body) {
                    Ok(item) => {
                        highest_found = highest_found.max(id);
                        report.observations.push(PrimaryObservation::Found(item));
                    }
                    Err(e) => {
                        log::warn!("Skipping malformed item: {}", e);
                        report.malformed += 1;
                    }
                },
                Ok(None) => report.observations.push(PrimaryObservation::Missing(id)),
                Err(e) => {
                    log::error!("Primary crawl aborted at #{}: {}", id, e);
                    report.aborted = Some(e.to_string());
                    break;
                }
            }

            report.processed += 1;
            progress.report(i + 1, total);
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        report.checkpoint = checkpoint.max(highest_found);
        log::info!(
            "Primary crawl: {} found, {} missing, {} malformed, checkpoint {} -> {}",
            report.found(),
            report.missing(),
            report.malformed,
            report.previous_checkpoint,
            report.checkpoint
        );
        report
    }
}

fn strip_assignment(text: &str) -> &str {
    let trimmed = text.trim();
    let body = match (trimmed.starts_with("var "), trimmed.find('=')) {
        (true, Some(eq)) => &trimmed[eq + 1..],
        _ => trimmed,
    };
    body.trim().trim_end_matches(';').trim_end()
}
