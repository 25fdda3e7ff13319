// src/pipeline/sync.rs

//! Incremental synchronization from both sources.
//!
//! Both crawlers run concurrently and only gather observations. Merging is
//! done afterwards by a single writer, primary observations first, so the
//! outcome does not depend on which crawler finished first.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::Result;
use crate::models::{
    CanonicalRecord, Config, Conflict, IdRange, PrimaryObservation, SecondaryObservation,
    SyncState,
};
use crate::pipeline::index::{self, IndexSnapshot};
use crate::pipeline::pipeline::Stage;
use crate::services::{
    PrimaryCrawlReport, PrimarySourceCrawler, SecondaryCrawlReport, SecondarySourceCrawler,
};
use crate::storage::{CatalogStorage, Change, LocalIndex, load_index};
use crate::utils::http::Fetcher;
use crate::utils::{NoProgress, ProgressReporter};

/// Parameters of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    /// Explicit forward span instead of `checkpoint+1 ..= checkpoint+window`
    pub range: Option<IdRange>,
    pub lookup_window: u64,
    pub page_limit: usize,
}

impl SyncRequest {
    pub fn from_config(config: &Config) -> Self {
        Self {
            range: None,
            lookup_window: config.primary.lookup_window,
            page_limit: config.secondary.page_limit,
        }
    }

    /// Config values, replaced by whichever overrides are given.
    pub fn with_overrides(
        config: &Config,
        range: Option<IdRange>,
        lookup_window: Option<u64>,
        page_limit: Option<usize>,
    ) -> Self {
        let defaults = Self::from_config(config);
        Self {
            range,
            lookup_window: lookup_window.unwrap_or(defaults.lookup_window),
            page_limit: page_limit.unwrap_or(defaults.page_limit),
        }
    }
}

/// Effect of merging one batch of observations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Listing entries already present in the inverse index
    pub skipped_known: usize,
    pub conflicts: Vec<Conflict>,
    pub changed_ids: BTreeSet<u64>,
}

impl ReconcileOutcome {
    fn record(&mut self, id: u64, change: Change) {
        match change {
            Change::Created => self.created += 1,
            Change::Updated => self.updated += 1,
            Change::Unchanged => self.unchanged += 1,
        }
        if change.is_change() {
            self.changed_ids.insert(id);
        }
    }
}

/// Merge observations into the index, primary first.
///
/// Every hash newly attached to a record is added to `inverse`.
pub fn reconcile(
    local: &mut LocalIndex,
    inverse: &mut IndexSnapshot,
    primary: &[PrimaryObservation],
    secondary: &[SecondaryObservation],
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    for observation in primary {
        let change = match observation {
            PrimaryObservation::Found(item) => local.upsert_primary(item),
            PrimaryObservation::Missing(id) => local.mark_missing(*id),
        };
        outcome.record(observation.id(), change);
    }

    for obs in secondary {
        let timed = local
            .get(obs.id)
            .is_some_and(|r| r.observed_published().is_some());
        if inverse.contains(obs.id, &obs.hash) && (timed || obs.published.is_none()) {
            outcome.skipped_known += 1;
            continue;
        }

        let merged = local.merge_secondary(obs);
        outcome.record(obs.id, merged.change);
        for conflict in &merged.conflicts {
            log::warn!("Conflict: {}", conflict);
        }
        outcome.conflicts.extend(merged.conflicts);

        if let Some(hash) = merged.assigned_hash {
            if let Err(conflict) = inverse.insert(obs.id, &hash) {
                log::warn!("Not indexed: {}", conflict);
                outcome.conflicts.push(conflict);
            }
        }
    }

    outcome
}

/// Result of a sync run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub primary: PrimaryCrawlReport,
    pub secondary: Option<SecondaryCrawlReport>,
    pub reconcile: ReconcileOutcome,
    /// State persisted at the end of the run
    pub state: SyncState,
    /// Records created or changed by this run
    pub updated: Vec<CanonicalRecord>,
}

impl SyncReport {
    /// First crawl stage that stopped early, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        if !self.primary.is_complete() {
            return Some(Stage::PrimaryCrawl);
        }
        match &self.secondary {
            Some(report) if !report.is_complete() => Some(Stage::SecondaryCrawl),
            _ => None,
        }
    }

    pub fn checkpoint(&self) -> u64 {
        self.state.primary_checkpoint
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.reconcile.conflicts
    }
}

/// Crawl both sources, reconcile and persist.
///
/// Records and the inverse index are written before the state, so a crash
/// in between only costs checkpoint progress.
pub async fn run_sync(
    config: &Config,
    storage: &dyn CatalogStorage,
    fetcher: Arc<dyn Fetcher>,
    request: SyncRequest,
    progress: &dyn ProgressReporter,
) -> Result<SyncReport> {
    let previous = storage.load_state().await?;
    let (mut local, _) = load_index(storage).await?;
    let mut inverse = match storage.load_inverse_index().await? {
        Some(snapshot) => snapshot,
        None => {
            log::info!("No inverse index stored, rebuilding");
            index::rebuild(&local, config.index.rebuild_page_size, &NoProgress).snapshot
        }
    };

    let primary_crawler = PrimarySourceCrawler::new(config, Arc::clone(&fetcher));
    let secondary_crawler = SecondarySourceCrawler::new(config, fetcher);

    let (primary, secondary) = tokio::join!(
        primary_crawler.crawl(
            previous.primary_checkpoint,
            request.range,
            request.lookup_window,
            progress,
        ),
        async {
            if config.secondary.enabled {
                Some(secondary_crawler.crawl(request.page_limit, &NoProgress).await)
            } else {
                None
            }
        }
    );

    let listing = secondary
        .as_ref()
        .map_or(&[][..], |report| report.observations.as_slice());
    let outcome = reconcile(&mut local, &mut inverse, &primary.observations, listing);

    storage.save_records(&local.to_vec()).await?;
    storage.save_inverse_index(&inverse).await?;

    let state = SyncState {
        primary_checkpoint: primary.checkpoint,
        last_sync: Some(Utc::now()),
        last_secondary_pages: secondary.as_ref().map_or(0, |s| s.pages_fetched),
    };
    storage.save_state(&state).await?;

    let updated = outcome
        .changed_ids
        .iter()
        .filter_map(|id| local.get(*id).cloned())
        .collect();

    log::info!(
        "Sync: {} created, {} updated, {} known listing entries skipped, {} conflicts",
        outcome.created,
        outcome.updated,
        outcome.skipped_known,
        outcome.conflicts.len()
    );

    Ok(SyncReport {
        primary,
        secondary,
        reconcile: outcome,
        state,
        updated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrimaryItem;
    use crate::storage::LocalStorage;
    use crate::utils::fill_template;
    use crate::utils::http::testing::ScriptedFetcher;
    use chrono::DateTime;
    use tempfile::TempDir;

    fn item(id: u64) -> PrimaryItem {
        serde_json::from_str(&format!(r#"{{"id":{id},"title":"item {id}","language":"korean"}}"#))
            .unwrap()
    }

    fn listing(id: u64, hash: &str) -> SecondaryObservation {
        SecondaryObservation {
            id,
            hash: hash.to_string(),
            published: DateTime::from_timestamp(1_600_000_000, 0),
            title: String::new(),
            language: None,
            file_count: 0,
            uploader: None,
            classification: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_overrides_replace_only_given_values() {
        let mut config = Config::default();
        config.primary.lookup_window = 40;
        config.secondary.page_limit = 7;

        let request = SyncRequest::with_overrides(&config, None, Some(5), None);
        assert_eq!(request.range, None);
        assert_eq!(request.lookup_window, 5);
        assert_eq!(request.page_limit, 7);

        let range = IdRange::new(10, 20);
        let request = SyncRequest::with_overrides(&config, Some(range), None, Some(1));
        assert_eq!(request.range, Some(range));
        assert_eq!(request.lookup_window, 40);
        assert_eq!(request.page_limit, 1);
    }

    #[test]
    fn test_reconcile_applies_primary_before_secondary() {
        let mut local = LocalIndex::new();
        let mut inverse = IndexSnapshot::new();

        let outcome = reconcile(
            &mut local,
            &mut inverse,
            &[PrimaryObservation::Found(item(1))],
            &[listing(1, "ab"), listing(2, "cd")],
        );

        assert_eq!(outcome.created, 2);
        assert_eq!(outcome.updated, 1);
        assert!(inverse.contains(1, "ab"));
        assert!(inverse.contains(2, "cd"));
        assert_eq!(local.get(1).unwrap().title, "item 1");
        assert!(local.get(2).unwrap().is_secondary_only());
    }

    #[test]
    fn test_reconcile_skips_known_listing_entries() {
        let mut local = LocalIndex::new();
        let mut inverse = IndexSnapshot::new();
        reconcile(&mut local, &mut inverse, &[], &[listing(5, "ee")]);

        let again = reconcile(&mut local, &mut inverse, &[], &[listing(5, "ee")]);
        assert_eq!(again.skipped_known, 1);
        assert!(again.changed_ids.is_empty());
    }

    #[test]
    fn test_reconcile_duplicate_hash_not_indexed() {
        let mut local = LocalIndex::new();
        let mut inverse = IndexSnapshot::new();
        let outcome = reconcile(
            &mut local,
            &mut inverse,
            &[],
            &[listing(100, "a"), listing(102, "a")],
        );

        assert_eq!(outcome.conflicts.len(), 1);
        assert!(inverse.contains(100, "a"));
        assert!(!inverse.contains(102, "a"));
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn test_missing_marks_known_records_only() {
        let mut local = LocalIndex::new();
        let mut inverse = IndexSnapshot::new();
        reconcile(&mut local, &mut inverse, &[PrimaryObservation::Found(item(3))], &[]);

        let outcome = reconcile(
            &mut local,
            &mut inverse,
            &[PrimaryObservation::Missing(3), PrimaryObservation::Missing(4)],
            &[],
        );
        assert_eq!(outcome.updated, 1);
        assert!(!local.get(3).unwrap().exists_on_primary);
        assert!(!local.contains(4));
    }

    #[tokio::test]
    async fn test_run_sync_persists_records_index_and_checkpoint() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let mut config = Config::default();
        config.primary.item_url = "https://p.test/{id}.js".to_string();
        config.secondary.page_url = "https://s.test/list?page={page}".to_string();
        config.crawler.request_delay_ms = 0;
        config.crawler.retry_base_delay_ms = 0;

        let p = |id: u64| fill_template(&config.primary.item_url, "id", id);
        let s = |page: usize| fill_template(&config.secondary.page_url, "page", page);
        let fetcher = ScriptedFetcher::new()
            .ok(&p(1), r#"{"id":1,"title":"one","language":"korean"}"#)
            .ok(&p(2), r#"{"id":2,"title":"two","language":"english"}"#)
            .ok(
                &s(0),
                r#"[{"url":"https://s.test/g/2/BEEF","published":"2021-05-01 10:00"},
                    {"url":"https://s.test/g/9/abc","published":"2021-05-02 10:00"}]"#,
            )
            .ok(&s(1), "[]");

        let request = SyncRequest {
            range: None,
            lookup_window: 3,
            page_limit: 5,
        };
        let report = run_sync(&config, &storage, Arc::new(fetcher), request, &NoProgress)
            .await
            .unwrap();

        assert_eq!(report.failed_stage(), None);
        assert_eq!(report.state.primary_checkpoint, 2);
        assert_eq!(report.state.last_secondary_pages, 2);
        assert_eq!(report.updated.len(), 3);

        let stored = storage.load_records().await.unwrap();
        assert_eq!(stored.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 9]);
        assert_eq!(stored[1].content_hash.as_deref(), Some("beef"));

        let inverse = storage.load_inverse_index().await.unwrap().unwrap();
        assert!(inverse.contains(2, "beef"));
        assert!(inverse.contains(9, "abc"));
        assert_eq!(storage.load_state().await.unwrap().primary_checkpoint, 2);
    }
}
