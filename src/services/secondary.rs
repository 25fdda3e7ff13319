// src/services/secondary.rs

//! Secondary (listing) source crawler.
//!
//! Walks paginated listing pages in order. The feed has no explicit end
//! marker: it either returns an empty page or keeps serving the last page,
//! so a page identical to its predecessor also ends the scan.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

use crate::models::{Config, ListingItem, SecondaryObservation};
use crate::utils::http::{Fetcher, RetryPolicy, fetch_with_retry};
use crate::utils::{ProgressReporter, fill_template};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

/// Why a page scan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStop {
    PageLimit,
    EmptyPage,
    DuplicatePage,
    Aborted(String),
}

/// Summary of a listing scan.
#[derive(Debug, Clone)]
pub struct SecondaryCrawlReport {
    pub observations: Vec<SecondaryObservation>,
    pub pages_fetched: usize,
    /// Entries that were not objects or carried no usable identifier
    pub malformed: usize,
    /// Pages whose body was not a listing
    pub malformed_pages: usize,
    pub stop: ScanStop,
}

impl SecondaryCrawlReport {
    pub fn is_complete(&self) -> bool {
        !matches!(self.stop, ScanStop::Aborted(_))
    }
}

/// Service for crawling the listing source.
pub struct SecondarySourceCrawler {
    fetcher: Arc<dyn Fetcher>,
    page_url: String,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl SecondarySourceCrawler {
    pub fn new(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            page_url: config.secondary.page_url.clone(),
            retry: RetryPolicy::from_config(&config.crawler),
            request_delay: Duration::from_millis(config.crawler.request_delay_ms),
        }
    }

    /// Scan pages `0..page_limit`.
    pub async fn crawl(
        &self,
        page_limit: usize,
        progress: &dyn ProgressReporter,
    ) -> SecondaryCrawlReport {
        let mut report = SecondaryCrawlReport {
            observations: Vec::new(),
            pages_fetched: 0,
            malformed: 0,
            malformed_pages: 0,
            stop: ScanStop::PageLimit,
        };
        let mut previous_digest: Option<String> = None;

        for page in 0..page_limit {
            let url = fill_template(&self.page_url, "page", page);
            let body = match fetch_with_retry(self.fetcher.as_ref(), &url, self.retry).await {
                Ok(Some(body)) => body,
                Ok(None) => {
                    report.stop = ScanStop::EmptyPage;
                    break;
                }
                Err(e) => {
                    log::error!("Listing scan aborted at page {}: {}", page, e);
                    report.stop = ScanStop::Aborted(e.to_string());
                    break;
                }
            };
            report.pages_fetched += 1;

            let digest = page_digest(&body);
            if previous_digest.as_deref() == Some(digest.as_str()) {
                log::info!("Page {} repeats the previous page, end of feed", page);
                report.stop = ScanStop::DuplicatePage;
                break;
            }
            previous_digest = Some(digest);

            let entries: Vec<serde_json::Value> = match serde_json::from_slice(&body) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Skipping malformed listing page {}: {}", page, e);
                    report.malformed_pages += 1;
                    continue;
                }
            };
            if entries.is_empty() {
                report.stop = ScanStop::EmptyPage;
                break;
            }

            for entry in entries {
                match decode_entry(entry) {
                    Ok(obs) => report.observations.push(obs),
                    Err(reason) => {
                        log::warn!("Skipping listing entry on page {}: {}", page, reason);
                        report.malformed += 1;
                    }
                }
            }

            progress.report(page + 1, page_limit);
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
        }

        log::info!(
            "Listing scan: {} pages, {} entries, {} malformed, stop: {:?}",
            report.pages_fetched,
            report.observations.len(),
            report.malformed,
            report.stop
        );
        report
    }
}

/// Extract `(id, hash)` from the last two path segments of an identifier.
///
/// Accepts absolute URLs and bare `.../<id>/<hash>` paths. The hash is
/// returned lower-cased.
pub fn parse_identifier(identifier: &str) -> Option<(u64, String)> {
    let path = match Url::parse(identifier) {
        Ok(url) => url.path().to_string(),
        Err(_) => identifier.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let [.., id, hash] = segments.as_slice() else {
        return None;
    };

    let id = id.parse::<u64>().ok()?;
    let valid_hash = !hash.is_empty() && hash.len() <= 16 && hash.chars().all(|c| c.is_ascii_hexdigit());
    valid_hash.then(|| (id, hash.to_ascii_lowercase()))
}

/// Parse a listing timestamp as UTC.
pub fn parse_published(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

fn decode_entry(entry: serde_json::Value) -> Result<SecondaryObservation, String> {
    let item: ListingItem = serde_json::from_value(entry).map_err(|e| e.to_string())?;
    let url = item.url.as_deref().ok_or("missing identifier")?;
    let (id, hash) =
        parse_identifier(url).ok_or_else(|| format!("malformed identifier {url:?}"))?;
    Ok(SecondaryObservation {
        id,
        hash,
        published: item.published.as_deref().and_then(parse_published),
        title: item.title,
        language: item.language,
        file_count: item.files,
        uploader: item.uploader,
        classification: item.category,
        tags: item.tags,
    })
}

fn page_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::NoProgress;
    use crate::utils::http::FetchError;
    use crate::utils::http::testing::ScriptedFetcher;

    const URL: &str = "https://listing.test/list?page={page}";

    fn config() -> Config {
        let mut config = Config::default();
        config.secondary.page_url = URL.to_string();
        config.crawler.request_delay_ms = 0;
        config.crawler.retry_base_delay_ms = 0;
        config.crawler.max_retries = 2;
        config
    }

    fn page_url(page: usize) -> String {
        fill_template(URL, "page", page)
    }

    fn page(ids: &[u64]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"url":"https://listing.test/g/{id}/ABC{id:x}/","title":"t{id}","published":"2020-01-02 03:04","files":2}}"#
                )
            })
            .collect();
        format!("[{}]", items.join(","))
    }

    #[test]
    fn test_parse_identifier_variants() {
        assert_eq!(
            parse_identifier("https://listing.test/g/123/ABCdef/"),
            Some((123, "abcdef".to_string()))
        );
        assert_eq!(
            parse_identifier("/g/5/0a?x=1"),
            Some((5, "0a".to_string()))
        );
        assert_eq!(parse_identifier("https://listing.test/g/abc/ff"), None);
        assert_eq!(parse_identifier("https://listing.test/g/12/xyz"), None);
        assert_eq!(parse_identifier("https://listing.test/12"), None);
        assert_eq!(parse_identifier(""), None);
    }

    #[test]
    fn test_parse_published_formats() {
        let expected = DateTime::parse_from_rfc3339("2020-01-02T03:04:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(parse_published("2020-01-02 03:04"), Some(expected));
        assert_eq!(parse_published("2020-01-02 03:04:00"), Some(expected));
        assert_eq!(parse_published("2020-01-02T12:04:00+09:00"), Some(expected));
        assert_eq!(parse_published("yesterday"), None);
    }

    #[tokio::test]
    async fn test_scan_stops_on_empty_page() {
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), page(&[1, 2]))
            .ok(&page_url(1), page(&[3]))
            .ok(&page_url(2), "[]");
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(10, &NoProgress).await;
        assert_eq!(report.stop, ScanStop::EmptyPage);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.observations.len(), 3);

        let first = &report.observations[0];
        assert_eq!(first.id, 1);
        assert_eq!(first.hash, "abc1");
        assert!(first.published.is_some());
    }

    #[tokio::test]
    async fn test_scan_stops_on_repeated_page() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .ok(&page_url(0), page(&[1]))
                .ok(&page_url(1), page(&[2]))
                .ok(&page_url(2), page(&[2])),
        );
        let crawler = SecondarySourceCrawler::new(&config(), fetcher.clone());

        let report = crawler.crawl(10, &NoProgress).await;
        assert_eq!(report.stop, ScanStop::DuplicatePage);
        assert_eq!(report.observations.len(), 2);
        assert_eq!(fetcher.calls(&page_url(3)), 0);
    }

    #[tokio::test]
    async fn test_scan_respects_page_limit() {
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), page(&[1]))
            .ok(&page_url(1), page(&[2]))
            .ok(&page_url(2), page(&[3]));
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(2, &NoProgress).await;
        assert_eq!(report.stop, ScanStop::PageLimit);
        assert_eq!(report.pages_fetched, 2);
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let body = r#"[{"url":"https://listing.test/g/nope"},{"url":"https://listing.test/g/4/ff"}]"#;
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), body)
            .ok(&page_url(1), "[]");
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(5, &NoProgress).await;
        assert_eq!(report.malformed, 1);
        assert_eq!(report.observations.len(), 1);
        assert_eq!(report.observations[0].published, None);
    }

    #[tokio::test]
    async fn test_bad_entries_do_not_discard_their_page() {
        let body = r#"[
            {"url":"https://listing.test/g/4/ff"},
            {"url":null},
            {"title":"no identifier"},
            {"url":"https://listing.test/g/5/ee","title":null,"files":null},
            {"url":7},
            "not an object"
        ]"#;
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), body)
            .ok(&page_url(1), "[]");
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(5, &NoProgress).await;
        assert_eq!(report.malformed_pages, 0);
        assert_eq!(report.malformed, 4);
        let ids: Vec<u64> = report.observations.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(report.observations[1].title, "");
    }

    #[tokio::test]
    async fn test_non_array_page_is_skipped() {
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), r#"{"error":"busy"}"#)
            .ok(&page_url(1), page(&[8]))
            .ok(&page_url(2), "[]");
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(5, &NoProgress).await;
        assert_eq!(report.malformed_pages, 1);
        assert_eq!(report.observations.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_aborts_keeping_prior_pages() {
        let fetcher = ScriptedFetcher::new()
            .ok(&page_url(0), page(&[1]))
            .fail(&page_url(1), FetchError::transient(page_url(1), "timeout"));
        let crawler = SecondarySourceCrawler::new(&config(), Arc::new(fetcher));

        let report = crawler.crawl(5, &NoProgress).await;
        assert!(!report.is_complete());
        assert_eq!(report.observations.len(), 1);
    }
}
