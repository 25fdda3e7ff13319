//! Application configuration structures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::utils::fill_template;

/// Root application configuration.
///
/// Constructed once per invocation and passed explicitly into the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where artifacts live
    #[serde(default)]
    pub paths: PathsConfig,

    /// HTTP and retry behavior shared by both crawlers
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Dense id source
    #[serde(default)]
    pub primary: PrimaryConfig,

    /// Paginated listing source
    #[serde(default)]
    pub secondary: SecondaryConfig,

    /// Composite-key index rebuild settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Timestamp model settings
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Snapshot export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Remote relational store settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if !self.primary.item_url.contains("{id}") {
            return Err(AppError::validation(
                "primary.item_url must contain an {id} placeholder",
            ));
        }
        if !self.secondary.page_url.contains("{page}") {
            return Err(AppError::validation(
                "secondary.page_url must contain a {page} placeholder",
            ));
        }
        url::Url::parse(&fill_template(&self.primary.item_url, "id", 1))?;
        url::Url::parse(&fill_template(&self.secondary.page_url, "page", 0))?;
        if self.index.rebuild_page_size == 0 {
            return Err(AppError::validation("index.rebuild_page_size must be > 0"));
        }
        if self.remote.batch_size == 0 {
            return Err(AppError::validation("remote.batch_size must be > 0"));
        }
        if self.export.file_prefix.trim().is_empty() {
            return Err(AppError::validation("export.file_prefix is empty"));
        }
        for (key, table) in [
            ("remote.summary_table", &self.remote.summary_table),
            ("remote.records_table", &self.remote.records_table),
        ] {
            if !is_identifier(table) {
                return Err(AppError::validation(format!(
                    "{key} is not a valid table name: {table:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Table names are spliced into statements, so only plain (optionally
/// schema-qualified) identifiers are accepted.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding records, state, index, estimator and exports
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
        }
    }
}

/// HTTP client and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt before a crawl run is aborted
    #[serde(default = "defaults::max_retries")]
    pub max_retries: usize,

    /// First backoff delay; doubles per attempt
    #[serde(default = "defaults::retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Delay between sequential requests in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            max_retries: defaults::max_retries(),
            retry_base_delay_ms: defaults::retry_base_delay(),
            request_delay_ms: defaults::request_delay(),
        }
    }
}

/// Dense id source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    /// Item URL template with an `{id}` placeholder
    #[serde(default = "defaults::primary_item_url")]
    pub item_url: String,

    /// Ids re-scanned on each side of the checkpoint
    #[serde(default = "defaults::lookup_window")]
    pub lookup_window: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            item_url: defaults::primary_item_url(),
            lookup_window: defaults::lookup_window(),
        }
    }
}

/// Paginated listing source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryConfig {
    /// Skip the listing entirely when false
    #[serde(default = "defaults::enabled")]
    pub enabled: bool,

    /// Page URL template with a `{page}` placeholder
    #[serde(default = "defaults::secondary_page_url")]
    pub page_url: String,

    /// Maximum pages read per run
    #[serde(default = "defaults::page_limit")]
    pub page_limit: usize,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::enabled(),
            page_url: defaults::secondary_page_url(),
            page_limit: defaults::page_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Records read per page during an inverse index rebuild
    #[serde(default = "defaults::batch")]
    pub rebuild_page_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            rebuild_page_size: defaults::batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimatorConfig {
    /// Polynomial degree of the id → timestamp regression
    #[serde(default = "defaults::degree")]
    pub degree: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            degree: defaults::degree(),
        }
    }
}

/// Snapshot export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Base name of export files (`<prefix>.json`, `<prefix>-<locale>.json`)
    #[serde(default = "defaults::file_prefix")]
    pub file_prefix: String,

    /// Named locale partitions exported next to the unfiltered set
    #[serde(default = "defaults::partitions")]
    pub partitions: Vec<String>,

    /// Include records only the listing source knows about
    #[serde(default)]
    pub include_secondary_only: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            file_prefix: defaults::file_prefix(),
            partitions: defaults::partitions(),
            include_secondary_only: false,
        }
    }
}

/// Remote relational store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Connection string; remote loading is disabled when absent
    #[serde(default)]
    pub connection: Option<String>,

    /// Records per transaction
    #[serde(default = "defaults::batch")]
    pub batch_size: usize,

    /// Summary `(id, file_count)` table
    #[serde(default = "defaults::summary_table")]
    pub summary_table: String,

    /// Full attributes table
    #[serde(default = "defaults::records_table")]
    pub records_table: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connection: None,
            batch_size: defaults::batch(),
            summary_table: defaults::summary_table(),
            records_table: defaults::records_table(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }

    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; catalog-sync/0.1)".into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_retries() -> usize {
        5
    }
    pub fn retry_base_delay() -> u64 {
        500
    }
    pub fn request_delay() -> u64 {
        50
    }

    // Source defaults
    pub fn primary_item_url() -> String {
        "https://ltn.example.org/galleries/{id}.js".into()
    }
    pub fn lookup_window() -> u64 {
        4000
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn secondary_page_url() -> String {
        "https://listing.example.org/api/list?page={page}".into()
    }
    pub fn page_limit() -> usize {
        200
    }

    pub fn batch() -> usize {
        50_000
    }
    pub fn degree() -> usize {
        100
    }

    // Export defaults
    pub fn file_prefix() -> String {
        "rawdata".into()
    }
    pub fn partitions() -> Vec<String> {
        ["chinese", "english", "japanese", "korean"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    // Remote defaults
    pub fn summary_table() -> String {
        "catalog_pages".into()
    }
    pub fn records_table() -> String {
        "catalog_records".into()
    }
}
