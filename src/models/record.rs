//! Canonical record data structure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which crawler(s) have produced a record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Seen only on the dense ID source
    Primary,
    /// Seen only in the paginated listing
    Secondary,
    /// Seen on both sources
    Both,
}

impl Origin {
    /// Combine with an observation from the primary source.
    pub fn with_primary(self) -> Self {
        match self {
            Origin::Secondary | Origin::Both => Origin::Both,
            Origin::Primary => Origin::Primary,
        }
    }

    /// Combine with an observation from the secondary source.
    pub fn with_secondary(self) -> Self {
        match self {
            Origin::Primary | Origin::Both => Origin::Both,
            Origin::Secondary => Origin::Secondary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Origin::Primary => "primary",
            Origin::Secondary => "secondary",
            Origin::Both => "both",
        }
    }
}

/// How a publication timestamp was obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Observed,
    Estimated,
}

/// Publication timestamp together with its provenance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Published {
    pub at: DateTime<Utc>,
    pub source: TimestampSource,
}

impl Published {
    pub fn observed(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Observed,
        }
    }

    pub fn estimated(at: DateTime<Utc>) -> Self {
        Self {
            at,
            source: TimestampSource::Estimated,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.source == TimestampSource::Observed
    }
}

/// The deduplicated, merged representation of one content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRecord {
    /// Primary-source identity
    pub id: u64,

    /// Lower-case hex content hash, only known via the secondary source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,

    pub title: String,

    #[serde(default)]
    pub item_type: Option<String>,

    #[serde(default)]
    pub artists: Vec<String>,

    #[serde(default)]
    pub characters: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub series: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub uploader: Option<String>,

    #[serde(default)]
    pub classification: Option<String>,

    #[serde(default)]
    pub file_count: u32,

    #[serde(default)]
    pub published: Option<Published>,

    /// Whether the item was still visible on the primary source at last crawl
    #[serde(default)]
    pub exists_on_primary: bool,

    pub origin: Origin,
}

impl CanonicalRecord {
    /// Create an empty record with the given identity and origin.
    pub fn new(id: u64, origin: Origin) -> Self {
        Self {
            id,
            content_hash: None,
            title: String::new(),
            item_type: None,
            artists: Vec::new(),
            characters: Vec::new(),
            groups: Vec::new(),
            language: None,
            series: Vec::new(),
            tags: Vec::new(),
            uploader: None,
            classification: None,
            file_count: 0,
            published: None,
            exists_on_primary: origin != Origin::Secondary,
            origin,
        }
    }

    /// True when only the secondary crawler has ever produced this record.
    pub fn is_secondary_only(&self) -> bool {
        self.origin == Origin::Secondary
    }

    /// Case-insensitive language comparison.
    pub fn has_language(&self, language: &str) -> bool {
        self.language
            .as_deref()
            .is_some_and(|l| l.to_lowercase() == language.to_lowercase())
    }

    /// Observed (not estimated) publication time, if any.
    pub fn observed_published(&self) -> Option<DateTime<Utc>> {
        self.published.filter(Published::is_observed).map(|p| p.at)
    }
}
