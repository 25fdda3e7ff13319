// src/pipeline/extract.rs

//! Snapshot extraction and export.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{CanonicalRecord, Config};
use crate::storage::{CatalogStorage, load_index};

/// Attribute kinds tallied for an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Tag,
    Language,
    Artist,
    Group,
    Type,
    Uploader,
    Series,
    Character,
    Class,
}

/// Per-category `(key, count)` pairs, sorted by count descending then key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryCounts {
    counts: BTreeMap<Category, Vec<(String, usize)>>,
}

impl CategoryCounts {
    pub fn tally(records: &[CanonicalRecord]) -> Self {
        let mut raw: HashMap<Category, HashMap<&str, usize>> = HashMap::new();

        for record in records {
            let lists = [
                (Category::Tag, &record.tags),
                (Category::Artist, &record.artists),
                (Category::Group, &record.groups),
                (Category::Series, &record.series),
                (Category::Character, &record.characters),
            ];
            let singles = [
                (Category::Language, &record.language),
                (Category::Type, &record.item_type),
                (Category::Uploader, &record.uploader),
                (Category::Class, &record.classification),
            ];

            let keys = lists
                .into_iter()
                .flat_map(|(category, values)| {
                    values.iter().map(move |value| (category, value.as_str()))
                })
                .chain(
                    singles
                        .into_iter()
                        .filter_map(|(category, value)| value.as_deref().map(|v| (category, v))),
                );

            for (category, key) in keys {
                if !key.is_empty() {
                    *raw.entry(category).or_default().entry(key).or_default() += 1;
                }
            }
        }

        let counts = raw
            .into_iter()
            .map(|(category, keys)| {
                let mut pairs: Vec<(String, usize)> = keys
                    .into_iter()
                    .map(|(key, count)| (key.to_string(), count))
                    .collect();
                pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                (category, pairs)
            })
            .collect();

        Self { counts }
    }

    pub fn get(&self, category: Category) -> &[(String, usize)] {
        self.counts.get(&category).map_or(&[], Vec::as_slice)
    }

    #[cfg(test)]
    pub fn count(&self, category: Category, key: &str) -> usize {
        self.get(category)
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |(_, count)| *count)
    }
}

/// Records passing one extraction filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    /// `None` for the unfiltered set
    pub locale: Option<String>,
    pub records: Vec<CanonicalRecord>,
}

impl RecordSet {
    pub fn new(locale: Option<String>, records: Vec<CanonicalRecord>) -> Self {
        Self { locale, records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `<prefix>` or `<prefix>-<locale>`.
    pub fn file_stem(&self, prefix: &str) -> String {
        match &self.locale {
            Some(locale) => format!("{prefix}-{locale}"),
            None => prefix.to_string(),
        }
    }

    pub fn counts(&self) -> CategoryCounts {
        CategoryCounts::tally(&self.records)
    }
}

/// Filter records by locale and origin.
///
/// A record passes when the locale matches (case-insensitively) or no locale
/// is given, and it is not secondary-only unless those are included.
pub fn extract(
    records: &[CanonicalRecord],
    locale: Option<&str>,
    include_secondary_only: bool,
) -> RecordSet {
    let selected = records
        .iter()
        .filter(|r| locale.is_none_or(|l| r.has_language(l)))
        .filter(|r| include_secondary_only || !r.is_secondary_only())
        .cloned()
        .collect();
    RecordSet::new(locale.map(str::to_lowercase), selected)
}

/// The unfiltered set followed by one set per locale, each computed as an
/// independent blocking task over the shared records.
pub async fn extract_partitions(
    records: Arc<[CanonicalRecord]>,
    locales: &[String],
    include_secondary_only: bool,
) -> Result<Vec<RecordSet>> {
    let filters = std::iter::once(None).chain(locales.iter().cloned().map(Some));
    let tasks = filters.map(|locale| {
        let records = Arc::clone(&records);
        tokio::task::spawn_blocking(move || {
            extract(&records, locale.as_deref(), include_secondary_only)
        })
    });

    join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.map_err(Into::into))
        .collect()
}

/// One written export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub locale: Option<String>,
    pub records: usize,
    pub location: String,
}

/// Extract every partition and write it with its counts.
pub async fn run_export(
    config: &Config,
    storage: &dyn CatalogStorage,
    include_secondary_only: bool,
) -> Result<Vec<ExportSummary>> {
    let (index, _) = load_index(storage).await?;
    let records: Arc<[CanonicalRecord]> = index.to_vec().into();

    let sets = extract_partitions(records, &config.export.partitions, include_secondary_only).await?;

    let mut summaries = Vec::with_capacity(sets.len());
    for set in &sets {
        let location = storage.write_export(&config.export.file_prefix, set).await?;
        summaries.push(ExportSummary {
            locale: set.locale.clone(),
            records: set.len(),
            location,
        });
    }
    Ok(summaries)
}
