//! Wire formats of the two catalog sources and the observations derived from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One item as served by the primary (dense id) source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrimaryItem {
    #[serde(deserialize_with = "flexible_u64")]
    pub id: u64,

    #[serde(default)]
    pub title: String,

    #[serde(default, rename = "type")]
    pub item_type: Option<String>,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default)]
    pub artists: Vec<String>,

    #[serde(default)]
    pub characters: Vec<String>,

    #[serde(default)]
    pub groups: Vec<String>,

    #[serde(default)]
    pub series: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Number of files in the item
    #[serde(default)]
    pub files: u32,
}

/// Outcome of looking up a single id on the primary source.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryObservation {
    Found(PrimaryItem),
    Missing(u64),
}

impl PrimaryObservation {
    pub fn id(&self) -> u64 {
        match self {
            PrimaryObservation::Found(item) => item.id,
            PrimaryObservation::Missing(id) => *id,
        }
    }
}

/// One entry of a listing page as served by the secondary source.
///
/// Every field tolerates `null`; a missing identifier is caught when the
/// entry is turned into an observation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListingItem {
    /// Structured identifier embedding `<id>/<hash>`
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,

    #[serde(default)]
    pub published: Option<String>,

    #[serde(default)]
    pub language: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub files: u32,

    #[serde(default)]
    pub uploader: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

/// A listing entry whose identifier parsed successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryObservation {
    pub id: u64,
    /// Lower-case hex
    pub hash: String,
    pub published: Option<DateTime<Utc>>,
    pub title: String,
    pub language: Option<String>,
    pub file_count: u32,
    pub uploader: Option<String>,
    pub classification: Option<String>,
    pub tags: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept ids served either as JSON numbers or as decimal strings.
fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_item_accepts_string_id() {
        let item: PrimaryItem =
            serde_json::from_str(r#"{"id":"1234","title":"T","type":"manga","files":3}"#).unwrap();
        assert_eq!(item.id, 1234);
        assert_eq!(item.item_type.as_deref(), Some("manga"));
        assert_eq!(item.files, 3);
        assert!(item.tags.is_empty());
    }

    #[test]
    fn test_listing_item_tolerates_nulls() {
        let item: ListingItem =
            serde_json::from_str(r#"{"url":null,"title":null,"files":null,"tags":null}"#).unwrap();
        assert_eq!(item, ListingItem::default());

        let item: ListingItem = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(item.url, None);
        assert_eq!(item.title, "x");
    }

    #[test]
    fn test_primary_item_rejects_non_numeric_id() {
        let result = serde_json::from_str::<PrimaryItem>(r#"{"id":"abc"}"#);
        assert!(result.is_err());
    }
}
