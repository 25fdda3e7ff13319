//! Inverse hash index.
//!
//! Maps (id, content hash) pairs to a single sorted `u64` key so that
//! "has this listing entry already been reconciled?" is a binary search.
//!
//! ```text
//!  63          40 39                         0
//! +--------------+----------------------------+
//! |  id (24 bit) |  hash bits (40 bit)        |
//! +--------------+----------------------------+
//! ```
//!
//! Pairs that do not fit the layout are reported as conflicts and left out.

use serde::{Deserialize, Serialize};

use crate::models::Conflict;
use crate::storage::LocalIndex;
use crate::utils::ProgressReporter;

pub const HASH_BITS: u32 = 40;
pub const ID_BITS: u32 = 24;

const HASH_MASK: u64 = (1 << HASH_BITS) - 1;
const MAX_ID: u64 = (1 << ID_BITS) - 1;

/// Low 40 bits of the key for `hash`, if the hex value fits.
pub fn hash_bits(hash: &str) -> Option<u64> {
    u64::from_str_radix(hash, 16)
        .ok()
        .filter(|bits| *bits <= HASH_MASK)
}

/// Pack `(id, hash)` into one key.
pub fn composite_key(id: u64, hash: &str) -> Result<u64, Conflict> {
    if id > MAX_ID {
        return Err(Conflict::IdOutOfRange { id });
    }
    let bits = hash_bits(hash).ok_or_else(|| Conflict::HashOutOfRange {
        id,
        hash: hash.to_string(),
    })?;
    Ok((id << HASH_BITS) | bits)
}

/// Sorted, duplicate-free set of composite keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexSnapshot {
    keys: Vec<u64>,
}

impl IndexSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(mut keys: Vec<u64>) -> Self {
        keys.sort_unstable();
        keys.dedup();
        Self { keys }
    }

    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: u64) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// Whether the pair is indexed. Pairs that cannot be keyed never are.
    pub fn contains(&self, id: u64, hash: &str) -> bool {
        composite_key(id, hash).is_ok_and(|key| self.contains_key(key))
    }

    /// Insert a pair, keeping the keys sorted.
    ///
    /// Returns `Ok(false)` when the key was already present.
    pub fn insert(&mut self, id: u64, hash: &str) -> Result<bool, Conflict> {
        let key = composite_key(id, hash)?;
        match self.keys.binary_search(&key) {
            Ok(_) => Ok(false),
            Err(pos) => {
                self.keys.insert(pos, key);
                Ok(true)
            }
        }
    }
}

/// Result of a full rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildOutcome {
    pub snapshot: IndexSnapshot,
    pub conflicts: Vec<Conflict>,
    pub pages: usize,
}

/// Rebuild the snapshot from every hashed record.
///
/// Records are walked in keyset pages of `page_size` ids, so the working set
/// besides the output keys stays bounded by one page.
pub fn rebuild(
    index: &LocalIndex,
    page_size: usize,
    progress: &dyn ProgressReporter,
) -> RebuildOutcome {
    let page_size = page_size.max(1);
    let total = index.len();
    let mut keys = Vec::new();
    let mut conflicts = Vec::new();
    let mut pages = 0;
    let mut processed = 0;
    let mut after = None;

    loop {
        let page = index.page_after(after, page_size);
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.id);
        pages += 1;
        processed += page.len();

        for record in &page {
            let Some(hash) = record.content_hash.as_deref() else {
                continue;
            };
            match composite_key(record.id, hash) {
                Ok(key) => keys.push(key),
                Err(conflict) => {
                    log::warn!("Not indexed: {}", conflict);
                    conflicts.push(conflict);
                }
            }
        }

        progress.report(processed, total);
        if page.len() < page_size {
            break;
        }
    }

    let snapshot = IndexSnapshot::from_keys(keys);
    log::info!(
        "Inverse index rebuilt: {} keys from {} records in {} pages",
        snapshot.len(),
        total,
        pages
    );

    RebuildOutcome {
        snapshot,
        conflicts,
        pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CanonicalRecord, Origin};
    use crate::utils::NoProgress;

    fn hashed(id: u64, hash: Option<&str>) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(id, Origin::Both);
        record.content_hash = hash.map(String::from);
        record
    }

    #[test]
    fn test_composite_key_layout() {
        let key = composite_key(3, "ff").unwrap();
        assert_eq!(key, (3 << 40) | 0xff);
        assert_eq!(key >> HASH_BITS, 3);
        assert_eq!(hash_bits("ff"), Some(key & HASH_MASK));
    }

    #[test]
    fn test_composite_key_rejects_out_of_range() {
        assert_eq!(
            composite_key(1 << 24, "01"),
            Err(Conflict::IdOutOfRange { id: 1 << 24 })
        );
        assert_eq!(
            composite_key(1, "10000000000"),
            Err(Conflict::HashOutOfRange {
                id: 1,
                hash: "10000000000".to_string()
            })
        );
        assert!(composite_key(1, "ffffffffff").is_ok());
    }

    #[test]
    fn test_hash_bits_ignores_id() {
        assert_eq!(hash_bits("ffffffffff"), Some(HASH_MASK));
        assert_eq!(hash_bits("10000000000"), None);
        assert_eq!(hash_bits("not hex"), None);
        assert_eq!(hash_bits(""), None);
    }

    #[test]
    fn test_insert_keeps_order_and_uniqueness() {
        let mut snapshot = IndexSnapshot::new();
        assert_eq!(snapshot.insert(5, "a"), Ok(true));
        assert_eq!(snapshot.insert(1, "b"), Ok(true));
        assert_eq!(snapshot.insert(5, "a"), Ok(false));

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.keys().windows(2).all(|w| w[0] < w[1]));
        assert!(snapshot.contains(5, "a"));
        assert!(!snapshot.contains(5, "b"));
        assert!(!snapshot.contains(5, "not hex"));
    }

    #[test]
    fn test_rebuild_skips_unhashed_and_reports_out_of_range() {
        let (index, _) = LocalIndex::from_records(vec![
            hashed(1, Some("aa")),
            hashed(2, None),
            hashed(3, Some("ffffffffffff")),
            hashed(4, Some("bb")),
        ]);

        let outcome = rebuild(&index, 2, &NoProgress);
        assert_eq!(outcome.snapshot.len(), 2);
        assert!(outcome.snapshot.contains(1, "aa"));
        assert!(outcome.snapshot.contains(4, "bb"));
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].id(), 3);
        assert_eq!(outcome.pages, 2);
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let records: Vec<_> = (1..=25)
            .map(|id| hashed(id, Some(&format!("{:x}", id * 7))))
            .collect();
        let (index, _) = LocalIndex::from_records(records);

        let first = rebuild(&index, 4, &NoProgress);
        let second = rebuild(&index, 4, &NoProgress);
        assert_eq!(first.snapshot, second.snapshot);

        let one_page = rebuild(&index, 1000, &NoProgress);
        assert_eq!(first.snapshot, one_page.snapshot);
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let pairs = [(9, "19"), (2, "a2"), (40, "ff00"), (7, "7")];

        let mut incremental = IndexSnapshot::new();
        for (id, hash) in pairs {
            incremental.insert(id, hash).unwrap();
        }

        let records = pairs
            .iter()
            .map(|(id, hash)| hashed(*id, Some(hash)))
            .collect();
        let (index, _) = LocalIndex::from_records(records);

        assert_eq!(rebuild(&index, 3, &NoProgress).snapshot, incremental);
    }

    #[test]
    fn test_snapshot_serializes_as_plain_array() {
        let snapshot = IndexSnapshot::from_keys(vec![3, 1, 3]);
        assert_eq!(serde_json::to_string(&snapshot).unwrap(), "[1,3]");
    }
}
