//! The canonical, deduplicated record store.
//!
//! `LocalIndex` owns every `CanonicalRecord`, keyed by primary id, and is the
//! single writer during a sync run. It enforces that a content hash belongs
//! to at most one id: a second id presenting an owned hash keeps its record
//! but not the hash, and the clash is returned as a `Conflict`.
//!
//! Attribute ownership between the two sources:
//!
//! | attribute | written by |
//! |---|---|
//! | title, type, artists, characters, groups, language, series, tags, file count, `exists_on_primary` | primary |
//! | content hash, observed timestamp, uploader, classification | secondary |
//!
//! A record first created by the listing source is filled from the listing
//! until the primary source observes it.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::models::{
    CanonicalRecord, Conflict, Origin, PrimaryItem, Published, SecondaryObservation,
};
use crate::pipeline::index::hash_bits;

/// Effect of applying one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

impl Change {
    pub fn is_change(self) -> bool {
        self != Change::Unchanged
    }
}

/// Result of merging one listing observation.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub change: Change,
    pub conflicts: Vec<Conflict>,
    /// Hash newly attached to the record, if any
    pub assigned_hash: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalIndex {
    records: BTreeMap<u64, CanonicalRecord>,
    hash_owners: HashMap<String, u64>,
}

impl LocalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from persisted records.
    ///
    /// Records are taken in id order; a hash already owned by a lower id is
    /// stripped from the later record and reported.
    pub fn from_records(records: Vec<CanonicalRecord>) -> (Self, Vec<Conflict>) {
        let mut index = Self::new();
        let mut conflicts = Vec::new();

        let mut sorted = records;
        sorted.sort_by_key(|r| r.id);

        for mut record in sorted {
            if index.records.contains_key(&record.id) {
                log::warn!("Duplicate record #{} in stored index; keeping the last", record.id);
                if let Some(old_hash) = index.records[&record.id].content_hash.clone() {
                    index.hash_owners.remove(&old_hash);
                }
            }

            if let Some(hash) = record.content_hash.clone() {
                match index.hash_owners.get(&hash) {
                    Some(&owner_id) if owner_id != record.id => {
                        conflicts.push(Conflict::DuplicateHash {
                            id: record.id,
                            hash,
                            owner_id,
                        });
                        record.content_hash = None;
                    }
                    _ => {
                        index.hash_owners.insert(hash, record.id);
                    }
                }
            }

            index.records.insert(record.id, record);
        }

        (index, conflicts)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&CanonicalRecord> {
        self.records.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.records.contains_key(&id)
    }

    /// Id currently owning `hash`.
    #[cfg(test)]
    pub fn owner_of(&self, hash: &str) -> Option<u64> {
        self.hash_owners.get(hash).copied()
    }

    /// Records in ascending id order.
    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.values()
    }

    pub fn to_vec(&self) -> Vec<CanonicalRecord> {
        self.records.values().cloned().collect()
    }

    /// Keyset page: up to `limit` records with id greater than `after`.
    pub fn page_after(&self, after: Option<u64>, limit: usize) -> Vec<&CanonicalRecord> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.records
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .take(limit)
            .collect()
    }

    /// Apply an item observed on the primary source.
    pub fn upsert_primary(&mut self, item: &PrimaryItem) -> Change {
        let created = !self.records.contains_key(&item.id);
        let record = self
            .records
            .entry(item.id)
            .or_insert_with(|| CanonicalRecord::new(item.id, Origin::Primary));
        let before = record.clone();

        record.title = item.title.clone();
        record.item_type = item.item_type.clone();
        record.language = item.language.clone();
        record.artists = item.artists.clone();
        record.characters = item.characters.clone();
        record.groups = item.groups.clone();
        record.series = item.series.clone();
        record.tags = item.tags.clone();
        record.file_count = item.files;
        record.exists_on_primary = true;
        record.origin = record.origin.with_primary();

        if created {
            Change::Created
        } else if *record != before {
            Change::Updated
        } else {
            Change::Unchanged
        }
    }

    /// Record that the primary source no longer serves `id`.
    ///
    /// Unknown ids are ignored.
    pub fn mark_missing(&mut self, id: u64) -> Change {
        match self.records.get_mut(&id) {
            Some(record) if record.exists_on_primary => {
                record.exists_on_primary = false;
                Change::Updated
            }
            _ => Change::Unchanged,
        }
    }

    /// Merge an entry of the listing source.
    ///
    /// Fills the hash and observed timestamp when absent. An existing
    /// different hash is kept and reported as `HashMismatch`.
    pub fn merge_secondary(&mut self, obs: &SecondaryObservation) -> MergeOutcome {
        let mut conflicts = Vec::new();
        let mut assigned_hash = None;

        // independent of whether the id fits
        let hash_fits = hash_bits(&obs.hash).is_some();
        if !hash_fits {
            conflicts.push(Conflict::HashOutOfRange {
                id: obs.id,
                hash: obs.hash.clone(),
            });
        }

        let created = !self.records.contains_key(&obs.id);
        let record = self.records.entry(obs.id).or_insert_with(|| {
            let mut record = CanonicalRecord::new(obs.id, Origin::Secondary);
            record.title = obs.title.clone();
            record.language = obs.language.clone();
            record.tags = obs.tags.clone();
            record.file_count = obs.file_count;
            record
        });
        let before = record.clone();

        record.origin = record.origin.with_secondary();
        if obs.uploader.is_some() {
            record.uploader = obs.uploader.clone();
        }
        if obs.classification.is_some() {
            record.classification = obs.classification.clone();
        }

        match record.content_hash.as_deref() {
            Some(existing) if existing == obs.hash => {}
            Some(existing) => conflicts.push(Conflict::HashMismatch {
                id: obs.id,
                existing: existing.to_string(),
                observed: obs.hash.clone(),
            }),
            None if hash_fits => match self.hash_owners.get(&obs.hash) {
                Some(&owner_id) if owner_id != obs.id => {
                    conflicts.push(Conflict::DuplicateHash {
                        id: obs.id,
                        hash: obs.hash.clone(),
                        owner_id,
                    });
                }
                _ => {
                    record.content_hash = Some(obs.hash.clone());
                    self.hash_owners.insert(obs.hash.clone(), obs.id);
                    assigned_hash = Some(obs.hash.clone());
                }
            },
            None => {}
        }

        if let Some(at) = obs.published {
            if record.observed_published().is_none() {
                record.published = Some(Published::observed(at));
            }
        }

        let change = if created {
            Change::Created
        } else if *record != before {
            Change::Updated
        } else {
            Change::Unchanged
        };

        MergeOutcome {
            change,
            conflicts,
            assigned_hash,
        }
    }

    /// (id, observed timestamp) pairs, ascending by id.
    pub fn observed_timestamps(&self) -> Vec<(u64, DateTime<Utc>)> {
        self.records
            .values()
            .filter_map(|r| r.observed_published().map(|at| (r.id, at)))
            .collect()
    }

    /// Fill or refresh estimated timestamps; observed ones are never touched.
    ///
    /// Returns the number of records whose timestamp changed.
    pub fn apply_estimates<F>(&mut self, estimate: F) -> usize
    where
        F: Fn(u64) -> Option<DateTime<Utc>>,
    {
        let mut changed = 0;
        for record in self.records.values_mut() {
            if record.observed_published().is_some() {
                continue;
            }
            let next = estimate(record.id).map(Published::estimated);
            if next.is_some() && record.published != next {
                record.published = next;
                changed += 1;
            }
        }
        changed
    }
}
