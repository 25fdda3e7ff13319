//! Filesystem-backed catalog storage.
//!
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash never leaves a half-written artifact behind. Records are
//! written before the sync state, which means an interrupted run can only
//! lose checkpoint progress, never data the checkpoint claims.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{CanonicalRecord, SyncState};
use crate::pipeline::estimate::EstimatorParams;
use crate::pipeline::extract::RecordSet;
use crate::pipeline::index::IndexSnapshot;
use crate::storage::CatalogStorage;

const RECORDS_KEY: &str = "records.json";
const STATE_KEY: &str = "state.json";
const INVERSE_INDEX_KEY: &str = "invtable.json";
const ESTIMATOR_KEY: &str = "estimator.json";
const EXPORT_DIR: &str = "exports";

/// Artifacts as files under one data directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
}

impl LocalStorage {
    /// Storage rooted at `root_dir`; nothing is created until the first write.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Path of an artifact key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write through a `.tmp` sibling and rename over the target.
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write pretty-printed JSON.
    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Write compact JSON, for the large artifacts.
    async fn write_json_compact<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// `None` when the artifact was never written.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn export_key(name: &str) -> String {
        format!("{EXPORT_DIR}/{name}.json")
    }

    fn counts_key(name: &str) -> String {
        format!("{EXPORT_DIR}/{name}-counts.json")
    }
}

#[async_trait]
impl CatalogStorage for LocalStorage {
    async fn load_records(&self) -> Result<Vec<CanonicalRecord>> {
        match self.read_json(RECORDS_KEY).await? {
            Some(records) => Ok(records),
            None => {
                log::warn!("No {} found, starting from an empty index", RECORDS_KEY);
                Ok(Vec::new())
            }
        }
    }

    async fn save_records(&self, records: &[CanonicalRecord]) -> Result<()> {
        self.write_json_compact(RECORDS_KEY, records).await?;
        log::info!("Saved {} records to {}", records.len(), RECORDS_KEY);
        Ok(())
    }

    async fn load_state(&self) -> Result<SyncState> {
        Ok(self.read_json(STATE_KEY).await?.unwrap_or_default())
    }

    async fn save_state(&self, state: &SyncState) -> Result<()> {
        self.write_json(STATE_KEY, state).await
    }

    async fn load_inverse_index(&self) -> Result<Option<IndexSnapshot>> {
        self.read_json(INVERSE_INDEX_KEY).await
    }

    async fn save_inverse_index(&self, snapshot: &IndexSnapshot) -> Result<()> {
        self.write_json_compact(INVERSE_INDEX_KEY, snapshot).await
    }

    async fn load_estimator(&self) -> Result<Option<EstimatorParams>> {
        self.read_json(ESTIMATOR_KEY).await
    }

    async fn save_estimator(&self, params: &EstimatorParams) -> Result<()> {
        self.write_json(ESTIMATOR_KEY, params).await
    }

    async fn write_export(&self, prefix: &str, set: &RecordSet) -> Result<String> {
        let stem = set.file_stem(prefix);
        let key = Self::export_key(&stem);
        self.write_json_compact(&key, &set.records).await?;
        self.write_json(&Self::counts_key(&stem), &set.counts())
            .await?;
        log::info!("Exported {} records to {}", set.records.len(), key);
        Ok(self.path(&key).display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Origin, Published};
    use chrono::DateTime;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
        assert!(!tmp.path().join("test.tmp").exists());
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_first_run_defaults() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path().join("fresh"));

        assert!(storage.load_records().await.unwrap().is_empty());
        assert_eq!(storage.load_state().await.unwrap(), SyncState::default());
        assert!(storage.load_inverse_index().await.unwrap().is_none());
        assert!(storage.load_estimator().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_and_state_round_trip() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let mut record = CanonicalRecord::new(42, Origin::Both);
        record.title = "제목".to_string();
        record.content_hash = Some("abc".to_string());
        record.published = Some(Published::estimated(
            DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
        ));
        storage.save_records(&[record.clone()]).await.unwrap();

        let state = SyncState {
            primary_checkpoint: 42,
            last_sync: DateTime::from_timestamp(1_700_000_000, 0),
            last_secondary_pages: 3,
        };
        storage.save_state(&state).await.unwrap();

        assert_eq!(storage.load_records().await.unwrap(), vec![record]);
        assert_eq!(storage.load_state().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_inverse_index_save_load() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let snapshot = IndexSnapshot::from_keys(vec![9, 4, 7]);
        storage.save_inverse_index(&snapshot).await.unwrap();

        let loaded = storage.load_inverse_index().await.unwrap().unwrap();
        assert_eq!(loaded.keys(), &[4, 7, 9]);
    }

    #[tokio::test]
    async fn test_write_export_creates_records_and_counts() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let mut record = CanonicalRecord::new(1, Origin::Primary);
        record.tags = vec!["tag".to_string()];
        let set = RecordSet::new(Some("korean".to_string()), vec![record]);

        let location = storage.write_export("rawdata", &set).await.unwrap();
        assert!(location.ends_with("rawdata-korean.json"));
        assert!(tmp.path().join("exports/rawdata-korean.json").exists());
        assert!(tmp.path().join("exports/rawdata-korean-counts.json").exists());

        let written: Vec<CanonicalRecord> = storage
            .read_json("exports/rawdata-korean.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(written.len(), 1);
    }
}
