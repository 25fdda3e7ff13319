// src/pipeline/load.rs

//! Bulk loading into the remote relational store.
//!
//! Records go out in batches; each batch is one transaction holding a single
//! multi-row upsert. The first failing batch is rolled back and ends the
//! load, so the remote side always holds a prefix of whole batches. Upserts
//! make re-running a partial load safe.

use serde::Serialize;

use crate::error::Result;
use crate::models::{CanonicalRecord, Config, TimestampSource};
use crate::storage::{CatalogStorage, RemoteConnection, load_index};
use crate::utils::ProgressReporter;
use crate::utils::sql::{
    bool_literal, list_literal, optional_text_literal, text_literal, timestamp_literal,
};

const RECORD_COLUMNS: [&str; 17] = [
    "id",
    "content_hash",
    "title",
    "item_type",
    "artists",
    "characters",
    "group_names",
    "language",
    "series",
    "tags",
    "uploader",
    "classification",
    "file_count",
    "published",
    "published_estimated",
    "exists_on_primary",
    "origin",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Completed,
    Aborted,
}

/// The batch that ended an aborted load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// 1-based
    pub batch: usize,
    pub first_id: u64,
    pub last_id: u64,
    pub error: String,
    /// Set when the rollback itself failed
    pub rollback_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub status: LoadStatus,
    pub batches_total: usize,
    pub batches_committed: usize,
    pub records_committed: usize,
    pub failure: Option<BatchFailure>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.status == LoadStatus::Completed
    }
}

/// Upsert every record into `table`.
pub async fn bulk_load(
    records: &[CanonicalRecord],
    table: &str,
    batch_size: usize,
    conn: &mut dyn RemoteConnection,
    progress: &dyn ProgressReporter,
) -> LoadReport {
    load_batches(records, table, batch_size, conn, progress, records_statement).await
}

/// Upsert `(id, file_count)` rows into the summary `table`.
pub async fn bulk_load_summaries(
    records: &[CanonicalRecord],
    table: &str,
    batch_size: usize,
    conn: &mut dyn RemoteConnection,
    progress: &dyn ProgressReporter,
) -> LoadReport {
    load_batches(records, table, batch_size, conn, progress, summary_statement).await
}

async fn load_batches(
    records: &[CanonicalRecord],
    table: &str,
    batch_size: usize,
    conn: &mut dyn RemoteConnection,
    progress: &dyn ProgressReporter,
    build: fn(&str, &[CanonicalRecord]) -> String,
) -> LoadReport {
    let batch_size = batch_size.max(1);
    let mut report = LoadReport {
        table: table.to_string(),
        status: LoadStatus::Completed,
        batches_total: records.len().div_ceil(batch_size),
        batches_committed: 0,
        records_committed: 0,
        failure: None,
    };

    for (i, batch) in records.chunks(batch_size).enumerate() {
        let statement = build(table, batch);
        if let Err(e) = run_batch(conn, &statement).await {
            log::error!(
                "{}: batch {}/{} failed: {}",
                table,
                i + 1,
                report.batches_total,
                e
            );
            log::error!("Failing statement: {}", statement);

            let rollback_error = match conn.rollback().await {
                Ok(()) => None,
                Err(rollback) => {
                    log::error!("{}: rollback failed: {}", table, rollback);
                    Some(rollback.to_string())
                }
            };

            report.status = LoadStatus::Aborted;
            report.failure = Some(BatchFailure {
                batch: i + 1,
                first_id: batch.first().map_or(0, |r| r.id),
                last_id: batch.last().map_or(0, |r| r.id),
                error: e.to_string(),
                rollback_error,
            });
            return report;
        }

        report.batches_committed += 1;
        report.records_committed += batch.len();
        progress.report(report.records_committed, records.len());
    }

    log::info!(
        "{}: {} records committed in {} batches",
        table,
        report.records_committed,
        report.batches_committed
    );
    report
}

async fn run_batch(conn: &mut dyn RemoteConnection, statement: &str) -> Result<()> {
    conn.begin().await?;
    conn.execute(statement).await?;
    conn.commit().await
}

/// Multi-row upsert for the record table.
pub fn records_statement(table: &str, batch: &[CanonicalRecord]) -> String {
    let rows: Vec<String> = batch.iter().map(record_row).collect();
    let updates: Vec<String> = RECORD_COLUMNS[1..]
        .iter()
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT (id) DO UPDATE SET {}",
        table,
        RECORD_COLUMNS.join(", "),
        rows.join(", "),
        updates.join(", ")
    )
}

/// Multi-row upsert for the `(id, file_count)` summary table.
pub fn summary_statement(table: &str, batch: &[CanonicalRecord]) -> String {
    let rows: Vec<String> = batch
        .iter()
        .map(|r| format!("({}, {})", r.id, r.file_count))
        .collect();
    format!(
        "INSERT INTO {} (id, file_count) VALUES {} ON CONFLICT (id) DO UPDATE SET file_count = EXCLUDED.file_count",
        table,
        rows.join(", ")
    )
}

fn record_row(record: &CanonicalRecord) -> String {
    let published = record.published.map(|p| p.at);
    let estimated = record
        .published
        .is_some_and(|p| p.source == TimestampSource::Estimated);
    let values = [
        record.id.to_string(),
        optional_text_literal(record.content_hash.as_deref()),
        text_literal(&record.title),
        optional_text_literal(record.item_type.as_deref()),
        list_literal(&record.artists),
        list_literal(&record.characters),
        list_literal(&record.groups),
        optional_text_literal(record.language.as_deref()),
        list_literal(&record.series),
        list_literal(&record.tags),
        optional_text_literal(record.uploader.as_deref()),
        optional_text_literal(record.classification.as_deref()),
        record.file_count.to_string(),
        timestamp_literal(published),
        bool_literal(estimated).to_string(),
        bool_literal(record.exists_on_primary).to_string(),
        text_literal(record.origin.as_str()),
    ];
    format!("({})", values.join(", "))
}

/// Load the summary table, then the record table, stopping at the first
/// aborted load.
pub async fn run_load(
    config: &Config,
    storage: &dyn CatalogStorage,
    conn: &mut dyn RemoteConnection,
    progress: &dyn ProgressReporter,
) -> Result<Vec<LoadReport>> {
    let (index, _) = load_index(storage).await?;
    let records = index.to_vec();
    let remote = &config.remote;

    let summary = bulk_load_summaries(
        &records,
        &remote.summary_table,
        remote.batch_size,
        conn,
        progress,
    )
    .await;
    if !summary.is_complete() {
        return Ok(vec![summary]);
    }

    let full = bulk_load(
        &records,
        &remote.records_table,
        remote.batch_size,
        conn,
        progress,
    )
    .await;
    Ok(vec![summary, full])
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory `RemoteConnection` for loader tests.

    use async_trait::async_trait;

    use crate::error::{AppError, Result};
    use crate::storage::RemoteConnection;

    #[derive(Debug, Default)]
    pub struct MemoryConnection {
        /// 1-based execute call that fails
        pub fail_on_execute: Option<usize>,
        pub fail_rollback: bool,
        pub executes: usize,
        pub rollbacks: usize,
        pub committed: Vec<String>,
        pending: Option<String>,
    }

    impl MemoryConnection {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_on(execute: usize) -> Self {
            Self {
                fail_on_execute: Some(execute),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RemoteConnection for MemoryConnection {
        async fn begin(&mut self) -> Result<()> {
            self.pending = None;
            Ok(())
        }

        async fn execute(&mut self, statement: &str) -> Result<()> {
            self.executes += 1;
            if self.fail_on_execute == Some(self.executes) {
                return Err(AppError::remote("duplicate key value violates constraint"));
            }
            self.pending = Some(statement.to_string());
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            if let Some(statement) = self.pending.take() {
                self.committed.push(statement);
            }
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.rollbacks += 1;
            self.pending = None;
            if self.fail_rollback {
                return Err(AppError::remote("connection closed"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryConnection;
    use super::*;
    use crate::models::{Origin, Published};
    use crate::utils::NoProgress;
    use crate::utils::sql::testing::text_literals;
    use chrono::DateTime;

    fn records(count: u64) -> Vec<CanonicalRecord> {
        (1..=count)
            .map(|id| {
                let mut record = CanonicalRecord::new(id, Origin::Primary);
                record.file_count = 3;
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_batches_commit() {
        let mut conn = MemoryConnection::new();
        let report = bulk_load(&records(25), "t", 10, &mut conn, &NoProgress).await;

        assert!(report.is_complete());
        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_committed, 3);
        assert_eq!(report.records_committed, 25);
        assert_eq!(conn.committed.len(), 3);
    }

    #[tokio::test]
    async fn test_failing_batch_aborts_the_load() {
        let mut conn = MemoryConnection::failing_on(2);
        let report = bulk_load(&records(120_000), "t", 50_000, &mut conn, &NoProgress).await;

        assert_eq!(report.status, LoadStatus::Aborted);
        assert_eq!(report.batches_total, 3);
        assert_eq!(report.batches_committed, 1);
        assert_eq!(report.records_committed, 50_000);
        assert_eq!(conn.executes, 2);
        assert_eq!(conn.rollbacks, 1);
        assert_eq!(conn.committed.len(), 1);

        let failure = report.failure.unwrap();
        assert_eq!(failure.batch, 2);
        assert_eq!((failure.first_id, failure.last_id), (50_001, 100_000));
        assert!(failure.rollback_error.is_none());
    }

    #[tokio::test]
    async fn test_rollback_failure_is_reported() {
        let mut conn = MemoryConnection::failing_on(1);
        conn.fail_rollback = true;
        let report = bulk_load(&records(5), "t", 10, &mut conn, &NoProgress).await;

        let failure = report.failure.unwrap();
        assert_eq!(failure.batch, 1);
        assert!(failure.rollback_error.unwrap().contains("connection closed"));
        assert_eq!(report.records_committed, 0);
    }

    #[tokio::test]
    async fn test_empty_input_completes() {
        let mut conn = MemoryConnection::new();
        let report = bulk_load(&[], "t", 10, &mut conn, &NoProgress).await;
        assert!(report.is_complete());
        assert_eq!(report.batches_total, 0);
        assert_eq!(conn.executes, 0);
    }

    #[test]
    fn test_record_statement_escapes_text() {
        let mut record = CanonicalRecord::new(7, Origin::Both);
        record.title = r#"He said "go\now""#.to_string();
        record.tags = vec!["it's".to_string(), "a＇b".to_string()];
        record.published = Some(Published::estimated(
            DateTime::from_timestamp(0, 0).unwrap(),
        ));

        let statement = records_statement("catalog_records", &[record]);
        assert!(statement.starts_with("INSERT INTO catalog_records (id, content_hash"));
        assert!(statement.contains("ON CONFLICT (id) DO UPDATE SET content_hash = EXCLUDED.content_hash"));
        assert!(statement.contains("'1970-01-01 00:00:00', TRUE, TRUE"));

        let literals = text_literals(&statement);
        assert!(literals.contains(&r#"He said "go\now""#.to_string()));
        assert!(literals.contains(&"it's|a'b".to_string()));
        assert!(literals.contains(&"both".to_string()));
    }

    #[test]
    fn test_summary_statement() {
        let statement = summary_statement("catalog_pages", &records(2));
        assert_eq!(
            statement,
            "INSERT INTO catalog_pages (id, file_count) VALUES (1, 3), (2, 3) ON CONFLICT (id) DO UPDATE SET file_count = EXCLUDED.file_count"
        );
    }

    #[tokio::test]
    async fn test_rerun_after_abort_is_idempotent_on_statements() {
        let input = records(30);
        let mut first = MemoryConnection::failing_on(2);
        bulk_load(&input, "t", 10, &mut first, &NoProgress).await;

        let mut second = MemoryConnection::new();
        bulk_load(&input, "t", 10, &mut second, &NoProgress).await;
        assert_eq!(first.committed[0], second.committed[0]);
        assert_eq!(second.committed.len(), 3);
    }
}
