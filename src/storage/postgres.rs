// src/storage/postgres.rs

//! PostgreSQL implementation of `RemoteConnection`.

use async_trait::async_trait;
use tokio_postgres::{Client, NoTls};

use crate::error::Result;
use crate::storage::RemoteConnection;

pub struct PgConnection {
    client: Client,
}

impl PgConnection {
    /// Connect and drive the connection on a background task.
    pub async fn connect(url: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::error!("Postgres connection error: {}", e);
            }
        });
        log::info!("Connected to remote store");
        Ok(Self { client })
    }

    /// Create the summary and record tables if they do not exist yet.
    pub async fn ensure_schema(&self, summary_table: &str, records_table: &str) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {summary_table} (
                id BIGINT PRIMARY KEY,
                file_count INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {records_table} (
                id BIGINT PRIMARY KEY,
                content_hash TEXT,
                title TEXT NOT NULL,
                item_type TEXT,
                artists TEXT NOT NULL,
                characters TEXT NOT NULL,
                group_names TEXT NOT NULL,
                language TEXT,
                series TEXT NOT NULL,
                tags TEXT NOT NULL,
                uploader TEXT,
                classification TEXT,
                file_count INTEGER NOT NULL,
                published TIMESTAMP,
                published_estimated BOOLEAN NOT NULL,
                exists_on_primary BOOLEAN NOT NULL,
                origin TEXT NOT NULL
            );"
        );
        self.client.batch_execute(&ddl).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteConnection for PgConnection {
    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn execute(&mut self, statement: &str) -> Result<()> {
        self.client.batch_execute(statement).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}
