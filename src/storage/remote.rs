//! Connection seam for the remote relational store.
//!
//! The loader only needs explicit transaction control and raw statement
//! execution, so any backend (or a test double) can stand in.

use async_trait::async_trait;

use crate::error::Result;

/// One open connection to the remote store.
#[async_trait]
pub trait RemoteConnection: Send {
    async fn begin(&mut self) -> Result<()>;

    /// Execute a complete statement inside the open transaction.
    async fn execute(&mut self, statement: &str) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
