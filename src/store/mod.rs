//! Persistence layer.
//!
//! Everything above this module talks to the [`TenderStore`] trait; the
//! concrete engine is an implementation detail. `SqliteStore` is the
//! production backend, `MemoryStore` backs tests and dry runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Nodo, RunStatus, ScrapeRun, SourceConfig, TenderRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage operations the harvester, enrichment, and API need.
#[async_trait]
pub trait TenderStore: Send + Sync {
    async fn get_tender(&self, id: &str) -> Result<Option<TenderRecord>>;

    /// Content-hash index for one source, used by the deduplicator to
    /// partition an incoming batch.
    async fn tenders_by_hash(&self, source_id: &str) -> Result<HashMap<String, TenderRecord>>;

    async fn upsert_tender(&self, record: &TenderRecord) -> Result<()>;

    /// Persist a whole batch. Implementations should make this one
    /// transaction so a crash never stores half a run's records.
    async fn bulk_upsert(&self, records: &[TenderRecord]) -> Result<usize>;

    async fn all_tenders(&self) -> Result<Vec<TenderRecord>>;

    async fn get_source(&self, id: &str) -> Result<Option<SourceConfig>>;
    async fn all_sources(&self) -> Result<Vec<SourceConfig>>;
    async fn upsert_source(&self, source: &SourceConfig) -> Result<()>;
    async fn delete_source(&self, id: &str) -> Result<bool>;

    async fn record_run(&self, run: &ScrapeRun) -> Result<()>;

    /// Recent runs, newest first, optionally filtered.
    async fn runs(
        &self,
        source_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeRun>>;

    /// Mark runs still `Running` but started before the cutoff as
    /// orphaned. Returns how many were swept.
    async fn sweep_orphan_runs(&self, started_before: DateTime<Utc>) -> Result<usize>;

    async fn get_nodo(&self, id: &str) -> Result<Option<Nodo>>;
    async fn all_nodos(&self) -> Result<Vec<Nodo>>;
    async fn upsert_nodo(&self, nodo: &Nodo) -> Result<()>;
    async fn delete_nodo(&self, id: &str) -> Result<bool>;
}

/// Parse a stored RFC 3339 timestamp, defaulting to the Unix epoch.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional stored timestamp.
pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
