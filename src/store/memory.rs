//! In-memory store for tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{Nodo, RunStatus, ScrapeRun, SourceConfig, TenderRecord};

use super::{Result, TenderStore};

#[derive(Default)]
struct Inner {
    tenders: HashMap<String, TenderRecord>,
    sources: HashMap<String, SourceConfig>,
    runs: HashMap<String, ScrapeRun>,
    nodos: HashMap<String, Nodo>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenderStore for MemoryStore {
    async fn get_tender(&self, id: &str) -> Result<Option<TenderRecord>> {
        Ok(self.inner.lock().await.tenders.get(id).cloned())
    }

    async fn tenders_by_hash(&self, source_id: &str) -> Result<HashMap<String, TenderRecord>> {
        Ok(self
            .inner
            .lock()
            .await
            .tenders
            .values()
            .filter(|r| r.source_id == source_id && r.merged_into.is_none())
            .map(|r| (r.content_hash.clone(), r.clone()))
            .collect())
    }

    async fn upsert_tender(&self, record: &TenderRecord) -> Result<()> {
        self.inner
            .lock()
            .await
            .tenders
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn bulk_upsert(&self, records: &[TenderRecord]) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        for record in records {
            inner.tenders.insert(record.id.clone(), record.clone());
        }
        Ok(records.len())
    }

    async fn all_tenders(&self) -> Result<Vec<TenderRecord>> {
        Ok(self.inner.lock().await.tenders.values().cloned().collect())
    }

    async fn get_source(&self, id: &str) -> Result<Option<SourceConfig>> {
        Ok(self.inner.lock().await.sources.get(id).cloned())
    }

    async fn all_sources(&self) -> Result<Vec<SourceConfig>> {
        let mut sources: Vec<_> = self.inner.lock().await.sources.values().cloned().collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn upsert_source(&self, source: &SourceConfig) -> Result<()> {
        self.inner
            .lock()
            .await
            .sources
            .insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn delete_source(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().await.sources.remove(id).is_some())
    }

    async fn record_run(&self, run: &ScrapeRun) -> Result<()> {
        self.inner
            .lock()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn runs(
        &self,
        source_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeRun>> {
        let inner = self.inner.lock().await;
        let mut runs: Vec<_> = inner
            .runs
            .values()
            .filter(|run| source_id.is_none_or(|id| run.source_id == id))
            .filter(|run| status.is_none_or(|s| run.status == s))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn sweep_orphan_runs(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let mut swept = 0;
        for run in inner.runs.values_mut() {
            if run.status == RunStatus::Running && run.started_at < started_before {
                run.status = RunStatus::Orphaned;
                run.finished_at = Some(Utc::now());
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn get_nodo(&self, id: &str) -> Result<Option<Nodo>> {
        Ok(self.inner.lock().await.nodos.get(id).cloned())
    }

    async fn all_nodos(&self) -> Result<Vec<Nodo>> {
        let mut nodos: Vec<_> = self.inner.lock().await.nodos.values().cloned().collect();
        nodos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodos)
    }

    async fn upsert_nodo(&self, nodo: &Nodo) -> Result<()> {
        self.inner
            .lock()
            .await
            .nodos
            .insert(nodo.id.clone(), nodo.clone());
        Ok(())
    }

    async fn delete_nodo(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let existed = inner.nodos.remove(id).is_some();
        if existed {
            // Group deletion is the one path that shrinks memberships.
            for record in inner.tenders.values_mut() {
                record.nodos.remove(id);
            }
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tender_roundtrip_and_hash_index() {
        let store = MemoryStore::new();
        let mut record = TenderRecord::new("src", "Licitación 12/2024");
        record.content_hash = "abc".to_string();
        store.upsert_tender(&record).await.unwrap();

        let found = store.get_tender(&record.id).await.unwrap().unwrap();
        assert_eq!(found.title, "Licitación 12/2024");

        let by_hash = store.tenders_by_hash("src").await.unwrap();
        assert!(by_hash.contains_key("abc"));
        assert!(store.tenders_by_hash("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merged_records_excluded_from_hash_index() {
        let store = MemoryStore::new();
        let mut record = TenderRecord::new("src", "t");
        record.content_hash = "abc".to_string();
        record.merged_into = Some("other-id".to_string());
        store.upsert_tender(&record).await.unwrap();
        assert!(store.tenders_by_hash("src").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_orphan_runs() {
        let store = MemoryStore::new();
        let mut stale = ScrapeRun::start("src");
        stale.started_at = Utc::now() - chrono::Duration::hours(5);
        store.record_run(&stale).await.unwrap();

        let fresh = ScrapeRun::start("src");
        store.record_run(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(2);
        assert_eq!(store.sweep_orphan_runs(cutoff).await.unwrap(), 1);

        let orphaned = store
            .runs(None, Some(RunStatus::Orphaned), 10)
            .await
            .unwrap();
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_nodo_deletion_shrinks_memberships() {
        let store = MemoryStore::new();
        let nodo = Nodo::new("fibra", "Fibra", vec!["fibra".to_string()]);
        store.upsert_nodo(&nodo).await.unwrap();

        let mut record = TenderRecord::new("src", "t");
        record.add_nodos(["fibra".to_string(), "redes".to_string()]);
        store.upsert_tender(&record).await.unwrap();

        assert!(store.delete_nodo("fibra").await.unwrap());
        let record = store.get_tender(&record.id).await.unwrap().unwrap();
        assert!(!record.nodos.contains("fibra"));
        assert!(record.nodos.contains("redes"));
    }
}
