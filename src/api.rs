//! Service facade.
//!
//! One struct owning the store, scheduler, and matcher, exposing the
//! operations the CLI (or any future surface) drives: triggering runs,
//! run history and health, nodo management, estado overrides, workflow
//! transitions, and the vigencia batch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::dedup::{merge, retire};
use crate::models::{Estado, Nodo, RunStatus, ScrapeRun, TenderRecord, WorkflowState};
use crate::nodos::NodoMatcher;
use crate::scheduler::Scheduler;
use crate::store::{StoreError, TenderStore};
use crate::vigencia::{self, BatchOutcome};
use crate::workflow::{self, WorkflowError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Per-source operational health, derived from recent run history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub runs_considered: usize,
    /// Completed / considered over the window.
    pub success_rate: f64,
    pub avg_duration_secs: Option<f64>,
    /// When the source last finished a run, any status.
    pub last_run_at: Option<DateTime<Utc>>,
    /// When it last finished successfully.
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Runs considered for health figures.
const HEALTH_WINDOW: usize = 20;

pub struct Api {
    store: Arc<dyn TenderStore>,
    scheduler: Arc<Scheduler>,
    matcher: Arc<NodoMatcher>,
    archive_after_days: i64,
}

impl Api {
    pub fn new(
        store: Arc<dyn TenderStore>,
        scheduler: Arc<Scheduler>,
        matcher: Arc<NodoMatcher>,
        archive_after_days: i64,
    ) -> Self {
        Self {
            store,
            scheduler,
            matcher,
            archive_after_days,
        }
    }

    /// Run one source immediately, regardless of its schedule.
    pub async fn trigger_run(&self, source_id: &str) -> Result<ScrapeRun> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                kind: "source",
                id: source_id.to_string(),
            })?;
        Ok(self.scheduler.run_source(source).await?)
    }

    pub async fn run_history(
        &self,
        source_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
    ) -> Result<Vec<ScrapeRun>> {
        Ok(self.store.runs(source_id, status, limit).await?)
    }

    /// Health summary for one source over its recent runs.
    pub async fn source_health(&self, source_id: &str) -> Result<SourceHealth> {
        if self.store.get_source(source_id).await?.is_none() {
            return Err(ApiError::NotFound {
                kind: "source",
                id: source_id.to_string(),
            });
        }
        let runs = self.store.runs(Some(source_id), None, HEALTH_WINDOW).await?;

        let finished: Vec<&ScrapeRun> =
            runs.iter().filter(|r| r.finished_at.is_some()).collect();
        let completed: Vec<&ScrapeRun> = finished
            .iter()
            .copied()
            .filter(|r| r.status == RunStatus::Completed)
            .collect();

        let durations: Vec<f64> = finished.iter().filter_map(|r| r.duration_secs()).collect();
        let avg_duration_secs = (!durations.is_empty())
            .then(|| durations.iter().sum::<f64>() / durations.len() as f64);

        Ok(SourceHealth {
            source_id: source_id.to_string(),
            runs_considered: finished.len(),
            success_rate: if finished.is_empty() {
                0.0
            } else {
                completed.len() as f64 / finished.len() as f64
            },
            avg_duration_secs,
            last_run_at: finished.iter().filter_map(|r| r.finished_at).max(),
            last_success_at: completed.iter().filter_map(|r| r.finished_at).max(),
        })
    }

    /// Create or update a nodo. Editing keywords invalidates its compiled
    /// patterns and re-matches the whole corpus additively.
    pub async fn upsert_nodo(&self, nodo: &Nodo) -> Result<usize> {
        self.store.upsert_nodo(nodo).await?;
        self.matcher.invalidate(&nodo.id);
        self.rematch_nodo(&nodo.id).await
    }

    /// Re-run one group against every stored record. Returns how many
    /// records gained the tag. Never removes a membership.
    pub async fn rematch_nodo(&self, nodo_id: &str) -> Result<usize> {
        let nodo = self
            .store
            .get_nodo(nodo_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                kind: "nodo",
                id: nodo_id.to_string(),
            })?;

        let mut tagged = 0;
        let mut changed = Vec::new();
        for mut record in self.store.all_tenders().await? {
            if record.merged_into.is_some() || record.nodos.contains(&nodo.id) {
                continue;
            }
            if self.matcher.matches(&nodo, &record) {
                record.add_nodos([nodo.id.clone()]);
                tagged += 1;
                changed.push(record);
            }
        }
        if !changed.is_empty() {
            self.store.bulk_upsert(&changed).await?;
        }
        tracing::info!(nodo = nodo_id, tagged, "nodo rematch complete");
        Ok(tagged)
    }

    /// Delete a group, shrinking memberships everywhere.
    pub async fn delete_nodo(&self, nodo_id: &str) -> Result<bool> {
        let existed = self.store.delete_nodo(nodo_id).await?;
        self.matcher.invalidate(nodo_id);
        Ok(existed)
    }

    /// Manual estado override with a mandatory reason.
    pub async fn override_estado(
        &self,
        tender_id: &str,
        to: Estado,
        reason: &str,
    ) -> Result<TenderRecord> {
        let mut record = self.get_record(tender_id).await?;
        vigencia::override_estado(&mut record, to, reason);
        self.store.upsert_tender(&record).await?;
        Ok(record)
    }

    /// Advance (or discard) the manual workflow.
    pub async fn transition_workflow(
        &self,
        tender_id: &str,
        to: WorkflowState,
        note: Option<&str>,
    ) -> Result<TenderRecord> {
        let mut record = self.get_record(tender_id).await?;
        workflow::transition(&mut record, to, note)?;
        self.store.upsert_tender(&record).await?;
        Ok(record)
    }

    /// Manually fold `duplicate_id` into `canonical_id`. The duplicate is
    /// retired in place with a pointer back to the survivor, never deleted.
    pub async fn merge_tenders(
        &self,
        canonical_id: &str,
        duplicate_id: &str,
    ) -> Result<TenderRecord> {
        let mut canonical = self.get_record(canonical_id).await?;
        let mut duplicate = self.get_record(duplicate_id).await?;
        merge(&mut canonical, &duplicate);
        retire(&mut duplicate, &canonical.id);
        self.store.bulk_upsert(&[canonical.clone(), duplicate]).await?;
        Ok(canonical)
    }

    /// Download and extract the attached documents of one tender. Returns
    /// how many files yielded text.
    pub async fn enrich_tender_documents(&self, tender_id: &str) -> Result<usize> {
        let mut record = self.get_record(tender_id).await?;
        let source = self
            .store
            .get_source(&record.source_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                kind: "source",
                id: record.source_id.clone(),
            })?;
        Ok(self
            .scheduler
            .extract_documents(&source, &mut record)
            .await?)
    }

    /// Document stage over the corpus: level-2 records with files still
    /// waiting for extraction, up to `limit` of them.
    pub async fn run_document_enrichment(&self, limit: usize) -> Result<u32> {
        Ok(self.scheduler.document_pass(limit).await?)
    }

    /// Daily vigencia pass over the whole corpus.
    pub async fn run_vigencia(&self) -> Result<BatchOutcome> {
        let mut records = self.store.all_tenders().await?;
        let (outcome, changed) = vigencia::run_batch(
            &mut records,
            Utc::now().date_naive(),
            self.archive_after_days,
        );
        if !changed.is_empty() {
            let changed_set: std::collections::HashSet<&String> = changed.iter().collect();
            let to_persist: Vec<TenderRecord> = records
                .into_iter()
                .filter(|r| changed_set.contains(&r.id))
                .collect();
            self.store.bulk_upsert(&to_persist).await?;
        }
        Ok(outcome)
    }

    async fn get_record(&self, tender_id: &str) -> Result<TenderRecord> {
        self.store
            .get_tender(tender_id)
            .await?
            .ok_or_else(|| ApiError::NotFound {
                kind: "tender",
                id: tender_id.to_string(),
            })
    }
}
