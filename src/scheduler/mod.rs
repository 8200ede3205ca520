//! Run scheduling and orchestration.
//!
//! A tick sweeps orphaned runs, finds due sources, and harvests each one
//! under two concurrency ceilings: a global permit pool and a smaller pool
//! for heavy sources (gazette PDF crawls, rendered pages). Each source run
//! has a wall-clock budget; on timeout whatever candidates were already
//! accumulated are still deduplicated and persisted, and the run is marked
//! failed so the gap is visible.
//!
//! Persistence per run is one bulk upsert. A crash mid-run loses the run,
//! never half of it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};

use crate::dates::{date_from_text, resolve_opening_date, resolve_publication_date, validate_chronology};
use crate::dedup::{partition, stamp_hash};
use crate::enrich::{enrich_documents, EnrichmentService};
use crate::fetch::FetchClient;
use crate::models::{
    RunStatus, ScrapeRun, SourceConfig, TenderRecord, WeightClass,
};
use crate::nodos::NodoMatcher;
use crate::sources::{AdapterRegistry, RawCandidate, SourceAdapter};
use crate::store::{StoreError, TenderStore};

/// Detail pages fetched for newly discovered records in one run.
const MAX_DETAIL_FETCHES_PER_RUN: usize = 10;

/// Records given the document stage per tick.
const MAX_DOCUMENT_RECORDS_PER_TICK: usize = 10;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global concurrent source-run ceiling.
    pub max_concurrent: usize,
    /// Heavy-source subset of the global ceiling.
    pub max_heavy: usize,
    /// Wall-clock budget per source run.
    pub run_timeout: Duration,
    /// Runs still marked running after this long are orphans.
    pub orphan_after: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_heavy: 1,
            run_timeout: Duration::from_secs(600),
            orphan_after: Duration::from_secs(3600 * 2),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutcome {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    pub orphans_swept: usize,
    /// Records whose attached documents yielded text this tick.
    pub documents_enriched: u32,
}

/// Listing state accumulated inside the run's time budget. Lives behind a
/// mutex so a timeout can still read what was gathered.
#[derive(Default)]
struct HarvestState {
    found: u32,
    candidates: Vec<TenderRecord>,
    errors: Vec<(String, String)>,
    /// The listing itself could not be fetched; item-level errors never
    /// set this.
    listing_failed: bool,
}

pub struct Scheduler {
    store: Arc<dyn TenderStore>,
    client: FetchClient,
    registry: Arc<AdapterRegistry>,
    matcher: Arc<NodoMatcher>,
    enricher: EnrichmentService,
    global: Arc<Semaphore>,
    heavy: Arc<Semaphore>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TenderStore>,
        client: FetchClient,
        registry: Arc<AdapterRegistry>,
        matcher: Arc<NodoMatcher>,
        enricher: EnrichmentService,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            client,
            registry,
            matcher,
            enricher,
            global: Arc::new(Semaphore::new(config.max_concurrent)),
            heavy: Arc::new(Semaphore::new(config.max_heavy)),
            config,
        }
    }

    /// One scheduling pass: sweep orphans, then harvest every due source.
    pub async fn tick(&self) -> Result<TickOutcome, StoreError> {
        let mut outcome = TickOutcome::default();

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.orphan_after)
                .unwrap_or_else(|_| chrono::Duration::hours(2));
        outcome.orphans_swept = self.store.sweep_orphan_runs(cutoff).await?;
        if outcome.orphans_swept > 0 {
            tracing::warn!(count = outcome.orphans_swept, "swept orphaned runs");
        }

        let now = Utc::now();
        let due: Vec<SourceConfig> = self
            .store
            .all_sources()
            .await?
            .into_iter()
            .filter(|source| source.active && source.is_due(now))
            .collect();
        outcome.due = due.len();

        let mut handles = Vec::new();
        for source in due {
            handles.push(self.run_source(source));
        }
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(run) if run.status == RunStatus::Completed => outcome.completed += 1,
                Ok(_) => outcome.failed += 1,
                Err(err) => {
                    tracing::error!(error = %err, "source run aborted on store error");
                    outcome.failed += 1;
                }
            }
        }

        outcome.documents_enriched = self.document_pass(MAX_DOCUMENT_RECORDS_PER_TICK).await?;

        tracing::info!(
            due = outcome.due,
            completed = outcome.completed,
            failed = outcome.failed,
            documents = outcome.documents_enriched,
            "tick complete"
        );
        Ok(outcome)
    }

    /// Level-3 stage: records that reached level 2 with files still waiting
    /// for extraction get their attachments downloaded and the text folded
    /// in. Bounded per call so one document-heavy source cannot monopolize
    /// a tick.
    pub async fn document_pass(&self, limit: usize) -> Result<u32, StoreError> {
        let pending: Vec<TenderRecord> = self
            .store
            .all_tenders()
            .await?
            .into_iter()
            .filter(|record| {
                record.merged_into.is_none()
                    && record.enrichment_level >= 2
                    && record.attached_files.iter().any(|f| !f.extracted)
            })
            .take(limit)
            .collect();

        let mut enriched = 0;
        for mut record in pending {
            let Some(source) = self.store.get_source(&record.source_id).await? else {
                tracing::warn!(record = %record.id, source = %record.source_id, "skipping documents for record of deleted source");
                continue;
            };
            if self.extract_documents(&source, &mut record).await? > 0 {
                enriched += 1;
            }
        }
        Ok(enriched)
    }

    /// Run document extraction for one record, persisting it when anything
    /// moved: new text, or a file marked as processed.
    pub async fn extract_documents(
        &self,
        source: &SourceConfig,
        record: &mut TenderRecord,
    ) -> Result<usize, StoreError> {
        let unextracted =
            |r: &TenderRecord| r.attached_files.iter().filter(|f| !f.extracted).count();
        let before = unextracted(record);

        let extracted = enrich_documents(source, record, &self.client).await;
        if extracted > 0 || unextracted(record) < before {
            self.store.upsert_tender(record).await?;
        }
        Ok(extracted)
    }

    /// Harvest one source end to end. Only store failures bubble up;
    /// fetch and parse trouble is recorded on the run itself.
    pub async fn run_source(&self, mut source: SourceConfig) -> Result<ScrapeRun, StoreError> {
        // Semaphores are never closed; acquire only errs after close.
        let _global = self.global.acquire().await.ok();
        let _heavy = match source.weight {
            WeightClass::Heavy => self.heavy.acquire().await.ok(),
            WeightClass::Light => None,
        };

        let mut run = ScrapeRun::start(&source.id);
        self.store.record_run(&run).await?;
        tracing::info!(source = %source.id, run = %run.id, "run started");

        let adapter = self.registry.adapter_for(&source);
        let state = Mutex::new(HarvestState::default());

        let timed_out = tokio::time::timeout(
            self.config.run_timeout,
            self.harvest(&source, adapter.as_ref(), &state),
        )
        .await
        .is_err();

        let mut state = state.into_inner();
        run.counts.found = state.found;
        for (item, message) in state.errors.drain(..) {
            run.record_error(item, message);
        }
        if timed_out {
            run.record_error("run", "time budget exhausted, flushing partial results");
            tracing::warn!(source = %source.id, run = %run.id, "run timed out, flushing partial batch");
        }

        let listing_failed = state.listing_failed;
        let saved_new = self
            .finalize(&source, adapter.as_ref(), &mut run, state.candidates)
            .await?;

        // Item-level trouble stays visible in run.errors but does not
        // fail the run; only losing the listing or the time budget does.
        let status = if timed_out || listing_failed {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        run.finish(status);
        self.store.record_run(&run).await?;

        source.note_run(saved_new > 0, Utc::now());
        self.store.upsert_source(&source).await?;

        tracing::info!(
            source = %source.id,
            run = %run.id,
            status = status.as_str(),
            found = run.counts.found,
            saved = run.counts.saved,
            updated = run.counts.updated,
            duplicates = run.counts.duplicates,
            "run finished"
        );
        Ok(run)
    }

    /// Fetch the listing and turn every parseable item into a candidate
    /// record. Parse failures are per-item, never fatal.
    async fn harvest(
        &self,
        source: &SourceConfig,
        adapter: &dyn SourceAdapter,
        state: &Mutex<HarvestState>,
    ) {
        let items = match adapter.fetch_listing(source, &self.client).await {
            Ok(items) => items,
            Err(err) => {
                let mut state = state.lock().await;
                state.listing_failed = true;
                state.errors.push(("listing".to_string(), err.to_string()));
                return;
            }
        };
        state.lock().await.found = items.len() as u32;

        for (index, item) in items.iter().enumerate() {
            match adapter.parse_item(source, item) {
                Ok(candidate) => {
                    let record = build_record(source, candidate);
                    state.lock().await.candidates.push(record);
                }
                Err(err) => {
                    tracing::warn!(source = %source.id, index, error = %err, "item parse failed, skipping");
                    state
                        .lock()
                        .await
                        .errors
                        .push((format!("item {index}"), err.to_string()));
                }
            }
        }
    }

    /// Deduplicate candidates against the stored hash index, enrich and
    /// tag what survives, and persist everything in one batch.
    async fn finalize(
        &self,
        source: &SourceConfig,
        adapter: &dyn SourceAdapter,
        run: &mut ScrapeRun,
        candidates: Vec<TenderRecord>,
    ) -> Result<u32, StoreError> {
        if candidates.is_empty() {
            return Ok(0);
        }

        let existing = self.store.tenders_by_hash(&source.id).await?;
        let mut part = partition(candidates, &existing);
        run.counts.saved = part.inserts.len() as u32;
        run.counts.updated = part.updated;
        run.counts.duplicates = part.duplicates;

        // Detail enrichment for the freshest discoveries, bounded per run.
        for record in part.inserts.iter_mut().take(MAX_DETAIL_FETCHES_PER_RUN) {
            if let Err(err) = self
                .enricher
                .enrich_detail(source, record, adapter, &self.client)
                .await
            {
                tracing::warn!(source = %source.id, record = %record.id, error = %err, "detail enrichment failed");
            }
        }

        // Identity was hashed from the listing fields at build time.
        // Enrichment fills fields outside that identity and must not move
        // the hash, or the next harvest of the same row re-inserts it.
        let nodos = self.store.all_nodos().await?;
        let mut batch = Vec::with_capacity(part.inserts.len() + part.updates.len());
        for mut record in part.inserts.into_iter().chain(part.updates.into_iter()) {
            crate::classify::classify_into(&mut record);
            self.matcher.match_record(&nodos, &mut record);
            batch.push(record);
        }

        let saved_new = run.counts.saved;
        self.store.bulk_upsert(&batch).await?;
        Ok(saved_new)
    }
}

/// Lift a parsed candidate into a full record: copy fields, resolve both
/// dates through the strategy chain, repair chronology, and stamp the
/// content hash.
pub fn build_record(source: &SourceConfig, candidate: RawCandidate) -> TenderRecord {
    let mut record = TenderRecord::new(&source.id, candidate.title);
    record.numero = candidate.native_id;
    record.link = candidate.link;
    record.organization = candidate.organization;
    record.description = candidate.description;
    record.status = candidate.status;
    record.jurisdiccion = source.jurisdiccion.clone();
    record.attached_files = candidate.attachments;
    if !candidate.metadata.is_null() {
        record.set_metadata("listing", candidate.metadata);
    }

    let parsed_publication = candidate
        .raw_publication_date
        .as_deref()
        .and_then(date_from_text);
    let parsed_opening = candidate
        .raw_opening_date
        .as_deref()
        .and_then(date_from_text);

    let opening = resolve_opening_date(
        parsed_opening,
        &record.title,
        record.description.as_deref(),
        parsed_publication,
        &record.attached_files,
    );
    let publication = resolve_publication_date(
        parsed_publication,
        &record.title,
        record.description.as_deref(),
        opening.as_ref().map(|r| r.date),
        &record.attached_files,
    );

    let (publication_date, opening_date, fix) = validate_chronology(
        publication.as_ref().map(|r| r.date),
        opening.as_ref().map(|r| r.date),
    );
    record.publication_date = publication_date;
    record.opening_date = opening_date;

    let mut provenance = serde_json::Map::new();
    if let Some(resolved) = &publication {
        provenance.insert(
            "publication".to_string(),
            serde_json::json!({ "origin": resolved.origin.as_str(), "estimated": resolved.estimated }),
        );
    }
    if let Some(resolved) = &opening {
        provenance.insert(
            "opening".to_string(),
            serde_json::json!({ "origin": resolved.origin.as_str(), "estimated": resolved.estimated }),
        );
    }
    if let Some(fix) = fix {
        provenance.insert("chronology_fix".to_string(), serde_json::json!(format!("{fix:?}")));
    }
    if !provenance.is_empty() {
        record.set_metadata("dates", serde_json::Value::Object(provenance));
    }

    stamp_hash(&mut record);
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractionStrategy;

    fn source() -> SourceConfig {
        let mut source = SourceConfig::new(
            "mza",
            "Compras Mendoza",
            "https://compras.mendoza.gov.ar",
            ExtractionStrategy::Selector {
                selectors: Default::default(),
            },
        );
        source.jurisdiccion = Some("Mendoza".to_string());
        source
    }

    #[test]
    fn test_build_record_resolves_dates() {
        let candidate = RawCandidate {
            title: "Provisión de caños".to_string(),
            raw_publication_date: Some("01/03/2026".to_string()),
            raw_opening_date: Some("15/03/2026".to_string()),
            ..Default::default()
        };
        let record = build_record(&source(), candidate);
        assert_eq!(
            record.publication_date,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(
            record.opening_date,
            chrono::NaiveDate::from_ymd_opt(2026, 3, 15)
        );
        assert_eq!(record.jurisdiccion.as_deref(), Some("Mendoza"));
        assert!(!record.content_hash.is_empty());
    }

    #[test]
    fn test_build_record_repairs_inverted_chronology() {
        let candidate = RawCandidate {
            title: "t".to_string(),
            raw_publication_date: Some("15/05/2026".to_string()),
            raw_opening_date: Some("01/04/2026".to_string()),
            ..Default::default()
        };
        let record = build_record(&source(), candidate);
        // opening is kept, publication is pulled back before it
        assert_eq!(
            record.opening_date,
            chrono::NaiveDate::from_ymd_opt(2026, 4, 1)
        );
        assert!(record.publication_date.unwrap() < record.opening_date.unwrap());
    }

    #[test]
    fn test_build_record_never_defaults_dates_to_today() {
        let candidate = RawCandidate {
            title: "Licitación sin fechas publicadas".to_string(),
            ..Default::default()
        };
        let record = build_record(&source(), candidate);
        assert_eq!(record.publication_date, None);
        assert_eq!(record.opening_date, None);
    }

    #[test]
    fn test_identical_candidates_hash_identically() {
        let make = || RawCandidate {
            title: "Provisión de caños".to_string(),
            native_id: Some("12/2026".to_string()),
            ..Default::default()
        };
        let a = build_record(&source(), make());
        let b = build_record(&source(), make());
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.id, b.id);
    }
}
