//! End-to-end pipeline tests over the in-memory store: harvest batches
//! through dedup into persistence, detail and document enrichment, nodo
//! tagging, vigencia, and the manual workflow. Anything that needs HTTP
//! talks to a loopback fixture, never the real network.

use std::sync::Arc;

use chrono::{Duration, Utc};

use tendersweep::api::Api;
use tendersweep::dedup::partition;
use tendersweep::enrich::{EnrichmentService, DEFAULT_PLIEGO_RATIO};
use tendersweep::fetch::{FetchClient, FetchOptions};
use tendersweep::models::{
    AttachedFile, Estado, ExtractionStrategy, Nodo, SelectorMap, SourceConfig, TenderRecord,
    WorkflowState,
};
use tendersweep::nodos::NodoMatcher;
use tendersweep::scheduler::{build_record, Scheduler, SchedulerConfig};
use tendersweep::sources::{AdapterRegistry, DetailFields, RawCandidate};
use tendersweep::store::{MemoryStore, TenderStore};

/// Serve one static body for every request on a loopback listener.
fn serve_static(content_type: &'static str, body: String) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut request = [0u8; 4096];
            let _ = std::io::Read::read(&mut stream, &mut request);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len(),
            );
            let _ = std::io::Write::write_all(&mut stream, response.as_bytes());
        }
    });
    format!("http://{addr}")
}

fn test_source() -> SourceConfig {
    let mut source = SourceConfig::new(
        "mza",
        "Compras Mendoza",
        "https://compras.mendoza.gov.ar/licitaciones",
        ExtractionStrategy::Selector {
            selectors: Default::default(),
        },
    );
    source.jurisdiccion = Some("Mendoza".to_string());
    source
}

fn candidate(title: &str, date: &str) -> RawCandidate {
    RawCandidate {
        title: title.to_string(),
        raw_publication_date: Some(date.to_string()),
        organization: Some("Dirección de Compras".to_string()),
        ..Default::default()
    }
}

fn api_over(store: Arc<MemoryStore>) -> (Api, Arc<NodoMatcher>) {
    let store: Arc<dyn TenderStore> = store;
    let client = FetchClient::new(FetchOptions::default()).expect("client");
    let matcher = Arc::new(NodoMatcher::new());
    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        client,
        Arc::new(AdapterRegistry::with_defaults(None)),
        matcher.clone(),
        EnrichmentService::new(DEFAULT_PLIEGO_RATIO),
        SchedulerConfig::default(),
    ));
    (Api::new(store, scheduler, matcher.clone(), 730), matcher)
}

/// Harvesting the same upstream content twice inserts nothing new the
/// second time, and nothing is falsely treated as fresh.
#[tokio::test]
async fn test_harvest_idempotence() {
    let store = MemoryStore::new();
    let source = test_source();

    let batch = |titles: &[&str]| -> Vec<TenderRecord> {
        titles
            .iter()
            .map(|t| build_record(&source, candidate(t, "01/03/2026")))
            .collect()
    };

    let existing = store.tenders_by_hash(&source.id).await.unwrap();
    let first = partition(batch(&["Provisión de caños", "Obra escuela N°4"]), &existing);
    assert_eq!(first.inserts.len(), 2);
    store.bulk_upsert(&first.inserts).await.unwrap();

    let existing = store.tenders_by_hash(&source.id).await.unwrap();
    let second = partition(batch(&["Provisión de caños", "Obra escuela N°4"]), &existing);
    assert_eq!(second.inserts.len(), 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(second.updated, 0);

    store.bulk_upsert(&second.updates).await.unwrap();
    assert_eq!(store.all_tenders().await.unwrap().len(), 2);
}

/// Re-sighting the same notice keeps the earliest first_seen_at and the
/// latest fecha_scraping on the surviving record.
#[tokio::test]
async fn test_dedup_merge_retention() {
    let store = MemoryStore::new();
    let source = test_source();

    let mut old = build_record(&source, candidate("Provisión de caños", "01/03/2026"));
    old.first_seen_at = Utc::now() - Duration::days(10);
    old.fecha_scraping = Utc::now() - Duration::days(10);
    store.upsert_tender(&old).await.unwrap();

    let fresh = build_record(&source, candidate("Provisión de caños", "01/03/2026"));
    assert_eq!(fresh.content_hash, old.content_hash);

    let existing = store.tenders_by_hash(&source.id).await.unwrap();
    let part = partition(vec![fresh.clone()], &existing);
    assert!(part.inserts.is_empty());
    assert_eq!(part.updates.len(), 1);

    let merged = &part.updates[0];
    assert_eq!(merged.id, old.id);
    assert_eq!(merged.first_seen_at, old.first_seen_at);
    assert!(merged.fecha_scraping >= fresh.fecha_scraping);
}

/// Tag through nodo A, then B, then edit A: B's tag must survive both the
/// edit and the re-match.
#[tokio::test]
async fn test_additive_nodos_through_api() {
    let store = Arc::new(MemoryStore::new());
    let (api, _matcher) = api_over(store.clone());

    let record = build_record(
        &test_source(),
        candidate("Tendido de fibra óptica y red de datos", "01/03/2026"),
    );
    store.upsert_tender(&record).await.unwrap();

    let fibra = Nodo::new("fibra", "Fibra", vec!["Fibra Óptica".to_string()]);
    let redes = Nodo::new("redes", "Redes", vec!["red de datos".to_string()]);
    assert_eq!(api.upsert_nodo(&fibra).await.unwrap(), 1);
    assert_eq!(api.upsert_nodo(&redes).await.unwrap(), 1);

    let tagged = store.get_tender(&record.id).await.unwrap().unwrap();
    assert!(tagged.nodos.contains("fibra") && tagged.nodos.contains("redes"));

    // edit fibra's keywords to something that no longer matches
    let mut fibra = fibra;
    fibra.set_keywords(vec!["cableado submarino".to_string()]);
    api.upsert_nodo(&fibra).await.unwrap();

    let tagged = store.get_tender(&record.id).await.unwrap().unwrap();
    assert!(tagged.nodos.contains("fibra"), "membership is additive only");
    assert!(tagged.nodos.contains("redes"));
}

/// Yesterday's opening expires; an amendment date in the future keeps the
/// extended record alive as prorrogada.
#[tokio::test]
async fn test_vigencia_batch_through_api() {
    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store.clone());
    let today = Utc::now().date_naive();

    let mut expired = build_record(&test_source(), candidate("Vencida ya", "01/03/2026"));
    expired.opening_date = Some(today - Duration::days(1));
    store.upsert_tender(&expired).await.unwrap();

    let mut extended = build_record(&test_source(), candidate("Prorrogada", "01/03/2026"));
    extended.opening_date = Some(today - Duration::days(1));
    extended.fecha_prorroga = Some(today + Duration::days(20));
    extended.estado = Estado::Prorrogada;
    store.upsert_tender(&extended).await.unwrap();

    let outcome = api.run_vigencia().await.unwrap();
    assert_eq!(outcome.expired, 1);

    let expired = store.get_tender(&expired.id).await.unwrap().unwrap();
    assert_eq!(expired.estado, Estado::Vencida);
    let extended = store.get_tender(&extended.id).await.unwrap().unwrap();
    assert_eq!(extended.estado, Estado::Prorrogada);
}

/// Workflow state belongs to the operator; estado overrides and vigencia
/// never move it, and invalid transitions are rejected at the API.
#[tokio::test]
async fn test_workflow_isolation_and_validation() {
    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store.clone());

    let record = build_record(&test_source(), candidate("Licitación", "01/03/2026"));
    store.upsert_tender(&record).await.unwrap();

    let updated = api
        .transition_workflow(&record.id, WorkflowState::Evaluando, Some("pinta bien"))
        .await
        .unwrap();
    assert_eq!(updated.workflow_state, WorkflowState::Evaluando);

    // skipping straight to presentada is rejected and changes nothing
    assert!(api
        .transition_workflow(&record.id, WorkflowState::Presentada, None)
        .await
        .is_err());
    let stored = store.get_tender(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.workflow_state, WorkflowState::Evaluando);

    // estado override moves estado only
    let overridden = api
        .override_estado(&record.id, Estado::Vencida, "publicado con error")
        .await
        .unwrap();
    assert_eq!(overridden.estado, Estado::Vencida);
    assert_eq!(overridden.workflow_state, WorkflowState::Evaluando);

    api.run_vigencia().await.unwrap();
    let stored = store.get_tender(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.workflow_state, WorkflowState::Evaluando);
}

/// The full listing → detail-enrichment → re-harvest cycle. Detail pages
/// fill fields the listing never published (organization here), and the
/// stored identity hash must keep matching what the same listing row
/// produces, or the second run re-inserts the notice as new.
#[tokio::test]
async fn test_reharvest_after_detail_enrichment_stays_idempotent() {
    let page = r#"
        <html><body>
        <table>
          <tr class="licitacion">
            <td class="nro">12/2026</td>
            <td class="titulo">Provisión de caños de PVC</td>
            <td class="fecha">01/03/2026</td>
            <td><a class="detalle" href="/licitaciones/12-2026">ver</a></td>
          </tr>
        </table>
        <p>Organismo: Dirección Provincial de Vialidad</p>
        <p>Objeto: provisión de caños de PVC para red cloacal</p>
        </body></html>
    "#;
    let endpoint = serve_static("text/html; charset=utf-8", page.to_string());

    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store.clone());

    let source = SourceConfig::new(
        "local",
        "Portal local",
        format!("{endpoint}/licitaciones"),
        ExtractionStrategy::Selector {
            selectors: SelectorMap {
                item: "tr.licitacion".to_string(),
                title: Some("td.titulo".to_string()),
                numero: Some("td.nro".to_string()),
                date: Some("td.fecha".to_string()),
                link: Some("a.detalle".to_string()),
                ..Default::default()
            },
        },
    );
    store.upsert_source(&source).await.unwrap();

    let first = api.trigger_run("local").await.unwrap();
    assert_eq!(first.counts.found, 1);
    assert_eq!(first.counts.saved, 1);

    // the detail page supplied what the listing row lacked
    let record = store.all_tenders().await.unwrap().remove(0);
    assert_eq!(
        record.organization.as_deref(),
        Some("Dirección Provincial de Vialidad")
    );
    assert!(record.enrichment_level >= 2);

    let second = api.trigger_run("local").await.unwrap();
    assert_eq!(second.counts.saved, 0, "identical upstream content re-inserted");
    assert_eq!(second.counts.duplicates, 1);
    assert_eq!(store.all_tenders().await.unwrap().len(), 1);
}

/// The document stage picks up level-2 records with pending files, pulls
/// their text, and moves them to level 3. Records still at level 1 wait.
#[tokio::test]
async fn test_document_pass_extracts_pending_files() {
    let endpoint = serve_static(
        "text/plain",
        "Pliego de bases y condiciones.\nProvisión de fibra óptica monomodo.".to_string(),
    );

    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store.clone());
    let source = test_source();
    store.upsert_source(&source).await.unwrap();

    let pliego = AttachedFile {
        title: "Pliego".to_string(),
        url: format!("{endpoint}/pliego.txt"),
        ..Default::default()
    };

    let mut ready = build_record(&source, candidate("Tendido de fibra", "01/03/2026"));
    ready.raise_enrichment_level(2);
    ready.attached_files.push(pliego.clone());
    store.upsert_tender(&ready).await.unwrap();

    let mut unready = build_record(&source, candidate("Obra escuela N°4", "01/03/2026"));
    unready.attached_files.push(pliego);
    store.upsert_tender(&unready).await.unwrap();

    assert_eq!(api.run_document_enrichment(10).await.unwrap(), 1);

    let ready = store.get_tender(&ready.id).await.unwrap().unwrap();
    assert_eq!(ready.enrichment_level, 3);
    assert!(ready.attached_files[0].extracted);
    assert!(ready
        .extracted_text
        .as_deref()
        .unwrap()
        .contains("fibra óptica"));

    let unready = store.get_tender(&unready.id).await.unwrap().unwrap();
    assert_eq!(unready.enrichment_level, 1);
    assert!(!unready.attached_files[0].extracted);
}

/// Running enrichment all the way to level 3 never moves the manual
/// workflow state.
#[tokio::test]
async fn test_full_enrichment_leaves_workflow_untouched() {
    let endpoint = serve_static(
        "text/plain",
        "Apertura de ofertas: 15 de abril de 2026 a las 10hs.".to_string(),
    );

    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store.clone());
    let source = test_source();
    store.upsert_source(&source).await.unwrap();

    let record = build_record(&source, candidate("Licitación en estudio", "01/03/2026"));
    store.upsert_tender(&record).await.unwrap();
    api.transition_workflow(&record.id, WorkflowState::Evaluando, None)
        .await
        .unwrap();

    // level 2: detail fields folded in
    let service = EnrichmentService::new(DEFAULT_PLIEGO_RATIO);
    let mut record = store.get_tender(&record.id).await.unwrap().unwrap();
    let fields = DetailFields {
        description: Some("Objeto: refacción integral del edificio escolar".to_string()),
        budget_text: Some("Presupuesto oficial: $ 5.000.000".to_string()),
        ..Default::default()
    };
    assert!(service.apply_detail(&source, &mut record, &fields));
    record.raise_enrichment_level(2);
    record.attached_files.push(AttachedFile {
        title: "Pliego".to_string(),
        url: format!("{endpoint}/pliego.txt"),
        ..Default::default()
    });
    store.upsert_tender(&record).await.unwrap();

    // level 3: documents pulled and extracted
    assert_eq!(api.enrich_tender_documents(&record.id).await.unwrap(), 1);

    let stored = store.get_tender(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.enrichment_level, 3);
    assert_eq!(stored.workflow_state, WorkflowState::Evaluando);
}

/// Unknown ids surface as NotFound, not panics or silent no-ops.
#[tokio::test]
async fn test_api_not_found() {
    let store = Arc::new(MemoryStore::new());
    let (api, _) = api_over(store);

    assert!(api.trigger_run("nope").await.is_err());
    assert!(api.rematch_nodo("nope").await.is_err());
    assert!(api
        .override_estado("nope", Estado::Vigente, "x")
        .await
        .is_err());
}
