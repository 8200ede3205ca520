//! Tender record model.
//!
//! A tender is one public procurement notice harvested from a government
//! source. Records carry two independent status axes: `estado` is the
//! system-computed time-validity, `workflow_state` is the manually-tracked
//! business stage. Enrichment level only ever increases, nodo membership
//! only ever grows, and `first_seen_at` is immutable after the first insert.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Time-validity status, computed by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estado {
    Vigente,
    Vencida,
    Prorrogada,
    Archivada,
}

impl Estado {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vigente => "vigente",
            Self::Vencida => "vencida",
            Self::Prorrogada => "prorrogada",
            Self::Archivada => "archivada",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vigente" => Some(Self::Vigente),
            "vencida" => Some(Self::Vencida),
            "prorrogada" => Some(Self::Prorrogada),
            "archivada" => Some(Self::Archivada),
            _ => None,
        }
    }
}

/// Manual business-process stage. Only explicit external transitions may
/// change this; enrichment and scheduling never touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Descubierta,
    Evaluando,
    Preparando,
    Presentada,
    Descartada,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Descubierta => "descubierta",
            Self::Evaluando => "evaluando",
            Self::Preparando => "preparando",
            Self::Presentada => "presentada",
            Self::Descartada => "descartada",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "descubierta" => Some(Self::Descubierta),
            "evaluando" => Some(Self::Evaluando),
            "preparando" => Some(Self::Preparando),
            "presentada" => Some(Self::Presentada),
            "descartada" => Some(Self::Descartada),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Presentada | Self::Descartada)
    }
}

/// Whether a budget figure came from the announcement itself or was
/// estimated from a bid-document (pliego) price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetSource {
    Announced,
    Estimated,
}

impl BudgetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Announced => "announced",
            Self::Estimated => "estimated",
        }
    }
}

/// A document linked from a tender (pliego, annex, gazette page).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachedFile {
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// True once level-3 enrichment has pulled text out of this file.
    #[serde(default)]
    pub extracted: bool,
}

/// What produced a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Amendment,
    EstadoOverride,
    Workflow,
    Merge,
}

/// One append-only audit entry. Entries are never edited or removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub kind: HistoryKind,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HistoryEntry {
    pub fn new(kind: HistoryKind, from: Option<String>, to: Option<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            from,
            to,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Canonical tender entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenderRecord {
    /// Stable identifier (UUID).
    pub id: String,
    /// Originating source.
    pub source_id: String,
    /// Source-assigned process number, when the source exposes one.
    pub numero: Option<String>,
    /// Jurisdiction (province, municipality, national).
    pub jurisdiccion: Option<String>,
    /// Raw title as published. Often just a decree or expediente number.
    pub title: String,
    /// Synthesized subject line, at most 200 chars. Distinct from title
    /// because many sources publish nothing human-readable as title.
    pub objeto: Option<String>,
    pub organization: Option<String>,
    /// Canonical detail-page link.
    pub link: Option<String>,
    pub description: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub opening_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    /// Extended opening date recorded by amendment detection. The original
    /// opening date is preserved in history, never overwritten in place.
    pub fecha_prorroga: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub currency: Option<String>,
    pub budget_source: Option<BudgetSource>,
    /// Source-reported open/closed flag, as published.
    pub status: Option<String>,
    pub estado: Estado,
    pub workflow_state: WorkflowState,
    /// 1 = listing fields, 2 = detail page fetched, 3 = documents parsed.
    pub enrichment_level: u8,
    pub content_hash: String,
    /// Set once on first insert, immutable afterwards.
    pub first_seen_at: DateTime<Utc>,
    /// Updated on every re-fetch.
    pub fecha_scraping: DateTime<Utc>,
    #[serde(default)]
    pub attached_files: Vec<AttachedFile>,
    /// Text pulled from attached documents during level-3 enrichment.
    pub extracted_text: Option<String>,
    pub category: Option<String>,
    /// Matched semantic group identifiers. Grows by set union, shrinks only
    /// on explicit group deletion.
    #[serde(default)]
    pub nodos: BTreeSet<String>,
    /// Set when this record was retired into another by the deduplicator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Free-form provenance bag (estimation ratios, resolver notes).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl TenderRecord {
    /// Create a level-1 record. Dates start unresolved; the date resolver
    /// fills them in and never defaults to "now".
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            numero: None,
            jurisdiccion: None,
            title: title.into(),
            objeto: None,
            organization: None,
            link: None,
            description: None,
            publication_date: None,
            opening_date: None,
            expiration_date: None,
            fecha_prorroga: None,
            budget: None,
            currency: None,
            budget_source: None,
            status: None,
            estado: Estado::Vigente,
            workflow_state: WorkflowState::Descubierta,
            enrichment_level: 1,
            content_hash: String::new(),
            first_seen_at: now,
            fecha_scraping: now,
            attached_files: Vec::new(),
            extracted_text: None,
            category: None,
            nodos: BTreeSet::new(),
            merged_into: None,
            history: Vec::new(),
            metadata: serde_json::json!({}),
        }
    }

    /// Raise the enrichment level. Levels never decrease.
    pub fn raise_enrichment_level(&mut self, level: u8) {
        if level > self.enrichment_level {
            self.enrichment_level = level;
        }
    }

    /// Union new nodo memberships in. Returns how many were new.
    pub fn add_nodos<I: IntoIterator<Item = String>>(&mut self, ids: I) -> usize {
        let before = self.nodos.len();
        self.nodos.extend(ids);
        self.nodos.len() - before
    }

    /// The opening date that currently governs vigencia: the extension if
    /// one was recorded, otherwise the original.
    pub fn effective_opening_date(&self) -> Option<NaiveDate> {
        self.fecha_prorroga.or(self.opening_date)
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Store a metadata value under a top-level key.
    pub fn set_metadata(&mut self, key: &str, value: serde_json::Value) {
        if !self.metadata.is_object() {
            self.metadata = serde_json::json!({});
        }
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }
}
