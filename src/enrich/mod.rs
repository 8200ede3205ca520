//! Progressive enrichment.
//!
//! Level 1 is whatever the listing row gave us. Level 2 fetches the detail
//! page: description, objeto, opening date, budget, attachment links.
//! Level 3 downloads the attached documents themselves and extracts their
//! text. Levels only move up; a source that stops publishing a field never
//! downgrades a record.
//!
//! Budget handling is two-tier. An announced budget is taken as-is. When a
//! source only publishes the bid-document (pliego) price, the budget is
//! estimated as price divided by the source's pliego ratio and flagged so
//! downstream consumers never mistake it for an official figure.

mod documents;
mod extract;

pub use documents::enrich_documents;
pub use extract::{extract_text, html_to_text, ExtractError};

use std::sync::LazyLock;

use regex::Regex;

use crate::dates::date_from_text;
use crate::fetch::FetchClient;
use crate::models::{
    BudgetSource, Estado, HistoryEntry, HistoryKind, SourceConfig, TenderRecord,
};
use crate::sources::{AdapterError, DetailFields, SourceAdapter};

/// Synthesized objeto ceiling.
const MAX_OBJETO_CHARS: usize = 200;

/// Fallback ratio of pliego price to contract value when a source has no
/// calibrated one.
pub const DEFAULT_PLIEGO_RATIO: f64 = 0.001;

static MONEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(u\$s|u\$d|usd|d[oó]lares|\$|ars|pesos)\s*([\d.]+(?:,\d{1,2})?)").unwrap()
});

static AMENDMENT_KEYWORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)pr[oó]rroga|prorrogase|se\s+posterga|nueva\s+fecha\s+de\s+apertura").unwrap()
});

static OBJETO_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:objeto|contrataci[oó]n de)\s*:?\s*(.{10,400})").unwrap()
});

/// Titles that carry no human-readable subject: bare process numbers,
/// decree references, expediente citations.
static LOW_INFO_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:licitaci[oó]n(?:\s+p[uú]blica)?|concurso|decreto|expediente|expte\.?|contrataci[oó]n directa)?[\s°ºn.:\-/\d]*$").unwrap()
});

/// Detail-page (level 2) enrichment driver.
pub struct EnrichmentService {
    default_pliego_ratio: f64,
}

impl EnrichmentService {
    pub fn new(default_pliego_ratio: f64) -> Self {
        Self {
            default_pliego_ratio,
        }
    }

    /// Fetch and apply the detail page. Returns true when the record
    /// changed. Adapters without detail pages degrade to Ok(false).
    pub async fn enrich_detail(
        &self,
        source: &SourceConfig,
        record: &mut TenderRecord,
        adapter: &dyn SourceAdapter,
        client: &FetchClient,
    ) -> Result<bool, AdapterError> {
        let fields = match adapter.fetch_detail(source, record, client).await {
            Ok(fields) => fields,
            Err(AdapterError::Unsupported(reason)) => {
                tracing::debug!(source = %source.id, record = %record.id, reason, "no detail enrichment for source");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        if fields.is_empty() {
            return Ok(false);
        }

        let changed = self.apply_detail(source, record, &fields);
        record.raise_enrichment_level(2);
        Ok(changed)
    }

    /// Merge detail fields into the record. Split out of the async path so
    /// it is directly testable.
    pub fn apply_detail(
        &self,
        source: &SourceConfig,
        record: &mut TenderRecord,
        fields: &DetailFields,
    ) -> bool {
        let mut changed = false;

        if let Some(description) = &fields.description {
            if record.description.as_deref() != Some(description) {
                record.description = Some(description.clone());
                changed = true;
            }
        }
        if record.organization.is_none() && fields.organization.is_some() {
            record.organization = fields.organization.clone();
            changed = true;
        }

        let objeto = synthesize_objeto(
            fields.subject.as_deref(),
            record.description.as_deref(),
            &record.title,
        );
        if objeto.is_some() && record.objeto != objeto {
            record.objeto = objeto;
            changed = true;
        }

        if self.apply_opening_date(record, fields) {
            changed = true;
        }
        if self.apply_budget(source, record, fields) {
            changed = true;
        }

        for attachment in &fields.attachments {
            if !record
                .attached_files
                .iter()
                .any(|f| f.url == attachment.url)
            {
                record.attached_files.push(attachment.clone());
                changed = true;
            }
        }

        changed
    }

    /// Opening-date handling doubles as amendment detection: a later date
    /// on a record that already has one, or amendment wording in the
    /// detail text, is a prórroga. The original date stays in place;
    /// the extension lands in `fecha_prorroga` plus a history entry.
    fn apply_opening_date(&self, record: &mut TenderRecord, fields: &DetailFields) -> bool {
        let Some(new_date) = fields.raw_opening_date.as_deref().and_then(date_from_text) else {
            return false;
        };

        match record.effective_opening_date() {
            None => {
                record.opening_date = Some(new_date);
                true
            }
            Some(current) if new_date > current => {
                let from = current.to_string();
                record.fecha_prorroga = Some(new_date);
                record.estado = Estado::Prorrogada;
                let mut entry = HistoryEntry::new(
                    HistoryKind::Amendment,
                    Some(from),
                    Some(new_date.to_string()),
                );
                if fields
                    .description
                    .as_deref()
                    .is_some_and(|d| AMENDMENT_KEYWORDS.is_match(d))
                {
                    entry = entry.with_note("amendment wording in detail text");
                }
                record.push_history(entry);
                tracing::info!(record = %record.id, %new_date, "opening date extended");
                true
            }
            Some(_) => false,
        }
    }

    fn apply_budget(
        &self,
        source: &SourceConfig,
        record: &mut TenderRecord,
        fields: &DetailFields,
    ) -> bool {
        // An announced figure always beats an estimate, including one we
        // computed on an earlier pass.
        if let Some((amount, currency)) =
            fields.budget_text.as_deref().and_then(parse_money)
        {
            if record.budget_source != Some(BudgetSource::Announced)
                || record.budget != Some(amount)
            {
                record.budget = Some(amount);
                record.currency = Some(currency.to_string());
                record.budget_source = Some(BudgetSource::Announced);
                return true;
            }
            return false;
        }

        if record.budget.is_some() {
            return false;
        }
        let Some((price, currency)) = fields.pliego_price_text.as_deref().and_then(parse_money)
        else {
            return false;
        };

        let ratio = source
            .pliego_ratio
            .filter(|r| *r > 0.0)
            .unwrap_or(self.default_pliego_ratio);
        record.budget = Some(price / ratio);
        record.currency = Some(currency.to_string());
        record.budget_source = Some(BudgetSource::Estimated);
        record.set_metadata(
            "budget_estimation",
            serde_json::json!({ "pliego_price": price, "ratio": ratio }),
        );
        true
    }
}

impl Default for EnrichmentService {
    fn default() -> Self {
        Self::new(DEFAULT_PLIEGO_RATIO)
    }
}

/// Parse an Argentine-formatted money string: dots group thousands, the
/// comma is the decimal separator.
pub fn parse_money(text: &str) -> Option<(f64, &'static str)> {
    let caps = MONEY.captures(text)?;
    let currency = match caps[1].to_ascii_lowercase().as_str() {
        "u$s" | "u$d" | "usd" | "dolares" | "dólares" => "USD",
        _ => "ARS",
    };
    let normalized = caps[2].replace('.', "").replace(',', ".");
    let amount: f64 = normalized.parse().ok()?;
    (amount > 0.0).then_some((amount, currency))
}

/// Build the human-readable subject line. Preference order: a structured
/// subject field, a labeled "Objeto:" passage in the description, the
/// description's first sentence, and finally the title itself unless it is
/// a bare process number.
pub fn synthesize_objeto(
    subject: Option<&str>,
    description: Option<&str>,
    title: &str,
) -> Option<String> {
    if let Some(subject) = subject.map(str::trim).filter(|s| !s.is_empty()) {
        return Some(truncate_objeto(subject));
    }

    if let Some(description) = description {
        if let Some(caps) = OBJETO_LABEL.captures(description) {
            let passage = caps[1].lines().next().unwrap_or(&caps[1]).trim();
            if !passage.is_empty() {
                return Some(truncate_objeto(passage));
            }
        }
        if let Some(sentence) = first_sentence(description) {
            return Some(truncate_objeto(&sentence));
        }
    }

    let title = title.trim();
    if !title.is_empty() && !LOW_INFO_TITLE.is_match(title) {
        return Some(truncate_objeto(title));
    }
    None
}

fn first_sentence(text: &str) -> Option<String> {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentence = flat.split_inclusive('.').next()?.trim();
    let sentence = sentence.trim_end_matches('.');
    // Too short to be a subject line; likely a header fragment.
    (sentence.chars().count() >= 15).then(|| sentence.to_string())
}

fn truncate_objeto(text: &str) -> String {
    let mut out: String = text.chars().take(MAX_OBJETO_CHARS).collect();
    if text.chars().count() > MAX_OBJETO_CHARS {
        out.push('…');
    }
    out
}
