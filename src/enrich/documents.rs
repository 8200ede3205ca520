//! Level-3 enrichment: attached-document download and text extraction.

use crate::dates::{resolve_opening_date, DateOrigin};
use crate::fetch::FetchClient;
use crate::models::{SourceConfig, TenderRecord, WeightClass};

use super::extract_text;

/// Files pulled per record in one pass.
const MAX_FILES_PER_RECORD: usize = 5;

/// Combined extracted-text ceiling stored on a record.
const MAX_STORED_CHARS: usize = 150_000;

/// Download each not-yet-extracted attachment, pull its text, and fold it
/// into the record. Document fetches are always heavy regardless of the
/// source's listing weight. Returns how many files were extracted; a
/// single bad file is skipped, not fatal.
pub async fn enrich_documents(
    source: &SourceConfig,
    record: &mut TenderRecord,
    client: &FetchClient,
) -> usize {
    let mut extracted = 0;
    let pending: Vec<usize> = record
        .attached_files
        .iter()
        .enumerate()
        .filter(|(_, file)| !file.extracted)
        .map(|(index, _)| index)
        .take(MAX_FILES_PER_RECORD)
        .collect();

    for index in pending {
        let url = record.attached_files[index].url.clone();
        let page = match client.fetch(&url, WeightClass::Heavy).await {
            Ok(page) => page,
            Err(err) => {
                tracing::warn!(source = %source.id, %url, error = %err, "attachment fetch failed, skipping");
                if !err.is_transient() {
                    // An open circuit stays open for this whole pass;
                    // leave the remaining files for a later one.
                    break;
                }
                continue;
            }
        };
        let text = match extract_text(&page.bytes, page.content_type.as_deref(), &url).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(source = %source.id, %url, error = %err, "attachment extraction failed, skipping");
                continue;
            }
        };

        let file = &mut record.attached_files[index];
        file.extracted = true;
        file.mime_type = page.content_type.clone();
        file.size = Some(page.bytes.len() as u64);

        if !text.trim().is_empty() {
            append_extracted_text(record, &text);
            extracted += 1;
        }
    }

    if extracted > 0 {
        record.raise_enrichment_level(3);
        resolve_dates_from_documents(record);
    }
    extracted
}

fn append_extracted_text(record: &mut TenderRecord, text: &str) {
    let existing = record.extracted_text.take().unwrap_or_default();
    let mut combined = if existing.is_empty() {
        text.to_string()
    } else {
        format!("{existing}\n\n{text}")
    };
    if combined.chars().count() > MAX_STORED_CHARS {
        combined = combined.chars().take(MAX_STORED_CHARS).collect();
    }
    record.extracted_text = Some(combined);
}

/// Documents are the last date resort: fill the opening date from pliego
/// text only when listing and detail both came up empty.
fn resolve_dates_from_documents(record: &mut TenderRecord) {
    if record.opening_date.is_some() {
        return;
    }
    let Some(text) = record.extracted_text.as_deref() else {
        return;
    };
    if let Some(resolved) = resolve_opening_date(
        None,
        "",
        Some(text),
        record.publication_date,
        &record.attached_files,
    ) {
        record.opening_date = Some(resolved.date);
        record.set_metadata(
            "opening_date_origin",
            serde_json::json!({
                "origin": DateOrigin::Attachment.as_str(),
                "estimated": resolved.estimated,
            }),
        );
    }
}
