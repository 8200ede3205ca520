//! Content-hash deduplication.
//!
//! Identity is a stable hash over normalized (title, organization,
//! publication date) plus the source-native identifier, so the same notice
//! republished with cosmetic markup changes resolves to one record. Before
//! a batch write the existing hashes for the affected sources are bulk
//! loaded and candidates are partitioned into insert / update / skip.
//! Merging is a soft-merge: nothing is destructively deleted.

use std::collections::HashMap;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::models::{HistoryEntry, HistoryKind, TenderRecord};

/// Normalize a text field for hashing: lowercase, fold accents, collapse
/// whitespace. Keeps the hash stable across encoding and markup noise.
pub fn normalize_for_hash(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.to_lowercase().chars() {
        let folded = match ch {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            other => other,
        };
        if folded.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(folded);
            last_was_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Stable content hash for a tender's identity fields.
pub fn content_hash(
    title: &str,
    organization: Option<&str>,
    publication_date: Option<NaiveDate>,
    native_id: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(title).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_for_hash(organization.unwrap_or("")).as_bytes());
    hasher.update([0u8]);
    if let Some(date) = publication_date {
        hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(native_id.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Fill in a record's content hash from its current identity fields.
pub fn stamp_hash(record: &mut TenderRecord) {
    record.content_hash = content_hash(
        &record.title,
        record.organization.as_deref(),
        record.publication_date,
        record.numero.as_deref(),
    );
}

/// Result of partitioning a candidate batch against known records.
#[derive(Debug, Default)]
pub struct Partition {
    pub inserts: Vec<TenderRecord>,
    /// Existing records with incoming data merged in. Includes pure
    /// re-sights, which still need their `fecha_scraping` persisted.
    pub updates: Vec<TenderRecord>,
    /// How many updates changed something beyond the scrape timestamp.
    pub updated: u32,
    pub duplicates: u32,
}

/// Partition candidates against existing records keyed by content hash.
/// Candidates must already carry their hash (see [`stamp_hash`]).
pub fn partition(
    candidates: Vec<TenderRecord>,
    existing: &HashMap<String, TenderRecord>,
) -> Partition {
    let mut partition = Partition::default();
    let mut seen_in_batch: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        // Duplicate within the same batch: merge into the earlier entry.
        if let Some(&idx) = seen_in_batch.get(&candidate.content_hash) {
            merge(&mut partition.inserts[idx], &candidate);
            partition.duplicates += 1;
            continue;
        }

        match existing.get(&candidate.content_hash) {
            None => {
                seen_in_batch.insert(candidate.content_hash.clone(), partition.inserts.len());
                partition.inserts.push(candidate);
            }
            Some(known) => {
                let mut merged = known.clone();
                let changed = merge(&mut merged, &candidate);
                if changed {
                    partition.updated += 1;
                } else {
                    partition.duplicates += 1;
                }
                // Either way fecha_scraping advances, so the merge persists.
                partition.updates.push(merged);
            }
        }
    }

    partition
}

/// Merge an incoming sighting into an existing record. Keeps the earliest
/// `first_seen_at` and the latest `fecha_scraping`; fills fields the
/// existing record lacks. Returns true when anything beyond the scrape
/// timestamp changed.
pub fn merge(existing: &mut TenderRecord, incoming: &TenderRecord) -> bool {
    let mut changed = false;

    if incoming.first_seen_at < existing.first_seen_at {
        existing.first_seen_at = incoming.first_seen_at;
    }
    if incoming.fecha_scraping > existing.fecha_scraping {
        existing.fecha_scraping = incoming.fecha_scraping;
    }

    macro_rules! fill {
        ($field:ident) => {
            if existing.$field.is_none() && incoming.$field.is_some() {
                existing.$field = incoming.$field.clone();
                changed = true;
            }
        };
    }

    fill!(numero);
    fill!(jurisdiccion);
    fill!(objeto);
    fill!(organization);
    fill!(link);
    fill!(description);
    fill!(publication_date);
    fill!(opening_date);
    fill!(expiration_date);
    fill!(budget);
    fill!(currency);
    fill!(budget_source);

    if incoming.status.is_some() && incoming.status != existing.status {
        existing.status = incoming.status.clone();
        changed = true;
    }

    if !incoming.attached_files.is_empty() {
        for file in &incoming.attached_files {
            if !existing.attached_files.iter().any(|f| f.url == file.url) {
                existing.attached_files.push(file.clone());
                changed = true;
            }
        }
    }

    if existing.add_nodos(incoming.nodos.iter().cloned()) > 0 {
        changed = true;
    }

    changed
}

/// Retire a non-canonical duplicate into its canonical record. The record
/// stays in the store with a `merged_into` marker for auditing.
pub fn retire(duplicate: &mut TenderRecord, canonical_id: &str) {
    duplicate.merged_into = Some(canonical_id.to_string());
    duplicate.push_history(
        HistoryEntry::new(
            HistoryKind::Merge,
            Some(duplicate.id.clone()),
            Some(canonical_id.to_string()),
        )
        .with_note("retired as duplicate"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_normalize_for_hash() {
        assert_eq!(
            normalize_for_hash("  Adquisición   de FIBRA Óptica\n"),
            "adquisicion de fibra optica"
        );
    }

    #[test]
    fn test_hash_ignores_markup_noise() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1);
        let left = content_hash("Fibra Óptica", Some("Vialidad"), date, Some("12/2024"));
        let right = content_hash("FIBRA  OPTICA", Some("vialidad"), date, Some("12/2024"));
        assert_eq!(left, right);
    }

    #[test]
    fn test_hash_differs_on_native_id() {
        let left = content_hash("obra", None, None, Some("1/2024"));
        let right = content_hash("obra", None, None, Some("2/2024"));
        assert_ne!(left, right);
    }

    #[test]
    fn test_partition_insert_update_skip() {
        let mut known = TenderRecord::new("src", "Obra vial ruta 7");
        stamp_hash(&mut known);
        let mut existing = HashMap::new();
        existing.insert(known.content_hash.clone(), known.clone());

        // Same identity, re-sighted.
        let mut resight = TenderRecord::new("src", "Obra vial ruta 7");
        stamp_hash(&mut resight);
        // New notice.
        let mut fresh = TenderRecord::new("src", "Provisión de luminarias");
        stamp_hash(&mut fresh);

        let result = partition(vec![resight, fresh], &existing);
        assert_eq!(result.inserts.len(), 1);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn test_merge_keeps_earliest_first_seen_latest_scrape() {
        let mut older = TenderRecord::new("src", "Obra");
        older.first_seen_at = Utc::now() - Duration::days(10);
        older.fecha_scraping = Utc::now() - Duration::days(10);

        let mut newer = TenderRecord::new("src", "Obra");
        let merged_first_seen = older.first_seen_at;
        let merged_scrape = newer.fecha_scraping;
        newer.organization = Some("Vialidad".to_string());

        merge(&mut older, &newer);
        assert_eq!(older.first_seen_at, merged_first_seen);
        assert_eq!(older.fecha_scraping, merged_scrape);
        assert_eq!(older.organization.as_deref(), Some("Vialidad"));
    }

    #[test]
    fn test_within_batch_duplicates_collapse() {
        let mut a = TenderRecord::new("src", "Obra vial");
        stamp_hash(&mut a);
        let mut b = TenderRecord::new("src", "Obra  VIAL");
        stamp_hash(&mut b);
        assert_eq!(a.content_hash, b.content_hash);

        let result = partition(vec![a, b], &HashMap::new());
        assert_eq!(result.inserts.len(), 1);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn test_retire_is_soft() {
        let mut duplicate = TenderRecord::new("src", "Obra");
        retire(&mut duplicate, "canonical-id");
        assert_eq!(duplicate.merged_into.as_deref(), Some("canonical-id"));
        assert!(matches!(
            duplicate.history.last().map(|h| h.kind),
            Some(HistoryKind::Merge)
        ));
    }
}
