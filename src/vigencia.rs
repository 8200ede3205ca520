//! Vigencia batch transitions.
//!
//! Estado is the system-computed time-validity axis, recomputed by a daily
//! batch from the effective opening date. It is fully independent of the
//! manual workflow axis: expiring a tender never touches its workflow
//! state, and vice versa. Manual overrides are allowed but always leave an
//! audit entry.

use chrono::NaiveDate;

use crate::models::{Estado, HistoryEntry, HistoryKind, TenderRecord};

/// Days after publication before a record is shelved regardless of estado.
pub const DEFAULT_ARCHIVE_AFTER_DAYS: i64 = 730;

/// What the batch did to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Expired,
    Archived,
}

/// Recompute one record's estado as of `today`. Returns the transition
/// applied, if any.
///
/// Rules, in order: anything whose publication is older than the archive
/// cutoff is archived; a vigente or prorrogada record whose effective
/// opening date has passed becomes vencida. Records with no resolvable
/// opening date stay as they are; expiring on a guess is worse than
/// carrying a stale vigente.
pub fn recompute_estado(
    record: &mut TenderRecord,
    today: NaiveDate,
    archive_after_days: i64,
) -> Option<Transition> {
    if record.estado != Estado::Archivada {
        if let Some(publication) = record.publication_date {
            if (today - publication).num_days() > archive_after_days {
                record.estado = Estado::Archivada;
                return Some(Transition::Archived);
            }
        }
    }

    if matches!(record.estado, Estado::Vigente | Estado::Prorrogada) {
        if let Some(opening) = record.effective_opening_date() {
            if opening < today {
                record.estado = Estado::Vencida;
                return Some(Transition::Expired);
            }
        }
    }

    None
}

/// Batch counters for one vigencia pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub examined: usize,
    pub expired: usize,
    pub archived: usize,
}

/// Run the daily pass over a set of records, mutating in place. Returns
/// the ids that changed alongside the counters so the caller can persist
/// only what moved.
pub fn run_batch(
    records: &mut [TenderRecord],
    today: NaiveDate,
    archive_after_days: i64,
) -> (BatchOutcome, Vec<String>) {
    let mut outcome = BatchOutcome::default();
    let mut changed = Vec::new();

    for record in records.iter_mut() {
        // Merged-away duplicates are dead; their canonical twin is the one
        // that transitions.
        if record.merged_into.is_some() {
            continue;
        }
        outcome.examined += 1;
        match recompute_estado(record, today, archive_after_days) {
            Some(Transition::Expired) => {
                outcome.expired += 1;
                changed.push(record.id.clone());
            }
            Some(Transition::Archived) => {
                outcome.archived += 1;
                changed.push(record.id.clone());
            }
            None => {}
        }
    }

    tracing::info!(
        examined = outcome.examined,
        expired = outcome.expired,
        archived = outcome.archived,
        "vigencia batch complete"
    );
    (outcome, changed)
}

/// Manually force an estado. The reason is mandatory and lands in the
/// audit history.
pub fn override_estado(record: &mut TenderRecord, to: Estado, reason: &str) {
    let from = record.estado;
    record.estado = to;
    record.push_history(
        HistoryEntry::new(
            HistoryKind::EstadoOverride,
            Some(from.as_str().to_string()),
            Some(to.as_str().to_string()),
        )
        .with_note(reason),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkflowState;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_expires_past_opening() {
        let mut record = TenderRecord::new("src", "t");
        record.opening_date = Some(day(2026, 3, 1));
        let transition = recompute_estado(&mut record, day(2026, 3, 2), DEFAULT_ARCHIVE_AFTER_DAYS);
        assert_eq!(transition, Some(Transition::Expired));
        assert_eq!(record.estado, Estado::Vencida);
    }

    #[test]
    fn test_opening_today_still_vigente() {
        let mut record = TenderRecord::new("src", "t");
        record.opening_date = Some(day(2026, 3, 1));
        assert_eq!(
            recompute_estado(&mut record, day(2026, 3, 1), DEFAULT_ARCHIVE_AFTER_DAYS),
            None
        );
        assert_eq!(record.estado, Estado::Vigente);
    }

    #[test]
    fn test_prorroga_extends_vigencia() {
        let mut record = TenderRecord::new("src", "t");
        record.opening_date = Some(day(2026, 3, 1));
        record.fecha_prorroga = Some(day(2026, 4, 15));
        record.estado = Estado::Prorrogada;
        assert_eq!(
            recompute_estado(&mut record, day(2026, 3, 10), DEFAULT_ARCHIVE_AFTER_DAYS),
            None
        );
        assert_eq!(record.estado, Estado::Prorrogada);

        let transition =
            recompute_estado(&mut record, day(2026, 4, 16), DEFAULT_ARCHIVE_AFTER_DAYS);
        assert_eq!(transition, Some(Transition::Expired));
    }

    #[test]
    fn test_no_opening_date_no_expiry() {
        let mut record = TenderRecord::new("src", "t");
        assert_eq!(
            recompute_estado(&mut record, day(2026, 8, 1), DEFAULT_ARCHIVE_AFTER_DAYS),
            None
        );
        assert_eq!(record.estado, Estado::Vigente);
    }

    #[test]
    fn test_archive_old_publication() {
        let mut record = TenderRecord::new("src", "t");
        record.publication_date = Some(day(2023, 1, 1));
        record.estado = Estado::Vencida;
        let transition = recompute_estado(&mut record, day(2026, 8, 1), DEFAULT_ARCHIVE_AFTER_DAYS);
        assert_eq!(transition, Some(Transition::Archived));
        assert_eq!(record.estado, Estado::Archivada);
    }

    #[test]
    fn test_estado_never_touches_workflow() {
        let mut record = TenderRecord::new("src", "t");
        record.opening_date = Some(day(2026, 3, 1));
        record.workflow_state = WorkflowState::Preparando;
        recompute_estado(&mut record, day(2026, 5, 1), DEFAULT_ARCHIVE_AFTER_DAYS);
        assert_eq!(record.estado, Estado::Vencida);
        assert_eq!(record.workflow_state, WorkflowState::Preparando);
    }

    #[test]
    fn test_batch_skips_merged_records() {
        let mut expired = TenderRecord::new("src", "a");
        expired.opening_date = Some(day(2026, 1, 1));
        let mut merged = TenderRecord::new("src", "b");
        merged.opening_date = Some(day(2026, 1, 1));
        merged.merged_into = Some(expired.id.clone());

        let mut records = vec![expired, merged];
        let (outcome, changed) = run_batch(&mut records, day(2026, 6, 1), DEFAULT_ARCHIVE_AFTER_DAYS);
        assert_eq!(outcome.examined, 1);
        assert_eq!(outcome.expired, 1);
        assert_eq!(changed.len(), 1);
    }

    #[test]
    fn test_override_records_history() {
        let mut record = TenderRecord::new("src", "t");
        record.estado = Estado::Vencida;
        override_estado(&mut record, Estado::Vigente, "portal reabrió la convocatoria");
        assert_eq!(record.estado, Estado::Vigente);
        let entry = record.history.last().unwrap();
        assert_eq!(entry.kind, HistoryKind::EstadoOverride);
        assert_eq!(entry.from.as_deref(), Some("vencida"));
        assert_eq!(entry.to.as_deref(), Some("vigente"));
        assert!(entry.note.is_some());
    }
}
