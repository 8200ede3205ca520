//! Manual workflow state machine.
//!
//! Tracks what the business is doing with a tender, independently of its
//! vigencia. Transitions only happen through explicit calls; nothing in
//! scraping, enrichment, or the vigencia batch moves this axis. Invalid
//! transitions are rejected, valid ones append to history.

use thiserror::Error;

use crate::models::{HistoryEntry, HistoryKind, TenderRecord, WorkflowState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid workflow transition {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("workflow state {0} is terminal")]
    Terminal(&'static str),
}

/// Whether `from -> to` is a legal move. Forward steps go one at a time;
/// descartada is reachable from any non-terminal state.
pub fn is_valid_transition(from: WorkflowState, to: WorkflowState) -> bool {
    use WorkflowState::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Descubierta, Evaluando)
            | (Evaluando, Preparando)
            | (Preparando, Presentada)
            | (Descubierta, Descartada)
            | (Evaluando, Descartada)
            | (Preparando, Descartada)
    )
}

/// Apply a transition, appending a history entry. The optional note is
/// the operator's rationale.
pub fn transition(
    record: &mut TenderRecord,
    to: WorkflowState,
    note: Option<&str>,
) -> Result<(), WorkflowError> {
    let from = record.workflow_state;
    if from.is_terminal() {
        return Err(WorkflowError::Terminal(from.as_str()));
    }
    if !is_valid_transition(from, to) {
        return Err(WorkflowError::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        });
    }

    record.workflow_state = to;
    let mut entry = HistoryEntry::new(
        HistoryKind::Workflow,
        Some(from.as_str().to_string()),
        Some(to.as_str().to_string()),
    );
    if let Some(note) = note {
        entry = entry.with_note(note);
    }
    record.push_history(entry);
    tracing::debug!(record = %record.id, from = from.as_str(), to = to.as_str(), "workflow transition");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Estado;

    #[test]
    fn test_happy_path() {
        let mut record = TenderRecord::new("src", "t");
        for state in [
            WorkflowState::Evaluando,
            WorkflowState::Preparando,
            WorkflowState::Presentada,
        ] {
            transition(&mut record, state, None).unwrap();
        }
        assert_eq!(record.workflow_state, WorkflowState::Presentada);
        assert_eq!(record.history.len(), 3);
        assert!(record
            .history
            .iter()
            .all(|h| h.kind == HistoryKind::Workflow));
    }

    #[test]
    fn test_no_skipping_stages() {
        let mut record = TenderRecord::new("src", "t");
        let err = transition(&mut record, WorkflowState::Presentada, None).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::InvalidTransition {
                from: "descubierta",
                to: "presentada"
            }
        );
        assert_eq!(record.workflow_state, WorkflowState::Descubierta);
        assert!(record.history.is_empty());
    }

    #[test]
    fn test_descartar_from_any_active_stage() {
        for start in [
            WorkflowState::Descubierta,
            WorkflowState::Evaluando,
            WorkflowState::Preparando,
        ] {
            let mut record = TenderRecord::new("src", "t");
            record.workflow_state = start;
            transition(&mut record, WorkflowState::Descartada, Some("sin margen")).unwrap();
            assert_eq!(record.workflow_state, WorkflowState::Descartada);
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for terminal in [WorkflowState::Presentada, WorkflowState::Descartada] {
            let mut record = TenderRecord::new("src", "t");
            record.workflow_state = terminal;
            let err = transition(&mut record, WorkflowState::Evaluando, None).unwrap_err();
            assert_eq!(err, WorkflowError::Terminal(terminal.as_str()));
        }
    }

    #[test]
    fn test_workflow_ignores_estado() {
        // An expired tender can still be evaluated; the axes are separate.
        let mut record = TenderRecord::new("src", "t");
        record.estado = Estado::Vencida;
        transition(&mut record, WorkflowState::Evaluando, None).unwrap();
        assert_eq!(record.estado, Estado::Vencida);
        assert_eq!(record.workflow_state, WorkflowState::Evaluando);
    }
}
