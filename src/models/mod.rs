//! Data models for tender records, sources, runs, and keyword groups.

mod nodo;
mod run;
mod source;
mod tender;

pub use nodo::Nodo;
pub use run::{RunCounts, RunItemError, RunStatus, ScrapeRun};
pub use source::{ExtractionStrategy, ScheduleConfig, SelectorMap, SourceConfig, WeightClass};
pub use tender::{
    AttachedFile, BudgetSource, Estado, HistoryEntry, HistoryKind, TenderRecord, WorkflowState,
};
