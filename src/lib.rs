//! tendersweep - public procurement notice harvesting and research system.
//!
//! Harvests licitaciones from heterogeneous government sources (JSON grids,
//! server-rendered HTML, official gazette PDFs, script-rendered portals),
//! deduplicates them into a canonical corpus, progressively enriches each
//! record, and tracks both its time-validity and the manual evaluation
//! workflow around it.

pub mod api;
pub mod classify;
pub mod cli;
pub mod config;
pub mod dates;
pub mod dedup;
pub mod enrich;
pub mod fetch;
pub mod models;
pub mod nodos;
pub mod scheduler;
pub mod sources;
pub mod store;
pub mod vigencia;
pub mod workflow;
