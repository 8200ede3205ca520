//! Source adapters.
//!
//! One adapter per source family turns fetched pages into raw candidate
//! records. Adapters are selected through a registry, never a conditional
//! chain, so a narrow source pattern can always outrank a broad host
//! catch-all. A single unparseable item is logged and skipped; it never
//! aborts the listing.

mod detail;
mod gazette;
mod grid;
mod headless;
mod registry;
mod selector;

pub use gazette::GazetteAdapter;
pub use grid::GridAdapter;
pub use headless::HeadlessAdapter;
pub use registry::AdapterRegistry;
pub use selector::SelectorAdapter;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::fetch::{FetchClient, FetchError};
use crate::models::{AttachedFile, SourceConfig, TenderRecord};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("adapter does not support {0}")]
    Unsupported(&'static str),
}

/// One raw listing item before field extraction.
#[derive(Debug, Clone)]
pub enum RawItem {
    /// A row from an embedded JSON payload.
    Json(Value),
    /// An HTML fragment for one listing entry.
    Html(String),
    /// A text section carved out of a gazette document.
    Text(String),
}

/// Fields extracted from a listing item. Dates stay raw strings here; the
/// date resolver owns interpretation.
#[derive(Debug, Clone, Default)]
pub struct RawCandidate {
    pub native_id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    pub organization: Option<String>,
    pub raw_publication_date: Option<String>,
    pub raw_opening_date: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub attachments: Vec<AttachedFile>,
    pub metadata: Value,
}

/// Detail-page fields for level-2 enrichment.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub description: Option<String>,
    /// A structured "objeto"/subject field when the source has one.
    pub subject: Option<String>,
    pub raw_opening_date: Option<String>,
    /// Announced budget text, when published.
    pub budget_text: Option<String>,
    /// Bid-document (pliego) price text, when that is all the source shows.
    pub pliego_price_text: Option<String>,
    pub organization: Option<String>,
    pub attachments: Vec<AttachedFile>,
}

impl DetailFields {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.subject.is_none()
            && self.raw_opening_date.is_none()
            && self.budget_text.is_none()
            && self.pliego_price_text.is_none()
            && self.organization.is_none()
            && self.attachments.is_empty()
    }
}

/// Capability set every source family implements.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the listing page(s) and break them into raw items.
    async fn fetch_listing(
        &self,
        source: &SourceConfig,
        client: &FetchClient,
    ) -> Result<Vec<RawItem>, AdapterError>;

    /// Extract candidate fields from one raw item.
    fn parse_item(
        &self,
        source: &SourceConfig,
        raw: &RawItem,
    ) -> Result<RawCandidate, AdapterError>;

    /// Fetch the detail page of a persisted record for level-2 enrichment.
    async fn fetch_detail(
        &self,
        source: &SourceConfig,
        record: &TenderRecord,
        client: &FetchClient,
    ) -> Result<DetailFields, AdapterError>;
}

/// Collapse runs of whitespace in extracted HTML text.
pub(crate) fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a possibly relative href against the source endpoint.
pub(crate) fn absolutize(source: &SourceConfig, href: &str) -> String {
    match url::Url::parse(href) {
        Ok(_) => href.to_string(),
        Err(_) => url::Url::parse(&source.endpoint)
            .and_then(|base| base.join(href))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| href.to_string()),
    }
}
