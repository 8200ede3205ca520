//! Browser-rendered source adapter.
//!
//! A few portals only render their listings through client-side script.
//! Rather than embedding a browser, pages are fetched through a remote
//! rendering endpoint (a headless Chrome service) that returns the
//! post-render HTML; everything after that is the selector adapter.
//! This path is a fallback, not the default: it always costs a heavy slot.

use async_trait::async_trait;

use super::{AdapterError, DetailFields, RawCandidate, RawItem, SelectorAdapter, SourceAdapter};
use crate::fetch::FetchClient;
use crate::models::{SourceConfig, TenderRecord, WeightClass};

pub struct HeadlessAdapter {
    render_endpoint: Option<String>,
    inner: SelectorAdapter,
}

impl HeadlessAdapter {
    pub fn new(render_endpoint: Option<String>) -> Self {
        Self {
            render_endpoint,
            inner: SelectorAdapter::new(),
        }
    }

    fn render_url(&self, target: &str) -> Result<String, AdapterError> {
        let endpoint = self
            .render_endpoint
            .as_deref()
            .ok_or(AdapterError::Unsupported(
                "no rendering endpoint configured for browser-driven sources",
            ))?;
        Ok(format!(
            "{}?url={}",
            endpoint.trim_end_matches('/'),
            urlencoding::encode(target)
        ))
    }
}

#[async_trait]
impl SourceAdapter for HeadlessAdapter {
    async fn fetch_listing(
        &self,
        source: &SourceConfig,
        client: &FetchClient,
    ) -> Result<Vec<RawItem>, AdapterError> {
        // Rendered fetches go through the renderer; rendered sources are
        // heavy by definition, whatever the config claims.
        let rendered = SourceConfig {
            endpoint: self.render_url(&source.endpoint)?,
            weight: WeightClass::Heavy,
            ..source.clone()
        };
        self.inner.fetch_listing(&rendered, client).await
    }

    fn parse_item(
        &self,
        source: &SourceConfig,
        raw: &RawItem,
    ) -> Result<RawCandidate, AdapterError> {
        self.inner.parse_item(source, raw)
    }

    async fn fetch_detail(
        &self,
        source: &SourceConfig,
        record: &TenderRecord,
        client: &FetchClient,
    ) -> Result<DetailFields, AdapterError> {
        let Some(link) = record.link.as_deref() else {
            return Err(AdapterError::Unsupported("record has no detail link"));
        };
        let rendered_record = TenderRecord {
            link: Some(self.render_url(link)?),
            ..record.clone()
        };
        let rendered_source = SourceConfig {
            weight: WeightClass::Heavy,
            ..source.clone()
        };
        self.inner
            .fetch_detail(&rendered_source, &rendered_record, client)
            .await
    }
}
