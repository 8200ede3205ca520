//! Adapter registry.
//!
//! Maps source identity to an adapter implementation. Resolution order:
//! exact source id, then host-suffix pattern (most specific pattern first),
//! then the default adapter for the source's declared strategy. Pattern
//! entries are kept sorted by specificity so `compras.mendoza.gov.ar` can
//! never be captured by a `gov.ar` catch-all registered earlier.

use std::collections::HashMap;
use std::sync::Arc;

use crate::fetch::domain_of;
use crate::models::{ExtractionStrategy, SourceConfig};

use super::{GazetteAdapter, GridAdapter, HeadlessAdapter, SelectorAdapter, SourceAdapter};

struct PatternEntry {
    /// Host suffix, e.g. "mendoza.gov.ar".
    pattern: String,
    adapter: Arc<dyn SourceAdapter>,
}

pub struct AdapterRegistry {
    by_source_id: HashMap<String, Arc<dyn SourceAdapter>>,
    by_host_pattern: Vec<PatternEntry>,
    grid: Arc<dyn SourceAdapter>,
    selector: Arc<dyn SourceAdapter>,
    gazette: Arc<dyn SourceAdapter>,
    headless: Arc<dyn SourceAdapter>,
}

impl AdapterRegistry {
    /// Registry with the built-in strategy adapters.
    pub fn with_defaults(render_endpoint: Option<String>) -> Self {
        Self {
            by_source_id: HashMap::new(),
            by_host_pattern: Vec::new(),
            grid: Arc::new(GridAdapter::new()),
            selector: Arc::new(SelectorAdapter::new()),
            gazette: Arc::new(GazetteAdapter::new()),
            headless: Arc::new(HeadlessAdapter::new(render_endpoint)),
        }
    }

    /// Register an adapter for an exact source id.
    pub fn register_source(&mut self, source_id: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        self.by_source_id.insert(source_id.into(), adapter);
    }

    /// Register an adapter for a host suffix. Entries stay sorted with the
    /// most specific pattern (most labels, then longest) first.
    pub fn register_host(&mut self, pattern: impl Into<String>, adapter: Arc<dyn SourceAdapter>) {
        self.by_host_pattern.push(PatternEntry {
            pattern: pattern.into().to_ascii_lowercase(),
            adapter,
        });
        self.by_host_pattern.sort_by(|a, b| {
            let labels_a = a.pattern.matches('.').count();
            let labels_b = b.pattern.matches('.').count();
            labels_b
                .cmp(&labels_a)
                .then(b.pattern.len().cmp(&a.pattern.len()))
        });
    }

    /// Resolve the adapter for a source.
    pub fn adapter_for(&self, source: &SourceConfig) -> Arc<dyn SourceAdapter> {
        if let Some(adapter) = self.by_source_id.get(&source.id) {
            return adapter.clone();
        }

        let host = source
            .host_pattern
            .clone()
            .or_else(|| domain_of(&source.endpoint));
        if let Some(host) = host {
            for entry in &self.by_host_pattern {
                if host_matches(&host, &entry.pattern) {
                    return entry.adapter.clone();
                }
            }
        }

        match source.strategy {
            ExtractionStrategy::Grid { .. } => self.grid.clone(),
            ExtractionStrategy::Selector { .. } => self.selector.clone(),
            ExtractionStrategy::Gazette { .. } => self.gazette.clone(),
            ExtractionStrategy::Headless { .. } => self.headless.clone(),
        }
    }
}

/// Suffix match on whole labels: "compras.mendoza.gov.ar" matches pattern
/// "mendoza.gov.ar" but "notmendoza.gov.ar" does not.
fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchClient;
    use crate::models::{SelectorMap, TenderRecord};
    use crate::sources::{AdapterError, DetailFields, RawCandidate, RawItem};
    use async_trait::async_trait;

    struct Marker(&'static str);

    #[async_trait]
    impl SourceAdapter for Marker {
        async fn fetch_listing(
            &self,
            _source: &SourceConfig,
            _client: &FetchClient,
        ) -> Result<Vec<RawItem>, AdapterError> {
            Err(AdapterError::Unsupported(self.0))
        }

        fn parse_item(
            &self,
            _source: &SourceConfig,
            _raw: &RawItem,
        ) -> Result<RawCandidate, AdapterError> {
            Err(AdapterError::Unsupported(self.0))
        }

        async fn fetch_detail(
            &self,
            _source: &SourceConfig,
            _record: &TenderRecord,
            _client: &FetchClient,
        ) -> Result<DetailFields, AdapterError> {
            Err(AdapterError::Unsupported(self.0))
        }
    }

    fn source_with_endpoint(endpoint: &str) -> SourceConfig {
        SourceConfig::new(
            "test",
            "Test",
            endpoint,
            ExtractionStrategy::Selector {
                selectors: SelectorMap::default(),
            },
        )
    }

    /// Identify which marker adapter resolution picked, via the
    /// Unsupported payload.
    fn marker_name(registry: &AdapterRegistry, source: &SourceConfig) -> Option<&'static str> {
        let adapter = registry.adapter_for(source);
        match adapter.parse_item(source, &RawItem::Text(String::new())) {
            Err(AdapterError::Unsupported(name)) => Some(name),
            _ => None,
        }
    }

    #[test]
    fn test_specific_host_beats_catch_all() {
        let mut registry = AdapterRegistry::with_defaults(None);
        // Broad catch-all registered first on purpose.
        registry.register_host("gov.ar", Arc::new(Marker("broad")));
        registry.register_host("mendoza.gov.ar", Arc::new(Marker("narrow")));

        let source = source_with_endpoint("https://compras.mendoza.gov.ar/lista");
        assert_eq!(marker_name(&registry, &source), Some("narrow"));

        let other = source_with_endpoint("https://compras.chaco.gov.ar/lista");
        assert_eq!(marker_name(&registry, &other), Some("broad"));
    }

    #[test]
    fn test_source_id_beats_host_pattern() {
        let mut registry = AdapterRegistry::with_defaults(None);
        registry.register_host("gov.ar", Arc::new(Marker("host")));
        registry.register_source("test", Arc::new(Marker("exact")));

        let source = source_with_endpoint("https://compras.mendoza.gov.ar/lista");
        assert_eq!(marker_name(&registry, &source), Some("exact"));
    }

    #[test]
    fn test_label_boundary_matching() {
        assert!(host_matches("compras.mendoza.gov.ar", "mendoza.gov.ar"));
        assert!(host_matches("mendoza.gov.ar", "mendoza.gov.ar"));
        assert!(!host_matches("notmendoza.gov.ar", "mendoza.gov.ar"));
    }

    #[test]
    fn test_strategy_fallback() {
        let registry = AdapterRegistry::with_defaults(None);
        let source = source_with_endpoint("https://example.gob.ar/x");
        // No panic, resolves to the selector default.
        let _ = registry.adapter_for(&source);
    }
}
