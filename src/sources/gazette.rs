//! Document-gazette adapter.
//!
//! Official bulletins publish procurement notices inside paginated PDF
//! documents rather than structured listings. This adapter downloads each
//! bulletin document, extracts its text, and carves out candidate sections
//! wherever the configured section pattern announces a procurement.

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};

use super::{absolutize, AdapterError, DetailFields, RawCandidate, RawItem, SourceAdapter};
use crate::enrich::extract_text;
use crate::fetch::FetchClient;
use crate::models::{ExtractionStrategy, SourceConfig, TenderRecord};

/// Longest section of gazette text kept per candidate.
const MAX_SECTION_CHARS: usize = 4000;

pub struct GazetteAdapter;

impl GazetteAdapter {
    pub fn new() -> Self {
        Self
    }

    fn gazette_config(source: &SourceConfig) -> Result<(&str, &str, u32), AdapterError> {
        match &source.strategy {
            ExtractionStrategy::Gazette {
                document_links,
                section_pattern,
                max_pages,
            } => Ok((document_links, section_pattern, *max_pages)),
            _ => Err(AdapterError::Unsupported("non-gazette strategy")),
        }
    }
}

impl Default for GazetteAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for GazetteAdapter {
    async fn fetch_listing(
        &self,
        source: &SourceConfig,
        client: &FetchClient,
    ) -> Result<Vec<RawItem>, AdapterError> {
        let (document_links, section_pattern, max_pages) = Self::gazette_config(source)?;
        let section_regex = Regex::new(section_pattern)
            .map_err(|e| AdapterError::Parse(format!("bad section pattern: {e}")))?;

        let index = client.fetch(&source.endpoint, source.weight).await?;
        let links = document_urls(source, &index.text, document_links, max_pages as usize);
        if links.is_empty() {
            tracing::warn!(source = %source.id, "gazette index has no document links");
        }

        let mut items = Vec::new();
        for link in links {
            // One unreadable bulletin must not sink the whole run.
            let page = match client.fetch(&link, source.weight).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(source = %source.id, url = %link, error = %err, "bulletin fetch failed, skipping");
                    continue;
                }
            };
            let text = match extract_text(&page.bytes, page.content_type.as_deref(), &link).await {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(source = %source.id, url = %link, error = %err, "bulletin text extraction failed, skipping");
                    continue;
                }
            };
            for section in split_sections(&section_regex, &text) {
                items.push(RawItem::Text(section));
            }
        }

        Ok(items)
    }

    fn parse_item(
        &self,
        _source: &SourceConfig,
        raw: &RawItem,
    ) -> Result<RawCandidate, AdapterError> {
        let RawItem::Text(section) = raw else {
            return Err(AdapterError::Parse(
                "gazette adapter expects text sections".into(),
            ));
        };

        let title = section
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| AdapterError::Parse("empty gazette section".into()))?;

        let native_id = expediente_in(section);

        Ok(RawCandidate {
            native_id,
            title: title.chars().take(200).collect(),
            description: Some(section.clone()),
            metadata: serde_json::json!({ "gazette_section": true }),
            ..Default::default()
        })
    }

    async fn fetch_detail(
        &self,
        _source: &SourceConfig,
        _record: &TenderRecord,
        _client: &FetchClient,
    ) -> Result<DetailFields, AdapterError> {
        // Gazette notices have no detail page; the bulletin text is all
        // there is. Enrichment degrades gracefully on Unsupported.
        Err(AdapterError::Unsupported("gazette sources have no detail pages"))
    }
}

/// Collect bulletin document URLs from the index page, bounded.
fn document_urls(source: &SourceConfig, html: &str, selector: &str, cap: usize) -> Vec<String> {
    let Ok(link_selector) = Selector::parse(selector) else {
        tracing::warn!(source = %source.id, %selector, "bad document link selector");
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut urls = Vec::new();
    for anchor in document.select(&link_selector) {
        if let Some(href) = anchor.value().attr("href") {
            let url = absolutize(source, href);
            if !urls.contains(&url) {
                urls.push(url);
            }
            if urls.len() >= cap {
                break;
            }
        }
    }
    urls
}

/// Cut gazette text into per-notice sections at pattern matches.
fn split_sections(section_regex: &Regex, text: &str) -> Vec<String> {
    let starts: Vec<usize> = section_regex.find_iter(text).map(|m| m.start()).collect();
    let mut sections = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let section: String = text[start..end].chars().take(MAX_SECTION_CHARS).collect();
        let section = section.trim().to_string();
        if !section.is_empty() {
            sections.push(section);
        }
    }
    sections
}

fn expediente_in(text: &str) -> Option<String> {
    static EXPEDIENTE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
        Regex::new(r"(?i)(?:expediente|expte\.?)\s*(?:n[°º]?\s*)?(\d{1,6}/\d{2,4})").unwrap()
    });
    EXPEDIENTE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAZETTE_TEXT: &str = "\
BOLETIN OFICIAL - SECCION CONTRATACIONES

LICITACION PUBLICA N° 12/2024
Expediente N° 4581/2024
Objeto: adquisición de fibra óptica para red provincial
Apertura: 15 de abril de 2024

LICITACION PUBLICA N° 13/2024
Expediente N° 4602/2024
Objeto: provisión de luminarias LED
";

    fn section_regex() -> Regex {
        Regex::new(r"(?i)licitaci[oó]n\s+p[uú]blica").unwrap()
    }

    #[test]
    fn test_split_sections() {
        let sections = split_sections(&section_regex(), GAZETTE_TEXT);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].contains("fibra óptica"));
        assert!(sections[1].contains("luminarias"));
    }

    #[test]
    fn test_parse_item_extracts_title_and_expediente() {
        let sections = split_sections(&section_regex(), GAZETTE_TEXT);
        let adapter = GazetteAdapter::new();
        let source = SourceConfig::new(
            "bo",
            "Boletín Oficial",
            "https://boletin.example.gob.ar",
            ExtractionStrategy::Gazette {
                document_links: "a.pdf".to_string(),
                section_pattern: r"(?i)licitaci[oó]n\s+p[uú]blica".to_string(),
                max_pages: 10,
            },
        );

        let candidate = adapter
            .parse_item(&source, &RawItem::Text(sections[0].clone()))
            .unwrap();
        assert_eq!(candidate.title, "LICITACION PUBLICA N° 12/2024");
        assert_eq!(candidate.native_id.as_deref(), Some("4581/2024"));
        assert!(candidate.description.unwrap().contains("Apertura"));
    }

    #[test]
    fn test_no_matches_no_sections() {
        assert!(split_sections(&section_regex(), "DECRETOS Y RESOLUCIONES").is_empty());
    }
}
