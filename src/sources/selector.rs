//! CSS-selector-configured generic adapter.
//!
//! Covers the long tail of portals that are plain server-rendered HTML:
//! the source config maps candidate fields to selectors and this adapter
//! does the rest, including bounded pagination via a next-page selector.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::detail::generic_detail;
use super::{absolutize, clean_text, AdapterError, DetailFields, RawCandidate, RawItem, SourceAdapter};
use crate::fetch::FetchClient;
use crate::models::{ExtractionStrategy, SelectorMap, SourceConfig, TenderRecord};

/// Hard cap on followed listing pages, whatever the next-page chain claims.
const MAX_LISTING_PAGES: usize = 25;

pub struct SelectorAdapter;

impl SelectorAdapter {
    pub fn new() -> Self {
        Self
    }

    fn selectors(source: &SourceConfig) -> Result<&SelectorMap, AdapterError> {
        match &source.strategy {
            ExtractionStrategy::Selector { selectors } => Ok(selectors),
            ExtractionStrategy::Headless { selectors } => Ok(selectors),
            _ => Err(AdapterError::Unsupported("non-selector strategy")),
        }
    }
}

impl Default for SelectorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for SelectorAdapter {
    async fn fetch_listing(
        &self,
        source: &SourceConfig,
        client: &FetchClient,
    ) -> Result<Vec<RawItem>, AdapterError> {
        let selectors = Self::selectors(source)?;
        let mut items = Vec::new();
        let mut next_url = Some(source.endpoint.clone());
        let mut pages = 0;

        while let Some(url) = next_url.take() {
            if pages >= MAX_LISTING_PAGES {
                tracing::warn!(source = %source.id, "pagination cap reached");
                break;
            }
            pages += 1;

            let page = client.fetch(&url, source.weight).await?;
            let (fragments, next) = split_listing(selectors, source, &page.text);
            items.extend(fragments.into_iter().map(RawItem::Html));

            // Stop on a next-page loop back to the same URL.
            next_url = next.filter(|n| *n != url);
        }

        Ok(items)
    }

    fn parse_item(
        &self,
        source: &SourceConfig,
        raw: &RawItem,
    ) -> Result<RawCandidate, AdapterError> {
        let selectors = Self::selectors(source)?;
        let RawItem::Html(fragment) = raw else {
            return Err(AdapterError::Parse(
                "selector adapter expects HTML fragments".into(),
            ));
        };

        // Table rows lose their element context when parsed standalone,
        // so re-wrap them before fragment parsing.
        let trimmed = fragment.trim_start();
        let wrapped;
        let markup = if trimmed.starts_with("<tr") || trimmed.starts_with("<td") {
            wrapped = format!("<table>{fragment}</table>");
            &wrapped
        } else {
            fragment
        };

        let document = Html::parse_fragment(markup);
        let root = document.root_element();

        let title = select_text(&root, selectors.title.as_deref())
            .unwrap_or_else(|| clean_text(&root.text().collect::<String>()));
        if title.is_empty() {
            return Err(AdapterError::Parse("item has no title text".into()));
        }

        let link = select_attr(&root, selectors.link.as_deref().or(Some("a")), "href")
            .map(|href| absolutize(source, &href));

        Ok(RawCandidate {
            native_id: select_text(&root, selectors.numero.as_deref()),
            title,
            link,
            organization: select_text(&root, selectors.organization.as_deref()),
            raw_publication_date: select_text(&root, selectors.date.as_deref()),
            raw_opening_date: None,
            description: None,
            status: None,
            attachments: Vec::new(),
            metadata: serde_json::json!({}),
        })
    }

    async fn fetch_detail(
        &self,
        source: &SourceConfig,
        record: &TenderRecord,
        client: &FetchClient,
    ) -> Result<DetailFields, AdapterError> {
        let selectors = Self::selectors(source)?;
        let Some(link) = record.link.as_deref() else {
            return Err(AdapterError::Unsupported("record has no detail link"));
        };

        let page = client.fetch(link, source.weight).await?;
        Ok(parse_detail(selectors, source, &page.text))
    }
}

/// Split a listing page into per-item HTML fragments plus the next-page
/// URL. Sync helper so the non-Send `Html` never crosses an await.
fn split_listing(
    selectors: &SelectorMap,
    source: &SourceConfig,
    html: &str,
) -> (Vec<String>, Option<String>) {
    let document = Html::parse_document(html);

    let Ok(item_selector) = Selector::parse(&selectors.item) else {
        tracing::warn!(source = %source.id, selector = %selectors.item, "bad item selector");
        return (Vec::new(), None);
    };

    let fragments = document
        .select(&item_selector)
        .map(|el| el.html())
        .collect();

    let next = selectors
        .next_page
        .as_deref()
        .and_then(|sel| Selector::parse(sel).ok())
        .and_then(|sel| {
            document
                .select(&sel)
                .find_map(|el| el.value().attr("href").map(|h| absolutize(source, h)))
        });

    (fragments, next)
}

/// Detail parse with configured selectors, falling back to the generic
/// label heuristics for anything unconfigured.
fn parse_detail(selectors: &SelectorMap, source: &SourceConfig, html: &str) -> DetailFields {
    let mut fields = generic_detail(source, html);

    let document = Html::parse_document(html);
    let root = document.root_element();

    if let Some(value) = select_text(&root, selectors.detail_description.as_deref()) {
        fields.description = Some(value);
    }
    if let Some(value) = select_text(&root, selectors.detail_opening_date.as_deref()) {
        fields.raw_opening_date = Some(value);
    }
    if let Some(value) = select_text(&root, selectors.detail_budget.as_deref()) {
        fields.budget_text = Some(value);
    }
    if let Some(sel) = selectors.detail_attachments.as_deref() {
        if let Ok(attachment_selector) = Selector::parse(sel) {
            for anchor in document.select(&attachment_selector) {
                if let Some(href) = anchor.value().attr("href") {
                    let url = absolutize(source, href);
                    if !fields.attachments.iter().any(|f| f.url == url) {
                        let title = clean_text(&anchor.text().collect::<String>());
                        fields.attachments.push(crate::models::AttachedFile {
                            title: if title.is_empty() { url.clone() } else { title },
                            url,
                            ..Default::default()
                        });
                    }
                }
            }
        }
    }

    fields
}

fn select_text(root: &ElementRef, selector: Option<&str>) -> Option<String> {
    let selector = Selector::parse(selector?).ok()?;
    let element = root.select(&selector).next()?;
    let text = clean_text(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn select_attr(root: &ElementRef, selector: Option<&str>, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector?).ok()?;
    root.select(&selector)
        .find_map(|el| el.value().attr(attr).map(|v| v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig::new(
            "mza",
            "Compras Mendoza",
            "https://compras.mendoza.gov.ar/licitaciones",
            ExtractionStrategy::Selector {
                selectors: SelectorMap {
                    item: "tr.licitacion".to_string(),
                    title: Some("td.titulo".to_string()),
                    link: Some("a.detalle".to_string()),
                    numero: Some("td.nro".to_string()),
                    date: Some("td.fecha".to_string()),
                    next_page: Some("a.siguiente".to_string()),
                    ..Default::default()
                },
            },
        )
    }

    const LISTING: &str = r#"
        <table>
          <tr class="licitacion">
            <td class="nro">12/2024</td>
            <td class="titulo">Provisión de caños de PVC</td>
            <td class="fecha">01/03/2024</td>
            <td><a class="detalle" href="/licitaciones/12-2024">ver</a></td>
          </tr>
          <tr class="licitacion">
            <td class="nro">13/2024</td>
            <td class="titulo">Obra: refacción escuela N°4</td>
            <td class="fecha">02/03/2024</td>
            <td><a class="detalle" href="/licitaciones/13-2024">ver</a></td>
          </tr>
        </table>
        <a class="siguiente" href="/licitaciones?page=2">Siguiente</a>
    "#;

    #[test]
    fn test_split_listing() {
        let src = source();
        let selectors = match &src.strategy {
            ExtractionStrategy::Selector { selectors } => selectors.clone(),
            _ => unreachable!(),
        };
        let (fragments, next) = split_listing(&selectors, &src, LISTING);
        assert_eq!(fragments.len(), 2);
        assert_eq!(
            next.as_deref(),
            Some("https://compras.mendoza.gov.ar/licitaciones?page=2")
        );
    }

    #[test]
    fn test_parse_item() {
        let src = source();
        let adapter = SelectorAdapter::new();
        let fragment = r#"
            <tr class="licitacion">
              <td class="nro">12/2024</td>
              <td class="titulo">Provisión de caños de PVC</td>
              <td class="fecha">01/03/2024</td>
              <td><a class="detalle" href="/licitaciones/12-2024">ver</a></td>
            </tr>
        "#;
        let candidate = adapter
            .parse_item(&src, &RawItem::Html(fragment.to_string()))
            .unwrap();
        assert_eq!(candidate.title, "Provisión de caños de PVC");
        assert_eq!(candidate.native_id.as_deref(), Some("12/2024"));
        assert_eq!(candidate.raw_publication_date.as_deref(), Some("01/03/2024"));
        assert_eq!(
            candidate.link.as_deref(),
            Some("https://compras.mendoza.gov.ar/licitaciones/12-2024")
        );
    }

    #[test]
    fn test_parse_item_without_title_fails() {
        let src = source();
        let adapter = SelectorAdapter::new();
        let result = adapter.parse_item(&src, &RawItem::Html("<tr class=\"licitacion\"></tr>".to_string()));
        assert!(result.is_err());
    }
}
