//! Generic label-driven detail-page extraction.
//!
//! Detail pages across provincial portals share a convention: a table or
//! definition list of "Etiqueta: valor" rows. When a source has no
//! dedicated detail selectors, these heuristics pull the usual fields out
//! of labeled rows anywhere in the page.

use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

use super::{absolutize, clean_text, DetailFields};
use crate::models::{AttachedFile, SourceConfig};

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(objeto|descripci[oó]n|fecha de apertura|apertura|presupuesto oficial|presupuesto|monto|valor del pliego|precio del pliego|organismo|repartici[oó]n)\s*:?\s*(.+)$").unwrap()
});

static DOC_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".xls", ".xlsx", ".zip", ".rar"];

/// Extract detail fields from arbitrary portal HTML.
pub(crate) fn generic_detail(source: &SourceConfig, html: &str) -> DetailFields {
    let document = Html::parse_document(html);
    let mut fields = DetailFields::default();

    let row_selector = Selector::parse("tr, li, p, dt, dd, div").expect("static selector");
    for element in document.select(&row_selector) {
        let text = clean_text(&element.text().collect::<String>());
        if text.is_empty() || text.len() > 600 {
            continue;
        }
        let Some(caps) = LABEL_VALUE.captures(&text) else {
            continue;
        };
        let label = caps[1].to_lowercase();
        let value = clean_text(&caps[2]);
        if value.is_empty() {
            continue;
        }

        if label.starts_with("objeto") && fields.subject.is_none() {
            fields.subject = Some(value);
        } else if label.starts_with("descripci") && fields.description.is_none() {
            fields.description = Some(value);
        } else if label.contains("apertura") && fields.raw_opening_date.is_none() {
            fields.raw_opening_date = Some(value);
        } else if label.contains("pliego") && fields.pliego_price_text.is_none() {
            fields.pliego_price_text = Some(value);
        } else if (label.starts_with("presupuesto") || label == "monto")
            && fields.budget_text.is_none()
        {
            fields.budget_text = Some(value);
        } else if (label.starts_with("organismo") || label.starts_with("repartic"))
            && fields.organization.is_none()
        {
            fields.organization = Some(value);
        }
    }

    let link_selector = Selector::parse("a[href]").expect("static selector");
    for anchor in document.select(&link_selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let lower = href.to_lowercase();
        if DOC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            let title = clean_text(&anchor.text().collect::<String>());
            let url = absolutize(source, href);
            if !fields.attachments.iter().any(|f| f.url == url) {
                fields.attachments.push(AttachedFile {
                    title: if title.is_empty() {
                        url.rsplit('/').next().unwrap_or("adjunto").to_string()
                    } else {
                        title
                    },
                    url,
                    ..Default::default()
                });
            }
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExtractionStrategy, SelectorMap};

    fn source() -> SourceConfig {
        SourceConfig::new(
            "test",
            "Test",
            "https://compras.example.gov.ar/detalle/9",
            ExtractionStrategy::Selector {
                selectors: SelectorMap::default(),
            },
        )
    }

    #[test]
    fn test_labeled_rows() {
        let html = r#"
            <table>
              <tr><td>Objeto: Adquisición de fibra óptica monomodo</td></tr>
              <tr><td>Fecha de Apertura: 15/03/2024 10:00</td></tr>
              <tr><td>Presupuesto Oficial: $ 12.500.000,00</td></tr>
              <tr><td>Valor del Pliego: $ 12.500,00</td></tr>
            </table>
            <a href="/docs/pliego.pdf">Pliego de bases</a>
        "#;
        let fields = generic_detail(&source(), html);
        assert_eq!(
            fields.subject.as_deref(),
            Some("Adquisición de fibra óptica monomodo")
        );
        assert!(fields.raw_opening_date.as_deref().unwrap().contains("15/03/2024"));
        assert!(fields.budget_text.as_deref().unwrap().contains("12.500.000"));
        assert!(fields.pliego_price_text.as_deref().unwrap().contains("12.500,00"));
        assert_eq!(fields.attachments.len(), 1);
        assert_eq!(
            fields.attachments[0].url,
            "https://compras.example.gov.ar/docs/pliego.pdf"
        );
    }

    #[test]
    fn test_empty_page() {
        let fields = generic_detail(&source(), "<html><body>Nada</body></html>");
        assert!(fields.is_empty());
    }
}
