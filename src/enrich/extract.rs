//! Document text extraction.
//!
//! Bulletins and pliegos arrive as PDFs, zip bundles, HTML, or plain text.
//! PDF extraction shells out to `pdftotext` (poppler-utils); there is no
//! in-process PDF parser worth trusting with gazette layouts. A missing
//! binary degrades that one document, never the run.

use std::io::Read;
use std::sync::LazyLock;

use scraper::Html;
use thiserror::Error;
use tokio::process::Command;

use crate::fetch::decode_body;

/// Entries read out of a single zip bundle, bounded.
const MAX_ZIP_ENTRIES: usize = 20;

/// Per-document extraction ceiling. Gazette PDFs can run to hundreds of
/// pages; everything past this adds noise, not signal.
const MAX_TEXT_CHARS: usize = 200_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("pdftotext not found on PATH")]
    MissingPdftotext,
    #[error("pdftotext failed: {0}")]
    Pdftotext(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

static PDFTOTEXT: LazyLock<Option<std::path::PathBuf>> =
    LazyLock::new(|| which::which("pdftotext").ok());

/// Extract readable text from a downloaded document. Format is sniffed
/// from magic bytes first; content type and URL extension only break ties.
pub async fn extract_text(
    bytes: &[u8],
    content_type: Option<&str>,
    url: &str,
) -> Result<String, ExtractError> {
    let text = match sniff_format(bytes, content_type, url) {
        DocumentFormat::Pdf => pdf_to_text(bytes).await?,
        DocumentFormat::Zip => zip_to_text(bytes).await?,
        DocumentFormat::Html => html_to_text(&decode_body(bytes, content_type).0),
        DocumentFormat::Text => decode_body(bytes, content_type).0,
    };
    Ok(truncate_chars(&text, MAX_TEXT_CHARS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Pdf,
    Zip,
    Html,
    Text,
}

fn sniff_format(bytes: &[u8], content_type: Option<&str>, url: &str) -> DocumentFormat {
    if bytes.starts_with(b"%PDF") {
        return DocumentFormat::Pdf;
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return DocumentFormat::Zip;
    }

    let declared = content_type.unwrap_or("").to_ascii_lowercase();
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if declared.contains("pdf") || path.ends_with(".pdf") {
        return DocumentFormat::Pdf;
    }
    if declared.contains("zip") || path.ends_with(".zip") {
        return DocumentFormat::Zip;
    }
    if declared.contains("html") || looks_like_html(bytes) {
        return DocumentFormat::Html;
    }
    DocumentFormat::Text
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head: String = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]).to_lowercase();
    let head = head.trim_start();
    head.starts_with("<!doctype") || head.starts_with("<html") || head.starts_with("<")
}

/// Run the document through pdftotext in layout mode, reading from a temp
/// file and writing to stdout.
async fn pdf_to_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let binary = PDFTOTEXT.as_ref().ok_or(ExtractError::MissingPdftotext)?;

    let file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
    std::fs::write(file.path(), bytes)?;

    let output = Command::new(binary)
        .arg("-layout")
        .arg("-q")
        .arg(file.path())
        .arg("-")
        .output()
        .await?;

    if !output.status.success() {
        return Err(ExtractError::Pdftotext(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull text out of every readable entry in a zip bundle.
async fn zip_to_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec()))?;

    // Entry bytes are collected synchronously; PDFs inside go back through
    // the async pdftotext path afterwards.
    let mut pdf_entries = Vec::new();
    let mut texts = Vec::new();
    for index in 0..archive.len().min(MAX_ZIP_ENTRIES) {
        let mut entry = archive.by_index(index)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_ascii_lowercase();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;

        if name.ends_with(".pdf") || content.starts_with(b"%PDF") {
            pdf_entries.push(content);
        } else if name.ends_with(".html") || name.ends_with(".htm") {
            texts.push(html_to_text(&decode_body(&content, None).0));
        } else if name.ends_with(".txt") || name.ends_with(".csv") {
            texts.push(decode_body(&content, None).0);
        }
    }

    for content in pdf_entries {
        match pdf_to_text(&content).await {
            Ok(text) => texts.push(text),
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable pdf inside zip");
            }
        }
    }

    Ok(texts.join("\n\n"))
}

/// Strip markup, keeping rough line structure for section splitting.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    for text in document.root_element().text() {
        let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines.join("\n")
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf_magic_wins_over_content_type() {
        assert_eq!(
            sniff_format(b"%PDF-1.7 ...", Some("text/html"), "https://x/doc"),
            DocumentFormat::Pdf
        );
    }

    #[test]
    fn test_sniff_by_extension() {
        assert_eq!(
            sniff_format(b"....", None, "https://boletin.gob.ar/ediciones/2024-03.pdf?dl=1"),
            DocumentFormat::Pdf
        );
        assert_eq!(
            sniff_format(b"PK\x03\x04rest", None, "https://x/pliego"),
            DocumentFormat::Zip
        );
    }

    #[test]
    fn test_sniff_html() {
        assert_eq!(
            sniff_format(b"<!DOCTYPE html><html>", None, "https://x/aviso"),
            DocumentFormat::Html
        );
    }

    #[test]
    fn test_html_to_text_keeps_lines() {
        let text = html_to_text(
            "<html><body><h1>LICITACION 12/2024</h1><p>Objeto: fibra  \u{f3}ptica</p></body></html>",
        );
        assert_eq!(text, "LICITACION 12/2024\nObjeto: fibra óptica");
    }

    #[tokio::test]
    async fn test_plain_text_passthrough() {
        let text = extract_text(b"Expediente 4581/2024", Some("text/plain"), "https://x/a.txt")
            .await
            .unwrap();
        assert_eq!(text, "Expediente 4581/2024");
    }

    #[test]
    fn test_truncate_chars_is_boundary_safe() {
        assert_eq!(truncate_chars("ñandú", 3), "ñan");
    }
}
