//! Structured-grid adapter.
//!
//! For portals whose listing is a data grid backed by an embedded JSON
//! payload, either served directly as JSON or inlined in a script tag.
//! Field names vary per portal and are declared in the strategy config;
//! common Spanish aliases are tried when a mapping is missing.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use super::detail::generic_detail;
use super::{AdapterError, DetailFields, RawCandidate, RawItem, SourceAdapter};
use crate::fetch::FetchClient;
use crate::models::{ExtractionStrategy, SourceConfig, TenderRecord};

/// JSON payloads inlined as `var rows = [...]` or similar assignments.
static INLINE_PAYLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)=\s*(\[\s*\{.*?\}\s*\])\s*;").unwrap());

static SCRIPT_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script[^>]*type\s*=\s*["']application/json["'][^>]*>(.*?)</script>"#)
        .unwrap()
});

const TITLE_ALIASES: &[&str] = &["titulo", "título", "title", "denominacion", "nombre"];
const ID_ALIASES: &[&str] = &["numero", "número", "nro", "id", "expediente", "codigo"];
const ORG_ALIASES: &[&str] = &["organismo", "reparticion", "entidad", "organization"];
const PUB_DATE_ALIASES: &[&str] = &["fecha_publicacion", "fechaPublicacion", "publicacion", "fecha"];
const OPEN_DATE_ALIASES: &[&str] = &["fecha_apertura", "fechaApertura", "apertura"];
const LINK_ALIASES: &[&str] = &["link", "url", "href", "detalle"];
const STATUS_ALIASES: &[&str] = &["estado", "status", "situacion"];
const DESC_ALIASES: &[&str] = &["descripcion", "descripción", "objeto", "detalle_texto"];

pub struct GridAdapter;

impl GridAdapter {
    pub fn new() -> Self {
        Self
    }

    fn grid_config(source: &SourceConfig) -> Result<(&str, &HashMap<String, String>), AdapterError> {
        match &source.strategy {
            ExtractionStrategy::Grid { rows_path, fields } => Ok((rows_path, fields)),
            _ => Err(AdapterError::Unsupported("non-grid strategy")),
        }
    }
}

impl Default for GridAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceAdapter for GridAdapter {
    async fn fetch_listing(
        &self,
        source: &SourceConfig,
        client: &FetchClient,
    ) -> Result<Vec<RawItem>, AdapterError> {
        let (rows_path, _) = Self::grid_config(source)?;
        let page = client.fetch(&source.endpoint, source.weight).await?;

        let payload = extract_payload(&page.text).ok_or_else(|| {
            AdapterError::Parse(format!("no JSON payload found at {}", source.endpoint))
        })?;

        let rows = navigate(&payload, rows_path)
            .and_then(Value::as_array)
            .cloned()
            .or_else(|| payload.as_array().cloned())
            .ok_or_else(|| AdapterError::Parse(format!("no row array at path '{rows_path}'")))?;

        Ok(rows.into_iter().map(RawItem::Json).collect())
    }

    fn parse_item(
        &self,
        source: &SourceConfig,
        raw: &RawItem,
    ) -> Result<RawCandidate, AdapterError> {
        let (_, fields) = Self::grid_config(source)?;
        let RawItem::Json(row) = raw else {
            return Err(AdapterError::Parse("grid adapter expects JSON rows".into()));
        };

        let title = field(row, fields, "title", TITLE_ALIASES)
            .ok_or_else(|| AdapterError::Parse("row has no title field".into()))?;

        let link = field(row, fields, "link", LINK_ALIASES)
            .map(|href| super::absolutize(source, &href));

        Ok(RawCandidate {
            native_id: field(row, fields, "numero", ID_ALIASES),
            title,
            link,
            organization: field(row, fields, "organization", ORG_ALIASES),
            raw_publication_date: field(row, fields, "publication_date", PUB_DATE_ALIASES),
            raw_opening_date: field(row, fields, "opening_date", OPEN_DATE_ALIASES),
            description: field(row, fields, "description", DESC_ALIASES),
            status: field(row, fields, "status", STATUS_ALIASES),
            attachments: Vec::new(),
            metadata: serde_json::json!({ "grid_row": row }),
        })
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
        let page = client.fetch(link, source.weight).await?;
        Ok(generic_detail(source, &page.text))
    }
}

/// Find the JSON payload in a response: the body itself, a JSON script
/// tag, or an inline array assignment.
fn extract_payload(body: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(body.trim()) {
        return Some(value);
    }
    for caps in SCRIPT_JSON.captures_iter(body) {
        if let Ok(value) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Some(value);
        }
    }
    for caps in INLINE_PAYLOAD.captures_iter(body) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return Some(value);
        }
    }
    None
}

/// Navigate a dot-separated path into a JSON value.
fn navigate<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Look up a candidate field: the configured mapping first, then the
/// common alias list.
fn field(
    row: &Value,
    mapping: &HashMap<String, String>,
    name: &str,
    aliases: &[&str],
) -> Option<String> {
    let configured = mapping.get(name).and_then(|key| value_to_string(row.get(key)?));
    if configured.is_some() {
        return configured;
    }
    aliases
        .iter()
        .find_map(|alias| value_to_string(row.get(*alias)?))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
