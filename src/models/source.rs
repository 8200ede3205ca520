//! Source configuration model.
//!
//! A SourceConfig describes one government publication endpoint: how to
//! reach it, which extraction strategy parses it, how heavy it is on the
//! network, and how often it should run. Operators create these rarely and
//! the scheduler reads them on every cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Concurrency/timeout weight class for a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightClass {
    /// Plain HTML listings; short timeout, counted only against the
    /// global concurrency ceiling.
    #[default]
    Light,
    /// Document-heavy or browser-rendered sources; long timeout, also
    /// counted against the heavy sub-ceiling.
    Heavy,
}

impl WeightClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Heavy => "heavy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "heavy" => Some(Self::Heavy),
            _ => None,
        }
    }
}

/// Declarative field-to-selector mapping for the generic CSS adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorMap {
    /// Selector for one listing row/card.
    pub item: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub numero: Option<String>,
    /// Detail-page selectors, used by level-2 enrichment.
    #[serde(default)]
    pub detail_description: Option<String>,
    #[serde(default)]
    pub detail_opening_date: Option<String>,
    #[serde(default)]
    pub detail_budget: Option<String>,
    #[serde(default)]
    pub detail_attachments: Option<String>,
    /// Pagination: selector for the "next page" link.
    #[serde(default)]
    pub next_page: Option<String>,
}

/// How raw pages from this source become candidate records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Embedded JSON data payload (structured grids).
    Grid {
        /// JSON path to the row array, dot-separated.
        #[serde(default = "default_rows_path")]
        rows_path: String,
        /// Field names within each row.
        #[serde(default)]
        fields: std::collections::HashMap<String, String>,
    },
    /// Declarative CSS-selector mapping.
    Selector { selectors: SelectorMap },
    /// Paginated official-gazette documents; candidates carved out of
    /// extracted text.
    Gazette {
        /// Selector for per-page document links.
        document_links: String,
        /// Regex marking the start of a procurement section.
        #[serde(default = "default_section_pattern")]
        section_pattern: String,
        #[serde(default = "default_max_pages")]
        max_pages: u32,
    },
    /// Client-side-rendered sources, fetched through a remote rendering
    /// endpoint. Fallback only; costs a heavy slot.
    Headless { selectors: SelectorMap },
}

fn default_rows_path() -> String {
    "data".to_string()
}

fn default_section_pattern() -> String {
    r"(?i)licitaci[oó]n\s+p[uú]blica".to_string()
}

fn default_max_pages() -> u32 {
    10
}

/// Scheduling cadence for a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Base interval between runs, minutes.
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    /// When true, three consecutive runs with zero new items shift the
    /// source to a slower tier; a productive run resets it.
    #[serde(default)]
    pub adaptive: bool,
}

fn default_interval() -> u32 {
    360
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval(),
            adaptive: false,
        }
    }
}

/// Per-source descriptor read on every scheduling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    pub endpoint: String,
    /// Host suffix this source claims in the adapter registry. Narrower
    /// patterns must win over broad catch-alls like "gob.ar".
    #[serde(default)]
    pub host_pattern: Option<String>,
    pub strategy: ExtractionStrategy,
    #[serde(default)]
    pub weight: WeightClass,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_active")]
    pub active: bool,
    pub jurisdiccion: Option<String>,
    /// Ratio of pliego price to real budget for this source, used when only
    /// the bid-document price is published. None means use the global default.
    #[serde(default)]
    pub pliego_ratio: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    /// Consecutive runs that found nothing new (adaptive tier input).
    #[serde(default)]
    pub barren_runs: u32,
}

fn default_active() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, endpoint: impl Into<String>, strategy: ExtractionStrategy) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            endpoint: endpoint.into(),
            host_pattern: None,
            strategy,
            weight: WeightClass::Light,
            schedule: ScheduleConfig::default(),
            active: true,
            jurisdiccion: None,
            pliego_ratio: None,
            created_at: Utc::now(),
            last_run_at: None,
            barren_runs: 0,
        }
    }

    /// Effective interval after adaptive tiering: 3 barren runs in a row
    /// shift the source to 4x the base interval.
    pub fn effective_interval_minutes(&self) -> u32 {
        if self.schedule.adaptive && self.barren_runs >= 3 {
            self.schedule.interval_minutes.saturating_mul(4)
        } else {
            self.schedule.interval_minutes
        }
    }

    /// Whether this source is due for a run at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_run_at {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_minutes() >= self.effective_interval_minutes() as i64
            }
        }
    }

    /// Record a run outcome for adaptive tiering.
    pub fn note_run(&mut self, found_new: bool, at: DateTime<Utc>) {
        self.last_run_at = Some(at);
        if found_new {
            self.barren_runs = 0;
        } else {
            self.barren_runs = self.barren_runs.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_source() -> SourceConfig {
        SourceConfig::new(
            "mendoza",
            "Compras Mendoza",
            "https://compras.mendoza.gov.ar/licitaciones",
            ExtractionStrategy::Selector {
                selectors: SelectorMap {
                    item: "table.listado tr".to_string(),
                    ..Default::default()
                },
            },
        )
    }

    #[test]
    fn test_adaptive_tier_shift_and_reset() {
        let mut source = light_source();
        source.schedule.adaptive = true;
        source.schedule.interval_minutes = 60;

        let now = Utc::now();
        for _ in 0..3 {
            source.note_run(false, now);
        }
        assert_eq!(source.effective_interval_minutes(), 240);

        source.note_run(true, now);
        assert_eq!(source.effective_interval_minutes(), 60);
    }

    #[test]
    fn test_non_adaptive_ignores_barren_runs() {
        let mut source = light_source();
        source.schedule.interval_minutes = 60;
        let now = Utc::now();
        for _ in 0..5 {
            source.note_run(false, now);
        }
        assert_eq!(source.effective_interval_minutes(), 60);
    }

    #[test]
    fn test_is_due() {
        let mut source = light_source();
        source.schedule.interval_minutes = 60;
        let now = Utc::now();
        assert!(source.is_due(now));

        source.last_run_at = Some(now - chrono::Duration::minutes(30));
        assert!(!source.is_due(now));

        source.last_run_at = Some(now - chrono::Duration::minutes(61));
        assert!(source.is_due(now));

        source.active = false;
        assert!(!source.is_due(now));
    }

    #[test]
    fn test_strategy_json_roundtrip() {
        let json = r#"{
            "type": "gazette",
            "document_links": "a.boletin-pdf",
            "max_pages": 5
        }"#;
        let strategy: ExtractionStrategy = serde_json::from_str(json).unwrap();
        match strategy {
            ExtractionStrategy::Gazette { max_pages, ref section_pattern, .. } => {
                assert_eq!(max_pages, 5);
                assert!(section_pattern.contains("licitaci"));
            }
            _ => panic!("wrong strategy"),
        }
    }
}
