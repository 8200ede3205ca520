//! Date resolution with ordered fallbacks.
//!
//! Publication and opening dates arrive in wildly inconsistent shapes:
//! explicit fields, dates buried in titles ("Licitación 123/2024"),
//! free-text Spanish dates, or nothing at all. Resolution walks an ordered
//! strategy chain and stops at the first success. A field that cannot be
//! resolved stays null; a wrong-but-plausible-looking date is worse than a
//! visibly missing one, so "now" is never used as a default.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;

use crate::models::AttachedFile;

/// Which strategy produced a resolved date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateOrigin {
    Explicit,
    Title,
    Description,
    Counterpart,
    Attachment,
}

impl DateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Title => "title",
            Self::Description => "description",
            Self::Counterpart => "counterpart",
            Self::Attachment => "attachment",
        }
    }
}

/// A resolved date plus provenance. `estimated` marks values inferred from
/// the counterpart date rather than read from the source.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    pub origin: DateOrigin,
    pub estimated: bool,
}

/// Assumed gap between publication and opening when estimating one from
/// the other.
const COUNTERPART_GAP_DAYS: i64 = 30;

/// Plausible-year window, relative to the current year.
const YEARS_BACK: i32 = 6;
const YEARS_FORWARD: i32 = 2;

/// Whether a date falls in the plausible multi-year window.
pub fn is_plausible(date: NaiveDate) -> bool {
    let year = Utc::now().year();
    date.year() >= year - YEARS_BACK && date.year() <= year + YEARS_FORWARD
}

static TEXT_DATE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // ISO: 2024-03-15
        (Regex::new(r"(\d{4})-(\d{2})-(\d{2})").unwrap(), "ymd"),
        // Latin-American: 15/03/2024, 15-03-2024, 1/3/2024
        (Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4})\b").unwrap(), "dmy"),
        // Written out: "15 de marzo de 2024"
        (
            Regex::new(r"(?i)\b(\d{1,2})\s+de\s+([a-záéíóú]+)\s+(?:de\s+)?(\d{4})\b").unwrap(),
            "spanish",
        ),
    ]
});

/// Expediente/decree convention: "123/2024", "Decreto 4581/2023". Yields a
/// year only; the date is pinned to January 1st of that year.
static EXPEDIENTE_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,6}/(\d{4})\b").unwrap());

const SPANISH_MONTHS: &[(&str, u32)] = &[
    ("enero", 1),
    ("febrero", 2),
    ("marzo", 3),
    ("abril", 4),
    ("mayo", 5),
    ("junio", 6),
    ("julio", 7),
    ("agosto", 8),
    ("septiembre", 9),
    ("setiembre", 9),
    ("octubre", 10),
    ("noviembre", 11),
    ("diciembre", 12),
];

fn month_number(name: &str) -> Option<u32> {
    let folded = name.to_lowercase();
    let folded = folded
        .replace('á', "a")
        .replace('é', "e")
        .replace('í', "i")
        .replace('ó', "o")
        .replace('ú', "u");
    SPANISH_MONTHS
        .iter()
        .find(|(n, _)| *n == folded)
        .map(|(_, m)| *m)
}

/// Extract the first plausible full date from free text.
pub fn date_from_text(text: &str) -> Option<NaiveDate> {
    for (pattern, format) in TEXT_DATE_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let date = match *format {
                "ymd" => NaiveDate::from_ymd_opt(
                    caps.get(1)?.as_str().parse().ok()?,
                    caps.get(2)?.as_str().parse().ok()?,
                    caps.get(3)?.as_str().parse().ok()?,
                ),
                "dmy" => NaiveDate::from_ymd_opt(
                    caps.get(3)?.as_str().parse().ok()?,
                    caps.get(2)?.as_str().parse().ok()?,
                    caps.get(1)?.as_str().parse().ok()?,
                ),
                "spanish" => {
                    let month = month_number(caps.get(2)?.as_str())?;
                    NaiveDate::from_ymd_opt(
                        caps.get(3)?.as_str().parse().ok()?,
                        month,
                        caps.get(1)?.as_str().parse().ok()?,
                    )
                }
                _ => None,
            };
            if let Some(date) = date {
                if is_plausible(date) {
                    return Some(date);
                }
            }
        }
    }
    None
}

/// Extract a date-bearing token from a title. Full dates win; otherwise an
/// expediente-style year yields January 1st of that year.
pub fn date_from_title(title: &str) -> Option<NaiveDate> {
    if let Some(date) = date_from_text(title) {
        return Some(date);
    }
    for caps in EXPEDIENTE_YEAR.captures_iter(title) {
        let year: i32 = caps.get(1)?.as_str().parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            if is_plausible(date) {
                return Some(date);
            }
        }
    }
    None
}

fn date_from_attachments(attachments: &[AttachedFile]) -> Option<NaiveDate> {
    attachments
        .iter()
        .find_map(|file| date_from_text(&file.title).or_else(|| date_from_text(&file.url)))
}

/// Resolve a publication date through the fallback chain.
pub fn resolve_publication_date(
    parsed: Option<NaiveDate>,
    title: &str,
    description: Option<&str>,
    opening_date: Option<NaiveDate>,
    attachments: &[AttachedFile],
) -> Option<ResolvedDate> {
    resolve_chain(parsed, title, description, opening_date, attachments, -COUNTERPART_GAP_DAYS)
}

/// Resolve an opening date through the same chain, estimating forward from
/// publication when that is all we have.
pub fn resolve_opening_date(
    parsed: Option<NaiveDate>,
    title: &str,
    description: Option<&str>,
    publication_date: Option<NaiveDate>,
    attachments: &[AttachedFile],
) -> Option<ResolvedDate> {
    resolve_chain(parsed, title, description, publication_date, attachments, COUNTERPART_GAP_DAYS)
}

fn resolve_chain(
    parsed: Option<NaiveDate>,
    title: &str,
    description: Option<&str>,
    counterpart: Option<NaiveDate>,
    attachments: &[AttachedFile],
    counterpart_offset_days: i64,
) -> Option<ResolvedDate> {
    type Strategy<'a> = Box<dyn Fn() -> Option<ResolvedDate> + 'a>;

    let strategies: Vec<Strategy> = vec![
        Box::new(move || {
            parsed.filter(|d| is_plausible(*d)).map(|date| ResolvedDate {
                date,
                origin: DateOrigin::Explicit,
                estimated: false,
            })
        }),
        Box::new(move || {
            date_from_title(title).map(|date| ResolvedDate {
                date,
                origin: DateOrigin::Title,
                estimated: false,
            })
        }),
        Box::new(move || {
            description.and_then(date_from_text).map(|date| ResolvedDate {
                date,
                origin: DateOrigin::Description,
                estimated: false,
            })
        }),
        Box::new(move || {
            counterpart.map(|other| ResolvedDate {
                date: other + Duration::days(counterpart_offset_days),
                origin: DateOrigin::Counterpart,
                estimated: true,
            })
        }),
        Box::new(move || {
            date_from_attachments(attachments).map(|date| ResolvedDate {
                date,
                origin: DateOrigin::Attachment,
                estimated: false,
            })
        }),
    ];

    strategies.iter().find_map(|strategy| strategy())
}

/// What the cross-field validator did about a chronological conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChronologyFix {
    /// Publication was re-estimated as opening minus the standard gap.
    EstimatedPublication,
    /// No safe inference existed; the publication date was nulled.
    NulledPublication,
}

/// Enforce `opening_date >= publication_date`. The opening date is what the
/// source operationally commits to, so on conflict the publication side is
/// corrected by the estimation rule, or nulled when no opening date exists
/// to estimate from. The contradiction is never stored as-is.
pub fn validate_chronology(
    publication: Option<NaiveDate>,
    opening: Option<NaiveDate>,
) -> (Option<NaiveDate>, Option<NaiveDate>, Option<ChronologyFix>) {
    match (publication, opening) {
        (Some(publication_date), Some(opening_date)) if opening_date < publication_date => {
            let estimated = opening_date - Duration::days(COUNTERPART_GAP_DAYS);
            if is_plausible(estimated) {
                (Some(estimated), Some(opening_date), Some(ChronologyFix::EstimatedPublication))
            } else {
                (None, Some(opening_date), Some(ChronologyFix::NulledPublication))
            }
        }
        other => (other.0, other.1, None),
    }
}
