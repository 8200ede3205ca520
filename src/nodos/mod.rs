//! Nodo matching.
//!
//! A nodo's keywords are compiled into accent- and stem-tolerant patterns:
//! "Fibra Óptica" must match "FIBRA OPTICA monomodo" and "fibras opticas"
//! as published by careless portals. Compiled patterns are cached under a
//! content hash of the keyword list, so editing a group invalidates its
//! cache entry instead of recompiling on every match.
//!
//! Assignment is additive only. Matching never removes a membership, and a
//! record may belong to groups from independent taxonomies at once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::models::{Nodo, TenderRecord};

/// Bounded description window; matching boilerplate footers helps nobody.
const DESCRIPTION_WINDOW: usize = 500;

/// Suffixes stripped from keyword tokens before pattern construction.
/// Ordered longest first so "instalaciones" loses "ciones" before "es".
const STEM_SUFFIXES: &[&str] = &["ciones", "cion", "es", "s"];

/// Minimum stem length; below this stripping stops.
const MIN_STEM: usize = 3;

/// Fold one lowercase char into an accent-tolerant character class.
fn accent_class(ch: char) -> Option<&'static str> {
    match ch {
        'a' | 'á' => Some("[aá]"),
        'e' | 'é' => Some("[eé]"),
        'i' | 'í' => Some("[ií]"),
        'o' | 'ó' => Some("[oó]"),
        'u' | 'ú' | 'ü' => Some("[uúü]"),
        'n' | 'ñ' => Some("[nñ]"),
        _ => None,
    }
}

/// Strip punctuation, keeping letters, digits and whitespace.
fn strip_punctuation(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect()
}

/// Reduce a token to its stem per the suffix table.
fn stem(token: &str) -> String {
    let lower = token.to_lowercase();
    for suffix in STEM_SUFFIXES {
        if let Some(stripped) = lower.strip_suffix(suffix) {
            if stripped.chars().count() >= MIN_STEM {
                return stripped.to_string();
            }
        }
    }
    lower
}

/// Compile one keyword into a tolerant pattern. Returns None for keywords
/// that normalize to nothing.
pub fn compile_keyword(keyword: &str) -> Option<Regex> {
    let cleaned = strip_punctuation(keyword);
    let tokens: Vec<String> = cleaned.split_whitespace().map(stem).collect();
    if tokens.is_empty() {
        return None;
    }

    let token_patterns: Vec<String> = tokens
        .iter()
        .map(|token| {
            let mut pattern = String::new();
            for ch in token.chars() {
                match accent_class(ch) {
                    Some(class) => pattern.push_str(class),
                    None => pattern.push_str(&regex::escape(&ch.to_string())),
                }
            }
            // Tolerate plural/derived forms of each token.
            pattern.push_str("(?:[a-záéíóú]{0,4})?");
            pattern
        })
        .collect();

    // Flexible inter-word spacing: whitespace, hyphens, slashes.
    let joined = token_patterns.join(r"[\s\-/]+");
    Regex::new(&format!(r"(?i)\b{joined}")).ok()
}

struct CachedPatterns {
    keywords_hash: String,
    patterns: Arc<Vec<Regex>>,
}

/// Matcher with a per-nodo compiled-pattern cache.
#[derive(Default)]
pub struct NodoMatcher {
    cache: Mutex<HashMap<String, CachedPatterns>>,
}

impl NodoMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cache entry for a group, forcing recompilation. Called on
    /// keyword edits.
    pub fn invalidate(&self, nodo_id: &str) {
        self.cache.lock().expect("matcher cache poisoned").remove(nodo_id);
    }

    fn patterns_for(&self, nodo: &Nodo) -> Arc<Vec<Regex>> {
        let hash = nodo.keywords_hash();
        let mut cache = self.cache.lock().expect("matcher cache poisoned");
        if let Some(cached) = cache.get(&nodo.id) {
            if cached.keywords_hash == hash {
                return cached.patterns.clone();
            }
        }
        let patterns: Arc<Vec<Regex>> = Arc::new(
            nodo.keywords
                .iter()
                .filter_map(|keyword| compile_keyword(keyword))
                .collect(),
        );
        cache.insert(
            nodo.id.clone(),
            CachedPatterns {
                keywords_hash: hash,
                patterns: patterns.clone(),
            },
        );
        patterns
    }

    /// Whether a record's matched-text fields hit any keyword of `nodo`.
    pub fn matches(&self, nodo: &Nodo, record: &TenderRecord) -> bool {
        if !nodo.active {
            return false;
        }
        let haystack = match_text(record);
        self.patterns_for(nodo)
            .iter()
            .any(|pattern| pattern.is_match(&haystack))
    }

    /// Match a record against every group, adding memberships. Returns the
    /// number of newly added memberships. Existing tags are never removed.
    pub fn match_record(&self, nodos: &[Nodo], record: &mut TenderRecord) -> usize {
        let matched: Vec<String> = nodos
            .iter()
            .filter(|nodo| self.matches(nodo, record))
            .map(|nodo| nodo.id.clone())
            .collect();
        record.add_nodos(matched)
    }
}

/// The text a nodo is matched against: title, objeto, a bounded window of
/// description, and organization.
fn match_text(record: &TenderRecord) -> String {
    let mut text = record.title.clone();
    if let Some(objeto) = &record.objeto {
        text.push('\n');
        text.push_str(objeto);
    }
    if let Some(description) = &record.description {
        text.push('\n');
        text.extend(description.chars().take(DESCRIPTION_WINDOW));
    }
    if let Some(organization) = &record.organization {
        text.push('\n');
        text.push_str(organization);
    }
    text
}
