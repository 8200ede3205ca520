//! Nodo (keyword group) model.
//!
//! A nodo is a named semantic group defined by a keyword list. Tenders that
//! match any keyword are tagged with the nodo id. Membership is additive
//! and orthogonal to the fixed category taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nodo {
    pub id: String,
    pub name: String,
    pub keywords: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Nodo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, keywords: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            keywords,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Content hash of the keyword list. The matcher caches compiled
    /// patterns under this key so an edit invalidates the cache entry.
    pub fn keywords_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for keyword in &self.keywords {
            hasher.update(keyword.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        self.keywords = keywords;
        self.updated_at = Utc::now();
    }
}
