//! Scrape run model.
//!
//! One ScrapeRun tracks a single execution against a single source: item
//! counts, per-item errors, and timing. Runs that crash mid-execution are
//! left `running` and reaped by the scheduler's periodic sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Orphaned,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Orphaned => "orphaned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "orphaned" => Some(Self::Orphaned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub found: u32,
    pub saved: u32,
    pub updated: u32,
    pub duplicates: u32,
}

/// One item that failed during a run. Failures are recorded and skipped;
/// a bad item never aborts the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunItemError {
    pub item: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: String,
    pub source_id: String,
    pub status: RunStatus,
    pub counts: RunCounts,
    #[serde(default)]
    pub errors: Vec<RunItemError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScrapeRun {
    pub fn start(source_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_id: source_id.into(),
            status: RunStatus::Running,
            counts: RunCounts::default(),
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn record_error(&mut self, item: impl Into<String>, message: impl Into<String>) {
        self.errors.push(RunItemError {
            item: item.into(),
            message: message.into(),
        });
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.finished_at.map(|end| {
            end.signed_duration_since(self.started_at)
                .num_milliseconds() as f64
                / 1000.0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let mut run = ScrapeRun::start("mendoza");
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.duration_secs().is_none());

        run.counts.found = 10;
        run.record_error("row 3", "missing title");
        run.finish(RunStatus::Completed);

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.errors.len(), 1);
        assert!(run.duration_secs().unwrap() >= 0.0);
    }
}
