//! Per-migrator results and the aggregated run summary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RowError;

/// What happened to a single target record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new target document was created.
    Created(String),
    /// An existing document was updated in place.
    Updated(String),
    /// An existing document was found and reused without writing.
    Existing(String),
    /// The row produced nothing to write.
    Skipped(String),
}

impl WriteOutcome {
    /// Target identifier, if the outcome refers to a document.
    pub fn id(&self) -> Option<&str> {
        match self {
            WriteOutcome::Created(id) | WriteOutcome::Updated(id) | WriteOutcome::Existing(id) => {
                Some(id)
            }
            WriteOutcome::Skipped(_) => None,
        }
    }
}

/// A recorded failure, with enough context for manual remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordError {
    pub row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Outcome of migrating one target collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub collection: String,
    /// Rows reported by the source.
    pub total: usize,
    /// Rows actually looked at before finishing or aborting.
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub existing: usize,
    pub skipped: usize,
    /// Rows that failed. One row may carry several `errors` entries.
    pub failed: usize,
    pub errors: Vec<RecordError>,
    /// Set when the error ceiling stopped the migrator early.
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MigrationResult {
    pub fn new(collection: &str, total: usize) -> Self {
        Self {
            collection: collection.to_string(),
            total,
            processed: 0,
            created: 0,
            updated: 0,
            existing: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            aborted: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Count a per-row outcome.
    pub fn record(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Created(_) => self.created += 1,
            WriteOutcome::Updated(_) => self.updated += 1,
            WriteOutcome::Existing(_) => self.existing += 1,
            WriteOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    /// Count a failed row carrying one or more errors.
    pub fn fail(&mut self, row: usize, errors: Vec<RowError>, data: Option<Value>) {
        self.failed += 1;
        for e in errors {
            self.errors.push(RecordError {
                row,
                field: e.field,
                message: e.message,
                data: data.clone(),
            });
        }
    }

    /// Records that ended up present in the target.
    pub fn succeeded(&self) -> usize {
        self.created + self.updated + self.existing
    }

    /// False once the error ceiling has halted this migrator.
    pub fn is_success(&self) -> bool {
        !self.aborted
    }

    /// Share of processed rows that did not fail, in percent.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded() + self.failed;
        if attempted == 0 {
            100.0
        } else {
            self.succeeded() as f64 * 100.0 / attempted as f64
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Media counters accumulated by the transfer unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStats {
    /// Files uploaded to the target store.
    pub uploaded: u64,
    /// Uploads avoided because the filename was already mapped.
    pub reused: u64,
    /// Assets skipped after a soft failure.
    pub failed: u64,
    /// Served from the local download cache.
    pub cache_hits: u64,
    /// Bytes uploaded.
    pub bytes: u64,
}

/// Aggregate report for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationSummary {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub results: Vec<MigrationResult>,
    pub media: MediaStats,
    pub dry_run: bool,
}

impl MigrationSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            start_time: Utc::now(),
            end_time: None,
            results: Vec::new(),
            media: MediaStats::default(),
            dry_run,
        }
    }

    pub fn total_media_transferred(&self) -> u64 {
        self.media.uploaded
    }

    pub fn total_media_size_bytes(&self) -> u64 {
        self.media.bytes
    }

    pub fn total_failed(&self) -> usize {
        self.results.iter().map(|r| r.failed).sum()
    }

    pub fn total_succeeded(&self) -> usize {
        self.results.iter().map(|r| r.succeeded()).sum()
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn duration(&self) -> Duration {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_counts_and_rate() {
        let mut result = MigrationResult::new("music", 4);
        result.record(&WriteOutcome::Created("a".into()));
        result.record(&WriteOutcome::Existing("b".into()));
        result.record(&WriteOutcome::Skipped("no audio".into()));
        result.fail(
            3,
            vec![RowError::field("title", "required"), RowError::new("boom")],
            None,
        );

        assert_eq!(result.succeeded(), 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors.len(), 2);
        assert!((result.success_rate() - 66.666).abs() < 0.01);
        assert!(result.is_success());
    }

    #[test]
    fn test_empty_result_is_fully_successful() {
        let result = MigrationResult::new("frames", 0);
        assert_eq!(result.success_rate(), 100.0);
    }
}
