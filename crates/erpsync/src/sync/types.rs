//! Sync options, per-record outcomes and run statistics.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::SyncError;
use crate::record::SourceRecord;
use crate::retry::RetryConfig;

/// Default number of records of one kind processed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of source records requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default retries for a single external call.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Options for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum records of one kind in flight at once.
    pub concurrency: usize,
    /// Source records requested per page.
    pub page_size: usize,
    /// Retry policy for every external call.
    pub retry: RetryConfig,
    /// Entity kinds to run. Kinds not listed are skipped entirely.
    pub enabled: BTreeSet<EntityKind>,
    /// OData `$filter` expression per kind.
    pub filters: HashMap<EntityKind, String>,
    /// Attach the source record to failed-record entries.
    pub include_source_in_report: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryConfig::default(),
            enabled: EntityKind::SYNC_ORDER.into_iter().collect(),
            filters: HashMap::new(),
            include_source_in_report: true,
        }
    }
}

impl SyncOptions {
    #[must_use]
    pub fn is_enabled(&self, kind: EntityKind) -> bool {
        self.enabled.contains(&kind)
    }

    #[must_use]
    pub fn filter(&self, kind: EntityKind) -> Option<&str> {
        self.filters
            .get(&kind)
            .map(String::as_str)
            .filter(|f| !f.trim().is_empty())
    }
}

/// What happened to one source record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Skipped { reason: String },
    Error { detail: String },
}

/// A record that needs a human to look at it, with enough context to re-run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRecord {
    pub kind: EntityKind,
    /// External key, or a placeholder when the key itself was unreadable.
    pub key: String,
    /// Step that failed ("resolve", "write", "associate", "line_item").
    pub operation: String,
    /// Error classification (see `SyncError::error_type`).
    pub error_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRecord>,
    pub failed_at: DateTime<Utc>,
}

impl FailedRecord {
    pub fn new(kind: EntityKind, key: impl Into<String>, operation: &str, error: &SyncError) -> Self {
        Self {
            kind,
            key: key.into(),
            operation: operation.to_string(),
            error_type: error.error_type().to_string(),
            message: error.to_string(),
            source: None,
            failed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Option<SourceRecord>) -> Self {
        self.source = source;
        self
    }
}

/// Line item reconciliation counts for one parent record or a whole kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    /// Catalog stubs created for SKUs missing from the CRM.
    pub catalog_items_created: usize,
}

impl LineItemStats {
    pub fn merge(&mut self, other: &LineItemStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
        self.catalog_items_created += other.catalog_items_created;
    }
}

/// Everything processing one record produced, folded into [`SyncStats`].
#[derive(Debug, Clone)]
pub struct RecordResult {
    pub key: String,
    pub outcome: SyncOutcome,
    pub warnings: usize,
    pub lines: LineItemStats,
    /// Failures worth reporting: the record's own error, association errors,
    /// line item errors.
    pub failures: Vec<FailedRecord>,
}

impl RecordResult {
    pub fn new(key: impl Into<String>, outcome: SyncOutcome) -> Self {
        Self {
            key: key.into(),
            outcome,
            warnings: 0,
            lines: LineItemStats::default(),
            failures: Vec::new(),
        }
    }
}

/// Whether an entity kind ran to the end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntityStatus {
    Completed,
    /// The kind could not be processed (source read failed, run interrupted).
    Failed { message: String },
    /// Disabled by configuration.
    Skipped,
}

/// Statistics for one entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStats {
    pub kind: EntityKind,
    pub status: EntityStatus,
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Records whose create/update did not go through.
    pub errors: usize,
    /// Ambiguous matches and other recoverable oddities.
    pub warnings: usize,
    /// Associations that could not be created.
    pub association_errors: usize,
    pub line_items: LineItemStats,
    #[serde(skip)]
    pub failed_records: Vec<FailedRecord>,
}

impl SyncStats {
    #[must_use]
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            status: EntityStatus::Completed,
            fetched: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            errors: 0,
            warnings: 0,
            association_errors: 0,
            line_items: LineItemStats::default(),
            failed_records: Vec::new(),
        }
    }

    #[must_use]
    pub fn skipped_kind(kind: EntityKind) -> Self {
        Self {
            status: EntityStatus::Skipped,
            ..Self::new(kind)
        }
    }

    /// Fold one record's result into the totals.
    pub fn record(&mut self, result: RecordResult) {
        match result.outcome {
            SyncOutcome::Created => self.created += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Skipped { .. } => self.skipped += 1,
            SyncOutcome::Error { .. } => self.errors += 1,
        }
        self.warnings += result.warnings;
        self.association_errors += result
            .failures
            .iter()
            .filter(|f| f.error_type == "association")
            .count();
        self.line_items.merge(&result.lines);
        self.failed_records.extend(result.failures);
    }

    /// Mark the kind failed as a whole.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = EntityStatus::Failed {
            message: message.into(),
        };
    }

    /// All errors of any subtype.
    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.errors + self.association_errors + self.line_items.errors
    }

    /// Completed (or disabled) with nothing to report.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !matches!(self.status, EntityStatus::Failed { .. }) && self.total_errors() == 0
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every kind completed with zero errors.
    Success,
    /// At least one kind failed or had errors.
    Partial,
    /// Nothing was processed (connectivity failure).
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a full run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub status: RunStatus,
    pub entities: Vec<SyncStats>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Why the run failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    /// Stats for one kind, if it was part of the run.
    #[must_use]
    pub fn stats(&self, kind: EntityKind) -> Option<&SyncStats> {
        self.entities.iter().find(|s| s.kind == kind)
    }

    #[must_use]
    pub fn total_errors(&self) -> usize {
        self.entities.iter().map(SyncStats::total_errors).sum()
    }

    /// Every failed record across all kinds, in processing order.
    pub fn failed_records(&self) -> impl Iterator<Item = &FailedRecord> {
        self.entities.iter().flat_map(|s| s.failed_records.iter())
    }

    /// Derive the run status from per-kind stats.
    #[must_use]
    pub fn status_of(entities: &[SyncStats]) -> RunStatus {
        if entities.iter().all(SyncStats::is_clean) {
            RunStatus::Success
        } else {
            RunStatus::Partial
        }
    }
}
