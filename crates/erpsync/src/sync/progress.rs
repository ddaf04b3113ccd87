//! Progress reporting types for sync runs.
//!
//! The engine never prints. It emits [`SyncProgress`] events through an
//! optional callback and the caller decides how to surface them.

use crate::entity::EntityKind;

use super::types::RunStatus;

/// Progress events emitted during a sync run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum SyncProgress {
    /// Probing an external system before any entity is processed.
    CheckingConnectivity {
        /// "ERP" or "CRM".
        system: &'static str,
    },

    /// The check succeeded.
    Connected { system: &'static str },

    /// Starting an entity kind.
    SyncingEntity { kind: EntityKind },

    /// Read a page of source records.
    FetchedPage {
        kind: EntityKind,
        /// Page number (1-indexed).
        page: u32,
        /// Records on this page.
        count: usize,
        /// Running total of records fetched for this kind.
        total_so_far: usize,
    },

    /// A record was written to the CRM.
    RecordSynced {
        kind: EntityKind,
        key: String,
        /// True if the record was created, false if an existing one was updated.
        created: bool,
    },

    /// A record was skipped without being written.
    RecordSkipped {
        kind: EntityKind,
        key: String,
        reason: String,
    },

    /// A record failed. Processing continues with the next one.
    RecordFailed {
        kind: EntityKind,
        key: String,
        error: String,
    },

    /// The stage guard kept the deal's current stage.
    StageKept {
        kind: EntityKind,
        key: String,
        current: String,
        derived: String,
    },

    /// More than one CRM record carries the same external key.
    AmbiguousMatch {
        kind: EntityKind,
        key: String,
        /// Number of matches returned.
        matches: usize,
        /// Id of the record that was used.
        chosen_id: String,
    },

    /// Linking two CRM records failed. The records themselves were written.
    AssociationFailed {
        from: EntityKind,
        to: EntityKind,
        key: String,
        error: String,
    },

    /// A catalog stub was created for a SKU only seen on a line item.
    CatalogStubCreated { sku: String },

    /// A line was skipped (no SKU, unusable key).
    LineItemSkipped {
        kind: EntityKind,
        parent_key: String,
        reason: String,
    },

    /// A call failed transiently and is being retried.
    RetryBackoff {
        /// Short description of the call ("create quote 5001").
        operation: String,
        retry_after_ms: u64,
        attempt: u32,
        error: String,
    },

    /// Finished an entity kind.
    EntityComplete {
        kind: EntityKind,
        fetched: usize,
        created: usize,
        updated: usize,
        skipped: usize,
        errors: usize,
    },

    /// An entity kind could not be processed at all.
    EntityFailed { kind: EntityKind, error: String },

    /// Stopping early because shutdown was requested.
    ShutdownRequested { kind: EntityKind },

    /// Non-fatal warning message.
    Warning { message: String },

    /// The run finished.
    SyncComplete {
        status: RunStatus,
        errors: usize,
    },
}

/// Callback type for progress reporting.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Helper to emit progress events if a callback is provided.
#[inline]
pub fn emit(callback: Option<&ProgressCallback>, event: SyncProgress) {
    if let Some(cb) = callback {
        cb(event);
    }
}
