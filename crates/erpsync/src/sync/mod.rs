//! ERP to CRM sync pipeline.
//!
//! # Module Structure
//!
//! - [`types`] - Options, per-record outcomes, per-kind stats and the run report
//! - [`progress`] - Progress reporting: `SyncProgress`, `ProgressCallback`, `emit()`
//! - `engine` - Per-kind syncer: paging, bounded parallelism, per-record steps
//! - `line_items` - Line item and catalog stub reconciliation
//! - `orchestrator` - Connectivity check and the ordered full run
//! - [`context`] - `SyncContext` builder, the entry point for callers
//!
//! # Example
//!
//! ```ignore
//! use erpsync::sync::{SyncContext, SyncOptions, RunStatus};
//!
//! let ctx = SyncContext::builder()
//!     .source(source)
//!     .destination(destination)
//!     .options(SyncOptions::default())
//!     .build()?;
//! let report = ctx.run().await;
//! assert_eq!(report.status, RunStatus::Success);
//! ```

pub mod context;
mod engine;
mod line_items;
mod orchestrator;
pub mod progress;
pub mod types;

pub use context::{SyncContext, SyncContextBuilder, SyncContextError};
pub use engine::record_key;
pub use line_items::{LineItemReconciler, LineItemReport, ParentDeal};
pub use orchestrator::{DESTINATION_SYSTEM, SOURCE_SYSTEM, check_connectivity};

// Re-export types
pub use types::{
    EntityStatus, FailedRecord, LineItemStats, RecordResult, RunStatus, SyncOptions, SyncOutcome,
    SyncReport, SyncStats,
};

// Re-export constants
pub use types::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DEFAULT_PAGE_SIZE, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
};

// Re-export progress types
pub use progress::{ProgressCallback, SyncProgress, emit};
