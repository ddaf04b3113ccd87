//! Progress reporting for sync runs.
//!
//! Engine events become structured `tracing` events; the subscriber set up in
//! `main` decides where they go.

use std::sync::Arc;

use erpsync::sync::{ProgressCallback, RunStatus, SyncProgress};

/// Logging reporter using tracing for structured output.
pub struct LoggingReporter;

impl LoggingReporter {
    pub fn new() -> Self {
        Self
    }

    /// Wrap the reporter as an engine progress callback.
    pub fn into_callback(self) -> Arc<ProgressCallback> {
        let callback: ProgressCallback = Box::new(move |event| self.handle(event));
        Arc::new(callback)
    }

    pub fn handle(&self, event: SyncProgress) {
        match event {
            SyncProgress::CheckingConnectivity { system } => {
                tracing::debug!(system, "Checking connectivity");
            }

            SyncProgress::Connected { system } => {
                tracing::info!(system, "Connected");
            }

            SyncProgress::SyncingEntity { kind } => {
                tracing::info!(kind = %kind, "Syncing");
            }

            SyncProgress::FetchedPage {
                kind,
                page,
                count,
                total_so_far,
            } => {
                tracing::debug!(kind = %kind, page, count, total_so_far, "Fetched page");
            }

            SyncProgress::RecordSynced { kind, key, created } => {
                tracing::debug!(kind = %kind, key = %key, created, "Synced");
            }

            SyncProgress::RecordSkipped { kind, key, reason } => {
                tracing::info!(kind = %kind, key = %key, reason = %reason, "Skipped");
            }

            SyncProgress::RecordFailed { kind, key, error } => {
                tracing::error!(kind = %kind, key = %key, error = %error, "Record failed");
            }

            SyncProgress::StageKept {
                kind,
                key,
                current,
                derived,
            } => {
                tracing::info!(
                    kind = %kind,
                    key = %key,
                    current = %current,
                    derived = %derived,
                    "Kept CRM stage"
                );
            }

            SyncProgress::AmbiguousMatch {
                kind,
                key,
                matches,
                chosen_id,
            } => {
                tracing::warn!(
                    kind = %kind,
                    key = %key,
                    matches,
                    chosen_id = %chosen_id,
                    "Ambiguous external key"
                );
            }

            SyncProgress::AssociationFailed {
                from,
                to,
                key,
                error,
            } => {
                tracing::warn!(
                    from = %from,
                    to = %to,
                    key = %key,
                    error = %error,
                    "Association failed"
                );
            }

            SyncProgress::CatalogStubCreated { sku } => {
                tracing::info!(sku = %sku, "Created catalog stub");
            }

            SyncProgress::LineItemSkipped {
                kind,
                parent_key,
                reason,
            } => {
                tracing::warn!(kind = %kind, key = %parent_key, reason = %reason, "Skipped line");
            }

            SyncProgress::RetryBackoff {
                operation,
                retry_after_ms,
                attempt,
                error,
            } => {
                tracing::warn!(
                    operation = %operation,
                    retry_after_ms,
                    attempt,
                    error = %error,
                    "Retrying"
                );
            }

            SyncProgress::EntityComplete {
                kind,
                fetched,
                created,
                updated,
                skipped,
                errors,
            } => {
                tracing::info!(
                    kind = %kind,
                    fetched,
                    created,
                    updated,
                    skipped,
                    errors,
                    "Entity complete"
                );
            }

            SyncProgress::EntityFailed { kind, error } => {
                tracing::error!(kind = %kind, error = %error, "Entity failed");
            }

            SyncProgress::ShutdownRequested { kind } => {
                tracing::warn!(kind = %kind, "Stopped early on shutdown request");
            }

            SyncProgress::Warning { message } => {
                tracing::warn!(message = %message, "Warning");
            }

            SyncProgress::SyncComplete { status, errors } => match status {
                RunStatus::Success => tracing::info!(status = %status, "Sync complete"),
                _ => tracing::warn!(status = %status, errors, "Sync complete with errors"),
            },

            _ => {}
        }
    }
}

impl Default for LoggingReporter {
    fn default() -> Self {
        Self::new()
    }
}
