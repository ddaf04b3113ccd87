//! Full run: connectivity check, then every enabled kind in dependency order.

use std::sync::Arc;

use chrono::Utc;

use crate::destination::DestinationClient;
use crate::entity::EntityKind;
use crate::error::{ClientError, SyncError, short_error_message};
use crate::retry::{RetryConfig, with_retry};
use crate::source::SourceReader;

use super::engine::Engine;
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{RunStatus, SyncOptions, SyncReport, SyncStats};

pub const SOURCE_SYSTEM: &str = "ERP";
pub const DESTINATION_SYSTEM: &str = "CRM";

/// Ping both systems. Transient failures are retried before giving up.
pub async fn check_connectivity(
    source: &dyn SourceReader,
    destination: &dyn DestinationClient,
    retry: &RetryConfig,
    on_progress: Option<&ProgressCallback>,
) -> Result<(), SyncError> {
    emit(
        on_progress,
        SyncProgress::CheckingConnectivity {
            system: SOURCE_SYSTEM,
        },
    );
    ping(SOURCE_SYSTEM, || source.ping(), retry, on_progress).await?;
    emit(
        on_progress,
        SyncProgress::Connected {
            system: SOURCE_SYSTEM,
        },
    );

    emit(
        on_progress,
        SyncProgress::CheckingConnectivity {
            system: DESTINATION_SYSTEM,
        },
    );
    ping(DESTINATION_SYSTEM, || destination.ping(), retry, on_progress).await?;
    emit(
        on_progress,
        SyncProgress::Connected {
            system: DESTINATION_SYSTEM,
        },
    );

    Ok(())
}

async fn ping<F, Fut>(
    system: &'static str,
    op: F,
    retry: &RetryConfig,
    on_progress: Option<&ProgressCallback>,
) -> Result<(), SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ClientError>>,
{
    let label = format!("ping {system}");
    with_retry(
        retry,
        op,
        ClientError::is_transient,
        short_error_message,
        &label,
        on_progress,
    )
    .await
    .map_err(|source| SyncError::Connectivity { system, source })
}

/// Enabled kinds whose association targets are not part of this run.
fn unmet_dependencies(options: &SyncOptions) -> Vec<(EntityKind, EntityKind)> {
    const DEPENDS_ON: [(EntityKind, EntityKind); 3] = [
        (EntityKind::Contact, EntityKind::Account),
        (EntityKind::Quote, EntityKind::Account),
        (EntityKind::Order, EntityKind::Account),
    ];
    DEPENDS_ON
        .into_iter()
        .filter(|(kind, needs)| options.is_enabled(*kind) && !options.is_enabled(*needs))
        .collect()
}

/// Run every enabled kind in order and build the report.
#[tracing::instrument(skip(engine))]
pub(crate) async fn run(engine: Arc<Engine>) -> SyncReport {
    let started_at = Utc::now();
    let on_progress = engine.on_progress();

    if let Err(e) = check_connectivity(
        engine.source.as_ref(),
        engine.destination.as_ref(),
        &engine.options.retry,
        on_progress,
    )
    .await
    {
        tracing::error!(error = %e, "Connectivity check failed, nothing synced");
        emit(
            on_progress,
            SyncProgress::SyncComplete {
                status: RunStatus::Failed,
                errors: 0,
            },
        );
        return SyncReport {
            status: RunStatus::Failed,
            entities: Vec::new(),
            started_at,
            finished_at: Utc::now(),
            error: Some(e.to_string()),
        };
    }

    for (kind, needs) in unmet_dependencies(&engine.options) {
        tracing::warn!(kind = %kind, needs = %needs, "Dependency disabled for this run");
        emit(
            on_progress,
            SyncProgress::Warning {
                message: format!(
                    "{kind} enabled without {needs}: associations only reach {needs} records already in the CRM"
                ),
            },
        );
    }

    let mut entities = Vec::with_capacity(EntityKind::SYNC_ORDER.len());
    for kind in EntityKind::SYNC_ORDER {
        if !engine.options.is_enabled(kind) {
            tracing::info!(kind = %kind, "Disabled, skipping");
            entities.push(SyncStats::skipped_kind(kind));
            continue;
        }
        entities.push(engine.sync_kind(kind).await);
    }

    let status = SyncReport::status_of(&entities);
    let report = SyncReport {
        status,
        entities,
        started_at,
        finished_at: Utc::now(),
        error: None,
    };

    emit(
        on_progress,
        SyncProgress::SyncComplete {
            status,
            errors: report.total_errors(),
        },
    );
    tracing::info!(
        status = %status,
        errors = report.total_errors(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Sync finished"
    );

    report
}
