//! Per-kind sync: page through the ERP, process records with bounded
//! parallelism, fold outcomes into [`SyncStats`].
//!
//! Records are independent. Whatever goes wrong with one record is classified,
//! logged with its kind and key, added to the failed-record list and the run
//! moves on. Outcomes come back from the record tasks as values; the syncer is
//! the only place they are counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;

use crate::destination::DestinationClient;
use crate::entity::{AssociationType, EntityKind};
use crate::error::{SyncError, TransformError};
use crate::record::SourceRecord;
use crate::resolver::Resolver;
use crate::source::{RecordPager, SourceReader};
use crate::stage::{KeepReason, ORDER_STAGES, OrderFlags, QUOTE_STAGES, QuoteFlags, StageDecision};
use crate::transform::{self, TransformContext};

use super::line_items::{LineItemReconciler, ParentDeal};
use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{
    EntityStatus, FailedRecord, RecordResult, SyncOptions, SyncOutcome, SyncStats,
};

/// Key used in reports when a record's own key could not be read.
const UNKNOWN_KEY: &str = "unknown";

/// A failed step of one record.
#[derive(Debug)]
struct StepError {
    operation: &'static str,
    error: SyncError,
}

/// Tag an error with the step it came from.
fn step<E: Into<SyncError>>(operation: &'static str) -> impl FnOnce(E) -> StepError {
    move |e| StepError {
        operation,
        error: e.into(),
    }
}

/// External key of a top-level record.
pub fn record_key(kind: EntityKind, record: &SourceRecord) -> Result<String, TransformError> {
    match kind {
        EntityKind::Part => transform::part_key(record),
        EntityKind::Account => transform::account_key(record),
        EntityKind::Contact => transform::contact_key(record),
        EntityKind::Quote => transform::quote_key(record),
        EntityKind::Order => transform::order_key(record),
        EntityKind::QuoteLine | EntityKind::OrderLine => {
            transform::line_item_key(kind, record, None)
        }
    }
}

/// Everything one run shares between record tasks.
pub(crate) struct Engine {
    pub(crate) source: Arc<dyn SourceReader>,
    pub(crate) destination: Arc<dyn DestinationClient>,
    pub(crate) resolver: Resolver,
    pub(crate) lines: LineItemReconciler,
    pub(crate) transform: TransformContext,
    pub(crate) options: SyncOptions,
    pub(crate) progress: Option<Arc<ProgressCallback>>,
    pub(crate) shutdown: Option<Arc<AtomicBool>>,
}

impl Engine {
    pub(crate) fn new(
        source: Arc<dyn SourceReader>,
        destination: Arc<dyn DestinationClient>,
        options: SyncOptions,
        transform: TransformContext,
        progress: Option<Arc<ProgressCallback>>,
        shutdown: Option<Arc<AtomicBool>>,
    ) -> Self {
        Self {
            resolver: Resolver::new(Arc::clone(&destination), options.retry.clone()),
            lines: LineItemReconciler::new(options.include_source_in_report),
            source,
            destination,
            transform,
            options,
            progress,
            shutdown,
        }
    }

    #[inline]
    pub(crate) fn on_progress(&self) -> Option<&ProgressCallback> {
        self.progress.as_deref()
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Sync every source record of one kind.
    ///
    /// A failed source read marks the kind failed and keeps what was already
    /// processed. Shutdown stops new records from starting; records in flight
    /// finish.
    #[tracing::instrument(skip(self, kind), fields(kind = %kind))]
    pub(crate) async fn sync_kind(self: &Arc<Self>, kind: EntityKind) -> SyncStats {
        let on_progress = self.on_progress();
        let mut stats = SyncStats::new(kind);
        emit(on_progress, SyncProgress::SyncingEntity { kind });
        tracing::info!(kind = %kind, "Syncing");

        let mut pager = RecordPager::new(self.source.as_ref(), kind, self.options.page_size)
            .with_filter(self.options.filter(kind))
            .with_retry(self.options.retry.clone());
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        'pages: loop {
            if self.shutdown_requested() {
                self.interrupt(&mut stats);
                break;
            }

            let page = match pager.next_page(on_progress).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    let error = SyncError::SourceRead { kind, source: e };
                    tracing::error!(kind = %kind, error = %error, "Source read failed");
                    emit(
                        on_progress,
                        SyncProgress::EntityFailed {
                            kind,
                            error: error.to_string(),
                        },
                    );
                    stats.fail(error.to_string());
                    break;
                }
            };
            stats.fetched += page.len();

            let mut handles = Vec::with_capacity(page.len());
            let mut records = page.into_iter();
            while let Some(record) = records.next() {
                if self.shutdown_requested() {
                    let remaining = std::iter::once(record).chain(records.by_ref());
                    self.skip_records(kind, remaining, &mut stats);
                    break;
                }

                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let error = SyncError::internal("Semaphore closed unexpectedly");
                        stats.fail(error.to_string());
                        break 'pages;
                    }
                };

                let engine = Arc::clone(self);
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    engine.sync_record(kind, record).await
                }));
            }

            for handle in handles {
                match handle.await {
                    Ok(result) => stats.record(result),
                    Err(e) => {
                        let error = SyncError::internal(format!("Task panic: {e}"));
                        tracing::error!(kind = %kind, error = %error, "Record task failed");
                        let mut result = RecordResult::new(
                            UNKNOWN_KEY,
                            SyncOutcome::Error {
                                detail: error.to_string(),
                            },
                        );
                        result
                            .failures
                            .push(FailedRecord::new(kind, UNKNOWN_KEY, "task", &error));
                        stats.record(result);
                    }
                }
            }
        }

        emit(
            on_progress,
            SyncProgress::EntityComplete {
                kind,
                fetched: stats.fetched,
                created: stats.created,
                updated: stats.updated,
                skipped: stats.skipped,
                errors: stats.total_errors(),
            },
        );
        tracing::info!(
            kind = %kind,
            fetched = stats.fetched,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            errors = stats.errors,
            association_errors = stats.association_errors,
            line_items_created = stats.line_items.created,
            catalog_items_created = stats.line_items.catalog_items_created,
            "Finished"
        );

        stats
    }

    fn interrupt(&self, stats: &mut SyncStats) {
        if !matches!(stats.status, EntityStatus::Failed { .. }) {
            tracing::warn!(kind = %stats.kind, "Shutdown requested, not starting new records");
            emit(
                self.on_progress(),
                SyncProgress::ShutdownRequested { kind: stats.kind },
            );
            stats.fail("interrupted by shutdown");
        }
    }

    fn skip_records(
        &self,
        kind: EntityKind,
        records: impl Iterator<Item = SourceRecord>,
        stats: &mut SyncStats,
    ) {
        for record in records {
            let key = record_key(kind, &record).unwrap_or_else(|_| UNKNOWN_KEY.to_string());
            emit(
                self.on_progress(),
                SyncProgress::RecordSkipped {
                    kind,
                    key: key.clone(),
                    reason: "shutdown requested".to_string(),
                },
            );
            stats.record(RecordResult::new(
                key,
                SyncOutcome::Skipped {
                    reason: "shutdown requested".to_string(),
                },
            ));
        }
        self.interrupt(stats);
    }

    /// Process one record end to end. Never fails; errors become the outcome.
    pub(crate) async fn sync_record(&self, kind: EntityKind, record: SourceRecord) -> RecordResult {
        let key = match record_key(kind, &record) {
            Ok(key) => key,
            Err(e) => return self.record_failure(kind, UNKNOWN_KEY, step("key")(e), &record),
        };

        let outcome = if kind.is_deal() {
            self.sync_deal(kind, &key, &record).await
        } else {
            self.sync_simple(kind, &key, &record).await
        };

        match outcome {
            Ok(result) => {
                let created = result.outcome == SyncOutcome::Created;
                tracing::debug!(
                    kind = %kind,
                    key = %key,
                    created,
                    warnings = result.warnings,
                    "Record synced"
                );
                emit(
                    self.on_progress(),
                    SyncProgress::RecordSynced { kind, key, created },
                );
                result
            }
            Err(failure) => self.record_failure(kind, &key, failure, &record),
        }
    }

    fn record_failure(
        &self,
        kind: EntityKind,
        key: &str,
        failure: StepError,
        record: &SourceRecord,
    ) -> RecordResult {
        let StepError { operation, error } = failure;
        tracing::error!(
            kind = %kind,
            key,
            operation,
            error_type = error.error_type(),
            error = %error,
            "Record failed"
        );
        emit(
            self.on_progress(),
            SyncProgress::RecordFailed {
                kind,
                key: key.to_string(),
                error: error.to_string(),
            },
        );

        // Lines are reported on their own, keep the parent entry small.
        let source = self.options.include_source_in_report.then(|| {
            match kind.source_set().and_then(|set| set.expand) {
                Some(expand) => record.without(expand),
                None => record.clone(),
            }
        });
        let mut result = RecordResult::new(
            key,
            SyncOutcome::Error {
                detail: error.to_string(),
            },
        );
        result
            .failures
            .push(FailedRecord::new(kind, key, operation, &error).with_source(source));
        result
    }

    /// Parts, accounts and contacts: transform, upsert, associate.
    async fn sync_simple(
        &self,
        kind: EntityKind,
        key: &str,
        record: &SourceRecord,
    ) -> Result<RecordResult, StepError> {
        let on_progress = self.on_progress();
        let properties = match kind {
            EntityKind::Part => transform::part(record),
            EntityKind::Account => transform::account(record),
            EntityKind::Contact => transform::contact(record),
            _ => {
                return Err(StepError {
                    operation: "transform",
                    error: SyncError::internal(format!("{kind} is not synced on its own")),
                });
            }
        }
        .map_err(step("transform"))?;
        let account_key = match kind {
            EntityKind::Contact => Some(transform::contact_account_key(record).map_err(step("transform"))?),
            _ => None,
        };

        let (upserted, ambiguous) = self
            .resolver
            .upsert(kind, key, &properties, on_progress)
            .await
            .map_err(step("write"))?;

        let mut result = RecordResult::new(key, outcome_of(upserted.is_created()));
        if ambiguous {
            result.warnings += 1;
        }

        if kind == EntityKind::Part {
            self.lines.remember(key, upserted.id());
        }

        if let Some(account_key) = account_key {
            self.associate(
                (kind, upserted.id(), key),
                (EntityKind::Account, &account_key),
                AssociationType::ContactToCompany,
                &mut result,
            )
            .await;
        }

        Ok(result)
    }

    /// Quotes and orders: resolve with the current stage, guard, transform,
    /// write, associate, reconcile lines.
    async fn sync_deal(
        &self,
        kind: EntityKind,
        key: &str,
        record: &SourceRecord,
    ) -> Result<RecordResult, StepError> {
        let on_progress = self.on_progress();
        let account_key = transform::deal_account_key(record).map_err(step("transform"))?;

        let guard = self.resolver.lock(kind, key).await;
        let resolution = self
            .resolver
            .resolve(kind, key, &["dealstage"], on_progress)
            .await
            .map_err(step("resolve"))?;

        let current = resolution.property("dealstage");
        let decision = match kind {
            EntityKind::Quote => QUOTE_STAGES.decide(&QuoteFlags::from_record(record), current),
            _ => ORDER_STAGES.decide(&OrderFlags::from_record(record), current),
        };
        self.report_stage(kind, key, &decision);

        let properties = match kind {
            EntityKind::Quote => transform::quote(record, &decision, &self.transform),
            _ => transform::order(record, &decision, &self.transform),
        }
        .map_err(step("transform"))?;

        let upserted = self
            .resolver
            .write(kind, key, &resolution, &properties, on_progress)
            .await
            .map_err(step("write"))?;
        drop(guard);

        let mut result = RecordResult::new(key, outcome_of(upserted.is_created()));
        if resolution.is_ambiguous() {
            result.warnings += 1;
        }

        self.associate(
            (kind, upserted.id(), key),
            (EntityKind::Account, &account_key),
            AssociationType::DealToCompany,
            &mut result,
        )
        .await;

        if kind == EntityKind::Order
            && let Some(quote_num) = transform::order_source_quote(record)
        {
            self.associate(
                (kind, upserted.id(), key),
                (EntityKind::Quote, &quote_num.to_string()),
                AssociationType::DealToDeal,
                &mut result,
            )
            .await;
        }

        if let Some(expand) = kind.source_set().and_then(|set| set.expand) {
            let lines = record.children(expand);
            let parent = ParentDeal {
                kind,
                key,
                id: upserted.id(),
            };
            let report = self
                .lines
                .reconcile(&self.resolver, parent, key.parse().ok(), &lines, on_progress)
                .await;
            result.lines = report.stats;
            result.warnings += report.warnings;
            result.failures.extend(report.failures);
        }

        Ok(result)
    }

    fn report_stage(&self, kind: EntityKind, key: &str, decision: &StageDecision) {
        let StageDecision::Keep {
            current,
            derived,
            reason,
        } = decision
        else {
            return;
        };

        match reason {
            KeepReason::PermanentTerminal => tracing::info!(
                kind = %kind,
                key,
                current = %current,
                derived,
                "Deal is in a permanent terminal stage, keeping it"
            ),
            KeepReason::Regression => tracing::warn!(
                kind = %kind,
                key,
                current = %current,
                derived,
                "Derived stage is behind the current stage, keeping it"
            ),
        }
        emit(
            self.on_progress(),
            SyncProgress::StageKept {
                kind,
                key: key.to_string(),
                current: current.clone(),
                derived: derived.to_string(),
            },
        );
    }

    /// Link a written record to the record holding `to`'s external key.
    ///
    /// A missing target or a failed call is an association error on the
    /// record; the record itself stays written.
    async fn associate(
        &self,
        from: (EntityKind, &str, &str),
        to: (EntityKind, &str),
        association: AssociationType,
        result: &mut RecordResult,
    ) {
        let on_progress = self.on_progress();
        let (from_kind, from_id, from_key) = from;
        let (to_kind, to_key) = to;

        let outcome = match self.resolver.find_id(to_kind, to_key, on_progress).await {
            Ok(Some(to_id)) => self
                .resolver
                .associate((from_kind, from_id), (to_kind, &to_id), association, on_progress)
                .await
                .map_err(|e| e.to_string()),
            Ok(None) => Err(format!("{to_kind} {to_key} not found in CRM")),
            Err(e) => Err(e.to_string()),
        };

        if let Err(message) = outcome {
            let error = SyncError::association(from_kind, to_kind, message);
            tracing::warn!(kind = %from_kind, key = from_key, error = %error, "Association failed");
            emit(
                on_progress,
                SyncProgress::AssociationFailed {
                    from: from_kind,
                    to: to_kind,
                    key: from_key.to_string(),
                    error: error.to_string(),
                },
            );
            result
                .failures
                .push(FailedRecord::new(from_kind, from_key, "associate", &error));
        }
    }
}

fn outcome_of(created: bool) -> SyncOutcome {
    if created {
        SyncOutcome::Created
    } else {
        SyncOutcome::Updated
    }
}
