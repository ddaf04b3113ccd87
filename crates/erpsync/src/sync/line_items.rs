//! Quote and order lines to CRM line items.
//!
//! Every line item references a catalog product by SKU. Products missing from
//! the CRM get a minimal stub before the line is written. Stubs are created
//! under the SKU's key lock and remembered for the rest of the run, so a SKU
//! appearing on many lines (or on lines processed concurrently) gets exactly
//! one stub.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::entity::{AssociationType, EntityKind};
use crate::error::{ClientError, SyncError, TransformError};
use crate::record::SourceRecord;
use crate::resolver::{Resolution, Resolver};
use crate::transform;

use super::progress::{ProgressCallback, SyncProgress, emit};
use super::types::{FailedRecord, LineItemStats};

/// Result of reconciling the lines of one parent deal.
#[derive(Debug, Default)]
pub struct LineItemReport {
    pub stats: LineItemStats,
    pub warnings: usize,
    pub failures: Vec<FailedRecord>,
}

/// Parent deal a batch of lines belongs to.
#[derive(Debug, Clone, Copy)]
pub struct ParentDeal<'a> {
    pub kind: EntityKind,
    /// External key of the deal (quote or order number).
    pub key: &'a str,
    /// CRM id of the deal.
    pub id: &'a str,
}

/// Per-run line item writer with a SKU to product id cache.
#[derive(Debug, Default)]
pub struct LineItemReconciler {
    catalog: Mutex<HashMap<String, String>>,
    include_source: bool,
}

impl LineItemReconciler {
    pub fn new(include_source: bool) -> Self {
        Self {
            catalog: Mutex::new(HashMap::new()),
            include_source,
        }
    }

    fn cached(&self, sku: &str) -> Option<String> {
        self.catalog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(sku)
            .cloned()
    }

    pub(crate) fn remember(&self, sku: &str, id: &str) {
        self.catalog
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(sku.to_string(), id.to_string());
    }

    /// Product id for a SKU, creating a stub when the catalog has none.
    ///
    /// Returns the id and whether a stub was created.
    pub async fn ensure_catalog_item(
        &self,
        resolver: &Resolver,
        sku: &str,
        description: Option<&str>,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(String, bool), ClientError> {
        if let Some(id) = self.cached(sku) {
            return Ok((id, false));
        }

        let _guard = resolver.lock(EntityKind::Part, sku).await;
        // Another task may have created it while we waited.
        if let Some(id) = self.cached(sku) {
            return Ok((id, false));
        }

        let resolution = resolver
            .resolve(EntityKind::Part, sku, &[], on_progress)
            .await?;
        if let Some(id) = resolution.id() {
            self.remember(sku, id);
            return Ok((id.to_string(), false));
        }

        let stub = transform::catalog_stub(sku, description, None);
        let created = resolver
            .write(EntityKind::Part, sku, &Resolution::NotFound, &stub, on_progress)
            .await?;
        tracing::info!(sku, id = %created.id(), "Created catalog stub");
        emit(
            on_progress,
            SyncProgress::CatalogStubCreated {
                sku: sku.to_string(),
            },
        );
        self.remember(sku, created.id());
        Ok((created.id().to_string(), true))
    }

    /// Write every line of a deal and link each line item to it.
    ///
    /// Line failures are collected in the report and never fail the parent.
    pub async fn reconcile(
        &self,
        resolver: &Resolver,
        parent: ParentDeal<'_>,
        parent_num: Option<i64>,
        lines: &[SourceRecord],
        on_progress: Option<&ProgressCallback>,
    ) -> LineItemReport {
        let mut report = LineItemReport::default();
        let Some(line_kind) = parent.kind.line_kind() else {
            return report;
        };

        for line in lines {
            self.reconcile_line(resolver, parent, line_kind, parent_num, line, &mut report, on_progress)
                .await;
        }

        tracing::debug!(
            kind = %parent.kind,
            key = parent.key,
            created = report.stats.created,
            updated = report.stats.updated,
            skipped = report.stats.skipped,
            errors = report.stats.errors,
            "Reconciled line items"
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    async fn reconcile_line(
        &self,
        resolver: &Resolver,
        parent: ParentDeal<'_>,
        line_kind: EntityKind,
        parent_num: Option<i64>,
        line: &SourceRecord,
        report: &mut LineItemReport,
        on_progress: Option<&ProgressCallback>,
    ) {
        let properties = match transform::line_item(line_kind, line, parent_num) {
            Ok(properties) => properties,
            Err(TransformError::MissingField { field: "PartNum" }) => {
                let reason = format!(
                    "line {} has no part number",
                    line.key(line_number_field(line_kind)).unwrap_or_default()
                );
                tracing::warn!(kind = %parent.kind, key = parent.key, "Skipping {}", reason);
                emit(
                    on_progress,
                    SyncProgress::LineItemSkipped {
                        kind: parent.kind,
                        parent_key: parent.key.to_string(),
                        reason,
                    },
                );
                report.stats.skipped += 1;
                report.warnings += 1;
                return;
            }
            Err(e) => {
                let key = format!("{}/?", parent.key);
                self.fail(report, line_kind, &key, "transform", e.into(), line);
                return;
            }
        };

        // line_item() succeeded, so the key and SKU are present.
        let key = match transform::line_item_key(line_kind, line, parent_num) {
            Ok(key) => key,
            Err(e) => {
                self.fail(report, line_kind, parent.key, "transform", e.into(), line);
                return;
            }
        };
        let sku = line.str("PartNum").unwrap_or_default();

        match self
            .ensure_catalog_item(resolver, sku, line.str("LineDesc"), on_progress)
            .await
        {
            Ok((_, true)) => report.stats.catalog_items_created += 1,
            Ok((_, false)) => {}
            Err(e) => {
                self.fail(report, line_kind, &key, "catalog_item", e.into(), line);
                return;
            }
        }

        let (upserted, ambiguous) = match resolver
            .upsert(line_kind, &key, &properties, on_progress)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.fail(report, line_kind, &key, "line_item", e.into(), line);
                return;
            }
        };
        if ambiguous {
            report.warnings += 1;
        }

        if upserted.is_created() {
            report.stats.created += 1;
        } else {
            report.stats.updated += 1;
        }

        // Linked on every run so a link that failed before is repaired.
        if let Err(e) = resolver
            .associate(
                (line_kind, upserted.id()),
                (parent.kind, parent.id),
                AssociationType::LineItemToDeal,
                on_progress,
            )
            .await
        {
            let error = SyncError::association(line_kind, parent.kind, e.to_string());
            tracing::warn!(kind = %line_kind, key = %key, error = %error, "Line item association failed");
            emit(
                on_progress,
                SyncProgress::AssociationFailed {
                    from: line_kind,
                    to: parent.kind,
                    key: key.clone(),
                    error: error.to_string(),
                },
            );
            report
                .failures
                .push(FailedRecord::new(line_kind, key, "associate", &error));
        }
    }

    fn fail(
        &self,
        report: &mut LineItemReport,
        kind: EntityKind,
        key: &str,
        operation: &str,
        error: SyncError,
        line: &SourceRecord,
    ) {
        tracing::error!(kind = %kind, key, operation, error = %error, "Line item failed");
        report.stats.errors += 1;
        let source = self.include_source.then(|| line.clone());
        report
            .failures
            .push(FailedRecord::new(kind, key, operation, &error).with_source(source));
    }
}

fn line_number_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::OrderLine => "OrderLine",
        _ => "QuoteLine",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ObjectType;
    use crate::retry::RetryConfig;
    use crate::testing::{MemoryCrm, record};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    fn parent() -> ParentDeal<'static> {
        ParentDeal {
            kind: EntityKind::Quote,
            key: "100",
            id: "deal-1",
        }
    }

    fn lines(values: serde_json::Value) -> Vec<SourceRecord> {
        record(json!({ "QuoteDtls": values })).children("QuoteDtls")
    }

    #[tokio::test]
    async fn repeated_sku_gets_one_stub() {
        let crm = Arc::new(MemoryCrm::default());
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let reconciler = LineItemReconciler::new(false);

        let report = reconciler
            .reconcile(
                &resolver,
                parent(),
                Some(100),
                &lines(json!([
                    {"QuoteLine": 1, "PartNum": "BR-1", "LineDesc": "Bracket"},
                    {"QuoteLine": 2, "PartNum": "BR-1"},
                    {"QuoteLine": 3, "PartNum": "BR-2"}
                ])),
                None,
            )
            .await;

        assert_eq!(report.stats.created, 3);
        assert_eq!(report.stats.catalog_items_created, 2);
        assert!(report.failures.is_empty());
        let stubs = crm.find(ObjectType::Products, "hs_sku", "BR-1");
        assert_eq!(stubs.len(), 1);
        assert_eq!(stubs[0].property("name"), Some("BR-1 Bracket"));

        let line = &crm.find(ObjectType::LineItems, "epicor_line_item_id", "Q100-2")[0];
        assert!(crm.is_associated(&line.id, "deal-1", AssociationType::LineItemToDeal));
    }

    #[tokio::test]
    async fn existing_catalog_item_is_reused() {
        let crm = Arc::new(MemoryCrm::default());
        crm.insert(ObjectType::Products, "p-9", json!({"hs_sku": "BR-1"}));
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let reconciler = LineItemReconciler::new(false);

        let (id, created) = reconciler
            .ensure_catalog_item(&resolver, "BR-1", None, None)
            .await
            .expect("catalog item");
        assert_eq!((id.as_str(), created), ("p-9", false));

        // Cached: no second search.
        let searches = crm.searches.load(Ordering::SeqCst);
        reconciler
            .ensure_catalog_item(&resolver, "BR-1", None, None)
            .await
            .expect("catalog item");
        assert_eq!(crm.searches.load(Ordering::SeqCst), searches);
    }

    #[tokio::test]
    async fn line_without_part_number_is_skipped() {
        let crm = Arc::new(MemoryCrm::default());
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let reconciler = LineItemReconciler::new(false);

        let report = reconciler
            .reconcile(
                &resolver,
                parent(),
                Some(100),
                &lines(json!([{"QuoteLine": 1, "LineDesc": "Freight"}])),
                None,
            )
            .await;

        assert_eq!(report.stats.skipped, 1);
        assert_eq!(report.warnings, 1);
        assert_eq!(report.stats.errors, 0);
        assert!(crm.all(ObjectType::LineItems).is_empty());
    }

    #[tokio::test]
    async fn rerun_updates_lines_in_place() {
        let crm = Arc::new(MemoryCrm::default());
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let input = lines(json!([{"QuoteLine": 1, "PartNum": "BR-1"}]));

        let first = LineItemReconciler::new(false)
            .reconcile(&resolver, parent(), Some(100), &input, None)
            .await;
        let second = LineItemReconciler::new(false)
            .reconcile(&resolver, parent(), Some(100), &input, None)
            .await;

        assert_eq!(first.stats.created, 1);
        assert_eq!(second.stats.created, 0);
        assert_eq!(second.stats.updated, 1);
        assert_eq!(second.stats.catalog_items_created, 0);
        assert_eq!(crm.all(ObjectType::LineItems).len(), 1);
        let line = &crm.all(ObjectType::LineItems)[0];
        assert!(crm.is_associated(&line.id, "deal-1", AssociationType::LineItemToDeal));
    }

    #[tokio::test]
    async fn rerun_links_line_whose_association_failed() {
        let crm = Arc::new(MemoryCrm::default());
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let input = lines(json!([{"QuoteLine": 1, "PartNum": "BR-1"}]));

        crm.fail_associations(true);
        let first = LineItemReconciler::new(false)
            .reconcile(&resolver, parent(), Some(100), &input, None)
            .await;
        assert_eq!(first.stats.created, 1);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].operation, "associate");
        let line = crm.all(ObjectType::LineItems).remove(0);
        assert!(!crm.is_associated(&line.id, "deal-1", AssociationType::LineItemToDeal));

        crm.fail_associations(false);
        let second = LineItemReconciler::new(false)
            .reconcile(&resolver, parent(), Some(100), &input, None)
            .await;
        assert_eq!(second.stats.updated, 1);
        assert!(second.failures.is_empty());
        assert!(crm.is_associated(&line.id, "deal-1", AssociationType::LineItemToDeal));
        assert_eq!(crm.all(ObjectType::LineItems).len(), 1);
    }

    #[tokio::test]
    async fn rejected_line_is_counted_and_reported_with_source() {
        let crm = Arc::new(MemoryCrm::default());
        crm.reject("Q100-2");
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let reconciler = LineItemReconciler::new(true);

        let report = reconciler
            .reconcile(
                &resolver,
                parent(),
                Some(100),
                &lines(json!([
                    {"QuoteLine": 1, "PartNum": "BR-1"},
                    {"QuoteLine": 2, "PartNum": "BR-1"}
                ])),
                None,
            )
            .await;

        assert_eq!(report.stats.created, 1);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "Q100-2");
        assert_eq!(report.failures[0].operation, "line_item");
        assert!(report.failures[0].source.is_some());
    }

    #[tokio::test]
    async fn non_deal_parent_has_no_lines() {
        let crm = Arc::new(MemoryCrm::default());
        let resolver = Resolver::new(crm.clone(), RetryConfig::default());
        let report = LineItemReconciler::default()
            .reconcile(
                &resolver,
                ParentDeal {
                    kind: EntityKind::Account,
                    key: "1",
                    id: "c-1",
                },
                None,
                &lines(json!([{"QuoteLine": 1, "PartNum": "X"}])),
                None,
            )
            .await;
        assert_eq!(report.stats, LineItemStats::default());
    }
}
