//! Pure mappings from ERP records to CRM property sets.
//!
//! One function per entity kind. None of them do I/O; everything they need
//! beyond the record (pipeline ids, owner mapping, the guarded stage, the run
//! timestamp) arrives through [`TransformContext`] or an explicit argument.

mod line;
pub mod values;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransformError;
use crate::record::{PropertyMap, SourceRecord};
use crate::stage::StageDecision;

pub use line::{catalog_stub, line_item, line_item_key};
use values::{midnight_millis, normalize_guid, normalize_phone, number, to_epoch_millis};

/// CRM deal pipelines quotes and orders are placed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipelines {
    pub quotes: Option<String>,
    pub orders: Option<String>,
}

/// ERP sales rep code to CRM owner id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OwnerMapping {
    /// Owner for reps without an explicit mapping. Unassigned when absent.
    pub default_owner_id: Option<String>,
    pub mappings: HashMap<String, String>,
}

impl OwnerMapping {
    /// Owner for a sales rep code. Codes are compared after trimming.
    #[must_use]
    pub fn owner_for(&self, rep_code: Option<&str>) -> Option<&str> {
        let code = rep_code.map(str::trim).filter(|c| !c.is_empty())?;
        self.mappings
            .get(code)
            .or(self.default_owner_id.as_ref())
            .map(String::as_str)
    }
}

/// Everything a transform needs besides the record itself.
#[derive(Debug, Clone)]
pub struct TransformContext {
    pub pipelines: Pipelines,
    pub owners: OwnerMapping,
    /// Start of the current run, stamped onto deals.
    pub synced_at: DateTime<Utc>,
}

impl Default for TransformContext {
    fn default() -> Self {
        Self {
            pipelines: Pipelines::default(),
            owners: OwnerMapping::default(),
            synced_at: Utc::now(),
        }
    }
}

/// Property map builder that drops absent values.
#[derive(Debug, Default)]
pub(crate) struct Props(PropertyMap);

impl Props {
    pub(crate) fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        if !value.is_null() {
            self.0.insert(name.to_string(), value);
        }
        self
    }

    pub(crate) fn set_opt<T: Into<Value>>(&mut self, name: &str, value: Option<T>) -> &mut Self {
        if let Some(value) = value {
            self.set(name, value);
        }
        self
    }

    pub(crate) fn finish(self) -> PropertyMap {
        self.0
    }
}

fn require_key(record: &SourceRecord, field: &'static str) -> Result<String, TransformError> {
    record
        .key(field)
        .ok_or(TransformError::MissingField { field })
}

fn require_int(record: &SourceRecord, field: &'static str) -> Result<i64, TransformError> {
    match record.get(field) {
        None => Err(TransformError::MissingField { field }),
        Some(value) => record.int(field).ok_or_else(|| TransformError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

fn date(record: &SourceRecord, field: &str) -> Option<i64> {
    record.str(field).and_then(to_epoch_millis)
}

fn amount(record: &SourceRecord, field: &str) -> Option<Value> {
    record.float(field).map(number)
}

fn guid(record: &SourceRecord) -> Option<String> {
    record.str("SysRowID").map(normalize_guid)
}

/// External key of an account record.
pub fn account_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_int(record, "CustNum").map(|n| n.to_string())
}

/// ERP customer to CRM company.
pub fn account(record: &SourceRecord) -> Result<PropertyMap, TransformError> {
    let cust_num = require_int(record, "CustNum")?;
    let name = record
        .str("Name")
        .ok_or(TransformError::MissingField { field: "Name" })?;

    let mut props = Props::default();
    props
        .set("epicor_customer_number", cust_num.to_string())
        .set("name", name)
        .set_opt("epicor_customer_code", record.str("CustID"))
        .set_opt("address", record.str("Address1"))
        .set_opt("address2", record.str("Address2"))
        .set_opt("city", record.str("City"))
        .set_opt("state", record.str("State"))
        .set_opt("zip", record.str("Zip"))
        .set_opt("country", record.str("Country"))
        .set_opt("phone", record.str("PhoneNum").and_then(normalize_phone))
        .set_opt("fax_number", record.str("FaxNum"))
        .set_opt("epicor_email", record.str("EMailAddress"))
        .set_opt("currency_code", record.str("CurrencyCode"))
        .set_opt("epicor_sysrowid", guid(record));
    Ok(props.finish())
}

/// Customer number a contact belongs to.
pub fn contact_account_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_int(record, "CustNum").map(|n| n.to_string())
}

/// External key of a contact: customer number and contact number.
pub fn contact_key(record: &SourceRecord) -> Result<String, TransformError> {
    let cust_num = require_int(record, "CustNum")?;
    let con_num = require_int(record, "ConNum")?;
    Ok(format!("{cust_num}-{con_num}"))
}

/// ERP customer contact to CRM contact.
pub fn contact(record: &SourceRecord) -> Result<PropertyMap, TransformError> {
    let key = contact_key(record)?;

    let (first, last) = match (record.str("FirstName"), record.str("LastName")) {
        (None, None) => match record.str("Name") {
            Some(full) => match full.rsplit_once(' ') {
                Some((first, last)) => (Some(first.trim()), Some(last.trim())),
                None => (Some(full), None),
            },
            None => (None, None),
        },
        names => names,
    };

    let mut props = Props::default();
    props
        .set("epicor_contact_id", key)
        .set_opt("epicor_customer_number", record.key("CustNum"))
        .set_opt("firstname", first)
        .set_opt("lastname", last)
        .set_opt("email", record.str("EMailAddress"))
        .set_opt("phone", record.str("PhoneNum").and_then(normalize_phone))
        .set_opt("jobtitle", record.str("Func"))
        .set_opt("epicor_sysrowid", guid(record));
    Ok(props.finish())
}

/// External key of a part: its part number, used as the SKU.
pub fn part_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_key(record, "PartNum")
}

/// ERP part to CRM product.
pub fn part(record: &SourceRecord) -> Result<PropertyMap, TransformError> {
    let sku = part_key(record)?;
    let description = record.str("PartDescription");

    let mut props = Props::default();
    props
        .set("hs_sku", sku.as_str())
        .set("name", line::display_name(&sku, description))
        .set("description", description.unwrap_or_default())
        .set_opt("price", amount(record, "UnitPrice"))
        .set_opt("epicor_part_class", record.str("ClassID"))
        .set_opt("epicor_sysrowid", guid(record));
    Ok(props.finish())
}

/// External key of a quote.
pub fn quote_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_int(record, "QuoteNum").map(|n| n.to_string())
}

/// ERP quote to CRM deal.
///
/// `dealstage` is written only when the guard allowed it; the derived stage
/// always lands in `epicor_last_sync_stage`.
pub fn quote(
    record: &SourceRecord,
    stage: &StageDecision,
    ctx: &TransformContext,
) -> Result<PropertyMap, TransformError> {
    let quote_num = require_int(record, "QuoteNum")?;
    require_int(record, "CustNum")?;
    let rep_code = record.str("SalesRepCode");

    let mut props = Props::default();
    props
        .set("dealname", format!("Quote #{quote_num}"))
        .set("epicor_quote_number", quote_num.to_string())
        .set_opt("pipeline", ctx.pipelines.quotes.as_deref())
        .set_opt("dealstage", stage.stage_to_write())
        .set_opt("createdate", date(record, "EntryDate"))
        .set_opt("closedate", date(record, "DueDate"))
        .set_opt("quote_expiration_date", date(record, "ExpirationDate"))
        .set_opt("quote_sent_date", date(record, "DateQuoted"))
        .set_opt("amount", amount(record, "QuoteAmt"))
        .set_opt("epicor_doc_amount", amount(record, "DocQuoteAmt"))
        .set_opt("discount_percentage", amount(record, "DiscountPercent"))
        .set_opt("customer_po_number", record.str("PONum"))
        .set_opt("deal_currency_code", record.str("CurrencyCode"))
        .set("epicor_quoted", record.flag("Quoted"))
        .set("epicor_closed", record.flag("QuoteClosed"))
        .set("epicor_converted_to_order", record.flag("Ordered"))
        .set("epicor_expired", record.flag("Expired"))
        .set_opt("epicor_sales_rep_code", rep_code)
        .set_opt("hubspot_owner_id", ctx.owners.owner_for(rep_code))
        .set_opt("epicor_quote_sysrowid", guid(record))
        .set("epicor_last_sync_stage", stage.derived())
        .set("epicor_last_sync_timestamp", midnight_millis(ctx.synced_at));
    Ok(props.finish())
}

/// External key of an order.
pub fn order_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_int(record, "OrderNum").map(|n| n.to_string())
}

/// Quote an order was converted from: header `QuoteNum`, else the first line
/// that carries one.
#[must_use]
pub fn order_source_quote(record: &SourceRecord) -> Option<i64> {
    record
        .int("QuoteNum")
        .filter(|n| *n > 0)
        .or_else(|| {
            record
                .children("OrderDtls")
                .iter()
                .find_map(|line| line.int("QuoteNum").filter(|n| *n > 0))
        })
}

/// ERP sales order to CRM deal.
pub fn order(
    record: &SourceRecord,
    stage: &StageDecision,
    ctx: &TransformContext,
) -> Result<PropertyMap, TransformError> {
    let order_num = require_int(record, "OrderNum")?;
    require_int(record, "CustNum")?;
    if record.get("OpenOrder").is_none() {
        return Err(TransformError::MissingField { field: "OpenOrder" });
    }
    let rep_code = record.str("SalesRepList").and_then(|reps| reps.split('~').next());

    let mut props = Props::default();
    props
        .set("dealname", format!("Order #{order_num}"))
        .set("epicor_order_number", order_num.to_string())
        .set_opt("pipeline", ctx.pipelines.orders.as_deref())
        .set_opt("dealstage", stage.stage_to_write())
        .set_opt("createdate", date(record, "OrderDate"))
        .set_opt("closedate", date(record, "RequestDate"))
        .set_opt("need_by_date", date(record, "NeedByDate"))
        .set_opt("amount", amount(record, "OrderAmt"))
        .set_opt("epicor_doc_amount", amount(record, "DocOrderAmt"))
        .set_opt("customer_po_number", record.str("PONum"))
        .set_opt("deal_currency_code", record.str("CurrencyCode"))
        .set("epicor_open_order", record.flag_or("OpenOrder", true))
        .set_opt("epicor_source_quote_number", order_source_quote(record).map(|n| n.to_string()))
        .set_opt("epicor_sales_rep_code", rep_code)
        .set_opt("hubspot_owner_id", ctx.owners.owner_for(rep_code))
        .set_opt("epicor_order_sysrowid", guid(record))
        .set("epicor_last_sync_stage", stage.derived())
        .set("epicor_last_sync_timestamp", midnight_millis(ctx.synced_at));
    Ok(props.finish())
}

/// Customer number a quote or order belongs to.
pub fn deal_account_key(record: &SourceRecord) -> Result<String, TransformError> {
    require_int(record, "CustNum").map(|n| n.to_string())
}
