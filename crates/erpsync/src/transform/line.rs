//! Quote and order lines to CRM line items, plus the minimal catalog stub a
//! line item needs when its SKU is not in the catalog yet.

use crate::entity::EntityKind;
use crate::error::TransformError;
use crate::record::{PropertyMap, SourceRecord};

use super::{Props, amount};

/// `"{sku} {description}"`, or `"Part {sku}"` without a description.
pub(super) fn display_name(sku: &str, description: Option<&str>) -> String {
    let name = format!("{} {}", sku, description.unwrap_or_default());
    let name = name.trim();
    if name.is_empty() {
        format!("Part {sku}")
    } else {
        name.to_string()
    }
}

/// Parent number field, line number field, price field and key prefix.
type LineFields = (&'static str, &'static str, &'static str, char);

fn line_fields(kind: EntityKind) -> Result<LineFields, TransformError> {
    match kind {
        EntityKind::QuoteLine => Ok(("QuoteNum", "QuoteLine", "ExpUnitPrice", 'Q')),
        EntityKind::OrderLine => Ok(("OrderNum", "OrderLine", "UnitPrice", 'O')),
        _ => Err(TransformError::InvalidValue {
            field: "kind",
            value: kind.to_string(),
        }),
    }
}

/// External key of a line: `Q{quote}-{line}` or `O{order}-{line}`.
///
/// The parent number is taken from the line, falling back to `parent_num`.
pub fn line_item_key(
    kind: EntityKind,
    line: &SourceRecord,
    parent_num: Option<i64>,
) -> Result<String, TransformError> {
    let (parent_field, line_field, _, prefix) = line_fields(kind)?;
    let parent = line
        .int(parent_field)
        .or(parent_num)
        .ok_or(TransformError::MissingField {
            field: parent_field,
        })?;
    let line_num = line
        .int(line_field)
        .ok_or(TransformError::MissingField { field: line_field })?;
    Ok(format!("{prefix}{parent}-{line_num}"))
}

/// Quote or order line to CRM line item properties.
///
/// Lines without a part number have no catalog reference and are rejected.
pub fn line_item(
    kind: EntityKind,
    line: &SourceRecord,
    parent_num: Option<i64>,
) -> Result<PropertyMap, TransformError> {
    let (_, _, price_field, _) = line_fields(kind)?;
    let key = line_item_key(kind, line, parent_num)?;
    let sku = line
        .str("PartNum")
        .ok_or(TransformError::MissingField { field: "PartNum" })?;
    let description = line.str("LineDesc");

    let mut props = Props::default();
    props
        .set("epicor_line_item_id", key)
        .set("sku", sku)
        .set("name", display_name(sku, description))
        .set("description", description.unwrap_or_default())
        .set("quantity", line.float("OrderQty").map_or(serde_json::json!(1), super::number))
        .set("price", amount(line, price_field).unwrap_or(serde_json::json!(0)))
        .set("amount", amount(line, "ExtPriceDtl").unwrap_or(serde_json::json!(0)));
    Ok(props.finish())
}

/// Minimal catalog item for a SKU seen on a line.
pub fn catalog_stub(sku: &str, description: Option<&str>, price: Option<f64>) -> PropertyMap {
    let mut props = Props::default();
    props
        .set("hs_sku", sku)
        .set("name", display_name(sku, description))
        .set("description", description.unwrap_or_default())
        .set_opt("price", price.map(super::number));
    props.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> SourceRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn quote_line_uses_expected_unit_price() {
        let line = record(json!({
            "QuoteNum": 5001, "QuoteLine": 2, "PartNum": "BR-100",
            "LineDesc": "Bracket", "OrderQty": 4, "ExpUnitPrice": 2.5, "ExtPriceDtl": 10
        }));
        let props = line_item(EntityKind::QuoteLine, &line, None).expect("line");
        assert_eq!(props["epicor_line_item_id"], "Q5001-2");
        assert_eq!(props["sku"], "BR-100");
        assert_eq!(props["name"], "BR-100 Bracket");
        assert_eq!(props["quantity"], json!(4));
        assert_eq!(props["price"], json!(2.5));
        assert_eq!(props["amount"], json!(10));
    }

    #[test]
    fn order_line_uses_unit_price_and_parent_fallback() {
        let line = record(json!({"OrderLine": 1, "PartNum": "X", "UnitPrice": 3}));
        let props = line_item(EntityKind::OrderLine, &line, Some(77)).expect("line");
        assert_eq!(props["epicor_line_item_id"], "O77-1");
        assert_eq!(props["price"], json!(3));
        assert_eq!(props["quantity"], json!(1));
        assert_eq!(props["name"], "X");
    }

    #[test]
    fn line_without_sku_is_rejected() {
        let line = record(json!({"QuoteNum": 1, "QuoteLine": 1, "LineDesc": "Labor"}));
        assert_eq!(
            line_item(EntityKind::QuoteLine, &line, None),
            Err(TransformError::MissingField { field: "PartNum" })
        );
    }

    #[test]
    fn non_line_kinds_are_rejected() {
        let line = record(json!({"QuoteNum": 1, "QuoteLine": 1, "PartNum": "X"}));
        assert!(line_item(EntityKind::Quote, &line, None).is_err());
    }

    #[test]
    fn catalog_stub_is_minimal() {
        let stub = catalog_stub("BR-100", Some("Bracket"), None);
        assert_eq!(stub.len(), 3);
        assert_eq!(stub["hs_sku"], "BR-100");
        assert_eq!(stub["name"], "BR-100 Bracket");

        let bare = catalog_stub("BR-100", None, Some(4.0));
        assert_eq!(bare["name"], "BR-100");
        assert_eq!(bare["price"], json!(4));
    }

    #[test]
    fn display_name_trims_blank_descriptions() {
        assert_eq!(display_name("A1", Some("  ")), "A1");
    }
}
