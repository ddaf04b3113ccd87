//! Entity kinds known to the engine and how each maps onto both systems.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A kind of record moved from the ERP to the CRM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Catalog item (ERP part, CRM product).
    Part,
    /// Customer account (ERP customer, CRM company).
    Account,
    /// Customer contact person (CRM contact).
    Contact,
    /// Sales quote (CRM deal).
    Quote,
    /// Sales order (CRM deal).
    Order,
    /// Line of a quote (CRM line item).
    QuoteLine,
    /// Line of an order (CRM line item).
    OrderLine,
}

impl EntityKind {
    /// Top-level kinds in dependency order. Lines travel with their parents.
    pub const SYNC_ORDER: [EntityKind; 5] = [
        EntityKind::Part,
        EntityKind::Account,
        EntityKind::Contact,
        EntityKind::Quote,
        EntityKind::Order,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Part => "part",
            Self::Account => "account",
            Self::Contact => "contact",
            Self::Quote => "quote",
            Self::Order => "order",
            Self::QuoteLine => "quote_line",
            Self::OrderLine => "order_line",
        }
    }

    /// CRM object type records of this kind are stored as.
    #[must_use]
    pub fn object(self) -> ObjectType {
        match self {
            Self::Part => ObjectType::Products,
            Self::Account => ObjectType::Companies,
            Self::Contact => ObjectType::Contacts,
            Self::Quote | Self::Order => ObjectType::Deals,
            Self::QuoteLine | Self::OrderLine => ObjectType::LineItems,
        }
    }

    /// CRM property holding the ERP-side identifier. The sole match key.
    #[must_use]
    pub fn external_key_property(self) -> &'static str {
        match self {
            Self::Part => "hs_sku",
            Self::Account => "epicor_customer_number",
            Self::Contact => "epicor_contact_id",
            Self::Quote => "epicor_quote_number",
            Self::Order => "epicor_order_number",
            Self::QuoteLine | Self::OrderLine => "epicor_line_item_id",
        }
    }

    /// ERP OData service and entity set for top-level kinds.
    #[must_use]
    pub fn source_set(self) -> Option<SourceSet> {
        let set = match self {
            Self::Part => SourceSet {
                service: "Erp.BO.PartSvc",
                entity_set: "Parts",
                order_by: "PartNum",
                expand: None,
            },
            Self::Account => SourceSet {
                service: "Erp.BO.CustomerSvc",
                entity_set: "Customers",
                order_by: "CustNum",
                expand: None,
            },
            Self::Contact => SourceSet {
                service: "Erp.BO.CustCntSvc",
                entity_set: "CustCnts",
                order_by: "CustNum,ShipToNum,ConNum",
                expand: None,
            },
            Self::Quote => SourceSet {
                service: "Erp.BO.QuoteSvc",
                entity_set: "Quotes",
                order_by: "QuoteNum",
                expand: Some("QuoteDtls"),
            },
            Self::Order => SourceSet {
                service: "Erp.BO.SalesOrderSvc",
                entity_set: "SalesOrders",
                order_by: "OrderNum",
                expand: Some("OrderDtls"),
            },
            Self::QuoteLine | Self::OrderLine => return None,
        };
        Some(set)
    }

    /// Line kind carried by a deal-like kind.
    #[must_use]
    pub fn line_kind(self) -> Option<EntityKind> {
        match self {
            Self::Quote => Some(Self::QuoteLine),
            Self::Order => Some(Self::OrderLine),
            _ => None,
        }
    }

    /// Whether records of this kind carry a pipeline stage.
    #[inline]
    #[must_use]
    pub fn is_deal(self) -> bool {
        matches!(self, Self::Quote | Self::Order)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "part" | "parts" | "product" | "products" => Ok(Self::Part),
            "account" | "accounts" | "customer" | "customers" => Ok(Self::Account),
            "contact" | "contacts" => Ok(Self::Contact),
            "quote" | "quotes" => Ok(Self::Quote),
            "order" | "orders" => Ok(Self::Order),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Location of an entity set in the ERP's OData API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSet {
    pub service: &'static str,
    pub entity_set: &'static str,
    /// Key columns that give offset paging a stable order.
    pub order_by: &'static str,
    /// Child collection fetched inline with each record.
    pub expand: Option<&'static str>,
}

/// CRM object types, named as they appear in CRM API paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Companies,
    Contacts,
    Deals,
    Products,
    LineItems,
}

impl ObjectType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Companies => "companies",
            Self::Contacts => "contacts",
            Self::Deals => "deals",
            Self::Products => "products",
            Self::LineItems => "line_items",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CRM-defined association categories used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationType {
    ContactToCompany,
    DealToCompany,
    DealToDeal,
    LineItemToDeal,
}

impl AssociationType {
    /// Numeric association type id understood by the CRM.
    #[must_use]
    pub fn type_id(self) -> u32 {
        match self {
            Self::ContactToCompany => 1,
            Self::DealToCompany => 5,
            Self::DealToDeal => 6,
            Self::LineItemToDeal => 20,
        }
    }

    /// Association category. All types used here are CRM defined.
    #[must_use]
    pub fn category(self) -> &'static str {
        "HUBSPOT_DEFINED"
    }
}
