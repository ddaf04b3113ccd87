//! erpsync - One-way batch synchronization from an ERP to a CRM.
//!
//! Reads parts, customers, contacts, quotes and sales orders from an Epicor
//! OData API and mirrors them into HubSpot as products, companies, contacts,
//! deals and line items. Every destination record carries the source's
//! external key so repeated runs update instead of duplicating, and deal
//! stages only ever move forward.
//!
//! # Features
//!
//! - `reqwest` (default) - HTTP transport for the concrete ERP and CRM clients.
//!   Without it, bring your own [`http::HttpTransport`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use erpsync::{EpicorClient, HubSpotClient, SyncContext};
//!
//! let source = EpicorClient::new(&base_url, "ACME", &credentials)?;
//! let destination = HubSpotClient::new(erpsync::destination::DEFAULT_BASE_URL, &token, None)?;
//!
//! let report = SyncContext::builder()
//!     .source(Arc::new(source))
//!     .destination(Arc::new(destination))
//!     .build()?
//!     .run()
//!     .await;
//! ```

pub mod destination;
pub mod entity;
pub mod error;
pub mod http;
pub mod record;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod stage;
pub mod sync;
pub mod transform;

#[cfg(test)]
mod testing;

pub use destination::{ApiRateLimiter, DestinationClient, HubSpotClient};
pub use entity::{AssociationType, EntityKind, ObjectType};
pub use error::{ClientError, SyncError, TransformError};
pub use record::{DestinationRecord, PropertyMap, SourceRecord};
pub use source::{EpicorClient, EpicorCredentials, RecordPager, SourceReader};
pub use sync::{
    ProgressCallback, RunStatus, SyncContext, SyncOptions, SyncProgress, SyncReport, SyncStats,
};
pub use transform::{OwnerMapping, Pipelines, TransformContext};
