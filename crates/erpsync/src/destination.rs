//! Writing records to the CRM.
//!
//! [`DestinationClient`] is the seam the resolver and engine write through;
//! [`HubSpotClient`] is the HTTP implementation.

mod hubspot;
mod rate_limit;

use async_trait::async_trait;

use crate::entity::{AssociationType, ObjectType};
use crate::error::ClientError;
use crate::record::{DestinationRecord, PropertyMap};

pub use hubspot::{DEFAULT_BASE_URL, HubSpotClient};
pub use rate_limit::{ApiRateLimiter, DEFAULT_REQUESTS_PER_SECOND};

/// Read/write access to CRM objects.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Cheap authenticated request proving the CRM is reachable.
    async fn ping(&self) -> Result<(), ClientError>;

    /// Records whose `property` equals `value` exactly, in the order the CRM
    /// returns them, with `properties` populated.
    async fn search(
        &self,
        object: ObjectType,
        property: &str,
        value: &str,
        properties: &[&str],
    ) -> Result<Vec<DestinationRecord>, ClientError>;

    /// Create a record and return its id.
    async fn create(
        &self,
        object: ObjectType,
        properties: &PropertyMap,
    ) -> Result<String, ClientError>;

    /// Overwrite the given properties of an existing record.
    async fn update(
        &self,
        object: ObjectType,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<(), ClientError>;

    /// Link two existing records. Linking an already linked pair is a no-op.
    async fn create_association(
        &self,
        from: ObjectType,
        from_id: &str,
        to: ObjectType,
        to_id: &str,
        association: AssociationType,
    ) -> Result<(), ClientError>;
}
