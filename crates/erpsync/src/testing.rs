//! In-memory ERP and CRM for unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::destination::DestinationClient;
use crate::entity::{AssociationType, EntityKind, ObjectType};
use crate::error::ClientError;
use crate::record::{DestinationRecord, PropertyMap, SourceRecord};
use crate::source::SourceReader;

pub(crate) fn props(value: serde_json::Value) -> PropertyMap {
    value.as_object().cloned().unwrap_or_default()
}

pub(crate) fn record(value: serde_json::Value) -> SourceRecord {
    serde_json::from_value(value).expect("record")
}

/// CRM keeping records per object, searched by exact property value.
#[derive(Default)]
pub(crate) struct MemoryCrm {
    records: Mutex<Vec<(ObjectType, DestinationRecord)>>,
    associations: Mutex<HashSet<(String, String, u32)>>,
    /// Property values that make create/update fail with a 400.
    reject_values: Mutex<HashSet<String>>,
    /// Creates still to fail with a 503 before anything is stored.
    failing_creates: AtomicUsize,
    failing_associations: AtomicBool,
    pub creates: AtomicUsize,
    pub searches: AtomicUsize,
}

impl MemoryCrm {
    pub fn insert(&self, object: ObjectType, id: &str, props: serde_json::Value) {
        let properties = props.as_object().cloned().unwrap_or_default();
        self.records.lock().unwrap().push((
            object,
            DestinationRecord {
                id: id.to_string(),
                properties,
            },
        ));
    }

    pub fn fail_creates(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn fail_associations(&self, failing: bool) {
        self.failing_associations.store(failing, Ordering::SeqCst);
    }

    pub fn reject(&self, value: &str) {
        self.reject_values.lock().unwrap().insert(value.to_string());
    }

    pub fn all(&self, object: ObjectType) -> Vec<DestinationRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| *o == object)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn find(&self, object: ObjectType, property: &str, value: &str) -> Vec<DestinationRecord> {
        self.all(object)
            .into_iter()
            .filter(|r| r.property(property) == Some(value))
            .collect()
    }

    pub fn is_associated(&self, from_id: &str, to_id: &str, association: AssociationType) -> bool {
        self.associations.lock().unwrap().contains(&(
            from_id.to_string(),
            to_id.to_string(),
            association.type_id(),
        ))
    }

    fn check_rejected(&self, properties: &PropertyMap) -> Result<(), ClientError> {
        let rejected = self.reject_values.lock().unwrap();
        if properties
            .values()
            .filter_map(|v| v.as_str())
            .any(|v| rejected.contains(v))
        {
            return Err(ClientError::from_status(400, b"Property values were not valid", None));
        }
        Ok(())
    }
}

#[async_trait]
impl DestinationClient for MemoryCrm {
    async fn ping(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn search(
        &self,
        object: ObjectType,
        property: &str,
        value: &str,
        _properties: &[&str],
    ) -> Result<Vec<DestinationRecord>, ClientError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent callers interleave between search and create.
        tokio::task::yield_now().await;
        Ok(self.find(object, property, value))
    }

    async fn create(
        &self,
        object: ObjectType,
        properties: &PropertyMap,
    ) -> Result<String, ClientError> {
        self.check_rejected(properties)?;
        if self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ClientError::from_status(503, b"service unavailable", None));
        }
        let n = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        let id = format!("{object}-{n}");
        self.records.lock().unwrap().push((
            object,
            DestinationRecord {
                id: id.clone(),
                properties: properties.clone(),
            },
        ));
        Ok(id)
    }

    async fn update(
        &self,
        _object: ObjectType,
        id: &str,
        properties: &PropertyMap,
    ) -> Result<(), ClientError> {
        self.check_rejected(properties)?;
        let mut records = self.records.lock().unwrap();
        let (_, record) = records
            .iter_mut()
            .find(|(_, r)| r.id == id)
            .ok_or_else(|| ClientError::from_status(404, b"not found", None))?;
        record.properties.extend(properties.clone());
        Ok(())
    }

    async fn create_association(
        &self,
        _from: ObjectType,
        from_id: &str,
        _to: ObjectType,
        to_id: &str,
        association: AssociationType,
    ) -> Result<(), ClientError> {
        if self.failing_associations.load(Ordering::SeqCst) {
            return Err(ClientError::from_status(400, b"invalid association", None));
        }
        self.associations.lock().unwrap().insert((
            from_id.to_string(),
            to_id.to_string(),
            association.type_id(),
        ));
        Ok(())
    }
}

/// ERP serving fixed records per kind.
#[derive(Default)]
pub(crate) struct MemoryErp {
    records: Mutex<Vec<(EntityKind, SourceRecord)>>,
    failing: Mutex<HashSet<EntityKind>>,
}

impl MemoryErp {
    pub fn push(&self, kind: EntityKind, value: serde_json::Value) {
        self.records.lock().unwrap().push((kind, record(value)));
    }

    pub fn fail_reads(&self, kind: EntityKind) {
        self.failing.lock().unwrap().insert(kind);
    }
}

#[async_trait]
impl SourceReader for MemoryErp {
    async fn ping(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn fetch_page(
        &self,
        kind: EntityKind,
        _filter: Option<&str>,
        skip: usize,
        top: usize,
    ) -> Result<Vec<SourceRecord>, ClientError> {
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(ClientError::from_status(400, b"entity set unavailable", None));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .skip(skip)
            .take(top)
            .map(|(_, r)| r.clone())
            .collect())
    }
}
