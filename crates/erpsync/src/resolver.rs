//! Match source records to CRM records by external key and upsert them.
//!
//! The CRM has no atomic "create if absent", so lookup-then-create is guarded
//! by a per-key async lock. Everything touching one external key during a run
//! goes through [`KeyLocks`] and therefore sees the previous writer's result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::destination::DestinationClient;
use crate::entity::{AssociationType, EntityKind};
use crate::error::{ClientError, short_error_message};
use crate::record::{DestinationRecord, PropertyMap};
use crate::retry::{RetryConfig, with_retry};
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// Outcome of looking up an external key.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// At least one record matched. `matches` above one means the key is
    /// ambiguous and `record` is the first match as returned.
    Found {
        record: DestinationRecord,
        matches: usize,
    },
    NotFound,
}

impl Resolution {
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Found { record, .. } => Some(record.id.as_str()),
            Self::NotFound => None,
        }
    }

    /// A property of the matched record.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        match self {
            Self::Found { record, .. } => record.property(name),
            Self::NotFound => None,
        }
    }

    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Found { matches, .. } if *matches > 1)
    }
}

/// What an upsert did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Created(String),
    Updated(String),
}

impl Upserted {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }

    #[must_use]
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Guard held while working on one external key.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Async mutex per (external-key property, key value).
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<(&'static str, String), Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    /// Wait for exclusive access to a key.
    pub async fn lock(&self, property: &'static str, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry((property, key.to_string())).or_default())
        };
        lock.lock_owned().await
    }
}

/// Lookup, create, update and associate against the CRM, with retries.
pub struct Resolver {
    destination: Arc<dyn DestinationClient>,
    retry: RetryConfig,
    locks: KeyLocks,
}

impl Resolver {
    pub fn new(destination: Arc<dyn DestinationClient>, retry: RetryConfig) -> Self {
        Self {
            destination,
            retry,
            locks: KeyLocks::default(),
        }
    }

    /// Exclusive access to one external key of a kind.
    pub async fn lock(&self, kind: EntityKind, key: &str) -> KeyGuard {
        self.locks.lock(kind.external_key_property(), key).await
    }

    /// Exact-match lookup on the kind's external-key property.
    ///
    /// `properties` are fetched along with the match (e.g. `dealstage`).
    pub async fn resolve(
        &self,
        kind: EntityKind,
        key: &str,
        properties: &[&str],
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Resolution, ClientError> {
        let object = kind.object();
        let property = kind.external_key_property();
        let label = format!("search {kind} {key}");

        let mut found = with_retry(
            &self.retry,
            || self.destination.search(object, property, key, properties),
            ClientError::is_transient,
            short_error_message,
            &label,
            on_progress,
        )
        .await?;

        if found.is_empty() {
            return Ok(Resolution::NotFound);
        }

        let matches = found.len();
        let record = found.swap_remove(0);
        if matches > 1 {
            tracing::warn!(
                kind = %kind,
                key,
                matches,
                chosen = %record.id,
                "Multiple CRM records share one external key, using the first"
            );
            emit(
                on_progress,
                SyncProgress::AmbiguousMatch {
                    kind,
                    key: key.to_string(),
                    matches,
                    chosen_id: record.id.clone(),
                },
            );
        }

        Ok(Resolution::Found { record, matches })
    }

    /// Id of the record holding `key`, if any. Does not take the key lock.
    pub async fn find_id(
        &self,
        kind: EntityKind,
        key: &str,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Option<String>, ClientError> {
        let resolution = self.resolve(kind, key, &[], on_progress).await?;
        Ok(resolution.id().map(str::to_string))
    }

    /// Create or update depending on an earlier resolution.
    ///
    /// The caller holds the key lock across [`resolve`](Self::resolve) and
    /// this call.
    pub async fn write(
        &self,
        kind: EntityKind,
        key: &str,
        resolution: &Resolution,
        properties: &PropertyMap,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Upserted, ClientError> {
        let object = kind.object();
        match resolution.id() {
            Some(id) => {
                let label = format!("update {kind} {key}");
                with_retry(
                    &self.retry,
                    || self.destination.update(object, id, properties),
                    ClientError::is_transient,
                    short_error_message,
                    &label,
                    on_progress,
                )
                .await?;
                Ok(Upserted::Updated(id.to_string()))
            }
            None => {
                let label = format!("create {kind} {key}");
                let retrying = AtomicBool::new(false);
                let retrying = &retrying;
                let destination = self.destination.as_ref();
                let property = kind.external_key_property();
                let id = with_retry(
                    &self.retry,
                    move || async move {
                        // A create that failed in transit may still have been stored.
                        if retrying.swap(true, Ordering::SeqCst)
                            && let Some(stored) = destination
                                .search(object, property, key, &[])
                                .await?
                                .into_iter()
                                .next()
                        {
                            tracing::warn!(
                                kind = %kind,
                                key,
                                id = %stored.id,
                                "Create failed in transit but the record was stored, not re-creating"
                            );
                            return Ok(stored.id);
                        }
                        destination.create(object, properties).await
                    },
                    ClientError::is_transient,
                    short_error_message,
                    &label,
                    on_progress,
                )
                .await?;
                Ok(Upserted::Created(id))
            }
        }
    }

    /// Lock, resolve and write in one step.
    ///
    /// Returns the write outcome and whether the lookup was ambiguous.
    pub async fn upsert(
        &self,
        kind: EntityKind,
        key: &str,
        properties: &PropertyMap,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(Upserted, bool), ClientError> {
        let _guard = self.lock(kind, key).await;
        let resolution = self.resolve(kind, key, &[], on_progress).await?;
        let upserted = self
            .write(kind, key, &resolution, properties, on_progress)
            .await?;
        Ok((upserted, resolution.is_ambiguous()))
    }

    /// Link two existing records.
    pub async fn associate(
        &self,
        from: (EntityKind, &str),
        to: (EntityKind, &str),
        association: AssociationType,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<(), ClientError> {
        let (from_kind, from_id) = from;
        let (to_kind, to_id) = to;
        let label = format!("associate {from_kind} {from_id} -> {to_kind} {to_id}");
        with_retry(
            &self.retry,
            || {
                self.destination.create_association(
                    from_kind.object(),
                    from_id,
                    to_kind.object(),
                    to_id,
                    association,
                )
            },
            ClientError::is_transient,
            short_error_message,
            &label,
            on_progress,
        )
        .await
    }
}
