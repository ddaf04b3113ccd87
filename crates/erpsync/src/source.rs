//! Reading records from the ERP.
//!
//! [`SourceReader`] is the seam the engine reads through; [`EpicorClient`] is
//! the OData implementation. [`RecordPager`] walks an entity set page by page
//! so a kind never has to be held in memory as a whole.

mod epicor;

use async_trait::async_trait;

use crate::entity::EntityKind;
use crate::error::{ClientError, short_error_message};
use crate::record::SourceRecord;
use crate::retry::{RetryConfig, with_retry};
use crate::sync::{ProgressCallback, SyncProgress, emit};

pub use epicor::{EpicorClient, EpicorCredentials};

/// Read access to the ERP.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Cheap authenticated request proving the ERP is reachable.
    async fn ping(&self) -> Result<(), ClientError>;

    /// One page of records of a top-level kind.
    ///
    /// Line-bearing kinds return their lines inline (see
    /// [`SourceSet::expand`](crate::entity::SourceSet)).
    async fn fetch_page(
        &self,
        kind: EntityKind,
        filter: Option<&str>,
        skip: usize,
        top: usize,
    ) -> Result<Vec<SourceRecord>, ClientError>;
}

/// Lazily drains an entity set page by page.
///
/// Stops after an empty page or a page shorter than the page size. Each page
/// fetch is retried on transient errors.
pub struct RecordPager<'a> {
    reader: &'a dyn SourceReader,
    kind: EntityKind,
    filter: Option<String>,
    page_size: usize,
    retry: RetryConfig,
    skip: usize,
    page: u32,
    done: bool,
}

impl<'a> RecordPager<'a> {
    pub fn new(reader: &'a dyn SourceReader, kind: EntityKind, page_size: usize) -> Self {
        Self {
            reader,
            kind,
            filter: None,
            page_size: page_size.max(1),
            retry: RetryConfig::default(),
            skip: 0,
            page: 0,
            done: false,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<&str>) -> Self {
        self.filter = filter.map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Records fetched so far.
    #[must_use]
    pub fn fetched(&self) -> usize {
        self.skip
    }

    /// Next page, or `None` once the set is exhausted.
    pub async fn next_page(
        &mut self,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<Option<Vec<SourceRecord>>, ClientError> {
        if self.done {
            return Ok(None);
        }

        let page = self.page + 1;
        let label = format!("fetch {} page {}", self.kind, page);
        let records = with_retry(
            &self.retry,
            || {
                self.reader
                    .fetch_page(self.kind, self.filter.as_deref(), self.skip, self.page_size)
            },
            ClientError::is_transient,
            short_error_message,
            &label,
            on_progress,
        )
        .await?;

        if records.len() < self.page_size {
            self.done = true;
        }
        if records.is_empty() {
            return Ok(None);
        }

        self.page = page;
        self.skip += records.len();
        emit(
            on_progress,
            SyncProgress::FetchedPage {
                kind: self.kind,
                page,
                count: records.len(),
                total_so_far: self.skip,
            },
        );
        tracing::debug!(kind = %self.kind, page, count = records.len(), "Fetched page");

        Ok(Some(records))
    }
}
