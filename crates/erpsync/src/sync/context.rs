//! Sync context builder.
//!
//! Collects the clients, options and callbacks a run needs so callers do not
//! have to thread them through individually.
//!
//! # Example
//!
//! ```ignore
//! use erpsync::sync::{SyncContext, SyncOptions};
//!
//! let ctx = SyncContext::builder()
//!     .source(Arc::new(epicor))
//!     .destination(Arc::new(hubspot))
//!     .options(SyncOptions::default())
//!     .progress(callback)
//!     .build()?;
//!
//! let report = ctx.run().await;
//! ```

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::Utc;

use crate::destination::DestinationClient;
use crate::error::SyncError;
use crate::source::SourceReader;
use crate::transform::TransformContext;

use super::engine::Engine;
use super::orchestrator;
use super::progress::ProgressCallback;
use super::types::{SyncOptions, SyncReport};

/// Error type for sync context construction.
#[derive(Debug, thiserror::Error)]
pub enum SyncContextError {
    /// Missing required field in builder.
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    /// An option is out of range.
    #[error("Invalid option {field}: {message}")]
    InvalidOption {
        field: &'static str,
        message: String,
    },
}

/// Builder for [`SyncContext`].
#[derive(Default)]
pub struct SyncContextBuilder {
    source: Option<Arc<dyn SourceReader>>,
    destination: Option<Arc<dyn DestinationClient>>,
    options: Option<SyncOptions>,
    transform: Option<TransformContext>,
    progress: Option<Arc<ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl SyncContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ERP reader.
    pub fn source(mut self, source: Arc<dyn SourceReader>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the CRM client.
    pub fn destination(mut self, destination: Arc<dyn DestinationClient>) -> Self {
        self.destination = Some(destination);
        self
    }

    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Pipelines and owner mapping. The run timestamp is set when the run starts.
    pub fn transform(mut self, transform: TransformContext) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Set the progress callback.
    pub fn progress(mut self, callback: Arc<ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Set the shutdown flag for graceful shutdown.
    pub fn shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Build the sync context.
    ///
    /// # Errors
    ///
    /// Returns `SyncContextError::MissingField` if a client is not set and
    /// `SyncContextError::InvalidOption` for a zero page size or concurrency.
    pub fn build(self) -> Result<SyncContext, SyncContextError> {
        let source = self
            .source
            .ok_or(SyncContextError::MissingField { field: "source" })?;
        let destination = self
            .destination
            .ok_or(SyncContextError::MissingField {
                field: "destination",
            })?;
        let options = self.options.unwrap_or_default();

        if options.page_size == 0 {
            return Err(SyncContextError::InvalidOption {
                field: "page_size",
                message: "must be at least 1".to_string(),
            });
        }
        if options.concurrency == 0 {
            return Err(SyncContextError::InvalidOption {
                field: "concurrency",
                message: "must be at least 1".to_string(),
            });
        }

        Ok(SyncContext {
            source,
            destination,
            options,
            transform: self.transform.unwrap_or_default(),
            progress: self.progress,
            shutdown_flag: self.shutdown_flag,
        })
    }
}

/// Everything needed to run a sync between one ERP and one CRM.
pub struct SyncContext {
    source: Arc<dyn SourceReader>,
    destination: Arc<dyn DestinationClient>,
    options: SyncOptions,
    transform: TransformContext,
    progress: Option<Arc<ProgressCallback>>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl SyncContext {
    pub fn builder() -> SyncContextBuilder {
        SyncContextBuilder::new()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Check both systems without syncing anything.
    pub async fn check_connectivity(&self) -> Result<(), SyncError> {
        orchestrator::check_connectivity(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.options.retry,
            self.progress.as_deref(),
        )
        .await
    }

    /// Run a full sync.
    ///
    /// Each call is an independent run: the catalog cache and key locks start
    /// empty and the run timestamp is taken now.
    pub async fn run(&self) -> SyncReport {
        let transform = TransformContext {
            synced_at: Utc::now(),
            ..self.transform.clone()
        };
        let engine = Arc::new(Engine::new(
            Arc::clone(&self.source),
            Arc::clone(&self.destination),
            self.options.clone(),
            transform,
            self.progress.clone(),
            self.shutdown_flag.clone(),
        ));
        orchestrator::run(engine).await
    }
}
