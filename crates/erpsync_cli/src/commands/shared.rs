use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use erpsync::sync::{ProgressCallback, SyncContext, SyncOptions};
use erpsync::{ApiRateLimiter, EpicorClient, HubSpotClient};

use crate::config::Config;

/// Build clients from configuration and wire them into a sync context.
pub(crate) fn build_context(
    config: &Config,
    options: SyncOptions,
    progress: Arc<ProgressCallback>,
    shutdown: Option<Arc<AtomicBool>>,
) -> Result<SyncContext, Box<dyn std::error::Error>> {
    let (base_url, company, credentials) = config.epicor()?;
    let source = EpicorClient::new(&base_url, &company, &credentials)?;

    let token = config.hubspot_token()?;
    let rps = config.hubspot.requests_per_second;
    let rate_limiter = (rps > 0).then(|| ApiRateLimiter::new(rps));
    if rate_limiter.is_none() {
        tracing::warn!("CRM rate limiting disabled, requests may be throttled");
    }
    let destination = HubSpotClient::new(&config.hubspot.base_url, &token, rate_limiter)?;

    let mut builder = SyncContext::builder()
        .source(Arc::new(source))
        .destination(Arc::new(destination))
        .options(options)
        .transform(config.transform_context())
        .progress(progress);
    if let Some(flag) = shutdown {
        builder = builder.shutdown_flag(flag);
    }

    Ok(builder.build()?)
}
