use std::process::ExitCode;

use erpsync::sync::SyncOptions;

use crate::config::Config;
use crate::progress::LoggingReporter;

use super::shared::build_context;

/// Check both systems and report which one is unreachable.
pub(crate) async fn handle_check(config: &Config) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let options = SyncOptions {
        retry: SyncOptions::default().retry.with_max_retries(config.sync.max_retries),
        ..SyncOptions::default()
    };
    let ctx = build_context(config, options, LoggingReporter::new().into_callback(), None)?;

    match ctx.check_connectivity().await {
        Ok(()) => {
            println!("ERP and CRM are reachable");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Connectivity check failed: {e}");
            Ok(ExitCode::from(2))
        }
    }
}
