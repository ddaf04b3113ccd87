use std::fmt::Write as _;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use erpsync::sync::{EntityStatus, FailedRecord, RunStatus, SyncReport};

use crate::RunArgs;
use crate::config::{Config, RunOverrides};
use crate::progress::LoggingReporter;

use super::shared::build_context;

pub(crate) async fn handle_run(
    args: RunArgs,
    config: &Config,
    shutdown: Arc<AtomicBool>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let overrides = RunOverrides {
        only: args.only,
        concurrency: args.concurrency,
    };
    let options = config.sync_options(&overrides)?;
    let ctx = build_context(
        config,
        options,
        LoggingReporter::new().into_callback(),
        Some(shutdown),
    )?;

    let report = ctx.run().await;
    print!("{}", render_summary(&report));

    let failed_path = args
        .failed_records
        .or_else(|| config.sync.failed_records_path.clone());
    if let Some(path) = failed_path {
        let failed: Vec<&FailedRecord> = report.failed_records().collect();
        write_failed_records(&path, &failed)?;
        tracing::info!(path = %path.display(), count = failed.len(), "Wrote failed-record report");
    }

    Ok(exit_code(report.status))
}

/// 0 on success, 1 on partial, 2 when nothing ran.
pub(crate) fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Success => ExitCode::SUCCESS,
        RunStatus::Partial => ExitCode::from(1),
        RunStatus::Failed => ExitCode::from(2),
    }
}

/// Plain-text summary, one line per kind.
pub(crate) fn render_summary(report: &SyncReport) -> String {
    let mut out = String::new();
    let elapsed = report.finished_at - report.started_at;
    let _ = writeln!(
        out,
        "Sync {} in {:.1}s",
        report.status,
        elapsed.num_milliseconds() as f64 / 1000.0
    );
    if let Some(error) = &report.error {
        let _ = writeln!(out, "  {error}");
    }

    for stats in &report.entities {
        let state = match &stats.status {
            EntityStatus::Completed => String::new(),
            EntityStatus::Skipped => {
                let _ = writeln!(out, "  {:<9} disabled", stats.kind.to_string());
                continue;
            }
            EntityStatus::Failed { message } => format!(" [failed: {message}]"),
        };
        let _ = writeln!(
            out,
            "  {:<9} fetched {:>5}  created {:>5}  updated {:>5}  skipped {:>4}  errors {:>4}{}",
            stats.kind.to_string(),
            stats.fetched,
            stats.created,
            stats.updated,
            stats.skipped,
            stats.total_errors(),
            state
        );
        let lines = &stats.line_items;
        if lines.created + lines.updated + lines.skipped + lines.errors > 0 {
            let _ = writeln!(
                out,
                "  {:<9} lines created {}, updated {}, skipped {}, errors {}, catalog stubs {}",
                "",
                lines.created,
                lines.updated,
                lines.skipped,
                lines.errors,
                lines.catalog_items_created
            );
        }
    }

    out
}

fn write_failed_records(
    path: &Path,
    records: &[&FailedRecord],
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), records)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use erpsync::sync::SyncStats;
    use erpsync::{EntityKind, SyncError};

    fn report(entities: Vec<SyncStats>) -> SyncReport {
        let now = Utc::now();
        SyncReport {
            status: SyncReport::status_of(&entities),
            entities,
            started_at: now,
            finished_at: now,
            error: None,
        }
    }

    #[test]
    fn exit_codes_follow_status() {
        assert_eq!(exit_code(RunStatus::Success), ExitCode::SUCCESS);
        assert_eq!(exit_code(RunStatus::Partial), ExitCode::from(1));
        assert_eq!(exit_code(RunStatus::Failed), ExitCode::from(2));
    }

    #[test]
    fn summary_lists_each_kind() {
        let mut quotes = SyncStats::new(EntityKind::Quote);
        quotes.fetched = 3;
        quotes.created = 2;
        quotes.errors = 1;
        quotes.line_items.created = 4;
        quotes.line_items.catalog_items_created = 1;
        let mut orders = SyncStats::new(EntityKind::Order);
        orders.fail("reading order from source failed");

        let text = render_summary(&report(vec![
            SyncStats::skipped_kind(EntityKind::Part),
            quotes,
            orders,
        ]));

        assert!(text.starts_with("Sync partial"));
        assert!(text.contains("part      disabled"));
        assert!(text.contains("created     2"));
        assert!(text.contains("catalog stubs 1"));
        assert!(text.contains("[failed: reading order from source failed]"));
    }

    #[test]
    fn failed_records_are_written_as_json() {
        let dir = std::env::temp_dir().join(format!("erpsync-test-{}", std::process::id()));
        let path = dir.join("nested").join("failed.json");
        let record = FailedRecord::new(
            EntityKind::Account,
            "1001",
            "write",
            &SyncError::validation("name is required"),
        );

        write_failed_records(&path, &[&record]).expect("write");

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written[0]["key"], "1001");
        assert_eq!(written[0]["error_type"], "validation");
        std::fs::remove_dir_all(dir).ok();
    }
}
