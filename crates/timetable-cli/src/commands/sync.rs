use std::path::Path;

use serde::Serialize;
use timetable_core::sync::SyncCycleReport;

use crate::commands::common::{open_engine, require_user};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub user_id: i64,
    pub uploaded: usize,
    pub upload_failed: usize,
    pub downloaded: usize,
    pub applied: usize,
    pub stale: usize,
    pub deferred: usize,
    pub failed: usize,
    pub cleaned: u64,
    pub errors: Vec<String>,
}

impl From<SyncCycleReport> for SyncSummary {
    fn from(report: SyncCycleReport) -> Self {
        Self {
            user_id: report.user_id,
            uploaded: report.uploaded,
            upload_failed: report.upload_failed,
            downloaded: report.downloaded,
            applied: report.reconcile.applied,
            stale: report.reconcile.stale + report.reconcile.superseded,
            deferred: report.reconcile.deferred,
            failed: report.reconcile.failed,
            cleaned: report.cleaned,
            errors: report.step_errors,
        }
    }
}

pub async fn run_sync(
    as_json: bool,
    db_path: &Path,
    server_url: Option<&str>,
) -> Result<(), CliError> {
    let engine = open_engine(db_path, server_url).await?;
    require_user(engine.db()).await?;

    let summary = SyncSummary::from(engine.run_full_sync_cycle().await?);
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for line in format_summary_lines(&summary) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_summary_lines(summary: &SyncSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Sync completed: {} uploaded, {} downloaded, {} applied",
        summary.uploaded, summary.downloaded, summary.applied
    )];
    if summary.upload_failed > 0 {
        lines.push(format!("{} messages will be retried", summary.upload_failed));
    }
    if summary.deferred > 0 {
        lines.push(format!(
            "{} changes are waiting for their parent to arrive",
            summary.deferred
        ));
    }
    lines.extend(summary.errors.iter().map(|error| format!("warning: {error}")));
    lines
}
