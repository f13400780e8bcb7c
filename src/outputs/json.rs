//! JSON run reports.
//!
//! Each run can leave a report next to the previous ones, organized by date:
//! ```text
//! report_dir/
//! └── 2025-05-06/
//!     ├── 063000.json
//!     └── 183000.json
//! ```

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

use crate::error::ScrapeError;
use crate::models::RunReport;

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    generated_at: DateTime<Utc>,
    total_new: usize,
    #[serde(flatten)]
    report: &'a RunReport,
}

/// Path of the report for a run finished at `at`: `{dir}/{date}/{HHMMSS}.json`.
pub fn report_path(report_dir: &str, at: DateTime<Local>) -> PathBuf {
    PathBuf::from(report_dir)
        .join(at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", at.format("%H%M%S")))
}

/// Write `report` under `report_dir` and return the file path.
#[instrument(level = "info", skip_all, fields(report_dir = %report_dir))]
pub async fn write_report(report: &RunReport, report_dir: &str) -> Result<PathBuf, ScrapeError> {
    let now = Local::now();
    let path = report_path(report_dir, now);
    let file = ReportFile {
        generated_at: now.with_timezone(&Utc),
        total_new: report.result.total(),
        report,
    };
    let json = serde_json::to_string_pretty(&file)?;

    if let Some(parent) = path.parent() {
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(dir = %parent.display(), error = %e, "Failed to create report dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote run report");
    Ok(path)
}
