//! Notification reporting.
//!
//! A [`RunResult`] is projected into a transport-neutral [`RunReport`] and
//! handed to a [`NotificationSink`] exactly once per run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{NotifyError, RunResult, RunStatus};
use crate::metrics::METRICS;
use crate::obs;

/// Most images a single report carries.
pub const MAX_ATTACHMENTS: usize = 4;

/// Overall status shown to readers of the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Ok,
    HasFailures,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Ok => "ok",
            ReportStatus::HasFailures => "has_failures",
            ReportStatus::Error => "error",
        }
    }
}

/// One failed item as presented in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportItem {
    pub identifier: String,
    pub status_text: String,
    pub error_text: Option<String>,
    pub screenshot: Option<PathBuf>,

    /// Terminal remediation outcome, when remediation ran.
    pub outcome: Option<String>,
    pub attempts: u32,
}

/// Transport-neutral report derived from a [`RunResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub total_items: usize,
    pub failed_count: usize,
    pub unresolved_count: usize,
    pub items: Vec<ReportItem>,
    pub retries_triggered: u32,
    pub execution_time_ms: u64,
    pub error: Option<String>,
    pub screenshots: Vec<PathBuf>,
}

impl RunReport {
    pub fn from_result(result: &RunResult) -> Self {
        let status = match result.status {
            RunStatus::Failed => ReportStatus::Error,
            RunStatus::Completed if result.has_failures() => ReportStatus::HasFailures,
            RunStatus::Completed => ReportStatus::Ok,
        };

        let items = result
            .failed_items
            .iter()
            .map(|report| ReportItem {
                identifier: report.item.identifier.clone(),
                status_text: report.item.raw_status_text.clone(),
                error_text: report.error_text.clone(),
                screenshot: report.screenshot.clone(),
                outcome: report
                    .resolution
                    .as_ref()
                    .map(|r| r.final_outcome.as_str().to_string()),
                attempts: report
                    .resolution
                    .as_ref()
                    .map(|r| r.attempts_used())
                    .unwrap_or(0),
            })
            .collect();

        Self {
            run_id: result.run_id.clone(),
            started_at: result.started_at,
            status,
            total_items: result.total_items,
            failed_count: result.failed_items.len(),
            unresolved_count: result.unresolved_count(),
            items,
            retries_triggered: result.retries_triggered,
            execution_time_ms: result.execution_time_ms,
            error: result.error.clone(),
            screenshots: result.screenshots.clone(),
        }
    }

    /// Execution time in seconds, for display.
    pub fn execution_secs(&self) -> f64 {
        self.execution_time_ms as f64 / 1000.0
    }
}

/// An image read from disk for upload with a report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Destination for run reports.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn send(&self, report: &RunReport, attachments: &[Attachment]) -> Result<(), NotifyError>;
}

/// Read the first [`MAX_ATTACHMENTS`] screenshots. Unreadable files are skipped.
pub async fn load_attachments(paths: &[PathBuf]) -> Vec<Attachment> {
    let mut attachments = Vec::new();
    for path in paths.iter().take(MAX_ATTACHMENTS) {
        match tokio::fs::read(path).await {
            Ok(bytes) => attachments.push(Attachment {
                path: path.clone(),
                file_name: file_name_of(path),
                bytes,
            }),
            Err(e) => warn!(path = %path.display(), error = %e, "screenshot unreadable, not attached"),
        }
    }
    attachments
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "screenshot".to_string())
}

/// Send `result` through `sink`. Failures are logged and returned, never
/// retried.
pub async fn deliver(sink: &dyn NotificationSink, result: &RunResult) -> Result<(), NotifyError> {
    let report = RunReport::from_result(result);
    let attachments = load_attachments(&result.screenshots).await;

    match sink.send(&report, &attachments).await {
        Ok(()) => {
            METRICS.inc_notifications_sent();
            obs::emit_notification_sent(&result.run_id, sink.name(), attachments.len());
            Ok(())
        }
        Err(e) => {
            METRICS.inc_notifications_failed();
            obs::emit_notification_failed(&result.run_id, sink.name(), &e);
            Err(e)
        }
    }
}

/// Sink that writes the report to the log. Used when no chat transport is
/// configured.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, report: &RunReport, attachments: &[Attachment]) -> Result<(), NotifyError> {
        let json = serde_json::to_string(report)?;
        info!(
            event = "notify.report",
            status = report.status.as_str(),
            attachments = attachments.len(),
            report = %json,
        );
        Ok(())
    }
}
