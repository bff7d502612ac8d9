//! Screenshots and failure-text capture.
//!
//! Evidence is best-effort: every function here logs its faults instead of
//! failing the run, except the status screenshot whose error the
//! orchestrator records itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{BrowserFault, BrowserSession, ElementHandle};
use crate::domain::{FailedItem, ItemEvidence, RowSelector};
use crate::prober::resolve_row;

/// Image format for screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotFormat {
    Png,
    Jpeg,
}

impl ScreenshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ScreenshotFormat::Png => "png",
            ScreenshotFormat::Jpeg => "jpeg",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "png" => Some(ScreenshotFormat::Png),
            "jpeg" | "jpg" => Some(ScreenshotFormat::Jpeg),
            _ => None,
        }
    }
}

/// Where and how evidence is captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSettings {
    pub directory: PathBuf,
    pub prefix: String,
    pub format: ScreenshotFormat,

    /// Candidate tooltip containers, read after hovering a failed cell.
    pub tooltip_selectors: Vec<String>,

    /// Cells inside a row, searched for the one carrying the marker.
    pub cell_selector: String,

    pub hover_delay: Duration,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("screenshots"),
            prefix: "kbwatch_".to_string(),
            format: ScreenshotFormat::Png,
            tooltip_selectors: vec![
                "[role=\"tooltip\"]".to_string(),
                ".ant-tooltip-inner".to_string(),
                ".tooltip".to_string(),
                ".error-tooltip".to_string(),
                "[data-tooltip]".to_string(),
            ],
            cell_selector: "td".to_string(),
            hover_delay: Duration::from_secs(1),
        }
    }
}

impl EvidenceSettings {
    /// `<dir>/<prefix><kind>_<YYYYmmdd_HHMMSS>.<ext>`
    pub fn screenshot_path(&self, kind: &str, at: DateTime<Utc>) -> PathBuf {
        self.directory.join(format!(
            "{}{}_{}.{}",
            self.prefix,
            kind,
            at.format("%Y%m%d_%H%M%S"),
            self.format.extension()
        ))
    }
}

async fn capture(
    session: &mut dyn BrowserSession,
    path: &Path,
    full_page: bool,
) -> Result<PathBuf, BrowserFault> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    session.screenshot(path, full_page).await
}

/// Full-page screenshot of the current surface.
pub async fn capture_status(
    session: &mut dyn BrowserSession,
    settings: &EvidenceSettings,
    at: DateTime<Utc>,
) -> Result<PathBuf, BrowserFault> {
    let path = settings.screenshot_path("status", at);
    let written = capture(session, &path, true).await?;
    info!(path = %written.display(), "status screenshot saved");
    Ok(written)
}

/// Screenshot taken when the result table cannot be found.
pub async fn capture_diagnostic(
    session: &mut dyn BrowserSession,
    settings: &EvidenceSettings,
    at: DateTime<Utc>,
) -> Option<PathBuf> {
    let path = settings.screenshot_path("diagnostic", at);
    match capture(session, &path, true).await {
        Ok(written) => {
            info!(path = %written.display(), "diagnostic screenshot saved");
            Some(written)
        }
        Err(e) => {
            warn!(error = %e, "diagnostic screenshot failed");
            None
        }
    }
}

/// Hover the failed cell, read its tooltip, and screenshot the page.
///
/// `ordinal` numbers the screenshot (`error_<ordinal>`).
pub async fn capture_item(
    session: &mut dyn BrowserSession,
    settings: &EvidenceSettings,
    selector: &RowSelector,
    item: &FailedItem,
    ordinal: usize,
    at: DateTime<Utc>,
) -> ItemEvidence {
    let mut evidence = ItemEvidence {
        row_index: item.row_index,
        ..ItemEvidence::default()
    };

    let row = match resolve_row(session, selector, item.row_index).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            warn!(item = %item.identifier, "row gone before evidence capture");
            return evidence;
        }
        Err(e) => {
            warn!(item = %item.identifier, error = %e, "could not re-resolve row for evidence");
            return evidence;
        }
    };

    match marker_cell(session, row.element, &settings.cell_selector, &item.matched_marker).await {
        Ok(target) => {
            evidence.error_text = read_tooltip(session, target, settings).await;
        }
        Err(e) => warn!(item = %item.identifier, error = %e, "could not locate failed cell"),
    }

    let path = settings.screenshot_path(&format!("error_{ordinal}"), at);
    match capture(session, &path, false).await {
        Ok(written) => evidence.screenshot = Some(written),
        Err(e) => warn!(item = %item.identifier, error = %e, "item screenshot failed"),
    }
    evidence
}

/// The cell whose text carries `marker`, or the row itself.
async fn marker_cell(
    session: &mut dyn BrowserSession,
    row: ElementHandle,
    cell_selector: &str,
    marker: &str,
) -> Result<ElementHandle, BrowserFault> {
    for cell in session.locate_within(row, cell_selector).await? {
        if session.read_text(cell).await?.contains(marker) {
            return Ok(cell);
        }
    }
    Ok(row)
}

async fn read_tooltip(
    session: &mut dyn BrowserSession,
    target: ElementHandle,
    settings: &EvidenceSettings,
) -> Option<String> {
    if let Err(e) = session.hover(target).await {
        warn!(error = %e, "hover failed");
        return None;
    }
    tokio::time::sleep(settings.hover_delay).await;

    for selector in &settings.tooltip_selectors {
        let Ok(found) = session.locate_all(selector).await else {
            continue;
        };
        for handle in found {
            match session.read_text(handle).await {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(selector = %selector, "tooltip text captured");
                    return Some(text.trim().to_string());
                }
                Ok(_) => {}
                Err(e) => debug!(selector = %selector, error = %e, "tooltip unreadable"),
            }
        }
    }
    None
}
