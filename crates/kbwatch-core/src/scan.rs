//! One scan pass: probe the table, classify every row.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::BrowserSession;
use crate::classifier::{extract_identifier, find_marker, MarkerSet};
use crate::domain::{FailedItem, RowSelector, ScanError, ScanOutcome};
use crate::metrics::METRICS;
use crate::prober::{default_row_selectors, probe};

/// How the result table is located and read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Fallback chain of row selectors, tried in order.
    pub row_selectors: Vec<RowSelector>,

    /// Selector for the cell holding the item name, inside a row.
    pub first_cell_selector: String,

    /// Header texts that are never item names.
    pub header_labels: Vec<String>,

    /// Wait after reaching the surface for dynamic content to render.
    pub settle_after_navigation: Duration,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            row_selectors: default_row_selectors(),
            first_cell_selector: "td:first-child".to_string(),
            header_labels: default_header_labels(),
            settle_after_navigation: Duration::from_secs(5),
        }
    }
}

pub fn default_header_labels() -> Vec<String> {
    [
        "リソース",
        "タイトル",
        "タイプ",
        "サイズ",
        "ステータス",
        "モデル",
        "トークン数",
        "最終更新日",
        "アクション",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Scan every matched row. All rows count towards the total, including
/// those whose text could not be read.
pub async fn scan(
    session: &mut dyn BrowserSession,
    settings: &ScanSettings,
    markers: &MarkerSet,
) -> Result<ScanOutcome, ScanError> {
    let found = probe(session, &settings.row_selectors).await?;
    let total_item_count = found.rows.len();
    METRICS.add_rows_scanned(total_item_count as u64);

    let mut failed_items = Vec::new();
    for row in &found.rows {
        let text = match session.read_text(row.element).await {
            Ok(text) => text,
            Err(e) => {
                warn!(index = row.index, error = %e, "could not read row, skipping");
                continue;
            }
        };

        let Some(hit) = find_marker(&text, markers) else {
            continue;
        };

        let first_cell = first_cell_text(session, row.element, &settings.first_cell_selector).await;
        let identifier = extract_identifier(
            first_cell.as_deref(),
            &text,
            &settings.header_labels,
            row.index,
        );
        debug!(index = row.index, item = %identifier, marker = %hit.marker, "failed row");
        METRICS.inc_failures_detected();

        failed_items.push(FailedItem {
            identifier,
            row_index: row.index,
            raw_status_text: hit.status_line,
            matched_marker: hit.marker,
        });
    }

    Ok(ScanOutcome {
        total_item_count,
        matched_selector: found.selector,
        failed_items,
    })
}

async fn first_cell_text(
    session: &mut dyn BrowserSession,
    row: crate::browser::ElementHandle,
    selector: &str,
) -> Option<String> {
    let cell = session
        .locate_within(row, selector)
        .await
        .ok()?
        .into_iter()
        .next()?;
    session.read_text(cell).await.ok()
}
