//! Per-row and per-item records produced during a scan and its remediation.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::browser::ElementHandle;

/// One candidate row selector in the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSelector {
    /// CSS selector matching data rows.
    pub pattern: String,

    /// Leading matches to discard (header rows some layouts mark as rows).
    #[serde(default)]
    pub skip_leading: usize,
}

impl RowSelector {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            skip_leading: 0,
        }
    }

    pub fn skipping(mut self, rows: usize) -> Self {
        self.skip_leading = rows;
        self
    }
}

/// A located row plus its ordinal in the matched result set.
///
/// Only valid until the page mutates. Anything that outlives a remediation
/// action must keep `index` and re-resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowHandle {
    pub element: ElementHandle,
    pub index: usize,
}

/// A row whose text carried a failure marker at scan time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Best-effort item name; falls back to `Row_<index>`.
    pub identifier: String,

    /// Position in the matched row set at scan time.
    pub row_index: usize,

    /// Row text line carrying the marker.
    pub raw_status_text: String,

    /// The marker that matched.
    pub matched_marker: String,
}

impl FailedItem {
    /// Whether the identifier was synthesised from the row position, so the
    /// row text cannot confirm it.
    pub fn is_positional(&self) -> bool {
        self.identifier == crate::classifier::positional_identifier(self.row_index)
    }
}

/// Output of the prober + classifier pair. Produced once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub total_item_count: usize,
    pub matched_selector: RowSelector,
    pub failed_items: Vec<FailedItem>,
}

/// Outcome of a single remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    StillFailed,
    RowDisappeared,
    ActionNotFound,
    Error { message: String },
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::StillFailed => "still_failed",
            AttemptOutcome::RowDisappeared => "row_disappeared",
            AttemptOutcome::ActionNotFound => "action_not_found",
            AttemptOutcome::Error { .. } => "error",
        }
    }

    /// Whether the item no longer needs attention.
    pub fn is_resolved(&self) -> bool {
        matches!(self, AttemptOutcome::Success | AttemptOutcome::RowDisappeared)
    }
}

/// One remediation attempt for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub identifier: String,

    /// 1-based attempt number.
    pub attempt: u32,

    pub outcome: AttemptOutcome,

    /// Whether the remediation control was actually activated.
    pub action_triggered: bool,

    pub elapsed_ms: u64,
}

/// All attempts for one item and where the state machine ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResolution {
    pub identifier: String,
    pub row_index: usize,
    pub attempts: Vec<RetryAttempt>,
    pub final_outcome: AttemptOutcome,
}

impl ItemResolution {
    pub fn attempts_used(&self) -> u32 {
        self.attempts.len() as u32
    }

    pub fn actions_triggered(&self) -> u32 {
        self.attempts.iter().filter(|a| a.action_triggered).count() as u32
    }
}

/// Evidence captured for a failed item before remediation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvidence {
    pub row_index: usize,
    pub error_text: Option<String>,
    pub screenshot: Option<PathBuf>,
}
