//! The aggregate result of one run.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::item::{FailedItem, ItemResolution};

/// Terminal status of a run.
///
/// `Completed` covers runs that found (and possibly failed to fix) item
/// failures; only structural problems make a run `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// A failed item with everything learned about it during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItemReport {
    pub item: FailedItem,
    pub error_text: Option<String>,
    pub screenshot: Option<PathBuf>,
    pub resolution: Option<ItemResolution>,
}

impl FailedItemReport {
    pub fn is_resolved(&self) -> bool {
        self.resolution
            .as_ref()
            .map(|r| r.final_outcome.is_resolved())
            .unwrap_or(false)
    }
}

/// Immutable summary of a run; the single artifact handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub total_items: usize,
    pub matched_selector: Option<String>,
    pub failed_items: Vec<FailedItemReport>,
    pub screenshots: Vec<PathBuf>,
    pub retries_triggered: u32,
    pub execution_time_ms: u64,
    pub error: Option<String>,
}

/// Fields of a [`RunResult`] that are stable across re-assembly.
#[derive(Serialize)]
struct StableView<'a> {
    run_id: &'a str,
    status: RunStatus,
    total_items: usize,
    matched_selector: &'a Option<String>,
    failed_items: &'a [FailedItemReport],
    screenshots: &'a [PathBuf],
    retries_triggered: u32,
    error: &'a Option<String>,
}

impl RunResult {
    pub fn has_failures(&self) -> bool {
        !self.failed_items.is_empty()
    }

    /// Failed items that remediation did not clear.
    pub fn unresolved_count(&self) -> usize {
        self.failed_items.iter().filter(|i| !i.is_resolved()).count()
    }

    /// Process exit code for this run: 0 completed, 1 system failure.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Completed => 0,
            RunStatus::Failed => 1,
        }
    }

    /// Canonical JSON of everything except timing fields.
    pub fn stable_json(&self) -> Vec<u8> {
        let view = StableView {
            run_id: &self.run_id,
            status: self.status,
            total_items: self.total_items,
            matched_selector: &self.matched_selector,
            failed_items: &self.failed_items,
            screenshots: &self.screenshots,
            retries_triggered: self.retries_triggered,
            error: &self.error,
        };
        // Plain structs and strings only; serialization cannot fail here.
        serde_json::to_vec(&view).unwrap_or_default()
    }

    /// SHA-256 over [`RunResult::stable_json`], hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.stable_json()))
    }
}
