//! Bounded per-item remediation.
//!
//! Each failed item walks a small state machine:
//!
//! ```text
//! PENDING -> ATTEMPTING(1) -> ... -> ATTEMPTING(max)
//!              |                         |
//!              +--> SUCCESS | ROW_DISAPPEARED | ACTION_UNAVAILABLE
//!                                        +--> STILL_FAILED | ERROR
//! ```
//!
//! Every attempt re-acquires the row through [`crate::prober::locate_item`];
//! handles never survive an attempt. Rows removed by earlier items shift the
//! expected index of every later one.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{locate_first_within, BrowserFault, BrowserSession, ElementHandle};
use crate::classifier::{MarkerSet, SynonymSet};
use crate::domain::{AttemptOutcome, FailedItem, ItemResolution, RetryAttempt, RowSelector};
use crate::metrics::METRICS;
use crate::obs;
use crate::prober::locate_item;

/// Longest error message kept on an [`AttemptOutcome::Error`].
pub const MAX_ERROR_CHARS: usize = 200;

/// Remediation policy for failed rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPolicy {
    /// Executions allowed per item, including the first.
    pub max_attempts: u32,

    /// Wait after activating the remediation control before re-reading the row.
    pub settle: Duration,

    /// Wait after opening a row menu before looking for its controls.
    pub menu_open_delay: Duration,

    /// Candidate menu triggers, searched inside the row.
    pub menu_selectors: Vec<String>,

    /// Candidate menu controls, searched on the whole page.
    pub action_selectors: Vec<String>,

    /// Labels identifying the remediation control.
    pub action_labels: SynonymSet,
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle: Duration::from_secs(2),
            menu_open_delay: Duration::from_millis(500),
            menu_selectors: vec![
                "[aria-haspopup=\"menu\"]".to_string(),
                ".ant-dropdown-trigger".to_string(),
                "button.more-actions".to_string(),
                "td:last-child button".to_string(),
            ],
            action_selectors: vec![
                "[role=\"menuitem\"]".to_string(),
                ".ant-dropdown-menu-item".to_string(),
                ".dropdown-item".to_string(),
            ],
            action_labels: SynonymSet::new([
                "再試行",
                "リトライ",
                "Retry",
                "再実行",
                "再処理",
                "Reprocess",
            ]),
        }
    }
}

/// Remediation state of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting(u32),
    Success,
    StillFailed,
    RowDisappeared,
    ActionUnavailable,
    Error(String),
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryState::Pending | RetryState::Attempting(_))
    }
}

/// Next state after observing `outcome` in `state`, with `max_attempts` total.
///
/// Terminal states absorb every outcome.
pub fn transition(state: &RetryState, outcome: &AttemptOutcome, max_attempts: u32) -> RetryState {
    let n = match state {
        RetryState::Pending => return RetryState::Attempting(1),
        RetryState::Attempting(n) => *n,
        terminal => return terminal.clone(),
    };

    match outcome {
        AttemptOutcome::Success => RetryState::Success,
        AttemptOutcome::RowDisappeared => RetryState::RowDisappeared,
        AttemptOutcome::ActionNotFound => RetryState::ActionUnavailable,
        AttemptOutcome::StillFailed if n >= max_attempts => RetryState::StillFailed,
        AttemptOutcome::Error { message } if n >= max_attempts => {
            RetryState::Error(message.clone())
        }
        AttemptOutcome::StillFailed | AttemptOutcome::Error { .. } => RetryState::Attempting(n + 1),
    }
}

/// Truncate to [`MAX_ERROR_CHARS`] characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_CHARS).collect()
}

/// Drives remediation for the failed items of one scan.
pub struct RetryEngine<'a> {
    policy: &'a RemediationPolicy,
    markers: &'a MarkerSet,
    selector: &'a RowSelector,
}

impl<'a> RetryEngine<'a> {
    pub fn new(
        policy: &'a RemediationPolicy,
        markers: &'a MarkerSet,
        selector: &'a RowSelector,
    ) -> Self {
        Self {
            policy,
            markers,
            selector,
        }
    }

    /// Resolve items one at a time, in the order given.
    pub async fn resolve_all(
        &self,
        session: &mut dyn BrowserSession,
        items: &[FailedItem],
    ) -> Vec<ItemResolution> {
        let mut resolutions = Vec::with_capacity(items.len());
        let mut vanished = 0;
        for item in items {
            let expected = item.row_index.saturating_sub(vanished);
            let resolution = self.resolve_item_at(session, item, expected).await;
            if resolution.final_outcome == AttemptOutcome::RowDisappeared {
                vanished += 1;
            }
            resolutions.push(resolution);
        }
        resolutions
    }

    /// Run the state machine for one item until it reaches a terminal state.
    pub async fn resolve_item(
        &self,
        session: &mut dyn BrowserSession,
        item: &FailedItem,
    ) -> ItemResolution {
        self.resolve_item_at(session, item, item.row_index).await
    }

    async fn resolve_item_at(
        &self,
        session: &mut dyn BrowserSession,
        item: &FailedItem,
        expected_index: usize,
    ) -> ItemResolution {
        let mut position = expected_index;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut state = transition(&RetryState::Pending, &AttemptOutcome::StillFailed, max_attempts);
        let mut last_outcome = AttemptOutcome::StillFailed;

        while let RetryState::Attempting(n) = state {
            let started = Instant::now();
            let (outcome, action_triggered) = self.attempt_once(session, item, &mut position).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if action_triggered {
                METRICS.inc_remediations_triggered();
            }
            debug!(
                item = %item.identifier,
                attempt = n,
                outcome = outcome.as_str(),
                action_triggered,
                "remediation attempt finished"
            );

            attempts.push(RetryAttempt {
                identifier: item.identifier.clone(),
                attempt: n,
                outcome: outcome.clone(),
                action_triggered,
                elapsed_ms,
            });
            state = transition(&state, &outcome, max_attempts);
            last_outcome = outcome;
        }

        let resolution = ItemResolution {
            identifier: item.identifier.clone(),
            row_index: item.row_index,
            attempts,
            final_outcome: last_outcome,
        };
        obs::emit_item_resolved(
            &item.identifier,
            resolution.final_outcome.as_str(),
            resolution.attempts_used(),
        );
        resolution
    }

    /// One attempt: open the row menu, activate the remediation control,
    /// settle, and re-read the row.
    ///
    /// `position` is where the row is expected and is updated when the row
    /// is found elsewhere. Returns the outcome and whether the control was
    /// activated.
    pub async fn attempt_once(
        &self,
        session: &mut dyn BrowserSession,
        item: &FailedItem,
        position: &mut usize,
    ) -> (AttemptOutcome, bool) {
        let mut triggered = false;
        match self.drive_attempt(session, item, position, &mut triggered).await {
            Ok(outcome) => (outcome, triggered),
            Err(fault) => {
                warn!(item = %item.identifier, error = %fault, "remediation attempt faulted");
                (
                    AttemptOutcome::Error {
                        message: truncate_error(&fault.to_string()),
                    },
                    triggered,
                )
            }
        }
    }

    async fn drive_attempt(
        &self,
        session: &mut dyn BrowserSession,
        item: &FailedItem,
        position: &mut usize,
        triggered: &mut bool,
    ) -> Result<AttemptOutcome, BrowserFault> {
        let Some(row) = locate_item(session, self.selector, item, *position).await? else {
            info!(item = %item.identifier, index = *position, "row no longer present");
            return Ok(AttemptOutcome::RowDisappeared);
        };
        *position = row.index;

        let Some((menu_selector, trigger)) =
            locate_first_within(session, row.element, &self.policy.menu_selectors).await
        else {
            info!(item = %item.identifier, "no row menu trigger found");
            return Ok(AttemptOutcome::ActionNotFound);
        };
        debug!(selector = %menu_selector, "opening row menu");
        session.activate(trigger).await?;
        tokio::time::sleep(self.policy.menu_open_delay).await;

        let Some((label, control)) = self.find_action_control(session).await? else {
            info!(item = %item.identifier, "no remediation control in menu");
            return Ok(AttemptOutcome::ActionNotFound);
        };
        info!(item = %item.identifier, label = %label, "triggering remediation");
        session.activate(control).await?;
        *triggered = true;
        tokio::time::sleep(self.policy.settle).await;

        let Some(row) = locate_item(session, self.selector, item, *position).await? else {
            return Ok(AttemptOutcome::RowDisappeared);
        };
        *position = row.index;
        let text = session.read_text(row.element).await?;
        if self.markers.contains_any(&text) {
            Ok(AttemptOutcome::StillFailed)
        } else {
            Ok(AttemptOutcome::Success)
        }
    }

    /// First visible control whose text carries a remediation label.
    async fn find_action_control(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<Option<(String, ElementHandle)>, BrowserFault> {
        for selector in &self.policy.action_selectors {
            let controls = match session.locate_all(selector).await {
                Ok(found) => found,
                Err(e) => {
                    debug!(selector = %selector, error = %e, "action selector failed");
                    continue;
                }
            };
            for control in controls {
                let text = session.read_text(control).await?;
                if let Some(label) = self.policy.action_labels.find(&text) {
                    return Ok(Some((label.to_string(), control)));
                }
            }
        }
        Ok(None)
    }
}
