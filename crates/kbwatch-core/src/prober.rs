//! Fallback search for the result table's rows.
//!
//! Consoles render the same listing through different markup depending on
//! version and viewport, so rows are found by trying an ordered list of
//! [`RowSelector`]s and taking the first one that matches anything.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::browser::{BrowserFault, BrowserSession};
use crate::domain::{FailedItem, RowHandle, RowSelector, ScanError};

/// The selector that matched and the rows it produced.
#[derive(Debug, Clone)]
pub struct ProbeMatch {
    pub selector: RowSelector,
    pub rows: Vec<RowHandle>,
}

/// Default candidates, most specific first.
pub fn default_row_selectors() -> Vec<RowSelector> {
    vec![
        RowSelector::new("tbody tr"),
        RowSelector::new(".ant-table-row"),
        RowSelector::new("[data-row-key]"),
        RowSelector::new(".list-item"),
        RowSelector::new("[role=\"row\"]").skipping(1),
    ]
}

/// Rows currently matched by `selector`, indexed after skipping leading rows.
///
/// This is the only way rows are (re-)acquired: handles from an earlier call
/// must not be reused once the page may have changed.
pub async fn resolve_rows(
    session: &mut dyn BrowserSession,
    selector: &RowSelector,
) -> Result<Vec<RowHandle>, BrowserFault> {
    let found = session.locate_all(&selector.pattern).await?;
    Ok(found
        .into_iter()
        .skip(selector.skip_leading)
        .enumerate()
        .map(|(index, element)| RowHandle { element, index })
        .collect())
}

/// Re-acquire the row at `index`, or `None` if the table no longer has it.
pub async fn resolve_row(
    session: &mut dyn BrowserSession,
    selector: &RowSelector,
    index: usize,
) -> Result<Option<RowHandle>, BrowserFault> {
    let rows = resolve_rows(session, selector).await?;
    Ok(rows.into_iter().nth(index))
}

/// Re-acquire the row holding `item`, expected at `expected_index`.
///
/// The row at `expected_index` is taken when its text still carries the
/// item's identifier. Otherwise every row is searched for it, so a shifted
/// table never hands back a neighbour. `None` means the item is gone.
/// Positional identifiers cannot be checked and resolve by index alone.
pub async fn locate_item(
    session: &mut dyn BrowserSession,
    selector: &RowSelector,
    item: &FailedItem,
    expected_index: usize,
) -> Result<Option<RowHandle>, BrowserFault> {
    let rows = resolve_rows(session, selector).await?;
    if item.is_positional() {
        return Ok(rows.into_iter().nth(expected_index));
    }

    if let Some(row) = rows.get(expected_index) {
        if session.read_text(row.element).await?.contains(&item.identifier) {
            return Ok(Some(*row));
        }
    }
    for row in &rows {
        if row.index == expected_index {
            continue;
        }
        if session.read_text(row.element).await?.contains(&item.identifier) {
            debug!(
                item = %item.identifier,
                from = expected_index,
                to = row.index,
                "row moved"
            );
            return Ok(Some(*row));
        }
    }
    Ok(None)
}

/// Return the first candidate with a non-empty match.
///
/// A pattern is tried at most once per call. A locate fault on one candidate
/// is logged and counted as zero matches.
pub async fn probe(
    session: &mut dyn BrowserSession,
    candidates: &[RowSelector],
) -> Result<ProbeMatch, ScanError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut tried = Vec::new();

    for candidate in candidates {
        if !seen.insert(candidate.pattern.as_str()) {
            debug!(selector = %candidate.pattern, "duplicate selector skipped");
            continue;
        }
        tried.push(candidate.pattern.clone());

        let rows = match resolve_rows(session, candidate).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(selector = %candidate.pattern, error = %e, "selector probe failed");
                continue;
            }
        };

        if rows.is_empty() {
            debug!(selector = %candidate.pattern, "no rows matched");
            continue;
        }

        info!(selector = %candidate.pattern, rows = rows.len(), "result table found");
        return Ok(ProbeMatch {
            selector: candidate.clone(),
            rows,
        });
    }

    Err(ScanError::NoTableFound { tried })
}
