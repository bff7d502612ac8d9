//! Row failure classification and identifier extraction.
//!
//! Both operations are pure functions over row text so they can be tested
//! without a browser.

use serde::{Deserialize, Serialize};

/// A configured set of locale synonyms, checked by membership.
///
/// Used both for failure markers ("失敗", "failed", ...) and for remediation
/// control labels ("再試行", "Retry", ...). Matching is a case-sensitive
/// substring test in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SynonymSet(Vec<String>);

impl SynonymSet {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(terms.into_iter().map(Into::into).collect())
    }

    /// First term contained in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        self.0
            .iter()
            .map(String::as_str)
            .find(|term| !term.is_empty() && text.contains(term))
    }

    pub fn contains_any(&self, text: &str) -> bool {
        self.find(text).is_some()
    }

    pub fn terms(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|t| t.is_empty())
    }
}

/// Failure markers are a synonym set over row status text.
pub type MarkerSet = SynonymSet;

/// Whether a row's text carries any failure marker.
pub fn is_failed(row_text: &str, markers: &MarkerSet) -> bool {
    markers.contains_any(row_text)
}

/// Marker hit for a failed row: which marker matched and on which line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHit {
    pub marker: String,
    pub status_line: String,
}

/// Find the marker in `row_text` along with the trimmed line carrying it.
pub fn find_marker(row_text: &str, markers: &MarkerSet) -> Option<MarkerHit> {
    let marker = markers.find(row_text)?;
    let status_line = row_text
        .lines()
        .map(str::trim)
        .find(|line| line.contains(marker))
        .unwrap_or(marker);
    Some(MarkerHit {
        marker: marker.to_string(),
        status_line: status_line.to_string(),
    })
}

/// Best-effort identifier for a row. Total and deterministic.
///
/// In order: the trimmed first cell text; the first field of the first
/// non-empty line that is not a header label; the first whitespace token of
/// the row; `Row_<index>`.
pub fn extract_identifier(
    first_cell: Option<&str>,
    row_text: &str,
    header_labels: &[String],
    index: usize,
) -> String {
    if let Some(cell) = first_cell.map(str::trim).filter(|c| !c.is_empty()) {
        return cell.to_string();
    }

    let from_lines = row_text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !header_labels.iter().any(|h| h == line))
        .find_map(|line| {
            let field = line.split('\t').next().unwrap_or(line).trim();
            (!field.is_empty()).then(|| field.to_string())
        });
    if let Some(id) = from_lines {
        return id;
    }

    if let Some(token) = row_text.split_whitespace().next() {
        return token.to_string();
    }

    positional_identifier(index)
}

/// Identifier given to a row nothing readable could name.
pub fn positional_identifier(index: usize) -> String {
    format!("Row_{index}")
}
