//! Browser automation capability consumed by the engine.
//!
//! The engine never talks to a concrete browser. Everything it needs from a
//! page goes through [`BrowserSession`]; the production implementation lives in
//! `kbwatch-browser`, and [`crate::fakes::FakeBrowser`] scripts one for tests.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::backoff::{classify_message, Classify, ErrorKind};

/// Opaque reference to an element located on the current page.
///
/// Handles carry the generation of the page they were located on. A session
/// bumps its generation whenever the document is replaced, after which older
/// handles are rejected with [`BrowserFault::StaleHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    id: u64,
    generation: u64,
}

impl ElementHandle {
    pub fn new(id: u64, generation: u64) -> Self {
        Self { id, generation }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Faults raised by a browser session.
#[derive(Debug, Error)]
pub enum BrowserFault {
    #[error("{operation} timeout after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("navigation to {url} failed: {details}")]
    Navigation { url: String, details: String },

    #[error("stale element handle {0}")]
    StaleHandle(u64),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("browser session is closed")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for BrowserFault {
    /// Navigation faults carry the target URL, which may contain anything;
    /// only the failure details are matched.
    fn error_kind(&self) -> ErrorKind {
        match self {
            BrowserFault::Timeout { .. } => ErrorKind::NetworkTimeout,
            BrowserFault::Navigation { details, .. } => classify_message("Navigation", details),
            BrowserFault::StaleHandle(_) | BrowserFault::Closed => ErrorKind::TransportCrashed,
            BrowserFault::Protocol(message) => classify_message("BrowserFault", message),
            BrowserFault::Io(e) => classify_message("io", &e.to_string()),
        }
    }
}

impl BrowserFault {
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        BrowserFault::Timeout {
            operation: operation.into(),
            secs: after.as_secs(),
        }
    }
}

/// Primitive page operations the engine is built on.
///
/// A session is owned by exactly one run at a time, hence `&mut self`
/// everywhere: no two stages may drive the page concurrently.
#[async_trait]
pub trait BrowserSession: Send {
    /// Load `url` and wait for it to settle, bounded by `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserFault>;

    /// URL of the current document.
    async fn current_url(&mut self) -> Result<String, BrowserFault>;

    /// All elements matching `selector`, in document order.
    async fn locate_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, BrowserFault>;

    /// Elements matching `selector` underneath `parent`, in document order.
    async fn locate_within(
        &mut self,
        parent: ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserFault>;

    /// Rendered text of an element.
    async fn read_text(&mut self, handle: ElementHandle) -> Result<String, BrowserFault>;

    /// Click an element.
    async fn activate(&mut self, handle: ElementHandle) -> Result<(), BrowserFault>;

    /// Move the pointer over an element.
    async fn hover(&mut self, handle: ElementHandle) -> Result<(), BrowserFault>;

    /// Type `text` into an input element.
    async fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<(), BrowserFault>;

    /// Write a screenshot to `path` and return the path written.
    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<PathBuf, BrowserFault>;

    /// Release the underlying browser. Idempotent.
    async fn close(&mut self) -> Result<(), BrowserFault>;
}

/// First element matched by the first candidate selector that matches anything.
///
/// Locate faults on individual candidates are logged and skipped.
pub async fn locate_first(
    session: &mut dyn BrowserSession,
    candidates: &[String],
) -> Option<(String, ElementHandle)> {
    for selector in candidates {
        match session.locate_all(selector).await {
            Ok(found) => {
                if let Some(handle) = found.first() {
                    return Some((selector.clone(), *handle));
                }
            }
            Err(e) => debug!(selector = %selector, error = %e, "candidate selector failed"),
        }
    }
    None
}

/// Like [`locate_first`], scoped to the subtree under `parent`.
pub async fn locate_first_within(
    session: &mut dyn BrowserSession,
    parent: ElementHandle,
    candidates: &[String],
) -> Option<(String, ElementHandle)> {
    for selector in candidates {
        match session.locate_within(parent, selector).await {
            Ok(found) => {
                if let Some(handle) = found.first() {
                    return Some((selector.clone(), *handle));
                }
            }
            Err(e) => debug!(selector = %selector, error = %e, "candidate selector failed"),
        }
    }
    None
}
