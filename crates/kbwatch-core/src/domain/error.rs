//! Error taxonomy for the run pipeline.

use crate::backoff::ErrorKind;
use crate::browser::BrowserFault;

/// Errors produced while scanning the result table.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("no result table found (tried: {})", tried.join(", "))]
    NoTableFound { tried: Vec<String> },

    #[error("browser fault during scan: {0}")]
    Browser(#[from] BrowserFault),
}

/// Terminal, run-level failures. Any of these ends the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("navigation to {target} failed after {attempts} attempt(s) ({kind}): {details}")]
    NavigationFailed {
        target: String,
        attempts: u32,
        kind: ErrorKind,
        details: String,
    },

    #[error("target link '{0}' not found")]
    LinkNotFound(String),

    #[error("no result table found (tried: {})", tried.join(", "))]
    NoTableFound { tried: Vec<String> },

    #[error("unexpected browser fault: {0}")]
    Browser(#[from] BrowserFault),
}

impl From<ScanError> for RunError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::NoTableFound { tried } => RunError::NoTableFound { tried },
            ScanError::Browser(fault) => RunError::Browser(fault),
        }
    }
}

impl RunError {
    /// Short machine-readable tag used in logs and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            RunError::LoginFailed(_) => "login_failed",
            RunError::NavigationFailed { .. } => "navigation_failed",
            RunError::LinkNotFound(_) => "link_not_found",
            RunError::NoTableFound { .. } => "no_table_found",
            RunError::Browser(_) => "browser_fault",
        }
    }
}

/// Errors raised by a notification sink.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("sink rejected report (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("attachment upload failed: {0}")]
    Upload(String),

    #[error("sink misconfigured: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
