//! kbwatch Core Library
//!
//! Scan, classify, retry and report engine for watching a web console's
//! document-ingestion table. The browser and the chat transport are plugged
//! in through [`BrowserSession`] and [`NotificationSink`].

pub mod access;
pub mod backoff;
pub mod browser;
pub mod classifier;
pub mod config;
pub mod context;
pub mod domain;
pub mod evidence;
pub mod fakes;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod orchestrator;
pub mod prober;
pub mod retry_engine;
pub mod scan;
pub mod secret;
pub mod telemetry;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use access::{login, navigate_with_backoff, open_surface, LoginSettings, TargetSurface};
pub use backoff::{
    classify, classify_message, BackoffPolicy, Classify, ErrorKind, Retried, MAX_BACKOFF,
};
pub use browser::{BrowserFault, BrowserSession, ElementHandle};
pub use classifier::{extract_identifier, is_failed, MarkerSet, SynonymSet};
pub use config::{AppConfig, ConfigError, LarkSection};
pub use context::RunContext;
pub use domain::{
    AttemptOutcome, FailedItem, FailedItemReport, ItemEvidence, ItemResolution, NotifyError,
    RetryAttempt, RowHandle, RowSelector, RunError, RunResult, RunStatus, ScanError, ScanOutcome,
};
pub use evidence::{EvidenceSettings, ScreenshotFormat};
pub use metrics::METRICS;
pub use notify::{
    deliver, Attachment, LogSink, NotificationSink, ReportItem, ReportStatus, RunReport,
    MAX_ATTACHMENTS,
};
pub use obs::{
    emit_item_resolved, emit_notification_failed, emit_notification_sent, emit_run_failed,
    emit_run_finished, emit_run_started, emit_scan_completed, emit_stage, run_span,
};
pub use orchestrator::{assemble_result, RunOrchestrator, RunOutcome, RunProgress};
pub use prober::{locate_item, probe, resolve_row, resolve_rows, ProbeMatch};
pub use retry_engine::{transition, RemediationPolicy, RetryEngine, RetryState};
pub use scan::{scan, ScanSettings};
pub use secret::{Credentials, Secret};
