//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - A run-scoped tracing span, attached to the run future
//! - Emission functions for key lifecycle events: run start and finish,
//!   stage transitions, item resolution, notification delivery
//!
//! Events are emitted at `info!` level; filter with `RUST_LOG`.

use tracing::info;

/// Span tagged with the run_id. Attach it to the run future with
/// [`tracing::Instrument`] so every event inside carries the id.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("kbwatch.run", run_id = %run_id)
}

/// Emit event: run started against a target surface.
pub fn emit_run_started(run_id: &str, target: &str) {
    info!(event = "run.started", run_id = %run_id, target = %target);
}

/// Emit event: pipeline entered a stage.
pub fn emit_stage(run_id: &str, stage: &str) {
    info!(event = "run.stage", run_id = %run_id, stage = %stage);
}

/// Emit event: scan finished.
pub fn emit_scan_completed(run_id: &str, selector: &str, total_items: usize, failed_items: usize) {
    info!(
        event = "scan.completed",
        run_id = %run_id,
        selector = %selector,
        total_items = total_items,
        failed_items = failed_items,
    );
}

/// Emit event: an item's remediation reached a terminal state.
pub fn emit_item_resolved(identifier: &str, outcome: &str, attempts: u32) {
    info!(
        event = "item.resolved",
        item = %identifier,
        outcome = %outcome,
        attempts = attempts,
    );
}

/// Emit event: run finished with duration and terminal status.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, failed_items: usize, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        failed_items = failed_items,
        success = success,
    );
}

/// Emit event: run ended in a structural failure (warning level).
pub fn emit_run_failed(run_id: &str, tag: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.failed", run_id = %run_id, tag = %tag, error = %error);
}

/// Emit event: report delivered to a sink.
pub fn emit_notification_sent(run_id: &str, sink: &str, attachments: usize) {
    info!(
        event = "notify.sent",
        run_id = %run_id,
        sink = %sink,
        attachments = attachments,
    );
}

/// Emit event: notification delivery failed (warning level).
pub fn emit_notification_failed(run_id: &str, sink: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "notify.failed", run_id = %run_id, sink = %sink, error = %error);
}
