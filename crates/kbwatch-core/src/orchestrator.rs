//! One monitoring run, end to end.
//!
//! Login -> navigate -> scan -> status screenshot -> per-item evidence ->
//! remediation -> assemble -> notify. Structural failures stop the pipeline
//! but still produce a [`RunResult`] and exactly one notification.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, warn, Instrument};

use crate::access;
use crate::browser::BrowserSession;
use crate::context::RunContext;
use crate::domain::{
    FailedItemReport, ItemEvidence, ItemResolution, RunError, RunResult, RunStatus, ScanError,
    ScanOutcome,
};
use crate::evidence;
use crate::metrics::METRICS;
use crate::notify::{self, NotificationSink};
use crate::obs;
use crate::retry_engine::RetryEngine;
use crate::scan;

/// What the pipeline learned before it finished or stopped.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    pub scan: Option<ScanOutcome>,

    /// Page-level screenshots (status, diagnostic) in capture order.
    pub screenshots: Vec<PathBuf>,

    /// Evidence per failed item, in scan order.
    pub evidence: Vec<ItemEvidence>,

    /// Remediation result per failed item, in scan order.
    pub resolutions: Vec<ItemResolution>,
}

/// A finished run and how its notification went.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub result: RunResult,
    pub delivered: bool,
    pub notify_error: Option<String>,

    /// Wall time including notification delivery.
    pub wall_time: Duration,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code()
    }
}

/// Fold progress into the immutable run summary.
///
/// Pure: the same inputs always produce the same [`RunResult`].
pub fn assemble_result(
    ctx: &RunContext,
    progress: &RunProgress,
    error: Option<&RunError>,
    elapsed: Duration,
) -> RunResult {
    let failed_items: Vec<FailedItemReport> = progress
        .scan
        .as_ref()
        .map(|scan| {
            scan.failed_items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    let evidence = progress
                        .evidence
                        .get(i)
                        .filter(|e| e.row_index == item.row_index);
                    FailedItemReport {
                        item: item.clone(),
                        error_text: evidence.and_then(|e| e.error_text.clone()),
                        screenshot: evidence.and_then(|e| e.screenshot.clone()),
                        resolution: progress
                            .resolutions
                            .get(i)
                            .filter(|r| r.row_index == item.row_index)
                            .cloned(),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let mut screenshots = progress.screenshots.clone();
    screenshots.extend(failed_items.iter().filter_map(|f| f.screenshot.clone()));

    let retries_triggered = progress
        .resolutions
        .iter()
        .map(ItemResolution::actions_triggered)
        .sum();

    RunResult {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at,
        status: if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        },
        total_items: progress
            .scan
            .as_ref()
            .map(|s| s.total_item_count)
            .unwrap_or(0),
        matched_selector: progress
            .scan
            .as_ref()
            .map(|s| s.matched_selector.pattern.clone()),
        failed_items,
        screenshots,
        retries_triggered,
        execution_time_ms: elapsed.as_millis() as u64,
        error: error.map(|e| e.to_string()),
    }
}

/// Drives one run against a borrowed browser session.
pub struct RunOrchestrator<'a> {
    ctx: RunContext,
    sink: &'a dyn NotificationSink,
}

impl<'a> RunOrchestrator<'a> {
    pub fn new(ctx: RunContext, sink: &'a dyn NotificationSink) -> Self {
        Self { ctx, sink }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Run the pipeline and deliver its report. Consumes the orchestrator so
    /// a run can be reported at most once.
    pub async fn run(self, session: &mut dyn BrowserSession) -> RunOutcome {
        let span = obs::run_span(&self.ctx.run_id);
        self.run_inner(session).instrument(span).await
    }

    async fn run_inner(self, session: &mut dyn BrowserSession) -> RunOutcome {
        let started = Instant::now();
        obs::emit_run_started(&self.ctx.run_id, self.ctx.target.describe());

        let mut progress = RunProgress::default();
        let error = self.drive(session, &mut progress).await.err();
        if let Some(e) = &error {
            obs::emit_run_failed(&self.ctx.run_id, e.tag(), e);
        }

        let result = assemble_result(&self.ctx, &progress, error.as_ref(), started.elapsed());

        obs::emit_stage(&self.ctx.run_id, "notify");
        let delivery = notify::deliver(self.sink, &result).await;

        obs::emit_run_finished(
            &self.ctx.run_id,
            result.execution_time_ms,
            result.failed_items.len(),
            result.status == RunStatus::Completed,
        );
        METRICS.flush();

        RunOutcome {
            delivered: delivery.is_ok(),
            notify_error: delivery.err().map(|e| e.to_string()),
            result,
            wall_time: started.elapsed(),
        }
    }

    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        progress: &mut RunProgress,
    ) -> Result<(), RunError> {
        let ctx = &self.ctx;

        obs::emit_stage(&ctx.run_id, "login");
        access::login(
            session,
            &ctx.target,
            ctx.credentials.as_ref(),
            &ctx.login,
            &ctx.backoff,
            ctx.navigation_timeout,
        )
        .await?;

        obs::emit_stage(&ctx.run_id, "navigate");
        access::open_surface(session, &ctx.target, &ctx.backoff, ctx.navigation_timeout).await?;
        tokio::time::sleep(ctx.scan.settle_after_navigation).await;

        obs::emit_stage(&ctx.run_id, "scan");
        let outcome = match scan::scan(session, &ctx.scan, &ctx.markers).await {
            Ok(outcome) => outcome,
            Err(e @ ScanError::NoTableFound { .. }) => {
                if let Some(path) =
                    evidence::capture_diagnostic(session, &ctx.evidence, chrono::Utc::now()).await
                {
                    progress.screenshots.push(path);
                }
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };
        obs::emit_scan_completed(
            &ctx.run_id,
            &outcome.matched_selector.pattern,
            outcome.total_item_count,
            outcome.failed_items.len(),
        );
        let selector = outcome.matched_selector.clone();
        let items = outcome.failed_items.clone();
        progress.scan = Some(outcome);

        obs::emit_stage(&ctx.run_id, "evidence");
        match evidence::capture_status(session, &ctx.evidence, chrono::Utc::now()).await {
            Ok(path) => progress.screenshots.push(path),
            Err(e) => warn!(error = %e, "status screenshot failed"),
        }
        for (i, item) in items.iter().enumerate() {
            let captured = evidence::capture_item(
                session,
                &ctx.evidence,
                &selector,
                item,
                i + 1,
                chrono::Utc::now(),
            )
            .await;
            progress.evidence.push(captured);
        }

        if items.is_empty() {
            info!("no failed items");
            return Ok(());
        }
        if !ctx.remediation_enabled {
            info!(failed = items.len(), "remediation disabled, reporting only");
            return Ok(());
        }

        obs::emit_stage(&ctx.run_id, "remediate");
        let engine = RetryEngine::new(&ctx.remediation, &ctx.markers, &selector);
        progress.resolutions = engine.resolve_all(session, &items).await;
        Ok(())
    }
}
