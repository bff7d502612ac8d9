//! End-to-end runs against the scripted browser.

use std::path::Path;
use std::time::Duration;

use kbwatch_core::fakes::{FailingSink, FakeBrowser, FakeRow, RecordingSink, RemediationEffect};
use kbwatch_core::{
    AttemptOutcome, BrowserSession, Credentials, ReportStatus, RunContext, RunOrchestrator,
    RunStatus,
};
use tempfile::tempdir;

const BASE: &str = "https://console.example";
const FILES: &str = "https://console.example/kb/files";

fn context(shots: &Path) -> RunContext {
    let mut ctx = RunContext::new(BASE);
    ctx.target.scan_url = Some(FILES.to_string());
    ctx.evidence.directory = shots.to_path_buf();
    ctx
}

fn healthy(i: usize) -> FakeRow {
    FakeRow::new(format!("doc{i}.pdf\tPDF\t完了")).with_first_cell(format!("doc{i}.pdf"))
}

#[tokio::test(start_paused = true)]
async fn scenario_a_no_table_sends_one_error_report() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new();

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.result.status, RunStatus::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome
        .result
        .error
        .as_deref()
        .unwrap()
        .contains("no result table found"));

    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].report.status, ReportStatus::Error);
    // Diagnostic screenshot travels with the error report.
    assert_eq!(deliveries[0].attachments.len(), 1);
    assert!(deliveries[0].attachments[0].file_name.contains("diagnostic"));
}

#[tokio::test(start_paused = true)]
async fn scenario_b_two_failures_remediated_first_try() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();

    let mut rows: Vec<FakeRow> = (0..10).map(healthy).collect();
    rows[2] = FakeRow::new("doc2.pdf\tPDF\tfailed")
        .with_first_cell("doc2.pdf")
        .on_remediate([RemediationEffect::Recover]);
    rows[7] = FakeRow::new("doc7.pdf\tPDF\tfailed")
        .with_first_cell("doc7.pdf")
        .on_remediate([RemediationEffect::Recover]);
    let mut browser = FakeBrowser::new().with_rows("tbody tr", rows);

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;
    let result = &outcome.result;

    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(result.total_items, 10);
    assert_eq!(result.failed_items.len(), 2);
    for (report, expected) in result.failed_items.iter().zip(["doc2.pdf", "doc7.pdf"]) {
        assert_eq!(report.item.identifier, expected);
        let resolution = report.resolution.as_ref().unwrap();
        assert_eq!(resolution.final_outcome, AttemptOutcome::Success);
        assert_eq!(resolution.attempts_used(), 1);
    }
    assert_eq!(result.retries_triggered, 2);
    assert_eq!(result.unresolved_count(), 0);
    assert_eq!(browser.remediations(), 2);

    let deliveries = sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].report.status, ReportStatus::HasFailures);
    // status + one screenshot per failed item
    assert_eq!(deliveries[0].attachments.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_missing_control_is_action_unavailable() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new().with_rows(
        "tbody tr",
        vec![
            healthy(0),
            FakeRow::new("doc1.pdf\tPDF\t失敗").without_menu(),
        ],
    );

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.exit_code(), 0);
    let resolution = outcome.result.failed_items[0].resolution.as_ref().unwrap();
    assert_eq!(resolution.final_outcome, AttemptOutcome::ActionNotFound);
    assert_eq!(resolution.attempts_used(), 1);
    assert_eq!(outcome.result.retries_triggered, 0);
    assert_eq!(sink.deliveries().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_d_navigation_backoff_delays() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new()
        .with_rows("tbody tr", vec![healthy(0)])
        .failing_navigation_to(FILES, 4);

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.result.error.as_deref().unwrap().contains("network_timeout"));

    let navigations = browser.navigations();
    let times = browser.navigation_times();
    let to_files: Vec<_> = navigations
        .iter()
        .zip(times)
        .filter(|(url, _)| url.as_str() == FILES)
        .map(|(_, at)| at)
        .collect();
    assert_eq!(to_files.len(), 4);
    let delays: Vec<Duration> = to_files.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4)
        ]
    );
    assert_eq!(sink.deliveries()[0].report.status, ReportStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn clean_table_reports_ok() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new().with_rows("tbody tr", (0..3).map(healthy).collect());

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.exit_code(), 0);
    assert!(!outcome.result.has_failures());
    let deliveries = sink.deliveries();
    assert_eq!(deliveries[0].report.status, ReportStatus::Ok);
    assert_eq!(deliveries[0].report.total_items, 3);
}

#[tokio::test(start_paused = true)]
async fn login_then_scan_through_navigation_path() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new()
        .with_login("ops@example.com", "s3cret", "https://console.example/home")
        .with_link("ファイルとドキュメント", FILES)
        .with_rows("tbody tr", vec![healthy(0), healthy(1)]);

    let mut ctx = RunContext::new(BASE);
    ctx.evidence.directory = dir.path().to_path_buf();
    ctx.target.navigation_path = vec!["ファイルとドキュメント".to_string()];
    ctx.credentials = Some(Credentials::new("ops@example.com", "s3cret"));

    let outcome = RunOrchestrator::new(ctx, &sink).run(&mut browser).await;

    assert_eq!(outcome.exit_code(), 0, "{:?}", outcome.result.error);
    assert!(browser.is_logged_in());
    assert_eq!(browser.current_url().await.unwrap(), FILES);
    assert_eq!(outcome.result.total_items, 2);
}

#[tokio::test(start_paused = true)]
async fn notification_failure_does_not_change_exit_code() {
    let dir = tempdir().unwrap();
    let sink = FailingSink::new();
    let mut browser = FakeBrowser::new().with_rows("tbody tr", vec![healthy(0)]);

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.exit_code(), 0);
    assert!(!outcome.delivered);
    assert!(outcome.notify_error.unwrap().contains("connection refused"));
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_remediation_reports_without_touching_rows() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new().with_rows(
        "tbody tr",
        vec![FakeRow::new("doc0.pdf\t失敗").on_remediate([RemediationEffect::Recover])],
    );
    let mut ctx = context(dir.path());
    ctx.remediation_enabled = false;

    let outcome = RunOrchestrator::new(ctx, &sink).run(&mut browser).await;

    assert_eq!(outcome.result.failed_items.len(), 1);
    assert!(outcome.result.failed_items[0].resolution.is_none());
    assert_eq!(browser.remediations(), 0);
}

#[tokio::test(start_paused = true)]
async fn screenshot_failures_are_not_terminal() {
    let dir = tempdir().unwrap();
    let sink = RecordingSink::new();
    let mut browser = FakeBrowser::new()
        .with_rows(
            "tbody tr",
            vec![FakeRow::new("doc0.pdf\t失敗").on_remediate([RemediationEffect::Recover])],
        )
        .failing_screenshots();

    let outcome = RunOrchestrator::new(context(dir.path()), &sink)
        .run(&mut browser)
        .await;

    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.result.screenshots.is_empty());
    assert!(sink.deliveries()[0].attachments.is_empty());
}
