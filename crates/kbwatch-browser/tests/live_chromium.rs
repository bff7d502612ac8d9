//! Smoke test against a real Chromium. Run with `--ignored` on a machine
//! that has one installed.

use std::time::Duration;

use kbwatch_browser::{launch, LaunchOptions};
use kbwatch_core::{BrowserFault, BrowserSession};

#[tokio::test]
#[ignore = "requires a local Chromium"]
async fn reads_a_data_url_table() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = launch(&LaunchOptions::default()).await.unwrap();

    let html = "data:text/html,<table><tbody>\
        <tr><td>a.pdf</td><td>完了</td></tr>\
        <tr><td>b.pdf</td><td>失敗</td></tr>\
        </tbody></table>";
    session.navigate(html, Duration::from_secs(30)).await.unwrap();

    let rows = session.locate_all("tbody tr").await.unwrap();
    assert_eq!(rows.len(), 2);
    let text = session.read_text(rows[1]).await.unwrap();
    assert!(text.contains("失敗"));

    let cells = session.locate_within(rows[0], "td").await.unwrap();
    assert_eq!(session.read_text(cells[0]).await.unwrap(), "a.pdf");

    let shot = session
        .screenshot(&dir.path().join("page.png"), true)
        .await
        .unwrap();
    assert!(shot.exists());

    session.navigate("about:blank", Duration::from_secs(30)).await.unwrap();
    assert!(matches!(
        session.read_text(rows[0]).await,
        Err(BrowserFault::StaleHandle(_))
    ));

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(matches!(
        session.current_url().await,
        Err(BrowserFault::Closed)
    ));
}
