//! LarkNotifier against an in-process mock of the open API and webhook.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use kbwatch_core::{
    Attachment, LarkSection, NotificationSink, NotifyError, ReportItem, ReportStatus, RunReport,
    Secret,
};
use kbwatch_lark::{LarkConfig, LarkNotifier};
use serde_json::{json, Value};

#[derive(Default)]
struct Mock {
    hook_code: i64,
    token_calls: AtomicUsize,
    uploads: AtomicUsize,
    bad_auth: AtomicUsize,
    cards: Mutex<Vec<Value>>,
}

async fn token(State(mock): State<Arc<Mock>>, Json(body): Json<Value>) -> Json<Value> {
    mock.token_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["app_id"], "cli_test");
    Json(json!({ "code": 0, "msg": "ok", "tenant_access_token": "t-123", "expire": 7200 }))
}

async fn upload(State(mock): State<Arc<Mock>>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer t-123");
    if !authorized {
        mock.bad_auth.fetch_add(1, Ordering::SeqCst);
        return Json(json!({ "code": 99991663, "msg": "invalid access token" }));
    }
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("name=\"image_type\""));
    assert!(text.contains("message"));
    let n = mock.uploads.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({ "code": 0, "msg": "success", "data": { "image_key": format!("img_{n}") } }))
}

async fn hook(State(mock): State<Arc<Mock>>, Json(card): Json<Value>) -> Json<Value> {
    mock.cards.lock().unwrap().push(card);
    if mock.hook_code == 0 {
        Json(json!({ "code": 0, "msg": "success", "data": {} }))
    } else {
        Json(json!({ "code": mock.hook_code, "msg": "Bad Request" }))
    }
}

async fn serve(mock: Arc<Mock>) -> String {
    let app = Router::new()
        .route("/open-apis/auth/v3/tenant_access_token/internal", post(token))
        .route("/open-apis/im/v1/images", post(upload))
        .route("/hook", post(hook))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn notifier(base: &str, with_app: bool) -> LarkNotifier {
    let section = LarkSection {
        api_base: Some(format!("{base}/open-apis")),
        ..LarkSection::default()
    };
    let (app_id, app_secret) = if with_app {
        (Some("cli_test".to_string()), Some(Secret::new("shh")))
    } else {
        (None, None)
    };
    let config = LarkConfig::from_section(
        &section,
        Secret::new(format!("{base}/hook")),
        app_id,
        app_secret,
    );
    LarkNotifier::new(config).unwrap()
}

fn report() -> RunReport {
    RunReport {
        run_id: "run-42".to_string(),
        started_at: Utc::now(),
        status: ReportStatus::HasFailures,
        total_items: 8,
        failed_count: 1,
        unresolved_count: 0,
        items: vec![ReportItem {
            identifier: "guide.pdf".to_string(),
            status_text: "失敗".to_string(),
            error_text: Some("embedding quota exceeded".to_string()),
            screenshot: None,
            outcome: Some("success".to_string()),
            attempts: 1,
        }],
        retries_triggered: 1,
        execution_time_ms: 4200,
        error: None,
        screenshots: vec![PathBuf::from("status.png"), PathBuf::from("error_1.png")],
    }
}

fn attachments() -> Vec<Attachment> {
    ["status.png", "error_1.png"]
        .iter()
        .map(|name| Attachment {
            path: PathBuf::from(name),
            file_name: name.to_string(),
            bytes: b"\x89PNG\r\n\x1a\nfake".to_vec(),
        })
        .collect()
}

fn images(card: &Value) -> Vec<String> {
    card["card"]["elements"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["tag"] == "img")
        .map(|e| e["img_key"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn uploads_screenshots_and_posts_card() {
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;
    let sink = notifier(&base, true);

    sink.send(&report(), &attachments()).await.unwrap();

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1, "token is cached");
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(mock.bad_auth.load(Ordering::SeqCst), 0);

    let cards = mock.cards.lock().unwrap().clone();
    assert_eq!(cards.len(), 1);
    assert_eq!(images(&cards[0]), vec!["img_1", "img_2"]);
    assert_eq!(cards[0]["card"]["header"]["template"], "red");
}

#[tokio::test]
async fn token_is_reused_across_reports() {
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;
    let sink = notifier(&base, true);

    sink.send(&report(), &attachments()).await.unwrap();
    sink.send(&report(), &attachments()).await.unwrap();

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 1);
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn without_app_credentials_screenshots_stay_local() {
    let mock = Arc::new(Mock::default());
    let base = serve(mock.clone()).await;
    let sink = notifier(&base, false);

    sink.send(&report(), &attachments()).await.unwrap();

    assert_eq!(mock.token_calls.load(Ordering::SeqCst), 0);
    assert_eq!(mock.uploads.load(Ordering::SeqCst), 0);
    let cards = mock.cards.lock().unwrap().clone();
    assert!(images(&cards[0]).is_empty());
    assert!(cards[0].to_string().contains("saved locally"));
}

#[tokio::test]
async fn non_zero_webhook_code_is_rejection() {
    let mock = Arc::new(Mock {
        hook_code: 9499,
        ..Mock::default()
    });
    let base = serve(mock.clone()).await;
    let sink = notifier(&base, false);

    let err = sink.send(&report(), &[]).await.unwrap_err();
    assert!(matches!(err, NotifyError::Rejected { code: 9499, .. }));
}

#[tokio::test]
async fn unreachable_webhook_is_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let sink = notifier(&base, false);

    let err = sink.send(&report(), &[]).await.unwrap_err();
    assert!(matches!(err, NotifyError::Transport(_)));
}
