//! Reaching the result surface: form login and navigation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backoff::{BackoffPolicy, ErrorKind};
use crate::browser::{locate_first, BrowserFault, BrowserSession, ElementHandle};
use crate::domain::RunError;
use crate::secret::Credentials;

/// Where the result table lives and how to get there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSurface {
    pub base_url: String,

    /// Direct URL of the result table. Takes precedence over `navigation_path`.
    pub scan_url: Option<String>,

    /// Link texts clicked in order, starting from the post-login page.
    pub navigation_path: Vec<String>,

    /// Elements considered clickable links when following `navigation_path`.
    pub link_selectors: Vec<String>,

    /// Pause after each link click.
    pub step_delay: Duration,
}

impl TargetSurface {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            scan_url: None,
            navigation_path: Vec::new(),
            link_selectors: default_link_selectors(),
            step_delay: Duration::from_secs(2),
        }
    }

    /// Human-readable target for logs.
    pub fn describe(&self) -> &str {
        self.scan_url.as_deref().unwrap_or(&self.base_url)
    }
}

pub fn default_link_selectors() -> Vec<String> {
    ["a", "[role=\"link\"]", "[role=\"tab\"]", "[role=\"menuitem\"]", "button"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Form login selectors and completion polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginSettings {
    pub username_selectors: Vec<String>,
    pub password_selectors: Vec<String>,
    pub submit_selectors: Vec<String>,

    /// URL fragments meaning "still on the login page".
    pub pending_url_markers: Vec<String>,

    pub completion_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for LoginSettings {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            username_selectors: owned(&[
                "input[type=\"email\"]",
                "input[name=\"username\"]",
                "input[name=\"email\"]",
                "input#email",
            ]),
            password_selectors: owned(&[
                "input[type=\"password\"]",
                "input[name=\"password\"]",
                "input#password",
            ]),
            submit_selectors: owned(&["button[type=\"submit\"]", "input[type=\"submit\"]"]),
            pending_url_markers: owned(&["login", "auth0.com"]),
            completion_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl LoginSettings {
    pub fn is_pending(&self, url: &str) -> bool {
        self.pending_url_markers.iter().any(|m| url.contains(m.as_str()))
    }
}

/// Navigate to `url`, retrying transient faults under `policy`.
pub async fn navigate_with_backoff(
    session: &mut dyn BrowserSession,
    url: &str,
    policy: &BackoffPolicy,
    timeout: Duration,
) -> Result<(), RunError> {
    let owned = url.to_string();
    let retried = policy
        .retry_with_backoff("navigate", session, move |s| {
            let url = owned.clone();
            Box::pin(async move { s.navigate(&url, timeout).await })
        })
        .await;

    match retried.outcome {
        Ok(()) => Ok(()),
        Err(fault) => Err(RunError::NavigationFailed {
            target: url.to_string(),
            attempts: retried.attempts,
            kind: retried.last_kind.unwrap_or(ErrorKind::Unknown),
            details: fault.to_string(),
        }),
    }
}

/// Log in through the console's form, if the console asks for it.
///
/// Without credentials a login page is a terminal failure; a console that
/// does not redirect to login is accepted as-is.
pub async fn login(
    session: &mut dyn BrowserSession,
    target: &TargetSurface,
    credentials: Option<&Credentials>,
    settings: &LoginSettings,
    backoff: &BackoffPolicy,
    timeout: Duration,
) -> Result<(), RunError> {
    navigate_with_backoff(session, &target.base_url, backoff, timeout)
        .await
        .map_err(|e| RunError::LoginFailed(e.to_string()))?;

    let url = session.current_url().await?;
    if !settings.is_pending(&url) {
        info!("no login required");
        return Ok(());
    }
    let Some(credentials) = credentials else {
        return Err(RunError::LoginFailed(
            "console requires login but no credentials are configured".to_string(),
        ));
    };

    let username = required(session, &settings.username_selectors, "username field").await?;
    let password = required(session, &settings.password_selectors, "password field").await?;
    let submit = required(session, &settings.submit_selectors, "submit control").await?;

    info!(username = %credentials.username.hint(), "submitting login form");
    session.fill(username, credentials.username.expose()).await?;
    session.fill(password, credentials.password.expose()).await?;
    session.activate(submit).await?;

    wait_for_login(session, settings).await
}

async fn required(
    session: &mut dyn BrowserSession,
    candidates: &[String],
    what: &str,
) -> Result<ElementHandle, RunError> {
    locate_first(session, candidates)
        .await
        .map(|(_, handle)| handle)
        .ok_or_else(|| RunError::LoginFailed(format!("{what} not found")))
}

async fn wait_for_login(
    session: &mut dyn BrowserSession,
    settings: &LoginSettings,
) -> Result<(), RunError> {
    let deadline = tokio::time::Instant::now() + settings.completion_timeout;
    loop {
        let url = session.current_url().await?;
        if !settings.is_pending(&url) {
            info!(url = %url, "login complete");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RunError::LoginFailed(format!(
                "still on login page after {}s",
                settings.completion_timeout.as_secs()
            )));
        }
        tokio::time::sleep(settings.poll_interval).await;
    }
}

/// Bring the session to the result table.
pub async fn open_surface(
    session: &mut dyn BrowserSession,
    target: &TargetSurface,
    backoff: &BackoffPolicy,
    timeout: Duration,
) -> Result<(), RunError> {
    if let Some(scan_url) = &target.scan_url {
        info!(url = %scan_url, "navigating directly to result surface");
        return navigate_with_backoff(session, scan_url, backoff, timeout).await;
    }

    for label in &target.navigation_path {
        let link = find_link(session, &target.link_selectors, label)
            .await?
            .ok_or_else(|| RunError::LinkNotFound(label.clone()))?;
        info!(label = %label, "following link");
        session.activate(link).await?;
        tokio::time::sleep(target.step_delay).await;
    }
    Ok(())
}

/// First clickable element whose trimmed text equals `label`.
async fn find_link(
    session: &mut dyn BrowserSession,
    selectors: &[String],
    label: &str,
) -> Result<Option<ElementHandle>, BrowserFault> {
    for selector in selectors {
        let candidates = match session.locate_all(selector).await {
            Ok(found) => found,
            Err(e) => {
                debug!(selector = %selector, error = %e, "link selector failed");
                continue;
            }
        };
        for handle in candidates {
            if session.read_text(handle).await?.trim() == label {
                return Ok(Some(handle));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeBrowser;

    const BASE: &str = "https://console.example";

    fn fast_login() -> LoginSettings {
        LoginSettings {
            completion_timeout: Duration::from_secs(2),
            ..LoginSettings::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn login_fills_form_and_waits_for_redirect() {
        let mut browser =
            FakeBrowser::new().with_login("ops@example.com", "s3cret", "https://console.example/home");
        let creds = Credentials::new("ops@example.com", "s3cret");

        login(
            &mut browser,
            &TargetSurface::new(BASE),
            Some(&creds),
            &fast_login(),
            &BackoffPolicy::default(),
            Duration::from_secs(30),
        )
        .await
        .unwrap();
        assert!(browser.is_logged_in());
    }

    #[tokio::test(start_paused = true)]
    async fn wrong_password_times_out_as_login_failure() {
        let mut browser =
            FakeBrowser::new().with_login("ops@example.com", "s3cret", "https://console.example/home");
        let creds = Credentials::new("ops@example.com", "wrong");

        let err = login(
            &mut browser,
            &TargetSurface::new(BASE),
            Some(&creds),
            &fast_login(),
            &BackoffPolicy::default(),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RunError::LoginFailed(ref m) if m.contains("still on login page")));
    }

    #[tokio::test(start_paused = true)]
    async fn login_page_without_credentials_fails() {
        let mut browser = FakeBrowser::new().with_login("u", "p", "https://console.example/home");
        let err = login(
            &mut browser,
            &TargetSurface::new(BASE),
            None,
            &fast_login(),
            &BackoffPolicy::default(),
            Duration::from_secs(30),
        )
        .await
        .unwrap_err();
        assert_eq!(err.tag(), "login_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_path_clicks_links_in_order() {
        let mut browser = FakeBrowser::new()
            .with_link("ナレッジベース", "https://console.example/kb")
            .with_link("ファイル", "https://console.example/kb/files");
        let mut target = TargetSurface::new(BASE);
        target.navigation_path = vec!["ナレッジベース".to_string(), "ファイル".to_string()];

        open_surface(&mut browser, &target, &BackoffPolicy::default(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(
            browser.current_url().await.unwrap(),
            "https://console.example/kb/files"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_link_is_terminal() {
        let mut browser = FakeBrowser::new();
        let mut target = TargetSurface::new(BASE);
        target.navigation_path = vec!["Files".to_string()];
        let err = open_surface(&mut browser, &target, &BackoffPolicy::default(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::LinkNotFound(ref l) if l == "Files"));
    }

    #[tokio::test(start_paused = true)]
    async fn direct_navigation_recovers_from_transient_faults() {
        let mut browser = FakeBrowser::new().failing_navigation(2);
        let mut target = TargetSurface::new(BASE);
        target.scan_url = Some("https://console.example/kb/files".to_string());

        open_surface(&mut browser, &target, &BackoffPolicy::default(), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(browser.navigations().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_navigation_fault_is_not_retried() {
        let mut browser = FakeBrowser::new().failing_navigation_with(BrowserFault::Navigation {
            url: "https://console.example/kb".to_string(),
            details: "net::ERR_HTTP_RESPONSE_CODE_FAILURE 403".to_string(),
        });
        let mut target = TargetSurface::new(BASE);
        target.scan_url = Some("https://console.example/kb".to_string());

        let err = open_surface(&mut browser, &target, &BackoffPolicy::default(), Duration::from_secs(30))
            .await
            .unwrap_err();
        match err {
            RunError::NavigationFailed { attempts, kind, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(kind, ErrorKind::PermissionDenied);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
