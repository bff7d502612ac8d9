//! Starting Chromium and opening the working page.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use kbwatch_core::config::BrowserSection;
use thiserror::Error;
use tracing::{info, warn};

use crate::session::ChromiumSession;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid browser configuration: {0}")]
    Config(String),

    #[error("failed to launch chromium: {0}")]
    Launch(#[source] CdpError),

    #[error("failed to open page: {0}")]
    Page(#[source] CdpError),
}

/// How to start the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    pub navigation_timeout: Duration,

    /// Bound on every element-level operation.
    pub element_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_section(&BrowserSection::default())
    }
}

impl LaunchOptions {
    pub fn from_section(section: &BrowserSection) -> Self {
        Self {
            headless: section.headless,
            chrome_executable: section.chrome_executable.as_ref().map(PathBuf::from),
            window_width: section.window_width,
            window_height: section.window_height,
            navigation_timeout: Duration::from_secs(section.navigation_timeout_secs),
            element_timeout: Duration::from_secs(section.element_timeout_secs),
        }
    }

    /// Extra command-line flags passed to Chromium.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--no-first-run".to_string(),
            "--disable-extensions".to_string(),
            format!("--window-size={},{}", self.window_width, self.window_height),
        ];
        if self.headless {
            args.push("--no-sandbox".to_string());
        }
        args
    }

    fn config(&self) -> Result<BrowserConfig, LaunchError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.window_width, self.window_height)
            .request_timeout(self.navigation_timeout)
            .args(self.args());
        if let Some(bin) = &self.chrome_executable {
            builder = builder.chrome_executable(bin);
        }
        if !self.headless {
            builder = builder.with_head();
        }
        builder.build().map_err(LaunchError::Config)
    }
}

/// Launch Chromium, spawn its event loop, and open a blank page.
pub async fn launch(options: &LaunchOptions) -> Result<ChromiumSession, LaunchError> {
    info!(
        headless = options.headless,
        bin = ?options.chrome_executable,
        "launching chromium"
    );
    let config = options.config()?;
    let (browser, mut handler) = Browser::launch(config).await.map_err(LaunchError::Launch)?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!(error = %e, "chromium handler error");
                break;
            }
        }
        warn!("chromium event loop exited");
    });

    let page = match browser.new_page("about:blank").await {
        Ok(page) => page,
        Err(e) => {
            handler_task.abort();
            return Err(LaunchError::Page(e));
        }
    };

    Ok(ChromiumSession::new(
        browser,
        page,
        handler_task,
        options.element_timeout,
    ))
}
