//! [`BrowserSession`] over a single Chromium page.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use kbwatch_core::{BrowserFault, BrowserSession, ElementHandle};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::arena::HandleArena;

/// One page in one Chromium process, owned by one run.
pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    elements: HandleArena<Element>,
    element_timeout: Duration,
}

impl std::fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("open", &self.page.is_some())
            .field("generation", &self.elements.generation())
            .field("elements", &self.elements.len())
            .finish()
    }
}

fn protocol(err: CdpError) -> BrowserFault {
    BrowserFault::Protocol(err.to_string())
}

/// Run a CDP call under `limit`, mapping both failure modes to faults.
async fn bounded<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, BrowserFault>
where
    F: Future<Output = Result<T, CdpError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(protocol(e)),
        Err(_) => Err(BrowserFault::timeout(operation, limit)),
    }
}

/// Screenshot encoding inferred from the target file's extension.
pub fn format_for(path: &Path) -> CaptureScreenshotFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => CaptureScreenshotFormat::Jpeg,
        _ => CaptureScreenshotFormat::Png,
    }
}

impl ChromiumSession {
    pub(crate) fn new(
        browser: Browser,
        page: Page,
        handler_task: JoinHandle<()>,
        element_timeout: Duration,
    ) -> Self {
        Self {
            browser: Some(browser),
            page: Some(page),
            handler_task: Some(handler_task),
            elements: HandleArena::new(),
            element_timeout,
        }
    }

    fn page(&self) -> Result<&Page, BrowserFault> {
        self.page.as_ref().ok_or(BrowserFault::Closed)
    }

    fn element(&self, handle: ElementHandle) -> Result<&Element, BrowserFault> {
        if self.page.is_none() {
            return Err(BrowserFault::Closed);
        }
        self.elements.get(handle)
    }

    fn adopt(&mut self, found: Vec<Element>) -> Vec<ElementHandle> {
        found.into_iter().map(|el| self.elements.insert(el)).collect()
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserFault> {
        let page = self.page()?.clone();
        self.elements.invalidate();

        let load = async {
            page.goto(url).await?;
            page.wait_for_navigation().await?;
            Ok::<_, CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BrowserFault::Navigation {
                url: url.to_string(),
                details: e.to_string(),
            }),
            Err(_) => Err(BrowserFault::timeout("navigate", timeout)),
        }
    }

    async fn current_url(&mut self) -> Result<String, BrowserFault> {
        let page = self.page()?;
        let url = bounded("current_url", self.element_timeout, page.url()).await?;
        Ok(url.unwrap_or_default())
    }

    async fn locate_all(&mut self, selector: &str) -> Result<Vec<ElementHandle>, BrowserFault> {
        let page = self.page()?;
        let found = bounded("locate", self.element_timeout, page.find_elements(selector)).await?;
        debug!(selector = %selector, count = found.len(), "located elements");
        Ok(self.adopt(found))
    }

    async fn locate_within(
        &mut self,
        parent: ElementHandle,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserFault> {
        let parent = self.element(parent)?;
        let found = bounded("locate", self.element_timeout, parent.find_elements(selector)).await?;
        Ok(self.adopt(found))
    }

    async fn read_text(&mut self, handle: ElementHandle) -> Result<String, BrowserFault> {
        let element = self.element(handle)?;
        let text = bounded("read_text", self.element_timeout, element.inner_text()).await?;
        Ok(text.unwrap_or_default())
    }

    async fn activate(&mut self, handle: ElementHandle) -> Result<(), BrowserFault> {
        let element = self.element(handle)?;
        bounded("click", self.element_timeout, async {
            element.click().await.map(|_| ())
        })
        .await?;
        // A click may re-render or navigate; nothing located before it is trusted.
        self.elements.invalidate();
        Ok(())
    }

    async fn hover(&mut self, handle: ElementHandle) -> Result<(), BrowserFault> {
        let element = self.element(handle)?;
        bounded("hover", self.element_timeout, async {
            element.hover().await.map(|_| ())
        })
        .await
    }

    async fn fill(&mut self, handle: ElementHandle, text: &str) -> Result<(), BrowserFault> {
        let element = self.element(handle)?;
        bounded("fill", self.element_timeout, async {
            element.focus().await?;
            element.type_str(text).await?;
            Ok::<_, CdpError>(())
        })
        .await
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> Result<PathBuf, BrowserFault> {
        let page = self.page()?;
        let params = ScreenshotParams::builder()
            .format(format_for(path))
            .full_page(full_page)
            .build();
        bounded(
            "screenshot",
            self.element_timeout,
            page.save_screenshot(params, path),
        )
        .await?;
        Ok(path.to_path_buf())
    }

    async fn close(&mut self) -> Result<(), BrowserFault> {
        self.elements.invalidate();
        self.page = None;
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };

        let result = match browser.close().await {
            Ok(_) => {
                if let Err(e) = browser.wait().await {
                    warn!(error = %e, "chromium did not exit cleanly");
                }
                Ok(())
            }
            Err(e) => Err(protocol(e)),
        };
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        result
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
    }
}
