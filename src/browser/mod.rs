//! Headless Chrome session used for every page fetch in a batch
//!
//! The session launches one browser with an automation-hiding profile
//! (custom user agent, `AutomationControlled` blink feature disabled,
//! maximized window) and reuses a single tab for sequential navigation.
//! A tab is not safe for concurrent navigation, so callers fetch one page
//! at a time.

use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BrowserSettings;
use crate::traits::{FetchedPage, PageFetcher, PageLoad, PageSession, SessionLauncher};

/// Launches a [`BrowserSession`] per batch
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageSession>> {
        let session = BrowserSession::open(self.settings.clone()).await?;
        Ok(Box::new(session))
    }
}

/// One running browser plus the task driving its CDP event stream
pub struct BrowserSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler: JoinHandle<()>,
    settings: BrowserSettings,
}

impl BrowserSession {
    pub async fn open(settings: BrowserSettings) -> Result<Self> {
        info!("Launching headless browser");

        let mut builder = BrowserConfig::builder()
            .window_size(1920, 1080)
            .request_timeout(settings.navigation_timeout)
            .no_sandbox()
            .arg(format!("--user-agent={}", settings.user_agent))
            .arg("--start-maximized")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        if let Some(path) = &settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {e}"))?;

        let (mut browser, mut events) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {:?}", e);
                }
            }
            debug!("Browser event handler finished");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                let _ = browser.kill().await;
                handler.abort();
                return Err(anyhow!(e).context("Failed to open browser tab"));
            }
        };

        info!("Browser session ready");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler,
            settings,
        })
    }

    /// Poll for `marker` until it shows up or the configured wait runs out
    async fn wait_for_marker(&self, url: &str, marker: &str) -> PageLoad {
        let start = Instant::now();
        loop {
            if self.page.find_element(marker).await.is_ok() {
                debug!("Marker `{}` on {} after {:?}", marker, url, start.elapsed());
                tokio::time::sleep(self.settings.marker_settle).await;
                return PageLoad::Ready;
            }

            let waited = start.elapsed();
            if waited >= self.settings.marker_timeout {
                warn!("Page {} did not render `{}` within {:?}", url, marker, waited);
                return PageLoad::TimedOut {
                    marker: marker.to_string(),
                    waited,
                };
            }

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserSession {
    async fn fetch(&self, url: &str, marker: Option<&str>) -> Result<FetchedPage> {
        debug!("Navigating to {}", url);
        let navigation_stalled = match self.page.goto(url).await {
            Ok(_) => false,
            Err(e) if is_navigation_timeout(&e) => {
                warn!(
                    "Navigation to {} did not complete within {:?}, reading what rendered",
                    url, self.settings.navigation_timeout
                );
                true
            }
            Err(e) => return Err(anyhow!(e).context(format!("Failed to navigate to {url}"))),
        };

        let load = match marker {
            Some(marker) => self.wait_for_marker(url, marker).await,
            None if navigation_stalled => PageLoad::TimedOut {
                marker: LOAD_EVENT.to_string(),
                waited: self.settings.navigation_timeout,
            },
            None => {
                tokio::time::sleep(self.settings.settle_delay).await;
                debug!("Page {} settled for {:?}", url, self.settings.settle_delay);
                PageLoad::Settled
            }
        };

        let html = self
            .page
            .content()
            .await
            .with_context(|| format!("Failed to read document of {url}"))?;

        Ok(FetchedPage {
            url: url.to_string(),
            html,
            load,
        })
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn close(&mut self) -> Result<()> {
        let Some(mut browser) = self.browser.get_mut().take() else {
            return Ok(());
        };
        info!("Closing browser session");

        let closed = browser.close().await;
        if let Err(e) = &closed {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Some(Err(e)) = browser.kill().await {
            debug!("Browser kill after close: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();

        closed.map(|_| ()).context("Failed to close browser")
    }
}

/// Stand-in marker reported when a navigation without a marker stalls
const LOAD_EVENT: &str = "load event";

/// A request timeout leaves the tab on a partially rendered document
fn is_navigation_timeout(error: &CdpError) -> bool {
    matches!(error, CdpError::Timeout)
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.browser.get_mut().is_some() {
            error!("BrowserSession dropped without close - aborting event handler");
        }
        // Browser's own Drop kills the child process
        self.handler.abort();
    }
}
