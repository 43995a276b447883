// spider_chrome re-exports chromiumoxide API
use super::hooks::{install_hooks, snapshot_expression};
use crate::dom::DomTree;
use crate::error::{RecorderError, Result};
use crate::host::PageHost;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EventBindingCalled;
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use std::path::PathBuf;

pub struct ChromeDriver {
    browser: Browser,
    temp_dir: Option<PathBuf>,
}

/// Connection mode for Chrome browser
pub enum ConnectionMode {
    /// Sandboxed mode - launches Chrome using system installation
    Sandboxed {
        chrome_path: Option<String>,
        no_sandbox: bool,
        headless: bool,
    },
    /// Advanced mode - connects to existing Chrome on debug port
    DebugPort(u16),
}

const LAUNCH_HELP: &str = "\n\n\
    Chrome not found. You can:\n\
    - Install Chrome: https://www.google.com/chrome/\n\
    - Ubuntu/Debian: sudo apt install chromium-browser\n\
    - macOS: brew install --cask google-chrome\n\
    - Or specify path: --chrome-path /path/to/chrome\n\
    - Linux sandbox issue? Try: --no-sandbox";

/// Map a CDP failure, treating a dead connection as host invalidation
fn classify(e: chromiumoxide::error::CdpError) -> RecorderError {
    let message = e.to_string();
    if message.contains("oneshot canceled")
        || message.contains("channel closed")
        || message.contains("Target closed")
    {
        RecorderError::HostInvalidated(message)
    } else {
        RecorderError::CdpError(e)
    }
}

impl ChromeDriver {
    /// Helper method to get the current active page, excluding Chrome's new-tab-page
    async fn get_active_page(&self) -> Result<chromiumoxide::page::Page> {
        let pages = self.browser.pages().await.map_err(classify)?;

        // Filter out chrome:// pages and return the first real page
        for page in pages.iter() {
            if let Ok(Some(url)) = page.url().await {
                if !url.starts_with("chrome://") {
                    return Ok(page.clone());
                }
            }
        }

        if let Some(page) = pages.last() {
            return Ok(page.clone());
        }

        // No pages at all, create one
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| RecorderError::Other(format!("Failed to create page: {}", e)))
    }

    /// Create new ChromeDriver with specified connection mode
    pub async fn new(mode: ConnectionMode) -> Result<Self> {
        let (browser, temp_dir) = match mode {
            ConnectionMode::Sandboxed {
                chrome_path,
                no_sandbox,
                headless,
            } => {
                // Unique profile directory per browser instance
                let unique_id = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
                let temp_dir = std::env::temp_dir().join(format!("clickpath-chrome-{}", unique_id));
                std::fs::create_dir_all(&temp_dir).map_err(|e| {
                    RecorderError::LaunchFailed(format!("Failed to create temp directory: {}", e))
                })?;

                let mut config = if headless {
                    BrowserConfig::builder()
                } else {
                    BrowserConfig::builder().with_head()
                };
                config = config.user_data_dir(&temp_dir);

                // Linux AppArmor workaround
                if no_sandbox {
                    config = config.arg("--no-sandbox");
                }
                if let Some(path) = chrome_path {
                    config = config.chrome_executable(path);
                }

                let config = config
                    .build()
                    .map_err(|e| RecorderError::LaunchFailed(format!("{}{}", e, LAUNCH_HELP)))?;
                let (browser, mut handler) = Browser::launch(config)
                    .await
                    .map_err(|e| RecorderError::LaunchFailed(format!("{}{}", e, LAUNCH_HELP)))?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                    log::debug!("Browser handler finished");
                });

                log::info!("Chrome launched (headless: {})", headless);
                (browser, Some(temp_dir))
            }
            ConnectionMode::DebugPort(port) => {
                let url = format!("http://localhost:{}", port);
                let (browser, mut handler) = Browser::connect(&url).await.map_err(|e| {
                    RecorderError::ConnectionFailed(format!(
                        "Failed to connect to Chrome on port {}. \
                             Make sure Chrome is running with --remote-debugging-port={}: {}",
                        port, port, e
                    ))
                })?;

                tokio::spawn(async move {
                    while (handler.next().await).is_some() {
                        // Handle browser events
                    }
                    log::debug!("Browser handler finished");
                });

                log::info!("Connected to Chrome on port {}", port);
                (browser, None)
            }
        };

        Ok(Self { browser, temp_dir })
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<()> {
        use chromiumoxide::cdp::browser_protocol::page::{EventLoadEventFired, NavigateParams};

        // Normalize URL - add https:// if no protocol specified
        let normalized_url = if !url.starts_with("http://")
            && !url.starts_with("https://")
            && !url.starts_with("file://")
            && !url.starts_with("about:")
            && !url.starts_with("data:")
        {
            log::debug!("Normalizing URL: {} -> https://{}", url, url);
            format!("https://{}", url)
        } else {
            url.to_string()
        };

        log::info!("Navigating to {}", normalized_url);
        let page = self.get_active_page().await?;

        // Subscribe before navigating so the load event cannot be missed
        let mut loads = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(classify)?;

        let params = NavigateParams::builder()
            .url(&normalized_url)
            .build()
            .map_err(|e| {
                RecorderError::NavigationFailed(format!("Invalid URL {}: {}", normalized_url, e))
            })?;

        let response = page.execute(params).await.map_err(|e| match classify(e) {
            RecorderError::HostInvalidated(_) => RecorderError::HostInvalidated(
                "Browser connection lost. The browser may have been closed or crashed.".to_string(),
            ),
            other => RecorderError::NavigationFailed(format!(
                "Failed to navigate to {}: {}",
                normalized_url, other
            )),
        })?;

        if let Some(error_text) = &response.result.error_text {
            return Err(RecorderError::NavigationFailed(format!(
                "Navigation error: {}",
                error_text
            )));
        }

        match tokio::time::timeout(tokio::time::Duration::from_secs(30), loads.next()).await {
            Ok(Some(_)) => log::debug!("Page load event fired"),
            Ok(None) => log::warn!("Load event stream closed before the page loaded"),
            Err(_) => {
                return Err(RecorderError::NavigationFailed(format!(
                    "Timed out after 30s waiting for {} to load",
                    normalized_url
                )));
            }
        }

        Ok(())
    }

    /// Get current URL
    pub async fn current_url(&self) -> Result<String> {
        let page = self.get_active_page().await?;
        page.url().await.map_err(classify)?.ok_or(RecorderError::NoPage)
    }

    /// Get page title
    pub async fn title(&self) -> Result<String> {
        let page = self.get_active_page().await?;
        Ok(page.get_title().await.map_err(classify)?.unwrap_or_default())
    }

    /// Take a screenshot of the current page
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.get_active_page().await?;

        page.screenshot(chromiumoxide::page::ScreenshotParams::default())
            .await
            .map_err(|e| match classify(e) {
                RecorderError::HostInvalidated(m) => RecorderError::HostInvalidated(m),
                other => RecorderError::CaptureFailed(format!("Failed to take screenshot: {}", other)),
            })
    }

    /// Execute arbitrary JavaScript in the page context
    pub async fn execute_script(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.get_active_page().await?;

        let result = page.evaluate(script).await.map_err(|e| match classify(e) {
            RecorderError::HostInvalidated(m) => RecorderError::HostInvalidated(m),
            other => RecorderError::CaptureFailed(format!("Script execution failed: {}", other)),
        })?;

        Ok(result.into_value().unwrap_or(serde_json::Value::Null))
    }

    /// Inject the capture hooks into the active page
    pub async fn install_capture_hooks(&self) -> Result<EventStream<EventBindingCalled>> {
        let page = self.get_active_page().await?;
        install_hooks(&page).await
    }

    /// Get access to the current page for advanced operations
    pub async fn current_page(&self) -> Result<chromiumoxide::page::Page> {
        self.get_active_page().await
    }

    /// Close the browser connection
    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        Ok(())
    }
}

#[async_trait]
impl PageHost for ChromeDriver {
    async fn active_url(&self) -> Result<String> {
        self.current_url().await
    }

    async fn title(&self) -> Result<String> {
        ChromeDriver::title(self).await
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        self.screenshot().await
    }

    async fn capture_document(&self) -> Result<DomTree> {
        let value = self.execute_script(&snapshot_expression()).await?;
        DomTree::from_value(value)
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        // Clean up temporary directory if it exists
        if let Some(temp_dir) = &self.temp_dir {
            if temp_dir.exists() {
                let _ = std::fs::remove_dir_all(temp_dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_expression_returns_document() {
        let js = snapshot_expression();
        assert!(js.contains("return serialize(document.documentElement)"));
    }
}
