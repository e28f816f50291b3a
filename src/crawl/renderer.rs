//! Headless-browser rendering for client-rendered pages.
//!
//! Compiled in behind the `js-rendering` feature (Chrome DevTools Protocol
//! via chromiumoxide). Without the feature a stub renderer reports rendering
//! as unavailable and the crawler sticks with the plain fetch result.

use crate::core::errors::ApiError;

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub page_load_timeout_ms: u64,
    /// Extra settle time after load for dynamic content.
    pub render_wait_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: 15_000,
            render_wait_ms: 1_500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Final URL after redirects.
    pub url: String,
    pub html: String,
}

#[cfg(feature = "js-rendering")]
mod browser_impl {
    use super::*;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tokio::time::timeout;
    use tracing::{debug, info, warn};

    pub struct HeadlessRenderer {
        config: RendererConfig,
        browser: Arc<Mutex<Option<Browser>>>,
    }

    impl HeadlessRenderer {
        pub fn new(config: RendererConfig) -> Self {
            Self {
                config,
                browser: Arc::new(Mutex::new(None)),
            }
        }

        async fn ensure_browser(&self) -> Result<(), ApiError> {
            let mut guard = self.browser.lock().await;
            if guard.is_some() {
                return Ok(());
            }

            info!("launching headless browser for JS rendering");
            let browser_config = BrowserConfig::builder()
                .no_sandbox()
                .arg("--disable-gpu")
                .arg("--disable-dev-shm-usage")
                .arg("--disable-extensions")
                .build()
                .map_err(|e| ApiError::Internal(format!("browser config: {}", e)))?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .map_err(|e| ApiError::ProviderUnavailable(format!("browser launch: {}", e)))?;

            tokio::spawn(async move {
                while let Some(result) = handler.next().await {
                    if result.is_err() {
                        break;
                    }
                }
            });

            *guard = Some(browser);
            Ok(())
        }

        pub async fn render(&self, url: &str) -> Result<RenderedPage, ApiError> {
            self.ensure_browser().await?;

            let guard = self.browser.lock().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| ApiError::Internal("browser not initialized".to_string()))?;

            debug!("rendering {} with headless browser", url);
            let page = browser
                .new_page(url)
                .await
                .map_err(|e| ApiError::ProviderUnavailable(format!("new page: {}", e)))?;

            let load_timeout = Duration::from_millis(self.config.page_load_timeout_ms);
            timeout(load_timeout, page.wait_for_navigation())
                .await
                .map_err(|_| ApiError::ProviderUnavailable(format!("page load timeout: {}", url)))?
                .map_err(|e| ApiError::ProviderUnavailable(format!("navigation: {}", e)))?;

            if self.config.render_wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.render_wait_ms)).await;
            }

            let final_url = page
                .url()
                .await
                .ok()
                .flatten()
                .unwrap_or_else(|| url.to_string());
            let html = page
                .content()
                .await
                .map_err(|e| ApiError::ProviderUnavailable(format!("page content: {}", e)))?;

            if let Err(e) = page.close().await {
                warn!("failed to close rendered page: {}", e);
            }

            Ok(RenderedPage {
                url: final_url,
                html,
            })
        }
    }
}

#[cfg(feature = "js-rendering")]
pub use browser_impl::HeadlessRenderer;

#[cfg(not(feature = "js-rendering"))]
pub struct HeadlessRenderer {
    _config: RendererConfig,
}

#[cfg(not(feature = "js-rendering"))]
impl HeadlessRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { _config: config }
    }

    pub async fn render(&self, url: &str) -> Result<RenderedPage, ApiError> {
        Err(ApiError::ProviderUnavailable(format!(
            "JS rendering not compiled in; cannot render {}",
            url
        )))
    }
}

pub fn is_js_rendering_available() -> bool {
    cfg!(feature = "js-rendering")
}
