use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::PageError;
use crate::page::{LoadCondition, Page, SelectorState};

/// Chrome session driven over CDP. Created once, reused for all scenarios.
pub struct BrowserSession {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl BrowserSession {
    /// Launch Chrome and open a blank tab. Blocking; run it inside
    /// `spawn_blocking` when a runtime is up.
    pub fn launch(headless: bool) -> Result<Self> {
        info!(headless, "launching Chrome");
        let options = LaunchOptions {
            headless,
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(60),
            ..Default::default()
        };

        let browser = Browser::new(options).context("browser launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn page(&self) -> ChromePage {
        ChromePage {
            tab: self.tab.clone(),
        }
    }
}

/// [`Page`] over a live tab. The CDP client is synchronous, so every call
/// runs on a blocking thread off the runtime.
pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
    {
        let tab = self.tab.clone();
        match tokio::task::spawn_blocking(move || f(tab)).await {
            Ok(result) => result,
            Err(join) => Err(anyhow::anyhow!("driver task failed: {join}")),
        }
    }

    fn invocation(operation: &'static str, selector: &str, err: anyhow::Error) -> PageError {
        PageError::Invocation {
            operation,
            selector: selector.to_string(),
            message: err.to_string(),
        }
    }
}

fn js_quote(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

#[async_trait]
impl Page for ChromePage {
    async fn navigate(
        &self,
        url: &str,
        wait_until: LoadCondition,
        timeout: Duration,
    ) -> Result<(), PageError> {
        debug!(url, "navigating");
        let target = url.to_string();
        self.blocking(move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&target)?;
            tab.wait_until_navigated()?;
            Ok(())
        })
        .await
        .map_err(|err| PageError::Navigation {
            url: url.to_string(),
            message: err.to_string(),
        })?;

        if wait_until == LoadCondition::NetworkIdle {
            self.wait_for_network_idle(timeout).await?;
        }
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<(), PageError> {
        let sel = selector.to_string();
        // presence in the DOM is the closest the CDP wait gets to
        // visibility; interactability errors surface at dispatch
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout(&sel, timeout)?;
            Ok(())
        })
        .await
        .map_err(|_| PageError::SelectorTimeout {
            selector: selector.to_string(),
            state,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    async fn click(&self, selector: &str) -> Result<(), PageError> {
        let sel = selector.to_string();
        self.blocking(move |tab| {
            let element = tab.find_element(&sel)?;
            element.click()?;
            Ok(())
        })
        .await
        .map_err(|err| Self::invocation("click", selector, err))
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PageError> {
        let sel = selector.to_string();
        let text = value.to_string();
        self.blocking(move |tab| {
            let element = tab.find_element(&sel)?;
            element.click()?;
            let js_sel = js_quote(&sel);
            tab.evaluate(
                &format!("document.querySelector('{js_sel}').value = ''"),
                false,
            )?;
            tab.type_str(&text)?;
            Ok(())
        })
        .await
        .map_err(|err| Self::invocation("fill", selector, err))
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), PageError> {
        let sel = selector.to_string();
        let key = key.to_string();
        self.blocking(move |tab| {
            let js_sel = js_quote(&sel);
            tab.evaluate(
                &format!("document.querySelector('{js_sel}').focus()"),
                false,
            )?;
            tab.press_key(&key)?;
            Ok(())
        })
        .await
        .map_err(|err| Self::invocation("pressKey", selector, err))
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<(), PageError> {
        let sel = selector.to_string();
        self.blocking(move |tab| {
            let js_sel = js_quote(&sel);
            tab.evaluate(
                &format!(
                    "document.querySelector('{js_sel}').scrollIntoView({{ block: 'center', behavior: 'smooth' }})"
                ),
                false,
            )?;
            Ok(())
        })
        .await
        .map_err(|err| Self::invocation("scrollIntoView", selector, err))
    }

    async fn apply_transient_style(
        &self,
        selector: &str,
        style: &str,
        revert_after: Duration,
    ) -> Result<(), PageError> {
        let sel = selector.to_string();
        let style = js_quote(style);
        let revert_ms = revert_after.as_millis();
        self.blocking(move |tab| {
            let js_sel = js_quote(&sel);
            let applied = tab.evaluate(
                &format!(
                    r#"(() => {{
                        const el = document.querySelector('{js_sel}');
                        if (!el) return false;
                        const original = el.style.cssText;
                        el.style.cssText = original + '; {style}';
                        setTimeout(() => {{ el.style.cssText = original; }}, {revert_ms});
                        return true;
                    }})()"#
                ),
                false,
            )?;
            let applied = applied
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !applied {
                anyhow::bail!("element not found");
            }
            Ok(())
        })
        .await
        .map_err(|err| Self::invocation("applyTransientStyle", selector, err))
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), PageError> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = self
                .blocking(|tab| {
                    let result = tab.evaluate("document.readyState === 'complete'", false)?;
                    Ok(result.value.and_then(|v| v.as_bool()).unwrap_or(false))
                })
                .await
                .map_err(|err| Self::invocation("networkIdle", "document", err))?;
            if ready {
                // grace period for late XHR the readyState check cannot see
                sleep(Duration::from_millis(500)).await;
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PageError::Invocation {
                    operation: "networkIdle",
                    selector: "document".to_string(),
                    message: format!("page still busy after {}ms", timeout.as_millis()),
                });
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    async fn query_all_text(&self, selector: &str) -> Result<Vec<String>, PageError> {
        let sel = selector.to_string();
        self.blocking(move |tab| {
            let js_sel = js_quote(&sel);
            let result = tab.evaluate(
                &format!(
                    "JSON.stringify(Array.from(document.querySelectorAll('{js_sel}')).map(el => el.innerText || el.textContent || ''))"
                ),
                false,
            )?;
            let raw = result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| "[]".to_string());
            Ok(serde_json::from_str::<Vec<String>>(&raw)?)
        })
        .await
        .map_err(|err| Self::invocation("queryAllText", selector, err))
    }

    async fn screenshot(&self, path: &Path, _full_page: bool) -> Result<(), PageError> {
        let bytes = self
            .blocking(|tab| {
                Ok(tab.capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)?)
            })
            .await
            .map_err(|err| PageError::Screenshot(err.to_string()))?;
        std::fs::write(path, bytes).map_err(|err| PageError::Screenshot(err.to_string()))?;
        debug!(path = %path.display(), "screenshot written");
        Ok(())
    }
}
