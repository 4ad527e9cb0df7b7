use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tracing::warn;

use crate::error::{PageError, StepError};
use crate::events::{RunEvent, RunObserver, TracingObserver};
use crate::page::{LoadCondition, Page, SelectorState};
use crate::types::{
    Action, ExecutionResult, Scenario, Schema, BACKOFF_BASE, EXTRACT_DELAY, FIRST_WAIT_TIMEOUT,
    HIGHLIGHT_REVERT_AFTER, HIGHLIGHT_STYLE, MAX_ATTEMPTS, NAVIGATION_TIMEOUT,
    NETWORK_IDLE_TIMEOUT, POST_NAVIGATION_DELAY, RETRY_WAIT_TIMEOUT, SETTLE_DELAY,
};

/// Interprets a [`Schema`] against a [`Page`], one action at a time.
///
/// Interactive actions (click/type/press) go through a bounded retry
/// wrapper with scroll-into-view and a transient highlight before each
/// dispatch; extraction is a single best-effort read. The first action to
/// exhaust its attempts halts the run and leaves a failure screenshot
/// behind.
pub struct Runner {
    observer: Arc<dyn RunObserver>,
    screenshot_dir: PathBuf,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::with_observer(Arc::new(TracingObserver))
    }

    pub fn with_observer(observer: Arc<dyn RunObserver>) -> Self {
        Self {
            observer,
            screenshot_dir: PathBuf::from("."),
        }
    }

    /// Directory failure screenshots land in. Defaults to the working
    /// directory.
    pub fn screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    /// Navigate to the scenario's URL, let the page settle, then run its
    /// schema. Navigation-phase errors surface directly; action failures
    /// come back inside the [`ExecutionResult`].
    pub async fn run_scenario(
        &self,
        page: &dyn Page,
        scenario: &Scenario,
    ) -> Result<ExecutionResult, PageError> {
        page.navigate(
            &scenario.url,
            LoadCondition::DomContentLoaded,
            NAVIGATION_TIMEOUT,
        )
        .await?;
        if let Err(err) = page.wait_for_network_idle(NETWORK_IDLE_TIMEOUT).await {
            warn!(url = %scenario.url, error = %err, "network never settled after navigation");
        }
        sleep(POST_NAVIGATION_DELAY).await;
        Ok(self.run(page, &scenario.actions).await)
    }

    /// Run each action strictly in declared order. Aborts at the first
    /// action that exhausts its attempts.
    pub async fn run(&self, page: &dyn Page, schema: &Schema) -> ExecutionResult {
        let mut result = ExecutionResult::default();

        for (index, action) in schema.actions().iter().enumerate() {
            self.observer.on_event(&RunEvent::ActionStarted {
                index,
                kind: action.kind(),
                selector: action.selector().to_string(),
            });

            let outcome = match action {
                Action::Click { .. } | Action::Type { .. } | Action::Press { .. } => {
                    self.run_interactive(page, index, action).await
                }
                Action::WaitForSelector {
                    selector,
                    timeout_ms,
                    ..
                } => {
                    let timeout = timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(FIRST_WAIT_TIMEOUT);
                    page.wait_for_selector(selector, SelectorState::Visible, timeout)
                        .await
                        .map(|()| 1)
                        .map_err(|err| (1, err))
                }
                Action::Extract { selector, .. } => {
                    let texts = self.run_extract(page, index, selector).await;
                    result.extracted.extend(texts);
                    Ok(1)
                }
            };

            match outcome {
                Ok(attempts) => {
                    self.observer
                        .on_event(&RunEvent::ActionSucceeded { index, attempts });
                }
                Err((attempts, err)) => {
                    self.observer.on_event(&RunEvent::ActionFailed {
                        index,
                        attempts,
                        error: err.to_string(),
                    });
                    self.capture_failure_screenshot(page, index, action).await;
                    result.failure = Some(StepError {
                        index,
                        kind: action.kind(),
                        selector: action.selector().to_string(),
                        label: action.label().map(String::from),
                        attempts,
                        source: err,
                    });
                    break;
                }
            }
        }

        result
    }

    /// The retry wrapper around one interactive action. Returns the number
    /// of attempts it took, or the failing attempt count and last error.
    async fn run_interactive(
        &self,
        page: &dyn Page,
        index: usize,
        action: &Action,
    ) -> Result<u32, (u32, PageError)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.attempt_interactive(page, index, action, attempt).await {
                Ok(()) => {
                    self.settle(page, index).await;
                    return Ok(attempt);
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let delay = BACKOFF_BASE * attempt;
                    self.observer.on_event(&RunEvent::ActionRetried {
                        index,
                        attempt,
                        delay,
                        error: err.to_string(),
                    });
                    sleep(delay).await;
                }
                Err(err) => return Err((attempt, err)),
            }
        }
    }

    /// One attempt: selector wait, best-effort stabilization, dispatch.
    async fn attempt_interactive(
        &self,
        page: &dyn Page,
        index: usize,
        action: &Action,
        attempt: u32,
    ) -> Result<(), PageError> {
        let selector = action.selector();
        // First attempt absorbs initial page load; retries assume the page
        // is already settled.
        let timeout = if attempt == 1 {
            FIRST_WAIT_TIMEOUT
        } else {
            RETRY_WAIT_TIMEOUT
        };
        page.wait_for_selector(selector, SelectorState::Visible, timeout)
            .await?;

        if let Err(err) = page.scroll_into_view(selector).await {
            self.observer.on_event(&RunEvent::StabilizationSkipped {
                index,
                stage: "scroll",
                error: err.to_string(),
            });
        }
        if let Err(err) = page
            .apply_transient_style(selector, HIGHLIGHT_STYLE, HIGHLIGHT_REVERT_AFTER)
            .await
        {
            self.observer.on_event(&RunEvent::StabilizationSkipped {
                index,
                stage: "highlight",
                error: err.to_string(),
            });
        }

        match action {
            Action::Click { .. } => page.click(selector).await,
            Action::Type { value, .. } => page.fill(selector, value).await,
            Action::Press { value, .. } => page.press_key(selector, value).await,
            // the wrapper is only entered for the three kinds above
            Action::WaitForSelector { .. } | Action::Extract { .. } => Ok(()),
        }
    }

    /// Post-action settle: drain in-flight network work, then pause, so the
    /// next selector lookup does not race a navigation or XHR.
    async fn settle(&self, page: &dyn Page, index: usize) {
        if let Err(err) = page.wait_for_network_idle(NETWORK_IDLE_TIMEOUT).await {
            self.observer.on_event(&RunEvent::SettleSkipped {
                index,
                error: err.to_string(),
            });
        }
        sleep(SETTLE_DELAY).await;
    }

    /// Best-effort read: pre-roll for dynamic content, wait for the
    /// selector, collect trimmed non-empty texts. A miss contributes
    /// nothing and never fails the run.
    async fn run_extract(&self, page: &dyn Page, index: usize, selector: &str) -> Vec<String> {
        sleep(EXTRACT_DELAY).await;

        let texts = match page
            .wait_for_selector(selector, SelectorState::Visible, FIRST_WAIT_TIMEOUT)
            .await
        {
            Ok(()) => page.query_all_text(selector).await,
            Err(err) => Err(err),
        };
        let texts = match texts {
            Ok(texts) => texts,
            Err(err) => {
                self.observer.on_event(&RunEvent::ExtractSkipped {
                    index,
                    error: err.to_string(),
                });
                return Vec::new();
            }
        };

        let cleaned: Vec<String> = texts
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(String::from)
            .collect();
        self.observer.on_event(&RunEvent::Extracted {
            index,
            count: cleaned.len(),
        });
        cleaned
    }

    /// Capture `error_<label>_<timestamp>.png` next to the run. Capture
    /// failure is reported, never escalated.
    async fn capture_failure_screenshot(&self, page: &dyn Page, index: usize, action: &Action) {
        let label = action
            .label()
            .map(String::from)
            .unwrap_or_else(|| format!("step{}", index + 1));
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.screenshot_dir.join(format!("error_{label}_{stamp}.png"));
        match page.screenshot(&path, true).await {
            Ok(()) => {
                self.observer
                    .on_event(&RunEvent::ScreenshotCaptured { index, path });
            }
            Err(err) => {
                warn!(index, error = %err, "failed to capture failure screenshot");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::types::ActionKind;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// In-memory page that records every call in order and fails on
    /// command, so retry and ordering logic is testable without a browser.
    #[derive(Default)]
    struct FakePage {
        calls: Mutex<Vec<String>>,
        /// selector -> remaining dispatch failures (click/fill/press)
        flaky: Mutex<HashMap<String, u32>>,
        /// selector -> remaining wait failures
        wait_flaky: Mutex<HashMap<String, u32>>,
        texts: Mutex<HashMap<String, Vec<String>>>,
        /// (selector, texts) published only once a key press lands
        texts_after_press: Mutex<Option<(String, Vec<String>)>>,
        fail_scroll: bool,
        fail_highlight: bool,
        wait_timeouts: Mutex<Vec<u64>>,
        screenshots: Mutex<Vec<PathBuf>>,
    }

    impl FakePage {
        fn log(&self, entry: impl Into<String>) {
            self.calls.lock().unwrap().push(entry.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_dispatch(&self, selector: &str, times: u32) {
            self.flaky.lock().unwrap().insert(selector.to_string(), times);
        }

        fn fail_wait(&self, selector: &str, times: u32) {
            self.wait_flaky
                .lock()
                .unwrap()
                .insert(selector.to_string(), times);
        }

        fn set_texts(&self, selector: &str, texts: &[&str]) {
            self.texts.lock().unwrap().insert(
                selector.to_string(),
                texts.iter().map(|t| t.to_string()).collect(),
            );
        }

        fn take_dispatch_failure(&self, selector: &str) -> bool {
            let mut flaky = self.flaky.lock().unwrap();
            match flaky.get_mut(selector) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            }
        }

        fn detached(operation: &'static str, selector: &str) -> PageError {
            PageError::Invocation {
                operation,
                selector: selector.to_string(),
                message: "element detached".to_string(),
            }
        }
    }

    #[async_trait]
    impl Page for FakePage {
        async fn navigate(
            &self,
            url: &str,
            _wait_until: LoadCondition,
            _timeout: Duration,
        ) -> Result<(), PageError> {
            self.log(format!("navigate {url}"));
            Ok(())
        }

        async fn wait_for_selector(
            &self,
            selector: &str,
            state: SelectorState,
            timeout: Duration,
        ) -> Result<(), PageError> {
            self.log(format!("wait {selector}"));
            self.wait_timeouts
                .lock()
                .unwrap()
                .push(timeout.as_millis() as u64);
            let mut flaky = self.wait_flaky.lock().unwrap();
            if let Some(n) = flaky.get_mut(selector) {
                if *n > 0 {
                    *n -= 1;
                    return Err(PageError::SelectorTimeout {
                        selector: selector.to_string(),
                        state,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
            Ok(())
        }

        async fn click(&self, selector: &str) -> Result<(), PageError> {
            self.log(format!("click {selector}"));
            if self.take_dispatch_failure(selector) {
                return Err(Self::detached("click", selector));
            }
            Ok(())
        }

        async fn fill(&self, selector: &str, value: &str) -> Result<(), PageError> {
            self.log(format!("fill {selector} {value}"));
            if self.take_dispatch_failure(selector) {
                return Err(Self::detached("fill", selector));
            }
            Ok(())
        }

        async fn press_key(&self, selector: &str, key: &str) -> Result<(), PageError> {
            self.log(format!("press {selector} {key}"));
            if self.take_dispatch_failure(selector) {
                return Err(Self::detached("press", selector));
            }
            if let Some((sel, texts)) = self.texts_after_press.lock().unwrap().take() {
                self.texts.lock().unwrap().insert(sel, texts);
            }
            Ok(())
        }

        async fn scroll_into_view(&self, selector: &str) -> Result<(), PageError> {
            self.log(format!("scroll {selector}"));
            if self.fail_scroll {
                return Err(Self::detached("scrollIntoView", selector));
            }
            Ok(())
        }

        async fn apply_transient_style(
            &self,
            selector: &str,
            _style: &str,
            _revert_after: Duration,
        ) -> Result<(), PageError> {
            self.log(format!("highlight {selector}"));
            if self.fail_highlight {
                return Err(Self::detached("applyTransientStyle", selector));
            }
            Ok(())
        }

        async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<(), PageError> {
            self.log("network-idle");
            Ok(())
        }

        async fn query_all_text(&self, selector: &str) -> Result<Vec<String>, PageError> {
            self.log(format!("texts {selector}"));
            Ok(self
                .texts
                .lock()
                .unwrap()
                .get(selector)
                .cloned()
                .unwrap_or_default())
        }

        async fn screenshot(&self, path: &Path, _full_page: bool) -> Result<(), PageError> {
            self.log("screenshot");
            self.screenshots.lock().unwrap().push(path.to_path_buf());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<RunEvent>>,
    }

    impl RecordingObserver {
        fn retry_delays(&self) -> Vec<u64> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    RunEvent::ActionRetried { delay, .. } => Some(delay.as_millis() as u64),
                    _ => None,
                })
                .collect()
        }

        fn stabilization_stages(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|event| match event {
                    RunEvent::StabilizationSkipped { stage, .. } => Some(*stage),
                    _ => None,
                })
                .collect()
        }
    }

    impl RunObserver for RecordingObserver {
        fn on_event(&self, event: &RunEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn runner_with_observer() -> (Runner, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        (Runner::with_observer(observer.clone()), observer)
    }

    fn schema(actions: Vec<Action>) -> Schema {
        Schema::new(actions).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn actions_execute_in_declared_order() {
        let page = FakePage::default();
        page.set_texts(".item", &["a", "b", "c"]);
        let (runner, _) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![
                    Action::Click {
                        selector: "#open".into(),
                        label: None,
                    },
                    Action::Type {
                        selector: "#q".into(),
                        value: "hello".into(),
                        label: None,
                    },
                    Action::Press {
                        selector: "#q".into(),
                        value: "Enter".into(),
                        label: None,
                    },
                    Action::WaitForSelector {
                        selector: ".grid".into(),
                        timeout_ms: Some(5000),
                        label: None,
                    },
                    Action::Extract {
                        selector: ".item".into(),
                        label: None,
                    },
                ]),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(result.extracted, vec!["a", "b", "c"]);
        assert_eq!(
            page.calls(),
            vec![
                "wait #open",
                "scroll #open",
                "highlight #open",
                "click #open",
                "network-idle",
                "wait #q",
                "scroll #q",
                "highlight #q",
                "fill #q hello",
                "network-idle",
                "wait #q",
                "scroll #q",
                "highlight #q",
                "press #q Enter",
                "network-idle",
                "wait .grid",
                "wait .item",
                "texts .item",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_succeeds_with_scaled_backoff() {
        let page = FakePage::default();
        page.fail_dispatch("#btn", 2);
        let (runner, observer) = runner_with_observer();

        let start = Instant::now();
        let result = runner
            .run(
                &page,
                &schema(vec![Action::Click {
                    selector: "#btn".into(),
                    label: None,
                }]),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(observer.retry_delays(), vec![2000, 4000]);
        // two backoffs plus the settle delay, on the paused clock
        assert_eq!(start.elapsed(), Duration::from_millis(2000 + 4000 + 1000));
        // generous wait first, shorter ones once the page is warm
        assert_eq!(*page.wait_timeouts.lock().unwrap(), vec![30000, 10000, 10000]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_failure_and_captures_screenshot() {
        let page = FakePage::default();
        page.fail_dispatch("#gone", 3);
        let (runner, observer) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![Action::Click {
                    selector: "#gone".into(),
                    label: Some("L-7".into()),
                }]),
            )
            .await;

        let failure = result.failure.expect("run should fail");
        assert_eq!(failure.index, 0);
        assert_eq!(failure.kind, ActionKind::Click);
        assert_eq!(failure.selector, "#gone");
        assert_eq!(failure.label.as_deref(), Some("L-7"));
        assert_eq!(failure.attempts, 3);
        assert_eq!(observer.retry_delays(), vec![2000, 4000]);

        let screenshots = page.screenshots.lock().unwrap();
        assert_eq!(screenshots.len(), 1);
        let name = screenshots[0].file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("error_L-7_"));
        assert!(name.ends_with(".png"));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_halts_remaining_actions() {
        let page = FakePage::default();
        page.fail_dispatch("#first", 3);
        let (runner, _) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![
                    Action::Click {
                        selector: "#first".into(),
                        label: None,
                    },
                    Action::Click {
                        selector: "#second".into(),
                        label: None,
                    },
                ]),
            )
            .await;

        assert_eq!(result.failure.as_ref().map(|f| f.index), Some(0));
        assert!(
            !page.calls().iter().any(|call| call.contains("#second")),
            "no action after the failing one may run"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stabilization_failures_never_abort() {
        let page = FakePage {
            fail_scroll: true,
            fail_highlight: true,
            ..Default::default()
        };
        let (runner, observer) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![Action::Click {
                    selector: "#ok".into(),
                    label: None,
                }]),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(observer.stabilization_stages(), vec!["scroll", "highlight"]);
        assert!(page.calls().contains(&"click #ok".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn extract_trims_and_filters_empty_text() {
        let page = FakePage::default();
        page.set_texts(".result", &["", " A ", "B", "   "]);
        let (runner, _) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![Action::Extract {
                    selector: ".result".into(),
                    label: None,
                }]),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(result.extracted, vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn extract_miss_is_best_effort() {
        let page = FakePage::default();
        page.fail_wait(".missing", u32::MAX);
        let (runner, observer) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![Action::Extract {
                    selector: ".missing".into(),
                    label: None,
                }]),
            )
            .await;

        assert!(result.is_ok());
        assert!(result.extracted.is_empty());
        assert!(observer
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|event| matches!(event, RunEvent::ExtractSkipped { index: 0, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_selector_failure_is_terminal_single_attempt() {
        let page = FakePage::default();
        page.fail_wait("#never", u32::MAX);
        let (runner, _) = runner_with_observer();

        let result = runner
            .run(
                &page,
                &schema(vec![Action::WaitForSelector {
                    selector: "#never".into(),
                    timeout_ms: None,
                    label: None,
                }]),
            )
            .await;

        let failure = result.failure.expect("wait should be terminal");
        assert_eq!(failure.kind, ActionKind::WaitForSelector);
        assert_eq!(failure.attempts, 1);
        assert_eq!(page.screenshots.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn search_scenario_end_to_end() {
        let page = FakePage::default();
        *page.texts_after_press.lock().unwrap() = Some((
            ".result".to_string(),
            vec![
                "iPhone 15".to_string(),
                "iPhone 15 Pro".to_string(),
                "iPhone 15 Plus".to_string(),
            ],
        ));
        let (runner, _) = runner_with_observer();

        let scenario = Scenario {
            name: "search".into(),
            url: "https://shop.example".into(),
            actions: schema(vec![
                Action::Click {
                    selector: "#search-open".into(),
                    label: None,
                },
                Action::Type {
                    selector: "#q".into(),
                    value: "iphone".into(),
                    label: None,
                },
                Action::Press {
                    selector: "#q".into(),
                    value: "Enter".into(),
                    label: None,
                },
                Action::Extract {
                    selector: ".result".into(),
                    label: None,
                },
            ]),
        };

        let result = runner.run_scenario(&page, &scenario).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(result.extracted.len(), 3);
        assert_eq!(page.calls()[0], "navigate https://shop.example");
    }

    #[test]
    fn schema_rejects_before_any_page_call() {
        // kind-level and field-level rejection happen at construction,
        // with no Page in sight
        assert!(matches!(
            Schema::new(vec![Action::Type {
                selector: "#x".into(),
                value: " ".into(),
                label: None,
            }]),
            Err(SchemaError::MissingValue { .. })
        ));
    }
}
