use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::PageError;

/// Element state a selector wait resolves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// Present in the DOM.
    Attached,
    /// Present and rendered.
    Visible,
}

impl std::fmt::Display for SelectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectorState::Attached => f.write_str("attached"),
            SelectorState::Visible => f.write_str("visible"),
        }
    }
}

/// Load milestone a navigation waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadCondition {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

/// The sole external collaborator of the executor: everything it needs from
/// a live page, addressed by opaque selector strings. Implementations own
/// element resolution; the executor never sees DOM handles.
///
/// All operations are awaited suspension points with per-call timeouts.
/// A timeout surfaces as a normal error, not a distinct cancellation kind.
#[async_trait]
pub trait Page: Send + Sync {
    async fn navigate(
        &self,
        url: &str,
        wait_until: LoadCondition,
        timeout: Duration,
    ) -> Result<(), PageError>;

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: SelectorState,
        timeout: Duration,
    ) -> Result<(), PageError>;

    async fn click(&self, selector: &str) -> Result<(), PageError>;

    async fn fill(&self, selector: &str, value: &str) -> Result<(), PageError>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), PageError>;

    /// Scroll the element into centered view. Call sites treat failure as
    /// a warning, not an abort.
    async fn scroll_into_view(&self, selector: &str) -> Result<(), PageError>;

    /// Apply an inline style that reverts itself after `revert_after`.
    /// Purely diagnostic; call sites tolerate failure.
    async fn apply_transient_style(
        &self,
        selector: &str,
        style: &str,
        revert_after: Duration,
    ) -> Result<(), PageError>;

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<(), PageError>;

    /// Text content of every element matching `selector`, in document
    /// order. Returned raw; the executor trims and filters.
    async fn query_all_text(&self, selector: &str) -> Result<Vec<String>, PageError>;

    async fn screenshot(&self, path: &Path, full_page: bool) -> Result<(), PageError>;
}
