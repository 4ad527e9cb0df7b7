use thiserror::Error;

use crate::page::SelectorState;
use crate::types::ActionKind;

/// Errors surfaced by a [`Page`](crate::page::Page) capability. The first
/// two are retryable inside the executor's interactive wrapper; the rest
/// belong to the scenario preamble and diagnostic side channel.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("selector `{selector}` did not become {state} within {timeout_ms}ms")]
    SelectorTimeout {
        selector: String,
        state: SelectorState,
        timeout_ms: u64,
    },

    #[error("{operation} on `{selector}` failed: {message}")]
    Invocation {
        operation: &'static str,
        selector: String,
        message: String,
    },

    #[error("navigation to `{url}` failed: {message}")]
    Navigation { url: String, message: String },

    #[error("screenshot capture failed: {0}")]
    Screenshot(String),
}

/// Terminal failure of one action after its attempts ran out. Halts the run
/// and carries everything diagnostics need.
#[derive(Debug, Error)]
#[error(
    "action #{index} ({kind} on `{selector}`) failed after {attempts} attempt(s): {source}"
)]
pub struct StepError {
    pub index: usize,
    pub kind: ActionKind,
    pub selector: String,
    pub label: Option<String>,
    pub attempts: u32,
    #[source]
    pub source: PageError,
}

/// Rejected before any page interaction happens.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("action #{index} ({kind}): selector must not be empty")]
    EmptySelector { index: usize, kind: ActionKind },

    #[error("action #{index} ({kind}): `value` is required and must not be empty")]
    MissingValue { index: usize, kind: ActionKind },

    #[error("malformed action list: {0}")]
    Parse(#[from] serde_json::Error),
}
