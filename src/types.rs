use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchemaError, StepError};

/// A single declarative automation step. Each variant carries exactly the
/// fields its kind requires; `label` is an optional identifier used to name
/// diagnostic artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    Click {
        selector: String,
        #[serde(default)]
        label: Option<String>,
    },
    Type {
        selector: String,
        value: String,
        #[serde(default)]
        label: Option<String>,
    },
    Press {
        selector: String,
        value: String,
        #[serde(default)]
        label: Option<String>,
    },
    WaitForSelector {
        selector: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        label: Option<String>,
    },
    Extract {
        selector: String,
        #[serde(default)]
        label: Option<String>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::Press { .. } => ActionKind::Press,
            Action::WaitForSelector { .. } => ActionKind::WaitForSelector,
            Action::Extract { .. } => ActionKind::Extract,
        }
    }

    pub fn selector(&self) -> &str {
        match self {
            Action::Click { selector, .. }
            | Action::Type { selector, .. }
            | Action::Press { selector, .. }
            | Action::WaitForSelector { selector, .. }
            | Action::Extract { selector, .. } => selector,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Action::Click { label, .. }
            | Action::Type { label, .. }
            | Action::Press { label, .. }
            | Action::WaitForSelector { label, .. }
            | Action::Extract { label, .. } => label.as_deref(),
        }
    }

    /// Interactive actions mutate page state and go through the retry wrapper.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            Action::Click { .. } | Action::Type { .. } | Action::Press { .. }
        )
    }
}

/// Discriminant of an [`Action`], used in events and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    Click,
    Type,
    Press,
    WaitForSelector,
    Extract,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Press => "press",
            ActionKind::WaitForSelector => "waitForSelector",
            ActionKind::Extract => "extract",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, ordered sequence of actions for one scenario. Construction
/// fails on a malformed action, so a `Schema` in hand is safe to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<Action>", into = "Vec<Action>")]
pub struct Schema {
    actions: Vec<Action>,
}

impl Schema {
    pub fn new(actions: Vec<Action>) -> Result<Self, SchemaError> {
        Self::try_from(actions)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl TryFrom<Vec<Action>> for Schema {
    type Error = SchemaError;

    fn try_from(actions: Vec<Action>) -> Result<Self, Self::Error> {
        for (index, action) in actions.iter().enumerate() {
            let kind = action.kind();
            if action.selector().trim().is_empty() {
                return Err(SchemaError::EmptySelector { index, kind });
            }
            match action {
                Action::Type { value, .. } | Action::Press { value, .. }
                    if value.trim().is_empty() =>
                {
                    return Err(SchemaError::MissingValue { index, kind });
                }
                _ => {}
            }
        }
        Ok(Self { actions })
    }
}

impl From<Schema> for Vec<Action> {
    fn from(schema: Schema) -> Self {
        schema.actions
    }
}

/// A named schema plus the URL it runs against. This is the unit the CLI
/// loads from disk, matching the shape of the generated test files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub url: String,
    pub actions: Schema,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(raw).map_err(SchemaError::Parse)
    }
}

/// Outcome of one schema run. `extracted` accumulates even when a later
/// step fails, so partial reads survive for diagnostics.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    pub extracted: Vec<String>,
    pub failure: Option<StepError>,
}

impl ExecutionResult {
    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<Vec<String>, StepError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.extracted),
        }
    }
}

/// Maximum attempts for one interactive action.
pub const MAX_ATTEMPTS: u32 = 3;
/// Backoff between attempts is `attempt * BACKOFF_BASE`, no jitter.
pub const BACKOFF_BASE: Duration = Duration::from_millis(2000);
/// Selector wait on the first attempt, generous to absorb initial page load.
pub const FIRST_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Selector wait on retries, once the page is presumed settled.
pub const RETRY_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// Pause after a successful interactive action.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1000);
/// How long to wait for in-flight network activity to drain.
pub const NETWORK_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Pre-roll before an extract, letting dynamic content populate.
pub const EXTRACT_DELAY: Duration = Duration::from_millis(2000);
/// Transient highlight applied to an element before interacting with it.
pub const HIGHLIGHT_STYLE: &str = "border: 2px solid red";
/// The highlight reverts itself after this long.
pub const HIGHLIGHT_REVERT_AFTER: Duration = Duration::from_millis(1000);
/// Navigation timeout for the scenario preamble.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);
/// Stabilization pause after the initial navigation.
pub const POST_NAVIGATION_DELAY: Duration = Duration::from_millis(2000);
/// Extract counts below this are suspect; callers assert on it, the
/// executor only reports the count.
pub const MIN_EXTRACT_RESULTS: usize = 3;
