use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::types::ActionKind;

/// Events emitted while a schema runs. The executor narrates through these
/// instead of printing, so harnesses can render or record them however they
/// like.
#[derive(Clone, Debug)]
pub enum RunEvent {
    ActionStarted {
        index: usize,
        kind: ActionKind,
        selector: String,
    },
    ActionRetried {
        index: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    ActionSucceeded {
        index: usize,
        attempts: u32,
    },
    ActionFailed {
        index: usize,
        attempts: u32,
        error: String,
    },
    /// Scroll or highlight failed. Never aborts the action.
    StabilizationSkipped {
        index: usize,
        stage: &'static str,
        error: String,
    },
    /// The post-action network-idle wait gave up. Never aborts the run.
    SettleSkipped {
        index: usize,
        error: String,
    },
    Extracted {
        index: usize,
        count: usize,
    },
    /// An extract's selector never showed up or the read failed. The run
    /// continues; shortfalls are the caller's concern.
    ExtractSkipped {
        index: usize,
        error: String,
    },
    ScreenshotCaptured {
        index: usize,
        path: PathBuf,
    },
}

/// Receives every [`RunEvent`] of a run, in order.
pub trait RunObserver: Send + Sync {
    fn on_event(&self, event: &RunEvent);
}

/// Default observer: renders events as log lines via `tracing`.
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::ActionStarted {
                index,
                kind,
                selector,
            } => {
                info!(index, %kind, %selector, "executing action");
            }
            RunEvent::ActionRetried {
                index,
                attempt,
                delay,
                error,
            } => {
                warn!(
                    index,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "attempt failed, retrying"
                );
            }
            RunEvent::ActionSucceeded { index, attempts } => {
                info!(index, attempts, "action succeeded");
            }
            RunEvent::ActionFailed {
                index,
                attempts,
                error,
            } => {
                warn!(index, attempts, %error, "action failed");
            }
            RunEvent::StabilizationSkipped {
                index,
                stage,
                error,
            } => {
                warn!(index, stage, %error, "stabilization skipped");
            }
            RunEvent::SettleSkipped { index, error } => {
                warn!(index, %error, "settle wait skipped");
            }
            RunEvent::Extracted { index, count } => {
                info!(index, count, "extracted text");
            }
            RunEvent::ExtractSkipped { index, error } => {
                warn!(index, %error, "extract skipped");
            }
            RunEvent::ScreenshotCaptured { index, path } => {
                info!(index, path = %path.display(), "failure screenshot captured");
            }
        }
    }
}
