//! Resilient declarative page automation.
//!
//! A schema is an ordered list of actions (click, type, press, wait,
//! extract) interpreted by [`Runner`] against anything implementing the
//! [`Page`] capability. Interactive actions are retried with scaled
//! backoff and leave a screenshot behind when they give up; extraction is
//! a best-effort read. [`chrome`] provides the real-browser [`Page`].

pub mod chrome;
pub mod error;
pub mod events;
pub mod page;
pub mod runner;
pub mod types;

pub use error::{PageError, SchemaError, StepError};
pub use events::{RunEvent, RunObserver, TracingObserver};
pub use page::{LoadCondition, Page, SelectorState};
pub use runner::Runner;
pub use types::{Action, ActionKind, ExecutionResult, Scenario, Schema};
