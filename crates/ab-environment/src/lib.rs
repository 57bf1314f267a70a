//! # ab-environment
//!
//! The Environment contract (C6) and Trial Runner (C7): the execution-side
//! state machine that takes a parameter assignment through
//! setup -> run -> teardown with idempotent, context-scoped resource
//! lifecycles (spec §4.3).

mod composite;
mod environment;
mod error;
mod mock;
mod retry;
mod services;
mod state;
mod synthetic;
mod trial_runner;

pub use composite::{CompositeChild, CompositeEnvironment};
pub use environment::{expand_group_refs, expand_vars, names_resolved_by, ConstArgs, Environment, GlobalConfig};
pub use error::{EnvResult, EnvironmentError};
pub use mock::{MockEnvironment, MockScript, MockStatusPoll};
pub use retry::{with_backoff, RetryConfig};
pub use services::Services;
pub use state::{Phase, StateMachine};
pub use synthetic::{SyntheticConfig, SyntheticEnvironment};
pub use trial_runner::{PollSchedule, TrialRunner};
