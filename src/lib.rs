//! `httpfire` dispatches HTTP requests with bounded retries, per-attempt
//! deadlines and cancellation, and reports progress on a metrics stream.
//!
//! - [`RequestDescriptor`] and [`RetryPolicy`] describe what to send and how
//!   hard to try.
//! - [`Dispatcher::fire`] runs the attempts and returns a [`DispatchHandle`]
//!   resolving to a [`DispatchOutcome`].
//! - [`Dispatcher::run_for`] keeps firing rounds of parallel dispatches for a
//!   fixed duration and publishes periodic [`StatsSnapshot`]s.
//! - [`MetricsChannel`] carries [`MetricsEvent`]s to observers.
//! - [`fire()`] is the argument-validating entry point for UI bindings.

mod attempt;
mod dispatcher;
mod error;
pub mod fire;
pub mod metrics;
mod options;
mod outcome;
mod policy;
mod request;
pub mod stats;

pub use attempt::{AttemptExecutor, AttemptRecord, HttpExecutor, RecordedOutcome};
pub use dispatcher::{
    dispatch_count, BurstReport, DispatchHandle, Dispatcher, RunPlan, RunReport,
    DEFAULT_REPORT_INTERVAL, MAX_BURST,
};
pub use error::FireError;
pub use fire::{fire, fire_for, FireArgs, RunArgs};
pub use metrics::{
    Listener, MetricsChannel, MetricsEvent, Subscription, DEFAULT_METRICS_CAPACITY,
    MAX_METRICS_CAPACITY, METRICS_UPDATE,
};
pub use options::DispatcherOptions;
pub use outcome::{
    AttemptOutcome, DispatchOutcome, HttpResponse, NetworkErrorKind, OutcomeSummary,
    TransientError,
};
pub use policy::{Backoff, RetryPolicy, DEFAULT_RETRYABLE_STATUSES, MAX_ATTEMPTS_LIMIT};
pub use request::{parse_method, RequestDescriptor, SUPPORTED_METHODS};
pub use stats::{Stats, StatsSnapshot};

pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, FireError>;
