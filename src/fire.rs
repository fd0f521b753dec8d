//! Invocation surface for UI bindings.
//!
//! A UI calls `fire(url, method, headers, maxAttempts, timeoutMs)` and
//! listens on [`crate::METRICS_UPDATE`] for progress. [`FireArgs`] is the
//! deserialized argument bundle; [`fire`] validates it synchronously and
//! starts the dispatch. [`RunArgs`] and [`fire_for`] drive a timed load run
//! that reports cumulative statistics on the same channel.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    AttemptExecutor, DispatchHandle, Dispatcher, RequestDescriptor, Result, RetryPolicy, RunPlan,
    RunReport, DEFAULT_REPORT_INTERVAL,
};

/// Arguments of a UI `fire` call.
///
/// `max_attempts` is the total number of attempts, including the first one.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireArgs {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub max_attempts: u32,
    pub timeout_ms: u64,
}

impl FireArgs {
    /// Validates the arguments into a descriptor and policy.
    ///
    /// The policy retries with a fixed backoff of a tenth of `timeout_ms`.
    pub fn into_parts(self) -> Result<(RequestDescriptor, RetryPolicy)> {
        let request = RequestDescriptor::from_parts(&self.url, &self.method, &self.headers)?;
        let policy = RetryPolicy::from_timeout_ms(self.max_attempts, self.timeout_ms)?;
        Ok((request, policy))
    }
}

/// Validates `args` and starts a dispatch.
///
/// Validation failures are returned immediately; no attempt is made, no
/// metrics event is published and the dispatch counter is not incremented.
///
/// Outside a Tokio runtime the call fails with [`crate::FireError::NoRuntime`].
pub fn fire<E: AttemptExecutor>(
    dispatcher: &Dispatcher<E>,
    args: FireArgs,
) -> Result<DispatchHandle> {
    let (request, policy) = args.into_parts()?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        method = %request.method(),
        url = %request.url(),
        max_attempts = policy.max_attempts(),
        "fire"
    );

    dispatcher.fire(request, policy)
}

fn default_max_attempts() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_report_interval_ms() -> u64 {
    DEFAULT_REPORT_INTERVAL.as_millis() as u64
}

/// Arguments of a UI timed run: `parallelRequests` dispatches per round,
/// repeated for `durationMs`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunArgs {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub parallel_requests: usize,
    pub duration_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,
}

impl RunArgs {
    /// Validates the arguments into a descriptor, policy and run plan.
    pub fn into_parts(self) -> Result<(RequestDescriptor, RetryPolicy, RunPlan)> {
        let request = RequestDescriptor::from_parts(&self.url, &self.method, &self.headers)?;
        let policy = RetryPolicy::from_timeout_ms(self.max_attempts, self.timeout_ms)?;
        let plan = RunPlan::new(self.parallel_requests, Duration::from_millis(self.duration_ms))
            .report_every(Duration::from_millis(self.report_interval_ms));
        plan.validate()?;
        Ok((request, policy, plan))
    }
}

/// Validates `args` and runs rounds of parallel dispatches until the
/// duration elapses or `cancel` fires.
pub async fn fire_for<E: AttemptExecutor>(
    dispatcher: &Dispatcher<E>,
    args: RunArgs,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let (request, policy, plan) = args.into_parts()?;

    #[cfg(feature = "tracing")]
    tracing::debug!(
        method = %request.method(),
        url = %request.url(),
        parallel = plan.parallel,
        duration_ms = plan.duration.as_millis() as u64,
        "fire_for"
    );

    dispatcher.run_for(request, policy, plan, cancel).await
}
