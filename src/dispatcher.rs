use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    metrics::{MetricsChannel, MetricsEvent, Subscription},
    stats::{Stats, StatsSnapshot},
    AttemptExecutor, AttemptOutcome, AttemptRecord, DispatchOutcome, DispatcherOptions,
    FireError, HttpExecutor, NetworkErrorKind, RecordedOutcome, RequestDescriptor, Result,
    RetryPolicy,
};

/// Largest number of dispatches a single [`Dispatcher::burst`] may fire.
pub const MAX_BURST: usize = 1000;

/// Period of [`MetricsEvent::StatsUpdate`] during a timed run, unless the
/// [`RunPlan`] sets its own.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(1000);

static DISPATCH_COUNT: AtomicU64 = AtomicU64::new(0);
static RUN_COUNT: AtomicU64 = AtomicU64::new(0);

/// Number of dispatches started by every dispatcher in this process.
pub fn dispatch_count() -> u64 {
    DISPATCH_COUNT.load(Ordering::SeqCst)
}

/// Runs requests with bounded retries, per-attempt deadlines and
/// cancellation, publishing progress on a [`MetricsChannel`].
///
/// Cloning is cheap; clones share the executor, the metrics channel, the
/// concurrency limit and the dispatch counter.
pub struct Dispatcher<E = HttpExecutor> {
    inner: Arc<Inner<E>>,
}

struct Inner<E> {
    executor: E,
    metrics: MetricsChannel,
    limiter: Option<Semaphore>,
    dispatches: AtomicU64,
    options: DispatcherOptions,
}

impl<E> Clone for Dispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("options", &self.inner.options)
            .field("dispatches", &self.inner.dispatches.load(Ordering::Relaxed))
            .field("observers", &self.inner.metrics.observer_count())
            .finish_non_exhaustive()
    }
}

impl Dispatcher<HttpExecutor> {
    /// Creates a dispatcher with default options and a `reqwest` executor.
    pub fn new() -> Result<Self> {
        Self::with_options(DispatcherOptions::default())
    }

    pub fn with_options(options: DispatcherOptions) -> Result<Self> {
        let executor = HttpExecutor::new(options.user_agent.clone())?;
        Self::with_executor(executor, options)
    }
}

impl<E: AttemptExecutor> Dispatcher<E> {
    /// Creates a dispatcher around a custom attempt executor.
    pub fn with_executor(executor: E, options: DispatcherOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                executor,
                metrics: MetricsChannel::new(options.metrics_capacity),
                limiter: options.max_concurrent_dispatches.map(Semaphore::new),
                dispatches: AtomicU64::new(0),
                options,
            }),
        })
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.inner.options
    }

    pub fn metrics(&self) -> &MetricsChannel {
        &self.inner.metrics
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.metrics.subscribe()
    }

    /// Number of dispatches started through this dispatcher and its clones.
    pub fn dispatch_count(&self) -> u64 {
        self.inner.dispatches.load(Ordering::SeqCst)
    }

    /// Starts a dispatch on the current Tokio runtime and returns a handle to
    /// await or cancel it. Dropping the handle detaches the dispatch; it
    /// keeps running to completion.
    ///
    /// Fails with [`FireError::NoRuntime`] outside a runtime, before any
    /// event is published or the dispatch is counted.
    pub fn fire(&self, request: RequestDescriptor, policy: RetryPolicy) -> Result<DispatchHandle> {
        self.fire_with_cancel(request, policy, CancellationToken::new())
    }

    /// Like [`Dispatcher::fire`], driven by a caller-owned cancellation token.
    pub fn fire_with_cancel(
        &self,
        request: RequestDescriptor,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Result<DispatchHandle> {
        let runtime = Handle::try_current()?;
        let id = self.next_dispatch_id();
        let dispatcher = self.clone();
        let token = cancel.clone();
        let task = runtime.spawn(async move {
            dispatcher
                .run(id, &request, &policy, &token)
                .await
                .outcome
        });

        Ok(DispatchHandle { id, cancel, task })
    }

    /// Runs a dispatch on the current task.
    pub async fn dispatch(
        &self,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let id = self.next_dispatch_id();
        self.run(id, request, policy, cancel).await.outcome
    }

    /// Fires `count` independent dispatches of the same request concurrently
    /// and waits for all of them.
    pub async fn burst(
        &self,
        request: RequestDescriptor,
        policy: RetryPolicy,
        count: usize,
    ) -> Result<BurstReport> {
        check_parallel(count)?;

        let reports = self
            .run_round(
                &Arc::new(request),
                &Arc::new(policy),
                count,
                &CancellationToken::new(),
            )
            .await?;

        let mut stats = Stats::default();
        let outcomes = reports
            .into_iter()
            .map(|report| {
                report.records.iter().for_each(|record| stats.record(record));
                report.outcome
            })
            .collect();

        Ok(BurstReport {
            outcomes,
            stats: stats.snapshot(),
        })
    }

    /// Fires rounds of `plan.parallel` concurrent dispatches until
    /// `plan.duration` has elapsed or `cancel` fires.
    ///
    /// Cumulative statistics are published as [`MetricsEvent::StatsUpdate`]
    /// every `plan.report_interval` and once more when the run ends. No round
    /// starts after the deadline; a round already running is awaited.
    pub async fn run_for(
        &self,
        request: RequestDescriptor,
        policy: RetryPolicy,
        plan: RunPlan,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        plan.validate()?;

        let run_id = RUN_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
        let request = Arc::new(request);
        let policy = Arc::new(policy);
        let started = Instant::now();
        let mut ticker = interval_at(
            tokio::time::Instant::now() + plan.report_interval,
            plan.report_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stats = Stats::default();
        let mut report = RunReport {
            run_id,
            ..RunReport::default()
        };

        while started.elapsed() < plan.duration && !cancel.is_cancelled() {
            let round_cancel = cancel.child_token();
            let round = self.run_round(&request, &policy, plan.parallel, &round_cancel);
            tokio::pin!(round);

            let dispatches = loop {
                tokio::select! {
                    reports = &mut round => break reports?,
                    _ = ticker.tick() => self.publish_stats(run_id, started, &stats),
                }
            };

            report.rounds += 1;
            for dispatch in dispatches {
                dispatch.records.iter().for_each(|record| stats.record(record));
                report.dispatches += 1;
                match dispatch.outcome {
                    DispatchOutcome::Success(_) => report.succeeded += 1,
                    DispatchOutcome::Exhausted(_) => report.exhausted += 1,
                    DispatchOutcome::Cancelled => report.cancelled += 1,
                }
            }
        }

        self.publish_stats(run_id, started, &stats);
        report.elapsed = started.elapsed();
        report.stats = stats.snapshot();

        #[cfg(feature = "tracing")]
        tracing::info!(
            run_id,
            rounds = report.rounds,
            dispatches = report.dispatches,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );

        Ok(report)
    }

    /// Spawns `count` dispatches sharing `cancel` and awaits them in order.
    ///
    /// If one of them cannot be joined, the rest are cancelled before the
    /// error is returned.
    async fn run_round(
        &self,
        request: &Arc<RequestDescriptor>,
        policy: &Arc<RetryPolicy>,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<DispatchReport>> {
        let mut tasks = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.next_dispatch_id();
            let dispatcher = self.clone();
            let request = Arc::clone(request);
            let policy = Arc::clone(policy);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                dispatcher.run(id, &request, &policy, &token).await
            }));
        }

        let mut reports = Vec::with_capacity(count);
        for task in tasks {
            match task.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    cancel.cancel();
                    return Err(FireError::Task(err.to_string()));
                }
            }
        }
        Ok(reports)
    }

    fn publish_stats(&self, run_id: u64, started: Instant, stats: &Stats) {
        self.inner.metrics.publish(MetricsEvent::StatsUpdate {
            run_id,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            snapshot: Box::new(stats.snapshot()),
        });
    }

    fn next_dispatch_id(&self) -> u64 {
        self.inner.dispatches.fetch_add(1, Ordering::SeqCst);
        DISPATCH_COUNT.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn run(
        &self,
        dispatch_id: u64,
        request: &RequestDescriptor,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> DispatchReport {
        let mut records = Vec::new();

        let _permit = match &self.inner.limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish(dispatch_id, records, DispatchOutcome::Cancelled);
                }
                permit = limiter.acquire() => permit.ok(),
            },
            None => None,
        };

        let mut attempt_index = 0u32;
        loop {
            if cancel.is_cancelled() {
                return self.finish(dispatch_id, records, DispatchOutcome::Cancelled);
            }

            self.inner.metrics.publish(MetricsEvent::AttemptStarted {
                dispatch_id,
                attempt_index,
            });

            #[cfg(feature = "tracing")]
            tracing::debug!(
                dispatch_id,
                attempt_index,
                method = %request.method(),
                url = %request.url(),
                "attempt started"
            );

            let started_at = SystemTime::now();
            let clock = Instant::now();
            let timeout = policy.per_attempt_timeout();
            let attempt =
                tokio::time::timeout(timeout, self.inner.executor.execute(request, timeout));
            let (outcome, aborted) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    (AttemptOutcome::NetworkError(NetworkErrorKind::Aborted), true)
                }
                outcome = attempt => (outcome.unwrap_or(AttemptOutcome::Timeout), false),
            };
            let outcome = classify(outcome, policy);

            let record = AttemptRecord {
                attempt_index,
                started_at,
                duration: clock.elapsed(),
                outcome: RecordedOutcome::from(&outcome),
            };

            #[cfg(feature = "tracing")]
            tracing::debug!(
                dispatch_id,
                attempt_index,
                duration_ms = record.duration.as_millis() as u64,
                outcome = ?record.outcome,
                "attempt completed"
            );

            self.inner.metrics.publish(MetricsEvent::AttemptCompleted {
                dispatch_id,
                record: record.clone(),
            });
            records.push(record);

            if aborted {
                return self.finish(dispatch_id, records, DispatchOutcome::Cancelled);
            }

            let last_error = match outcome.into_result() {
                Ok(response) => {
                    return self.finish(dispatch_id, records, DispatchOutcome::Success(response));
                }
                Err(error) => error,
            };

            if attempt_index + 1 >= policy.max_attempts() {
                return self.finish(dispatch_id, records, DispatchOutcome::Exhausted(last_error));
            }

            let delay = policy.backoff(attempt_index);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                dispatch_id,
                attempt_index,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return self.finish(dispatch_id, records, DispatchOutcome::Cancelled);
                }
                _ = sleep(delay) => {}
            }
            attempt_index += 1;
        }
    }

    fn finish(
        &self,
        dispatch_id: u64,
        records: Vec<AttemptRecord>,
        outcome: DispatchOutcome,
    ) -> DispatchReport {
        let attempts = records.len() as u32;

        #[cfg(feature = "tracing")]
        tracing::info!(dispatch_id, attempts, outcome = ?outcome.summary(), "dispatch finished");

        self.inner.metrics.publish(MetricsEvent::DispatchFinished {
            dispatch_id,
            attempts,
            outcome: outcome.summary(),
        });

        DispatchReport { outcome, records }
    }
}

/// Turns responses with a retryable status into transient failures.
fn classify(outcome: AttemptOutcome, policy: &RetryPolicy) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Success(response) if policy.is_retryable_status(response.status) => {
            AttemptOutcome::NetworkError(NetworkErrorKind::Status(response.status))
        }
        other => other,
    }
}

struct DispatchReport {
    outcome: DispatchOutcome,
    records: Vec<AttemptRecord>,
}

/// Result of [`Dispatcher::burst`].
#[derive(Clone, Debug)]
pub struct BurstReport {
    /// One outcome per dispatch, in firing order.
    pub outcomes: Vec<DispatchOutcome>,
    /// Statistics over every attempt of every dispatch in the burst.
    pub stats: StatsSnapshot,
}

fn check_parallel(count: usize) -> Result<()> {
    if count == 0 {
        return Err(FireError::InvalidRequest(
            "parallel dispatches cannot be 0".to_owned(),
        ));
    }
    if count > MAX_BURST {
        return Err(FireError::InvalidRequest(format!(
            "parallel dispatches cannot be greater than {MAX_BURST}"
        )));
    }
    Ok(())
}

/// Shape of a [`Dispatcher::run_for`] run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunPlan {
    /// Dispatches fired concurrently in every round (1..=[`MAX_BURST`]).
    pub parallel: usize,
    /// Wall-clock budget; no round starts once it has elapsed.
    pub duration: Duration,
    /// Period of the cumulative [`MetricsEvent::StatsUpdate`].
    pub report_interval: Duration,
}

impl RunPlan {
    pub fn new(parallel: usize, duration: Duration) -> Self {
        Self {
            parallel,
            duration,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }

    pub fn report_every(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_parallel(self.parallel)?;
        if self.duration.is_zero() {
            return Err(FireError::InvalidRequest(
                "run duration must be greater than 0".to_owned(),
            ));
        }
        if self.report_interval.is_zero() {
            return Err(FireError::InvalidRequest(
                "report interval must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Result of [`Dispatcher::run_for`].
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    /// Identifier carried by this run's [`MetricsEvent::StatsUpdate`]s.
    pub run_id: u64,
    pub rounds: u64,
    pub dispatches: u64,
    pub succeeded: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub elapsed: Duration,
    /// Statistics over every attempt of the run.
    pub stats: StatsSnapshot,
}

/// Handle on a running dispatch.
///
/// Awaiting the handle yields the terminal [`DispatchOutcome`]; the error
/// case only occurs if the dispatch task panicked or the runtime shut down.
#[derive(Debug)]
pub struct DispatchHandle {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<DispatchOutcome>,
}

impl DispatchHandle {
    /// Identifier carried by this dispatch's metrics events.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Requests cancellation. No new attempt starts afterwards and an
    /// in-flight attempt is abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Future for DispatchHandle {
    type Output = Result<DispatchOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|joined| joined.map_err(|err| FireError::Task(err.to_string())))
    }
}
