//! Metrics event stream.
//!
//! Every dispatch publishes its progress into a [`MetricsChannel`]. Observers
//! either pull events through a [`Subscription`] or register a callback with
//! [`MetricsChannel::listen`], which returns a [`Listener`] handle that stops
//! delivery when dropped.
//!
//! Each observer has its own bounded buffer. When an observer falls behind,
//! its oldest events are discarded and counted in [`Subscription::dropped`];
//! the publisher never blocks. With no observers, events are dropped.

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::{AttemptRecord, OutcomeSummary, Result, StatsSnapshot};

/// Name of the event channel the UI subscribes to.
pub const METRICS_UPDATE: &str = "metrics_update";

/// Default per-observer buffer size.
pub const DEFAULT_METRICS_CAPACITY: usize = 1024;

/// Largest per-observer buffer a channel will allocate.
pub const MAX_METRICS_CAPACITY: usize = 1 << 16;

/// Progress notification for one dispatch.
///
/// Events of a single dispatch arrive in emission order; events of
/// concurrent dispatches interleave and are told apart by `dispatch_id`.
/// `StatsUpdate` belongs to a timed run rather than to one dispatch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsEvent {
    AttemptStarted {
        dispatch_id: u64,
        attempt_index: u32,
    },
    AttemptCompleted {
        dispatch_id: u64,
        record: AttemptRecord,
    },
    DispatchFinished {
        dispatch_id: u64,
        attempts: u32,
        outcome: OutcomeSummary,
    },
    /// Cumulative statistics of a timed run, published periodically.
    StatsUpdate {
        run_id: u64,
        elapsed_ms: u64,
        snapshot: Box<StatsSnapshot>,
    },
}

impl MetricsEvent {
    /// Dispatch the event belongs to; `None` for run-level events.
    pub fn dispatch_id(&self) -> Option<u64> {
        match self {
            Self::AttemptStarted { dispatch_id, .. }
            | Self::AttemptCompleted { dispatch_id, .. }
            | Self::DispatchFinished { dispatch_id, .. } => Some(*dispatch_id),
            Self::StatsUpdate { .. } => None,
        }
    }

    /// Serialized form delivered on [`METRICS_UPDATE`].
    pub fn payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

/// Many-producer, many-observer event stream with bounded per-observer buffers.
#[derive(Clone, Debug)]
pub struct MetricsChannel {
    tx: broadcast::Sender<MetricsEvent>,
}

impl Default for MetricsChannel {
    fn default() -> Self {
        Self::new(DEFAULT_METRICS_CAPACITY)
    }
}

impl MetricsChannel {
    /// Creates a channel buffering up to `capacity` events per observer,
    /// clamped to `1..=MAX_METRICS_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.clamp(1, MAX_METRICS_CAPACITY));
        Self { tx }
    }

    pub fn publish(&self, event: MetricsEvent) {
        // send() only fails when nobody is subscribed; the event is dropped.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: Some(self.tx.subscribe()),
            dropped: 0,
        }
    }

    /// Delivers every subsequent event to `callback` on a background task
    /// until the returned [`Listener`] is dropped or unlistened.
    ///
    /// Fails with [`crate::FireError::NoRuntime`] outside a Tokio runtime.
    pub fn listen<F>(&self, mut callback: F) -> Result<Listener>
    where
        F: FnMut(MetricsEvent) + Send + 'static,
    {
        let runtime = Handle::try_current()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let mut subscription = self.subscribe();

        runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    event = subscription.recv() => match event {
                        Some(event) if !token.is_cancelled() => callback(event),
                        _ => break,
                    },
                }
            }
        });

        Ok(Listener { cancel })
    }

    /// Number of live subscriptions and listeners.
    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Pull-based handle on a [`MetricsChannel`].
///
/// Dropping the handle or calling [`Subscription::unsubscribe`] removes the
/// observer; both are idempotent.
#[derive(Debug)]
pub struct Subscription {
    rx: Option<broadcast::Receiver<MetricsEvent>>,
    dropped: u64,
}

impl Subscription {
    /// Waits for the next event. Returns `None` once unsubscribed or once
    /// every publisher is gone.
    pub async fn recv(&mut self) -> Option<MetricsEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<MetricsEvent> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.rx = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.rx.is_some()
    }

    /// Events discarded for this observer because its buffer overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;

        #[cfg(feature = "tracing")]
        tracing::warn!(skipped, "metrics observer lagged, events dropped");
    }
}

/// Callback registration returned by [`MetricsChannel::listen`].
#[derive(Debug)]
pub struct Listener {
    cancel: CancellationToken,
}

impl Listener {
    /// Stops delivery. Safe to call more than once.
    pub fn unlisten(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{MetricsChannel, MetricsEvent, MAX_METRICS_CAPACITY, METRICS_UPDATE};
    use crate::{FireError, OutcomeSummary, StatsSnapshot};

    fn started(dispatch_id: u64, attempt_index: u32) -> MetricsEvent {
        MetricsEvent::AttemptStarted {
            dispatch_id,
            attempt_index,
        }
    }

    #[test]
    fn publish_without_observers_does_not_fail() {
        let channel = MetricsChannel::new(4);
        channel.publish(started(1, 0));
        assert_eq!(channel.observer_count(), 0);
    }

    #[test]
    fn slow_observer_is_bounded_and_counts_drops() {
        let channel = MetricsChannel::new(2);
        let mut subscription = channel.subscribe();

        for index in 0..5 {
            channel.publish(started(1, index));
        }

        assert_eq!(subscription.try_recv(), Some(started(1, 3)));
        assert_eq!(subscription.try_recv(), Some(started(1, 4)));
        assert_eq!(subscription.try_recv(), None);
        assert_eq!(subscription.dropped(), 3);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let channel = MetricsChannel::new(4);
        let mut subscription = channel.subscribe();
        assert_eq!(channel.observer_count(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        channel.publish(started(1, 0));

        assert!(!subscription.is_subscribed());
        assert_eq!(subscription.try_recv(), None);
        assert_eq!(channel.observer_count(), 0);
    }

    #[test]
    fn payload_is_tagged_json() {
        let event = MetricsEvent::DispatchFinished {
            dispatch_id: 7,
            attempts: 1,
            outcome: OutcomeSummary::Cancelled,
        };
        let payload = event.payload().unwrap();

        assert_eq!(METRICS_UPDATE, "metrics_update");
        assert_eq!(payload["type"], "dispatch_finished");
        assert_eq!(payload["dispatch_id"], 7);
        assert_eq!(payload["outcome"]["type"], "cancelled");
    }

    #[tokio::test]
    async fn listener_stops_after_unlisten() {
        let channel = MetricsChannel::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let listener = channel
            .listen(move |event| {
                sink.lock().expect("sink lock").push(event.dispatch_id());
            })
            .expect("inside a runtime");
        channel.publish(started(1, 0));
        tokio::time::sleep(Duration::from_millis(20)).await;

        listener.unlisten();
        listener.unlisten();
        channel.publish(started(2, 0));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!listener.is_active());
        assert_eq!(*seen.lock().expect("sink lock"), vec![Some(1)]);
    }

    #[test]
    fn listen_outside_runtime_is_an_error() {
        let channel = MetricsChannel::new(4);

        let result = channel.listen(|_| {});

        assert!(matches!(result, Err(FireError::NoRuntime(_))));
        assert_eq!(channel.observer_count(), 0);
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let channel = MetricsChannel::new(usize::MAX);
        let mut subscription = channel.subscribe();

        channel.publish(started(1, 0));

        assert_eq!(subscription.try_recv(), Some(started(1, 0)));
        assert!(MAX_METRICS_CAPACITY < usize::MAX / 2);
    }

    #[test]
    fn stats_update_payload_carries_snapshot() {
        let event = MetricsEvent::StatsUpdate {
            run_id: 3,
            elapsed_ms: 1_000,
            snapshot: Box::new(StatsSnapshot {
                total_requests: 4,
                ..StatsSnapshot::default()
            }),
        };
        let payload = event.payload().unwrap();

        assert_eq!(event.dispatch_id(), None);
        assert_eq!(payload["type"], "stats_update");
        assert_eq!(payload["run_id"], 3);
        assert_eq!(payload["snapshot"]["total_requests"], 4);
    }
}
