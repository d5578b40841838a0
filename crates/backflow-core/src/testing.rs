//! Test doubles for subscribers and undeliverable sinks.
//!
//! [`TestSubscriber`] records every signal it receives and drives demand from
//! the test body. [`RecordingSink`] collects undeliverable errors so tests can
//! inject it into an [`EmitterConfig`](crate::EmitterConfig) instead of
//! touching the process-wide hook.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::failure::Failure;
use crate::hooks::UndeliverableSink;
use crate::protocol::{Signal, Subscriber, Subscription};

/// Subscriber that records signals, in arrival order.
///
/// Requests and cancels issued before `on_subscribe` are deferred and
/// applied when the subscription arrives.
pub struct TestSubscriber<T> {
    subscription: Mutex<Option<Subscription>>,
    /// Demand requested before `on_subscribe`.
    pending: Mutex<u64>,
    cancel_on_subscribe: Mutex<bool>,
    signals: Mutex<Vec<Signal<T>>>,
    subscriptions: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl<T> TestSubscriber<T> {
    /// Creates a subscriber requesting `initial` values on subscribe.
    #[must_use]
    pub fn new(initial: u64) -> Self {
        Self {
            subscription: Mutex::new(None),
            pending: Mutex::new(initial),
            cancel_on_subscribe: Mutex::new(false),
            signals: Mutex::new(Vec::new()),
            subscriptions: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Creates a subscriber requesting everything.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    /// Creates a subscriber that cancels as soon as it is subscribed.
    #[must_use]
    pub fn cancelled() -> Self {
        let ts = Self::new(0);
        *ts.cancel_on_subscribe.lock() = true;
        ts
    }

    /// Requests `n` more values, or defers the request until subscribed.
    pub fn request(&self, n: u64) {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Some(s) => s.request(n),
            None => {
                let mut pending = self.pending.lock();
                *pending = pending.saturating_add(n);
            }
        }
    }

    /// Cancels the subscription, or defers the cancel until subscribed.
    pub fn cancel(&self) {
        let subscription = self.subscription.lock().clone();
        match subscription {
            Some(s) => s.cancel(),
            None => *self.cancel_on_subscribe.lock() = true,
        }
    }

    /// Errors received so far.
    #[must_use]
    pub fn errors(&self) -> Vec<Failure> {
        self.signals
            .lock()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Error(error) => Some(error.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of completions received.
    #[must_use]
    pub fn completions(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|signal| matches!(signal, Signal::Complete))
            .count()
    }

    /// Number of values received.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.signals
            .lock()
            .iter()
            .filter(|signal| matches!(signal, Signal::Next(_)))
            .count()
    }

    /// Number of `on_subscribe` calls received.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Highest number of callbacks observed running at the same time.
    #[must_use]
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Returns `true` once an error or a completion arrived.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.signals.lock().iter().any(Signal::is_terminal)
    }

    /// Asserts that no error arrived.
    #[track_caller]
    pub fn assert_no_errors(&self) {
        let errors = self.errors();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    /// Asserts that no terminal signal arrived.
    #[track_caller]
    pub fn assert_not_terminated(&self) {
        self.assert_no_errors();
        assert_eq!(self.completions(), 0, "unexpected completion");
    }

    /// Asserts exactly one error whose message is `message`.
    #[track_caller]
    pub fn assert_error_message(&self, message: &str) {
        let errors = self.errors();
        assert_eq!(errors.len(), 1, "expected one error, got {errors:?}");
        assert_eq!(errors[0].message(), message);
    }

    fn record(&self, signal: Signal<T>) {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.signals.lock().push(signal);
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T: Clone> TestSubscriber<T> {
    /// Values received so far.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.signals
            .lock()
            .iter()
            .filter_map(|signal| match signal {
                Signal::Next(value) => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every signal received so far, in arrival order.
    #[must_use]
    pub fn signals(&self) -> Vec<Signal<T>> {
        self.signals.lock().clone()
    }
}

impl<T: Clone + PartialEq + fmt::Debug> TestSubscriber<T> {
    /// Asserts the exact signal sequence received.
    #[track_caller]
    pub fn assert_signals(&self, expected: &[Signal<T>]) {
        assert_eq!(self.signals(), expected);
    }

    /// Asserts the received values.
    #[track_caller]
    pub fn assert_values(&self, expected: &[T]) {
        assert_eq!(self.values(), expected);
    }

    /// Asserts `expected` values followed by exactly one completion.
    #[track_caller]
    pub fn assert_result(&self, expected: &[T]) {
        self.assert_values(expected);
        self.assert_no_errors();
        assert_eq!(self.completions(), 1, "expected one completion");
    }

    /// Asserts `expected` values followed by exactly one error of type `E`.
    #[track_caller]
    pub fn assert_failure<E: std::error::Error + 'static>(&self, expected: &[T]) {
        self.assert_values(expected);
        let errors = self.errors();
        assert_eq!(errors.len(), 1, "expected one error, got {errors:?}");
        assert!(
            errors[0].is::<E>(),
            "expected {}, got {:?}",
            std::any::type_name::<E>(),
            errors[0]
        );
        assert_eq!(self.completions(), 0, "unexpected completion");
    }
}

impl<T: Send> Subscriber<T> for TestSubscriber<T> {
    fn on_subscribe(&self, subscription: Subscription) {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        *self.subscription.lock() = Some(subscription.clone());
        if *self.cancel_on_subscribe.lock() {
            subscription.cancel();
            return;
        }
        let initial = std::mem::take(&mut *self.pending.lock());
        if initial > 0 {
            subscription.request(initial);
        }
    }

    fn on_next(&self, value: T) {
        self.record(Signal::Next(value));
    }

    fn on_error(&self, error: Failure) {
        self.record(Signal::Error(error));
    }

    fn on_complete(&self) {
        self.record(Signal::Complete);
    }
}

impl<T> fmt::Debug for TestSubscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSubscriber")
            .field("signals", &self.signals.lock().len())
            .finish_non_exhaustive()
    }
}

/// Sink collecting undeliverable errors.
#[derive(Debug, Default)]
pub struct RecordingSink {
    errors: Mutex<Vec<Failure>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported errors, oldest first.
    #[must_use]
    pub fn errors(&self) -> Vec<Failure> {
        self.errors.lock().clone()
    }

    /// Number of reported errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    /// Returns `true` if nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    /// Removes and returns the reported errors.
    pub fn take(&self) -> Vec<Failure> {
        std::mem::take(&mut *self.errors.lock())
    }
}

impl UndeliverableSink for RecordingSink {
    fn report(&self, error: Failure) {
        self.errors.lock().push(error);
    }
}
