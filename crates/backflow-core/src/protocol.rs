//! Consumer-side protocol.
//!
//! A subscription delivers `on_subscribe` exactly once and first, then any
//! number of `on_next`, then at most one of `on_error` / `on_complete`. The
//! consumer drives delivery with [`Subscription::request`] and may
//! [`Subscription::cancel`] at any time.
//!
//! [`StrictSubscriber`] wraps any subscriber and enforces that sequence,
//! reporting out-of-order signals instead of forwarding them.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::ProtocolViolation;
use crate::failure::Failure;
use crate::hooks::{default_sink, UndeliverableSink};

/// A signal travelling from producer to consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    /// A value.
    Next(T),
    /// Terminal failure.
    Error(Failure),
    /// Terminal success.
    Complete,
}

impl<T> Signal<T> {
    /// Returns `true` for `Error` and `Complete`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }
}

/// Producer side of a subscription, as seen by the consumer.
pub trait Upstream: Send + Sync {
    /// Adds `n` to the outstanding demand; `n == 0` is a protocol violation
    /// signalled to the consumer.
    fn request(&self, n: u64);

    /// Stops delivery and releases the producer's resources.
    fn cancel(&self);
}

/// Handle passed to [`Subscriber::on_subscribe`].
#[derive(Clone)]
pub struct Subscription {
    upstream: Arc<dyn Upstream>,
}

impl Subscription {
    /// Wraps an upstream.
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self { upstream }
    }

    /// Requests `n` more values.
    #[inline]
    pub fn request(&self, n: u64) {
        self.upstream.request(n);
    }

    /// Cancels the subscription.
    #[inline]
    pub fn cancel(&self) {
        self.upstream.cancel();
    }

    /// Returns `true` if both handles control the same upstream.
    #[must_use]
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Arc::ptr_eq(&self.upstream, &other.upstream)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Receives the signals of one subscription.
///
/// Calls for one subscription never overlap, but may come from different
/// threads over time.
pub trait Subscriber<T>: Send + Sync {
    /// Called once, before any other signal.
    fn on_subscribe(&self, subscription: Subscription);

    /// Called for each value.
    fn on_next(&self, value: T);

    /// Called when the stream fails. No further signals follow.
    ///
    /// The default implementation logs the error.
    fn on_error(&self, error: Failure) {
        tracing::warn!(kind = error.kind(), error = %error, "stream failed");
    }

    /// Called when the stream completes. No further signals follow.
    fn on_complete(&self) {}
}

impl<T, S: Subscriber<T> + ?Sized> Subscriber<T> for Arc<S> {
    fn on_subscribe(&self, subscription: Subscription) {
        (**self).on_subscribe(subscription);
    }

    fn on_next(&self, value: T) {
        (**self).on_next(value);
    }

    fn on_error(&self, error: Failure) {
        (**self).on_error(error);
    }

    fn on_complete(&self) {
        (**self).on_complete();
    }
}

// ---------------------------------------------------------------------------
// StrictSubscriber
// ---------------------------------------------------------------------------

const IDLE: u8 = 0;
const SUBSCRIBED: u8 = 1;
const DONE: u8 = 2;

/// Protocol guard around a subscriber.
///
/// - A second `on_subscribe` cancels the incoming subscription and reports
///   [`ProtocolViolation::DuplicateSubscription`].
/// - Signals before `on_subscribe` are reported as
///   [`ProtocolViolation::SignalBeforeSubscribe`].
/// - Signals after a terminal are reported; a late error is reported as is.
pub struct StrictSubscriber<S> {
    inner: S,
    state: AtomicU8,
    sink: Arc<dyn UndeliverableSink>,
}

impl<S> StrictSubscriber<S> {
    /// Wraps `inner`, reporting violations to the global hook.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self::with_sink(inner, default_sink())
    }

    /// Wraps `inner`, reporting violations to `sink`.
    #[must_use]
    pub fn with_sink(inner: S, sink: Arc<dyn UndeliverableSink>) -> Self {
        Self {
            inner,
            state: AtomicU8::new(IDLE),
            sink,
        }
    }

    /// The wrapped subscriber.
    #[must_use]
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    fn violation(&self, violation: ProtocolViolation) {
        tracing::warn!(%violation, "subscriber protocol violation");
        self.sink.report(Failure::new(violation));
    }

    /// Moves `SUBSCRIBED -> DONE`; reports and returns `false` otherwise.
    fn finish(&self, late: ProtocolViolation) -> bool {
        match self
            .state
            .compare_exchange(SUBSCRIBED, DONE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(IDLE) => {
                self.violation(ProtocolViolation::SignalBeforeSubscribe);
                false
            }
            Err(_) => {
                self.violation(late);
                false
            }
        }
    }
}

impl<T, S: Subscriber<T>> Subscriber<T> for StrictSubscriber<S> {
    fn on_subscribe(&self, subscription: Subscription) {
        if self
            .state
            .compare_exchange(IDLE, SUBSCRIBED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.on_subscribe(subscription);
        } else {
            subscription.cancel();
            self.violation(ProtocolViolation::DuplicateSubscription);
        }
    }

    fn on_next(&self, value: T) {
        match self.state.load(Ordering::Acquire) {
            SUBSCRIBED => self.inner.on_next(value),
            IDLE => self.violation(ProtocolViolation::SignalBeforeSubscribe),
            _ => self.violation(ProtocolViolation::NextAfterTerminal),
        }
    }

    fn on_error(&self, error: Failure) {
        match self
            .state
            .compare_exchange(SUBSCRIBED, DONE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => self.inner.on_error(error),
            Err(IDLE) => self.sink.report(Failure::compose(
                Failure::new(ProtocolViolation::SignalBeforeSubscribe),
                error,
            )),
            Err(_) => self.sink.report(error),
        }
    }

    fn on_complete(&self) {
        if self.finish(ProtocolViolation::CompleteAfterTerminal) {
            self.inner.on_complete();
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StrictSubscriber<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrictSubscriber")
            .field("inner", &self.inner)
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::CompositeError;
    use crate::testing::{RecordingSink, TestSubscriber};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingUpstream {
        requested: AtomicUsize,
        cancelled: AtomicUsize,
    }

    impl Upstream for CountingUpstream {
        fn request(&self, n: u64) {
            self.requested
                .fetch_add(usize::try_from(n).unwrap_or(usize::MAX), Ordering::SeqCst);
        }

        fn cancel(&self) {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn strict(initial: u64) -> (StrictSubscriber<Arc<TestSubscriber<i32>>>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let ts = Arc::new(TestSubscriber::new(initial));
        (StrictSubscriber::with_sink(ts, sink.clone()), sink)
    }

    #[test]
    fn test_signal_is_terminal() {
        assert!(!Signal::Next(1).is_terminal());
        assert!(Signal::<i32>::Complete.is_terminal());
        assert!(Signal::<i32>::Error(Failure::msg("e")).is_terminal());
    }

    #[test]
    fn test_strict_forwards_valid_sequence() {
        let (s, sink) = strict(0);
        let upstream = Arc::new(CountingUpstream::default());
        s.on_subscribe(Subscription::new(upstream));
        s.on_next(1);
        s.on_next(2);
        s.on_complete();
        s.get_ref().assert_result(&[1, 2]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_strict_duplicate_subscription_cancels_new() {
        let (s, sink) = strict(0);
        let first = Arc::new(CountingUpstream::default());
        let second = Arc::new(CountingUpstream::default());
        s.on_subscribe(Subscription::new(first.clone()));
        s.on_subscribe(Subscription::new(second.clone()));

        assert_eq!(first.cancelled.load(Ordering::SeqCst), 0);
        assert_eq!(second.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(
            sink.errors()[0].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::DuplicateSubscription)
        );
    }

    #[test]
    fn test_strict_signal_before_subscribe() {
        let (s, sink) = strict(0);
        s.on_next(1);
        s.on_complete();
        assert_eq!(sink.len(), 2);
        assert!(s.get_ref().values().is_empty());

        let error = Failure::msg("early");
        s.on_error(error.clone());
        let reported = sink.errors();
        let composite = reported[2].downcast_ref::<CompositeError>().unwrap();
        assert!(composite.exceptions()[1].ptr_eq(&error));
    }

    #[test]
    fn test_strict_after_terminal_reported() {
        let (s, sink) = strict(0);
        s.on_subscribe(Subscription::new(Arc::new(CountingUpstream::default())));
        s.on_complete();
        s.on_next(5);
        s.on_complete();
        let late = Failure::msg("late");
        s.on_error(late.clone());

        assert_eq!(s.get_ref().completions(), 1);
        let reported = sink.errors();
        assert_eq!(reported.len(), 3);
        assert_eq!(
            reported[0].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::NextAfterTerminal)
        );
        assert_eq!(
            reported[1].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::CompleteAfterTerminal)
        );
        assert!(reported[2].ptr_eq(&late));
    }

    #[test]
    fn test_subscription_forwards() {
        let upstream = Arc::new(CountingUpstream::default());
        let subscription = Subscription::new(upstream.clone());
        subscription.request(3);
        subscription.clone().cancel();
        assert_eq!(upstream.requested.load(Ordering::SeqCst), 3);
        assert_eq!(upstream.cancelled.load(Ordering::SeqCst), 1);
    }
}
