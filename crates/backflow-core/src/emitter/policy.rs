//! The five overflow-policy emitters.
//!
//! `Missing`, `Error` and `Drop` deliver directly on the producer's thread.
//! `Latest` and `Buffer` hand values to a queue-drain loop: producers push
//! into a lock-free inbox, and whichever thread wins the work-in-progress
//! counter (a producer emitting, or the consumer requesting) moves values
//! into the drainer-owned buffer and delivers as demand allows.
//!
//! A failure raised by the consumer (`request(0)`) never runs beside a
//! delivery: direct policies park it until the running delivery returns,
//! queued policies route it through the drain loop.
//!
//! Lifecycle: `ACTIVE -> TERMINATED` on the first terminal signal,
//! `ACTIVE -> CANCELLED` on consumer cancel. The transition is a single CAS,
//! so exactly one of them happens and the held resource is disposed once.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{fence, AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_queue::SegQueue;

use super::config::{BackpressureStrategy, BufferOverflow, EmitterConfig, OverflowCallback};
use super::serialized::SerializedEmitter;
use super::terminal::{Terminal, TerminalCell};
use super::FlowEmitter;
use crate::demand::Demand;
use crate::disposable::{ActionDisposable, Cancellable, Disposable, SerialDisposable};
use crate::error::{MissingBackpressure, ProtocolViolation};
use crate::failure::Failure;
use crate::hooks::UndeliverableSink;
use crate::protocol::{Subscriber, Subscription, Upstream};

const ACTIVE: u8 = 0;
const TERMINATED: u8 = 1;
const CANCELLED: u8 = 2;

/// Producer handle for one subscription.
///
/// Cloning yields another handle to the same subscription. Calls on a plain
/// emitter must not overlap; use [`FlowEmitter::serialize`] when several
/// threads emit.
pub struct Emitter<T> {
    core: Arc<EmitterCore<T>>,
}

struct Downstream<T>(Arc<dyn Subscriber<T>>);

struct EmitterCore<T> {
    /// Cleared on termination and cancellation.
    downstream: ArcSwapOption<Downstream<T>>,
    demand: Demand,
    lifecycle: AtomicU8,
    resource: SerialDisposable,
    /// Set once the producer itself issued a terminal signal.
    producer_done: AtomicBool,
    sink: Arc<dyn UndeliverableSink>,
    name: Option<String>,
    /// Used by the direct policies only.
    gate: Gate,
    policy: Policy<T>,
}

/// Orders direct deliveries with failures raised on the consumer's thread.
///
/// `delivering` counts producer calls inside a delivery; re-entrant calls
/// nest. A consumer-side failure is parked once in `fault`, after which no
/// delivery starts. The failure is delivered by the requesting thread if no
/// delivery is running, else by the last producer call to leave.
#[derive(Default)]
struct Gate {
    delivering: AtomicUsize,
    fault: ArcSwapOption<Failure>,
    claimed: AtomicBool,
}

enum Policy<T> {
    Missing,
    Error,
    Drop,
    Latest(QueueDrain<T>),
    Buffer(QueueDrain<T>),
}

impl<T> Policy<T> {
    fn from_config(config: &EmitterConfig) -> Self {
        match config.strategy {
            BackpressureStrategy::Missing => Policy::Missing,
            BackpressureStrategy::Error => Policy::Error,
            BackpressureStrategy::Drop => Policy::Drop,
            BackpressureStrategy::Latest => Policy::Latest(QueueDrain::new(Retention::Latest, 1)),
            BackpressureStrategy::Buffer => {
                let retention = match config.capacity {
                    None => Retention::Unbounded,
                    Some(capacity) => Retention::Bounded {
                        capacity,
                        overflow: config.overflow,
                        on_overflow: config.on_overflow.clone(),
                    },
                };
                let hint = config
                    .capacity
                    .map_or(config.capacity_hint, NonZeroUsize::get)
                    .min(config.capacity_hint);
                Policy::Buffer(QueueDrain::new(retention, hint))
            }
        }
    }

    fn strategy(&self) -> BackpressureStrategy {
        match self {
            Policy::Missing => BackpressureStrategy::Missing,
            Policy::Error => BackpressureStrategy::Error,
            Policy::Drop => BackpressureStrategy::Drop,
            Policy::Latest(_) => BackpressureStrategy::Latest,
            Policy::Buffer(_) => BackpressureStrategy::Buffer,
        }
    }
}

// ---------------------------------------------------------------------------
// Queue-drain state for Latest / Buffer
// ---------------------------------------------------------------------------

enum Retention {
    /// Keep only the newest value.
    Latest,
    Unbounded,
    Bounded {
        capacity: NonZeroUsize,
        overflow: BufferOverflow,
        on_overflow: Option<OverflowCallback>,
    },
}

struct QueueDrain<T> {
    inbox: SegQueue<T>,
    wip: AtomicUsize,
    terminal: TerminalCell,
    /// Owned by the thread holding `wip`.
    buffer: UnsafeCell<VecDeque<T>>,
    retention: Retention,
}

// SAFETY: `buffer` is only touched by the thread that raised `wip` from 0,
// which makes access exclusive; everything else is atomic. Values move
// between threads, hence `T: Send`.
#[allow(unsafe_code)]
unsafe impl<T: Send> Sync for QueueDrain<T> {}

impl<T> QueueDrain<T> {
    fn new(retention: Retention, capacity_hint: usize) -> Self {
        Self {
            inbox: SegQueue::new(),
            wip: AtomicUsize::new(0),
            terminal: TerminalCell::new(),
            buffer: UnsafeCell::new(VecDeque::with_capacity(capacity_hint)),
            retention,
        }
    }

    /// Moves inbox values into the buffer under the retention rule.
    ///
    /// Returns the failure that must terminate the stream, if a bounded
    /// buffer overflowed without eviction or the overflow callback failed.
    fn absorb(&self, buffer: &mut VecDeque<T>) -> Option<Failure> {
        while let Some(value) = self.inbox.pop() {
            match &self.retention {
                Retention::Latest => {
                    buffer.clear();
                    buffer.push_back(value);
                }
                Retention::Unbounded => buffer.push_back(value),
                Retention::Bounded {
                    capacity,
                    overflow,
                    on_overflow,
                } => {
                    if buffer.len() < capacity.get() {
                        buffer.push_back(value);
                        continue;
                    }
                    match overflow {
                        BufferOverflow::Error => {
                            return Some(Failure::new(MissingBackpressure::lack_of_requests()));
                        }
                        BufferOverflow::DropOldest => {
                            buffer.pop_front();
                        }
                        BufferOverflow::DropLatest => {
                            buffer.pop_back();
                        }
                    }
                    buffer.push_back(value);
                    tracing::trace!(capacity = capacity.get(), "buffer full, value evicted");
                    if let Some(callback) = on_overflow {
                        if let Err(error) = callback() {
                            return Some(error);
                        }
                    }
                }
            }
        }
        None
    }

    fn discard(&self, buffer: &mut VecDeque<T>) {
        buffer.clear();
        while self.inbox.pop().is_some() {}
    }

    /// Clears pending values if no drain is running. `wip` is left raised so
    /// no drain starts afterwards.
    fn shut_down(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            // SAFETY: raising `wip` from 0 grants exclusive buffer access.
            #[allow(unsafe_code)]
            let buffer = unsafe { &mut *self.buffer.get() };
            self.discard(buffer);
        }
    }
}

// ---------------------------------------------------------------------------
// EmitterCore
// ---------------------------------------------------------------------------

impl<T> EmitterCore<T> {
    #[inline]
    fn is_active(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == ACTIVE
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("emitter")
    }

    fn deliver(&self, value: T) {
        if let Some(downstream) = self.downstream.load_full() {
            downstream.0.on_next(value);
        }
    }

    fn late_signal(&self, violation: ProtocolViolation) {
        tracing::warn!(emitter = self.label(), %violation, "signal after terminal");
        self.sink.report(Failure::new(violation));
    }

    /// Moves the lifecycle from active to terminated.
    fn claim_terminal(&self) -> bool {
        match self.lifecycle.compare_exchange(
            ACTIVE,
            TERMINATED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(CANCELLED) => {
                tracing::debug!(emitter = self.label(), "terminal lost the race to a cancel");
                false
            }
            Err(_) => false,
        }
    }

    /// Delivers `error` as the terminal signal if none happened yet.
    ///
    /// A failure while releasing the resource is composed with `error`.
    fn terminate_error(&self, error: Failure) -> bool {
        if !self.claim_terminal() {
            return false;
        }
        let error = match self.resource.dispose() {
            Ok(()) => error,
            Err(cleanup) => Failure::compose(error, cleanup),
        };
        match self.downstream.swap(None) {
            Some(downstream) => downstream.0.on_error(error),
            None => self.sink.report(error),
        }
        true
    }

    /// Delivers completion if no terminal happened yet, then releases the
    /// resource; a release failure is undeliverable.
    fn terminate_complete(&self) -> bool {
        if !self.claim_terminal() {
            return false;
        }
        if let Some(downstream) = self.downstream.swap(None) {
            downstream.0.on_complete();
        }
        if let Err(cleanup) = self.resource.dispose() {
            self.sink.report(cleanup);
        }
        true
    }

    fn deliver_terminal(&self, terminal: &Terminal) {
        match terminal {
            Terminal::Complete => {
                self.terminate_complete();
            }
            Terminal::Error { error, .. } => {
                if !self.terminate_error(error.clone()) {
                    self.sink.report(error.clone());
                }
            }
            Terminal::Delivered => {}
        }
    }

    /// Runs one direct delivery unless a consumer-side failure is parked.
    fn emit_direct(&self, emit: impl FnOnce()) {
        self.gate.delivering.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        if self.gate.fault.load().is_none() {
            emit();
        } else {
            tracing::trace!(emitter = self.label(), "value dropped, stream failing");
        }
        if self.gate.delivering.fetch_sub(1, Ordering::SeqCst) == 1 {
            fence(Ordering::SeqCst);
            if self.gate.fault.load().is_some() {
                self.deliver_fault();
            }
        }
    }

    /// Terminates a direct policy once no value is being delivered.
    fn fail_direct(&self, error: Failure) {
        if !self.is_active() {
            self.sink.report(error);
            return;
        }
        let previous = self
            .gate
            .fault
            .rcu(|pending| pending.clone().or_else(|| Some(Arc::new(error.clone()))));
        if previous.is_some() {
            self.sink.report(error);
            return;
        }
        fence(Ordering::SeqCst);
        if self.gate.delivering.load(Ordering::SeqCst) == 0 {
            self.deliver_fault();
        }
    }

    fn deliver_fault(&self) {
        if self.gate.claimed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(fault) = self.gate.fault.load_full() {
            let error = Failure::clone(&fault);
            if !self.terminate_error(error.clone()) {
                self.sink.report(error);
            }
        }
    }

    /// Terminates through the queue-drain loop, ahead of queued values.
    fn fail_queued(&self, queue: &QueueDrain<T>, error: Failure) {
        if self.is_active() && queue.terminal.preempt(&error) {
            self.drain(queue);
        } else {
            self.sink.report(error);
        }
    }

    fn drain(&self, queue: &QueueDrain<T>) {
        if queue.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1;
        loop {
            // SAFETY: raising `wip` from 0 made this thread the only drainer
            // until `wip` drops back to 0.
            #[allow(unsafe_code)]
            let buffer = unsafe { &mut *queue.buffer.get() };
            if self.drain_round(queue, buffer) {
                return;
            }
            let previous = queue.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                break;
            }
        }
    }

    /// One pass of the drain loop. Returns `true` once the stream finished,
    /// leaving `wip` raised for good.
    fn drain_round(&self, queue: &QueueDrain<T>, buffer: &mut VecDeque<T>) -> bool {
        let requested = self.demand.current();
        let mut emitted = 0u64;
        loop {
            if !self.is_active() {
                queue.discard(buffer);
                return true;
            }
            // Read before absorbing: every value published ahead of the
            // terminal is then already in the inbox.
            let terminal = queue.terminal.get();
            if let Some(Terminal::Error {
                skip_ahead: true, ..
            }) = terminal.as_deref()
            {
                queue.discard(buffer);
                self.finish(queue);
                return true;
            }
            if let Some(error) = queue.absorb(buffer) {
                queue.terminal.preempt(&error);
                continue;
            }
            if emitted == requested {
                if buffer.is_empty() && terminal.is_some() {
                    self.finish(queue);
                    return true;
                }
                break;
            }
            match buffer.pop_front() {
                Some(value) => {
                    self.deliver(value);
                    emitted += 1;
                }
                None => {
                    if terminal.is_some() {
                        self.finish(queue);
                        return true;
                    }
                    break;
                }
            }
        }
        if emitted != 0 {
            self.demand.produced(emitted);
        }
        false
    }

    fn finish(&self, queue: &QueueDrain<T>) {
        if let Some(terminal) = queue.terminal.claim() {
            self.deliver_terminal(&terminal);
        }
    }
}

impl<T: Send + 'static> Upstream for EmitterCore<T> {
    fn request(&self, n: u64) {
        match self.demand.request(n) {
            Ok(_) => match &self.policy {
                Policy::Missing | Policy::Error | Policy::Drop => {}
                Policy::Latest(queue) | Policy::Buffer(queue) => self.drain(queue),
            },
            Err(violation) => {
                tracing::warn!(emitter = self.label(), %violation, "invalid request");
                let error = Failure::new(violation);
                match &self.policy {
                    Policy::Missing | Policy::Error | Policy::Drop => self.fail_direct(error),
                    Policy::Latest(queue) | Policy::Buffer(queue) => {
                        self.fail_queued(queue, error);
                    }
                }
            }
        }
    }

    fn cancel(&self) {
        if self
            .lifecycle
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        tracing::debug!(emitter = self.label(), "subscription cancelled");
        // Detach before disposing: nothing reaches the consumer afterwards.
        self.downstream.store(None);
        if let Err(cleanup) = self.resource.dispose() {
            self.sink.report(cleanup);
        }
        match &self.policy {
            Policy::Missing | Policy::Error | Policy::Drop => {}
            Policy::Latest(queue) | Policy::Buffer(queue) => queue.shut_down(),
        }
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

impl<T: Send + 'static> Emitter<T> {
    /// Creates an emitter delivering to `downstream`.
    ///
    /// Hand [`subscription`](Self::subscription) to the consumer's
    /// `on_subscribe` before emitting.
    #[must_use]
    pub fn new(config: &EmitterConfig, downstream: Arc<dyn Subscriber<T>>) -> Self {
        let core = EmitterCore {
            downstream: ArcSwapOption::from_pointee(Downstream(downstream)),
            demand: Demand::new(),
            lifecycle: AtomicU8::new(ACTIVE),
            resource: SerialDisposable::new(),
            producer_done: AtomicBool::new(false),
            sink: Arc::clone(&config.sink),
            name: config.name.clone(),
            gate: Gate::default(),
            policy: Policy::from_config(config),
        };
        Self {
            core: Arc::new(core),
        }
    }

    /// The consumer's handle on this emitter.
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        Subscription::new(Arc::clone(&self.core) as Arc<dyn Upstream>)
    }
}

impl<T> Emitter<T> {
    /// The overflow strategy in effect.
    #[must_use]
    pub fn strategy(&self) -> BackpressureStrategy {
        self.core.policy.strategy()
    }

    /// The sink receiving undeliverable errors.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn UndeliverableSink> {
        &self.core.sink
    }

    /// Returns `true` if both handles drive the same subscription.
    #[must_use]
    pub fn ptr_eq(&self, other: &Emitter<T>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: Send + 'static> FlowEmitter<T> for Emitter<T> {
    fn on_next(&self, value: T) {
        let core = &*self.core;
        if core.producer_done.load(Ordering::Acquire) {
            core.late_signal(ProtocolViolation::NextAfterTerminal);
            return;
        }
        if !core.is_active() {
            tracing::trace!(emitter = core.label(), "value dropped after cancellation");
            return;
        }
        match &core.policy {
            Policy::Missing => core.emit_direct(|| {
                core.deliver(value);
                core.demand.produced(1);
            }),
            Policy::Error => core.emit_direct(|| {
                if core.demand.try_take(1) {
                    core.deliver(value);
                } else {
                    core.terminate_error(Failure::new(MissingBackpressure::lack_of_requests()));
                }
            }),
            Policy::Drop => core.emit_direct(|| {
                if core.demand.try_take(1) {
                    core.deliver(value);
                } else {
                    tracing::trace!(emitter = core.label(), "no demand, value dropped");
                }
            }),
            Policy::Latest(queue) | Policy::Buffer(queue) => {
                queue.inbox.push(value);
                core.drain(queue);
            }
        }
    }

    fn on_error(&self, error: Failure) {
        if !self.try_on_error(error.clone()) {
            self.core.sink.report(error);
        }
    }

    fn try_on_error(&self, error: Failure) -> bool {
        let core = &*self.core;
        if core.producer_done.swap(true, Ordering::AcqRel) || !core.is_active() {
            return false;
        }
        match &core.policy {
            Policy::Missing | Policy::Error | Policy::Drop => core.terminate_error(error),
            Policy::Latest(queue) => {
                let published = queue.terminal.add_error(&error, true);
                if published {
                    core.drain(queue);
                }
                published
            }
            Policy::Buffer(queue) => {
                // Buffered values are delivered before the error.
                let published = queue.terminal.add_error(&error, false);
                if published {
                    core.drain(queue);
                }
                published
            }
        }
    }

    fn on_complete(&self) {
        let core = &*self.core;
        if core.producer_done.swap(true, Ordering::AcqRel) {
            core.late_signal(ProtocolViolation::CompleteAfterTerminal);
            return;
        }
        if !core.is_active() {
            return;
        }
        match &core.policy {
            Policy::Missing | Policy::Error | Policy::Drop => {
                core.terminate_complete();
            }
            Policy::Latest(queue) | Policy::Buffer(queue) => {
                if queue.terminal.offer(&Terminal::Complete) {
                    core.drain(queue);
                }
            }
        }
    }

    fn set_disposable(&self, resource: Arc<dyn Disposable>) {
        if let Err(error) = self.core.resource.update(resource) {
            self.core.sink.report(error);
        }
    }

    fn set_cancellable(&self, cancellable: Cancellable) {
        self.set_disposable(Arc::new(ActionDisposable::new(cancellable)));
    }

    fn is_cancelled(&self) -> bool {
        self.core.resource.is_disposed()
    }

    fn requested(&self) -> u64 {
        self.core.demand.current()
    }

    fn serialize(&self) -> SerializedEmitter<T> {
        SerializedEmitter::new(self.clone())
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Emitter").field(&self.strategy()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::BooleanDisposable;
    use crate::testing::{RecordingSink, TestSubscriber};
    use parking_lot::Mutex;
    use std::sync::Barrier;
    use std::thread;

    fn setup(
        strategy: BackpressureStrategy,
        initial: u64,
    ) -> (Emitter<i32>, Arc<TestSubscriber<i32>>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let config = EmitterConfig::builder()
            .strategy(strategy)
            .sink(sink.clone())
            .build()
            .unwrap();
        attach(&config, initial, sink)
    }

    fn attach(
        config: &EmitterConfig,
        initial: u64,
        sink: Arc<RecordingSink>,
    ) -> (Emitter<i32>, Arc<TestSubscriber<i32>>, Arc<RecordingSink>) {
        let ts = Arc::new(TestSubscriber::new(initial));
        let emitter = Emitter::new(config, ts.clone());
        ts.on_subscribe(emitter.subscription());
        (emitter, ts, sink)
    }

    #[test]
    fn test_missing_ignores_demand() {
        let (e, ts, _) = setup(BackpressureStrategy::Missing, 0);
        e.on_next(1);
        e.on_next(2);
        e.on_complete();
        ts.assert_result(&[1, 2]);
    }

    #[test]
    fn test_missing_consumes_available_demand() {
        let (e, _ts, _) = setup(BackpressureStrategy::Missing, 3);
        e.on_next(1);
        assert_eq!(e.requested(), 2);
    }

    #[test]
    fn test_error_policy_fails_without_demand() {
        let (e, ts, sink) = setup(BackpressureStrategy::Error, 1);
        e.on_next(1);
        e.on_next(2);
        e.on_next(3);
        assert_eq!(ts.values(), vec![1]);
        ts.assert_error_message(crate::error::MISSING_REQUESTS_MESSAGE);
        assert!(e.is_cancelled());
        // Emitter-originated termination: later values are dropped quietly.
        assert!(sink.is_empty());
    }

    #[test]
    fn test_drop_policy_discards_without_demand() {
        let (e, ts, _) = setup(BackpressureStrategy::Drop, 1);
        e.on_next(1);
        e.on_next(2);
        ts.request(1);
        e.on_next(3);
        e.on_complete();
        ts.assert_result(&[1, 3]);
    }

    #[test]
    fn test_latest_keeps_newest() {
        let (e, ts, _) = setup(BackpressureStrategy::Latest, 0);
        e.on_next(1);
        e.on_next(2);
        e.on_next(3);
        assert!(ts.values().is_empty());
        ts.request(1);
        assert_eq!(ts.values(), vec![3]);
        e.on_next(4);
        e.on_next(5);
        e.on_complete();
        assert_eq!(ts.completions(), 0);
        ts.request(5);
        ts.assert_result(&[3, 5]);
    }

    #[test]
    fn test_latest_error_skips_pending_value() {
        let (e, ts, _) = setup(BackpressureStrategy::Latest, 0);
        e.on_next(1);
        e.on_error(Failure::msg("boom"));
        assert!(ts.values().is_empty());
        ts.assert_error_message("boom");
    }

    #[test]
    fn test_buffer_preserves_order_and_waits_with_error() {
        let (e, ts, _) = setup(BackpressureStrategy::Buffer, 0);
        for i in 0..5 {
            e.on_next(i);
        }
        e.on_error(Failure::msg("after values"));
        assert!(ts.errors().is_empty());
        ts.request(2);
        assert_eq!(ts.values(), vec![0, 1]);
        ts.request(3);
        assert_eq!(ts.values(), vec![0, 1, 2, 3, 4]);
        ts.assert_error_message("after values");
    }

    #[test]
    fn test_bounded_buffer_without_eviction_fails() {
        let sink = Arc::new(RecordingSink::new());
        let config = EmitterConfig::builder()
            .capacity(8)
            .sink(sink.clone())
            .build()
            .unwrap();
        let (e, ts, _) = attach(&config, 0, sink);
        for i in 0..20 {
            e.on_next(i);
        }
        assert!(ts.values().is_empty());
        ts.assert_failure::<MissingBackpressure>(&[]);
    }

    #[test]
    fn test_overflow_callback_failure_terminates() {
        let sink = Arc::new(RecordingSink::new());
        let config = EmitterConfig::builder()
            .capacity(1)
            .overflow(BufferOverflow::DropOldest)
            .on_overflow(|| Err(Failure::msg("callback failed")))
            .sink(sink.clone())
            .build()
            .unwrap();
        let (e, ts, _) = attach(&config, 0, sink);
        e.on_next(1);
        e.on_next(2);
        ts.request(5);
        assert!(ts.values().is_empty());
        ts.assert_error_message("callback failed");
    }

    #[test]
    fn test_error_after_complete_is_undeliverable() {
        let (e, ts, sink) = setup(BackpressureStrategy::Buffer, 0);
        e.on_complete();
        let late = Failure::msg("late");
        e.on_error(late.clone());
        assert_eq!(ts.completions(), 1);
        assert!(ts.errors().is_empty());
        assert!(sink.errors()[0].ptr_eq(&late));
    }

    #[test]
    fn test_try_on_error_after_terminal_returns_false() {
        let (e, ts, sink) = setup(BackpressureStrategy::Missing, 0);
        e.on_complete();
        assert!(!e.try_on_error(Failure::msg("soft")));
        assert_eq!(ts.completions(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_next_after_complete_is_reported() {
        let (e, ts, sink) = setup(BackpressureStrategy::Missing, 0);
        e.on_complete();
        e.on_next(1);
        e.on_complete();
        ts.assert_result(&[]);
        let reported = sink.errors();
        assert_eq!(
            reported[0].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::NextAfterTerminal)
        );
        assert_eq!(
            reported[1].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::CompleteAfterTerminal)
        );
    }

    #[test]
    fn test_terminal_disposes_resource() {
        for strategy in [
            BackpressureStrategy::Missing,
            BackpressureStrategy::Error,
            BackpressureStrategy::Drop,
            BackpressureStrategy::Latest,
            BackpressureStrategy::Buffer,
        ] {
            let (e, _ts, _) = setup(strategy, 1);
            let resource = Arc::new(BooleanDisposable::new());
            e.set_disposable(resource.clone());
            assert!(!e.is_cancelled());
            e.on_complete();
            assert!(resource.is_disposed(), "{strategy:?}");
            assert!(e.is_cancelled(), "{strategy:?}");
        }
    }

    #[test]
    fn test_cancel_disposes_and_stops_delivery() {
        let (e, ts, sink) = setup(BackpressureStrategy::Buffer, 1);
        let resource = Arc::new(BooleanDisposable::new());
        e.set_disposable(resource.clone());
        e.on_next(1);
        ts.cancel();
        assert!(resource.is_disposed());
        assert!(e.is_cancelled());
        e.on_next(2);
        e.on_complete();
        assert_eq!(ts.values(), vec![1]);
        assert_eq!(ts.completions(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_cleanup_failure_composes_with_error() {
        let (e, ts, _) = setup(BackpressureStrategy::Missing, 0);
        e.set_cancellable(Box::new(|| Err(Failure::msg("cleanup"))));
        let primary = Failure::msg("primary");
        e.on_error(primary.clone());
        let delivered = &ts.errors()[0];
        let composite = delivered
            .downcast_ref::<crate::composite::CompositeError>()
            .unwrap();
        assert!(composite.exceptions()[0].ptr_eq(&primary));
        assert_eq!(composite.exceptions()[1].message(), "cleanup");
    }

    #[test]
    fn test_cleanup_failure_after_complete_is_undeliverable() {
        let (e, ts, sink) = setup(BackpressureStrategy::Missing, 0);
        e.set_cancellable(Box::new(|| Err(Failure::msg("cleanup"))));
        e.on_complete();
        assert_eq!(ts.completions(), 1);
        assert_eq!(sink.errors()[0].message(), "cleanup");
    }

    #[test]
    fn test_set_cancellable_replaces_and_runs_once() {
        let (e, _ts, _) = setup(BackpressureStrategy::Buffer, 0);
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let r = Arc::clone(&runs);
            e.set_cancellable(Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        // Replacing disposed the first action.
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        e.on_complete();
        e.on_complete();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_request_signals_error() {
        let (e, ts, _) = setup(BackpressureStrategy::Buffer, 0);
        e.on_next(1);
        ts.request(0);
        assert!(ts.values().is_empty());
        ts.assert_failure::<ProtocolViolation>(&[]);
        assert!(e.is_cancelled());

        let (_e, ts, _) = setup(BackpressureStrategy::Drop, 0);
        ts.request(0);
        ts.assert_error_message("n > 0 required but it was 0");
    }

    /// Consumer whose `on_next` parks until the test lets it go.
    struct Parking {
        rendezvous: Barrier,
        subscription: Mutex<Option<Subscription>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        errors: Mutex<Vec<Failure>>,
    }

    impl Parking {
        fn new() -> Self {
            Self {
                rendezvous: Barrier::new(2),
                subscription: Mutex::new(None),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                errors: Mutex::new(Vec::new()),
            }
        }

        fn enter(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Subscriber<i32> for Parking {
        fn on_subscribe(&self, subscription: Subscription) {
            *self.subscription.lock() = Some(subscription);
        }

        fn on_next(&self, _value: i32) {
            self.enter();
            // Entered, then released.
            self.rendezvous.wait();
            self.rendezvous.wait();
            self.exit();
        }

        fn on_error(&self, error: Failure) {
            self.enter();
            self.errors.lock().push(error);
            self.exit();
        }
    }

    #[test]
    fn test_zero_request_waits_for_direct_delivery() {
        for strategy in [
            BackpressureStrategy::Missing,
            BackpressureStrategy::Error,
            BackpressureStrategy::Drop,
        ] {
            let consumer = Arc::new(Parking::new());
            let emitter = Emitter::new(&EmitterConfig::new(strategy), consumer.clone());
            consumer.on_subscribe(emitter.subscription());
            let subscription = consumer.subscription.lock().clone().unwrap();
            subscription.request(1);

            thread::scope(|s| {
                s.spawn(|| emitter.on_next(1));
                consumer.rendezvous.wait();
                subscription.request(0);
                assert!(consumer.errors.lock().is_empty(), "{strategy:?}");
                consumer.rendezvous.wait();
            });

            assert_eq!(consumer.max_active.load(Ordering::SeqCst), 1, "{strategy:?}");
            let errors = consumer.errors.lock();
            assert_eq!(errors.len(), 1, "{strategy:?}");
            assert_eq!(
                errors[0].downcast_ref::<ProtocolViolation>(),
                Some(&ProtocolViolation::NonPositiveRequest(0))
            );
        }
    }

    /// Consumer that emits again from inside `on_next`.
    struct Echo {
        emitter: Mutex<Option<Emitter<i32>>>,
        seen: Mutex<Vec<i32>>,
    }

    impl Subscriber<i32> for Echo {
        fn on_subscribe(&self, subscription: Subscription) {
            subscription.request(u64::MAX);
        }

        fn on_next(&self, value: i32) {
            self.seen.lock().push(value);
            if value < 3 {
                let emitter = self.emitter.lock().clone();
                if let Some(e) = emitter {
                    e.on_next(value + 1);
                }
            }
        }
    }

    #[test]
    fn test_direct_policies_allow_reentrant_emission() {
        let consumer = Arc::new(Echo {
            emitter: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let config = EmitterConfig::new(BackpressureStrategy::Drop);
        let emitter = Emitter::new(&config, consumer.clone());
        consumer.on_subscribe(emitter.subscription());
        *consumer.emitter.lock() = Some(emitter.clone());

        emitter.on_next(0);
        assert_eq!(*consumer.seen.lock(), vec![0, 1, 2, 3]);
        consumer.emitter.lock().take();
    }

    #[test]
    fn test_zero_request_twice_reports_second() {
        let (_e, ts, sink) = setup(BackpressureStrategy::Missing, 0);
        ts.request(0);
        ts.request(0);
        assert_eq!(ts.errors().len(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_cancel_detaches_before_disposing() {
        let (e, ts, _) = setup(BackpressureStrategy::Missing, 0);
        let late = e.clone();
        e.set_cancellable(Box::new(move || {
            // A delivery that got past the liveness check before the cancel.
            late.core.deliver(7);
            Ok(())
        }));
        ts.cancel();
        assert!(e.is_cancelled());
        assert!(ts.values().is_empty());
    }

    #[test]
    fn test_zero_request_after_terminal_is_undeliverable() {
        let (e, ts, sink) = setup(BackpressureStrategy::Error, 0);
        e.on_complete();
        ts.request(0);
        assert_eq!(
            sink.errors()[0].downcast_ref::<ProtocolViolation>(),
            Some(&ProtocolViolation::NonPositiveRequest(0))
        );
    }

    #[test]
    fn test_requested_tracks_demand() {
        let (e, ts, _) = setup(BackpressureStrategy::Drop, 0);
        assert_eq!(e.requested(), 0);
        ts.request(3);
        assert_eq!(e.requested(), 3);
        e.on_next(1);
        assert_eq!(e.requested(), 2);
    }

    #[test]
    fn test_debug_names_policy() {
        let (e, _ts, _) = setup(BackpressureStrategy::Latest, 0);
        assert_eq!(format!("{e:?}"), "Emitter(Latest)");
    }
}
