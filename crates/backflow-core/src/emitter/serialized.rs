//! Queue-drain wrapper letting several threads share one emitter.
//!
//! Producers race on a work-in-progress counter. The thread that raises it
//! from 0 delivers its own value directly and then drains whatever other
//! threads enqueued meanwhile; every other thread only enqueues and leaves.
//! No lock is held while the consumer runs, so a consumer may re-enter the
//! emitter from its own callback.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;

use super::config::BackpressureStrategy;
use super::policy::Emitter;
use super::terminal::{Terminal, TerminalCell};
use super::FlowEmitter;
use crate::disposable::{Cancellable, Disposable};
use crate::error::ProtocolViolation;
use crate::failure::Failure;

/// An [`Emitter`] that accepts calls from any number of threads.
///
/// Clones share the same serialization state.
pub struct SerializedEmitter<T> {
    inner: Arc<Serialized<T>>,
}

struct Serialized<T> {
    emitter: Emitter<T>,
    queue: SegQueue<T>,
    wip: AtomicUsize,
    terminal: TerminalCell,
    producer_done: AtomicBool,
    /// Buffer delivers queued values before a pending error.
    preserve_values: bool,
}

impl<T: Send + 'static> SerializedEmitter<T> {
    pub(super) fn new(emitter: Emitter<T>) -> Self {
        let preserve_values = emitter.strategy() == BackpressureStrategy::Buffer;
        Self {
            inner: Arc::new(Serialized {
                emitter,
                queue: SegQueue::new(),
                wip: AtomicUsize::new(0),
                terminal: TerminalCell::new(),
                producer_done: AtomicBool::new(false),
                preserve_values,
            }),
        }
    }

    /// Returns `true` if both handles share serialization state.
    #[must_use]
    pub fn ptr_eq(&self, other: &SerializedEmitter<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The wrapped emitter.
    #[must_use]
    pub fn get_ref(&self) -> &Emitter<T> {
        &self.inner.emitter
    }
}

impl<T: Send + 'static> Serialized<T> {
    fn late_signal(&self, violation: ProtocolViolation) {
        tracing::warn!(%violation, "signal after terminal");
        self.emitter.sink().report(Failure::new(violation));
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) == 0 {
            self.drain_loop(1);
        }
    }

    /// Runs with `wip` held. Returns leaving `wip` raised once a terminal
    /// was delivered or the subscription cancelled.
    fn drain_loop(&self, mut missed: usize) {
        loop {
            loop {
                if self.emitter.is_cancelled() {
                    while self.queue.pop().is_some() {}
                    return;
                }
                // Values enqueued before the terminal are visible once the
                // terminal is.
                let terminal = self.terminal.get();
                if let Some(Terminal::Error {
                    skip_ahead: true, ..
                }) = terminal.as_deref()
                {
                    while self.queue.pop().is_some() {}
                    self.finish();
                    return;
                }
                match self.queue.pop() {
                    Some(value) => self.emitter.on_next(value),
                    None if terminal.is_some() => {
                        self.finish();
                        return;
                    }
                    None => break,
                }
            }
            let previous = self.wip.fetch_sub(missed, Ordering::AcqRel);
            missed = previous - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn finish(&self) {
        let Some(terminal) = self.terminal.claim() else {
            return;
        };
        match &*terminal {
            Terminal::Complete => self.emitter.on_complete(),
            Terminal::Error { error, .. } => self.emitter.on_error(error.clone()),
            Terminal::Delivered => {}
        }
    }
}

impl<T: Send + 'static> FlowEmitter<T> for SerializedEmitter<T> {
    fn on_next(&self, value: T) {
        let inner = &*self.inner;
        if inner.producer_done.load(Ordering::Acquire) {
            inner.late_signal(ProtocolViolation::NextAfterTerminal);
            return;
        }
        if inner.emitter.is_cancelled() {
            tracing::trace!("value dropped after cancellation");
            return;
        }
        if inner
            .wip
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            inner.emitter.on_next(value);
            if inner.wip.fetch_sub(1, Ordering::AcqRel) == 1 {
                return;
            }
        } else {
            inner.queue.push(value);
            if inner.wip.fetch_add(1, Ordering::AcqRel) != 0 {
                return;
            }
        }
        inner.drain_loop(1);
    }

    fn on_error(&self, error: Failure) {
        if !self.try_on_error(error.clone()) {
            self.inner.emitter.sink().report(error);
        }
    }

    fn try_on_error(&self, error: Failure) -> bool {
        let inner = &*self.inner;
        if inner.emitter.is_cancelled()
            || inner
                .producer_done
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return false;
        }
        let terminal = Terminal::Error {
            error,
            skip_ahead: !inner.preserve_values,
        };
        // Loses only to a completion published first.
        if !inner.terminal.offer(&terminal) {
            return false;
        }
        inner.drain();
        true
    }

    fn on_complete(&self) {
        let inner = &*self.inner;
        // A cancelled drain never claims the offered completion.
        if inner.terminal.offer(&Terminal::Complete) {
            inner.producer_done.store(true, Ordering::Release);
            inner.drain();
        } else {
            inner.late_signal(ProtocolViolation::CompleteAfterTerminal);
        }
    }

    fn set_disposable(&self, resource: Arc<dyn Disposable>) {
        self.inner.emitter.set_disposable(resource);
    }

    fn set_cancellable(&self, cancellable: Cancellable) {
        self.inner.emitter.set_cancellable(cancellable);
    }

    fn is_cancelled(&self) -> bool {
        self.inner.emitter.is_cancelled()
    }

    fn requested(&self) -> u64 {
        self.inner.emitter.requested()
    }

    fn serialize(&self) -> SerializedEmitter<T> {
        self.clone()
    }
}

impl<T> Clone for SerializedEmitter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for SerializedEmitter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerializedEmitter")
            .field(&self.inner.emitter.strategy())
            .finish()
    }
}
