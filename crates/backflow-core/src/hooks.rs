//! Undeliverable-error reporting.
//!
//! Errors that can no longer legally reach a consumer (a second terminal
//! signal, a cleanup failure after completion, a protocol violation on a
//! finished subscription) are handed to an [`UndeliverableSink`] instead of
//! being dropped.
//!
//! Components take the sink as an injected `Arc<dyn UndeliverableSink>`. The
//! default, [`GlobalSink`], forwards to the process-wide
//! [`UndeliverableHook::global`] handle, which the embedding application can
//! [`set`](UndeliverableHook::set) and [`reset`](UndeliverableHook::reset).
//! With nothing installed, reports go to [`LogSink`].

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::failure::Failure;

/// Receives errors that could not be delivered to a consumer.
pub trait UndeliverableSink: Send + Sync {
    /// Called with each undeliverable error.
    fn report(&self, error: Failure);
}

/// Default reporter: `tracing::error!` when a subscriber is installed,
/// stderr otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl UndeliverableSink for LogSink {
    fn report(&self, error: Failure) {
        if tracing::dispatcher::has_been_set() {
            tracing::error!(kind = error.kind(), error = %error, "undeliverable error");
        } else {
            eprintln!("undeliverable error: {}: {error}", error.kind());
        }
    }
}

/// Swappable sink handle.
///
/// One process-wide instance is reachable through [`global`](Self::global);
/// independent instances can be created and injected where isolation is
/// needed.
pub struct UndeliverableHook {
    sink: RwLock<Option<Arc<dyn UndeliverableSink>>>,
}

static GLOBAL_HOOK: UndeliverableHook = UndeliverableHook::new();

impl UndeliverableHook {
    /// Creates a hook with no sink installed.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sink: parking_lot::const_rwlock(None),
        }
    }

    /// The process-wide hook.
    #[must_use]
    pub fn global() -> &'static UndeliverableHook {
        &GLOBAL_HOOK
    }

    /// Installs `sink`, returning the one it replaces.
    pub fn set(&self, sink: Arc<dyn UndeliverableSink>) -> Option<Arc<dyn UndeliverableSink>> {
        self.sink.write().replace(sink)
    }

    /// Removes the installed sink so reports fall back to [`LogSink`].
    pub fn reset(&self) -> Option<Arc<dyn UndeliverableSink>> {
        self.sink.write().take()
    }

    /// Installs `sink` until the returned guard is dropped.
    #[must_use = "the previous sink is restored when the guard drops"]
    pub fn scoped(&self, sink: Arc<dyn UndeliverableSink>) -> HookGuard<'_> {
        let previous = self.set(sink);
        HookGuard {
            hook: self,
            previous,
        }
    }

    /// Returns `true` if a sink other than the default is installed.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Reports an error to the installed sink.
    ///
    /// A panicking sink is contained and the error is logged instead.
    pub fn report(&self, error: Failure) {
        // Clone out of the lock; the sink runs unlocked.
        let sink = self.sink.read().clone();
        let Some(sink) = sink else {
            LogSink.report(error);
            return;
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| sink.report(error.clone())));
        if result.is_err() {
            tracing::warn!("undeliverable sink panicked; falling back to log");
            LogSink.report(error);
        }
    }
}

impl Default for UndeliverableHook {
    fn default() -> Self {
        Self::new()
    }
}

impl UndeliverableSink for UndeliverableHook {
    fn report(&self, error: Failure) {
        UndeliverableHook::report(self, error);
    }
}

impl fmt::Debug for UndeliverableHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndeliverableHook")
            .field("is_set", &self.is_set())
            .finish()
    }
}

/// Restores the previously installed sink on drop.
pub struct HookGuard<'a> {
    hook: &'a UndeliverableHook,
    previous: Option<Arc<dyn UndeliverableSink>>,
}

impl Drop for HookGuard<'_> {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => {
                self.hook.set(previous);
            }
            None => {
                self.hook.reset();
            }
        }
    }
}

/// Forwards to [`UndeliverableHook::global`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GlobalSink;

impl UndeliverableSink for GlobalSink {
    fn report(&self, error: Failure) {
        UndeliverableHook::global().report(error);
    }
}

/// The default sink injected into new components.
#[must_use]
pub fn default_sink() -> Arc<dyn UndeliverableSink> {
    Arc::new(GlobalSink)
}
