//! Resource handles disposed exactly once.
//!
//! Producers attach cleanup to a subscription through a [`Disposable`]. The
//! subscription holds at most one active resource in a [`SerialDisposable`]
//! and disposes it on cancellation or terminal delivery, whichever is first.

mod serial;

pub use serial::SerialDisposable;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::failure::Failure;

/// One-shot cancel action, run when the owning subscription ends.
pub type Cancellable = Box<dyn FnOnce() -> Result<(), Failure> + Send + 'static>;

/// A resource that can be released.
///
/// Implementations must be idempotent: only the first `dispose` releases
/// anything. A failing release is reported through the returned `Failure`;
/// callers decide whether to compose it with a primary error or route it to
/// the undeliverable sink.
pub trait Disposable: Send + Sync {
    /// Releases the resource.
    ///
    /// # Errors
    ///
    /// Returns the failure raised by the release action, if any.
    fn dispose(&self) -> Result<(), Failure>;

    /// Returns `true` once the resource has been released.
    fn is_disposed(&self) -> bool;
}

impl<D: Disposable + ?Sized> Disposable for Arc<D> {
    fn dispose(&self) -> Result<(), Failure> {
        (**self).dispose()
    }

    fn is_disposed(&self) -> bool {
        (**self).is_disposed()
    }
}

/// A disposable with no resource, only a disposed flag.
#[derive(Debug, Default)]
pub struct BooleanDisposable {
    disposed: AtomicBool,
}

impl BooleanDisposable {
    /// Creates a live handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Disposable for BooleanDisposable {
    fn dispose(&self) -> Result<(), Failure> {
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Runs a [`Cancellable`] on first disposal.
pub struct ActionDisposable {
    disposed: AtomicBool,
    action: Mutex<Option<Cancellable>>,
}

impl ActionDisposable {
    /// Wraps a cancel action.
    #[must_use]
    pub fn new(action: Cancellable) -> Self {
        Self {
            disposed: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
        }
    }

    /// Convenience constructor from a closure.
    #[must_use]
    pub fn from_fn<F>(action: F) -> Self
    where
        F: FnOnce() -> Result<(), Failure> + Send + 'static,
    {
        Self::new(Box::new(action))
    }
}

impl Disposable for ActionDisposable {
    fn dispose(&self) -> Result<(), Failure> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // The swap elected us; the lock only guards the take.
        let action = self.action.lock().take();
        match action {
            Some(action) => action(),
            None => Ok(()),
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ActionDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDisposable")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
