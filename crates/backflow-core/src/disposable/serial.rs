//! Single-slot disposable holder.
//!
//! The slot is an `AtomicPtr` to a boxed `Arc<dyn Disposable>`. A null
//! pointer is an empty slot and the address of a private static marks the
//! slot as disposed. Whoever swaps a pointer out of the slot owns the box it
//! points to, which is what makes disposal exactly-once without a lock.

use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use super::Disposable;
use crate::failure::Failure;

type Slot = Arc<dyn Disposable>;

static DISPOSED_MARKER: u8 = 0;

#[inline]
fn disposed_marker() -> *mut Slot {
    ptr::addr_of!(DISPOSED_MARKER).cast::<Slot>().cast_mut()
}

/// Holds at most one resource and disposes it exactly once.
///
/// - [`replace`](Self::replace) swaps in a new resource and hands the
///   previous one back undisposed.
/// - [`update`](Self::update) swaps in a new resource and disposes the
///   previous one.
/// - Once [`dispose`](Self::dispose) ran, every resource handed to the slot
///   is disposed immediately instead of being stored.
pub struct SerialDisposable {
    slot: AtomicPtr<Slot>,
}

impl SerialDisposable {
    /// Creates an empty, live slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Creates a slot already holding `resource`.
    #[must_use]
    pub fn with(resource: Slot) -> Self {
        Self {
            slot: AtomicPtr::new(Box::into_raw(Box::new(resource))),
        }
    }

    /// Stores `resource`, returning the previous resource without disposing it.
    ///
    /// If the slot is already disposed, `resource` is disposed right away and
    /// `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns the failure raised while disposing `resource` on an already
    /// disposed slot.
    pub fn replace(&self, resource: Slot) -> Result<Option<Slot>, Failure> {
        let fresh = Box::into_raw(Box::new(resource));
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            if current == disposed_marker() {
                // SAFETY: `fresh` came from `Box::into_raw` above and was never
                // published, so we still own it.
                #[allow(unsafe_code)]
                let resource = unsafe { Box::from_raw(fresh) };
                return resource.dispose().map(|()| None);
            }
            match self.slot.compare_exchange_weak(
                current,
                fresh,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => {
                    // SAFETY: the successful exchange moved `previous` out of
                    // the slot; no other thread can observe it anymore.
                    #[allow(unsafe_code)]
                    let previous = unsafe { take(previous) };
                    return Ok(previous);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Stores `resource` and disposes the resource it replaces.
    ///
    /// # Errors
    ///
    /// Returns the failure raised while disposing the replaced resource, or
    /// while disposing `resource` when the slot is already disposed.
    pub fn update(&self, resource: Slot) -> Result<(), Failure> {
        match self.replace(resource)? {
            Some(previous) => previous.dispose(),
            None => Ok(()),
        }
    }

    /// Takes the current resource out of a live slot without disposing it.
    #[must_use]
    pub fn take(&self) -> Option<Slot> {
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            if current.is_null() || current == disposed_marker() {
                return None;
            }
            match self.slot.compare_exchange_weak(
                current,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // SAFETY: the exchange moved `taken` out of the slot.
                #[allow(unsafe_code)]
                Ok(taken) => return unsafe { take(taken) },
                Err(actual) => current = actual,
            }
        }
    }
}

impl Disposable for SerialDisposable {
    fn dispose(&self) -> Result<(), Failure> {
        let previous = self.slot.swap(disposed_marker(), Ordering::AcqRel);
        // SAFETY: the swap moved `previous` out of the slot; the marker and
        // null are filtered by `take`.
        #[allow(unsafe_code)]
        let previous = unsafe { take(previous) };
        match previous {
            Some(resource) => resource.dispose(),
            None => Ok(()),
        }
    }

    fn is_disposed(&self) -> bool {
        self.slot.load(Ordering::Acquire) == disposed_marker()
    }
}

impl Default for SerialDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialDisposable {
    fn drop(&mut self) {
        let current = *self.slot.get_mut();
        // SAFETY: `&mut self` means no other thread can reach the slot.
        // Dropping frees the box without disposing the resource.
        #[allow(unsafe_code)]
        drop(unsafe { take(current) });
    }
}

impl fmt::Debug for SerialDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.slot.load(Ordering::Acquire);
        let state = if current == disposed_marker() {
            "disposed"
        } else if current.is_null() {
            "empty"
        } else {
            "holding"
        };
        f.debug_tuple("SerialDisposable").field(&state).finish()
    }
}

/// Reclaims a pointer removed from the slot.
///
/// # Safety
///
/// `raw` must be null, the disposed marker, or a pointer produced by
/// `Box::into_raw` that the caller exclusively owns.
#[allow(unsafe_code)]
unsafe fn take(raw: *mut Slot) -> Option<Slot> {
    if raw.is_null() || raw == disposed_marker() {
        None
    } else {
        // SAFETY: guaranteed by the caller.
        Some(*unsafe { Box::from_raw(raw) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disposable::{ActionDisposable, BooleanDisposable};
    use std::sync::atomic::AtomicUsize;

    fn counting(counter: &Arc<AtomicUsize>) -> Slot {
        let c = Arc::clone(counter);
        Arc::new(ActionDisposable::from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    #[test]
    fn test_dispose_twice_runs_cleanup_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let serial = SerialDisposable::with(counting(&calls));
        serial.dispose().unwrap();
        serial.dispose().unwrap();
        assert!(serial.is_disposed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_returns_previous_undisposed() {
        let first: Slot = Arc::new(BooleanDisposable::new());
        let serial = SerialDisposable::new();
        assert!(serial.replace(Arc::clone(&first)).unwrap().is_none());

        let previous = serial.replace(Arc::new(BooleanDisposable::new())).unwrap();
        assert!(previous.is_some_and(|p| Arc::ptr_eq(&p, &first)));
        assert!(!first.is_disposed());
    }

    #[test]
    fn test_update_disposes_previous() {
        let first: Slot = Arc::new(BooleanDisposable::new());
        let second: Slot = Arc::new(BooleanDisposable::new());
        let serial = SerialDisposable::new();
        serial.update(Arc::clone(&first)).unwrap();
        serial.update(Arc::clone(&second)).unwrap();
        assert!(first.is_disposed());
        assert!(!second.is_disposed());

        serial.dispose().unwrap();
        assert!(second.is_disposed());
    }

    #[test]
    fn test_set_after_dispose_disposes_immediately() {
        let serial = SerialDisposable::new();
        serial.dispose().unwrap();

        let late: Slot = Arc::new(BooleanDisposable::new());
        assert!(serial.replace(Arc::clone(&late)).unwrap().is_none());
        assert!(late.is_disposed());

        let calls = Arc::new(AtomicUsize::new(0));
        serial.update(counting(&calls)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_failure_is_returned() {
        let serial = SerialDisposable::with(Arc::new(ActionDisposable::from_fn(|| {
            Err(Failure::msg("close failed"))
        })));
        assert_eq!(serial.dispose().unwrap_err().message(), "close failed");
        assert!(serial.dispose().is_ok());
    }

    #[test]
    fn test_take_leaves_slot_live() {
        let first: Slot = Arc::new(BooleanDisposable::new());
        let serial = SerialDisposable::with(Arc::clone(&first));
        assert!(serial.take().is_some_and(|t| Arc::ptr_eq(&t, &first)));
        assert!(serial.take().is_none());
        assert!(!serial.is_disposed());
        serial.dispose().unwrap();
        assert!(!first.is_disposed());
    }

    #[test]
    fn test_drop_does_not_dispose() {
        let first: Slot = Arc::new(BooleanDisposable::new());
        drop(SerialDisposable::with(Arc::clone(&first)));
        assert!(!first.is_disposed());
    }

    #[test]
    fn test_concurrent_set_and_dispose_each_resource_once() {
        for _ in 0..200 {
            let calls = Arc::new(AtomicUsize::new(0));
            let serial = Arc::new(SerialDisposable::new());

            let setters: Vec<_> = (0..4)
                .map(|_| {
                    let serial = Arc::clone(&serial);
                    let calls = Arc::clone(&calls);
                    std::thread::spawn(move || {
                        for _ in 0..8 {
                            serial.update(counting(&calls)).unwrap();
                        }
                    })
                })
                .collect();
            let disposer = {
                let serial = Arc::clone(&serial);
                std::thread::spawn(move || serial.dispose().unwrap())
            };

            for h in setters {
                h.join().unwrap();
            }
            disposer.join().unwrap();

            // Every resource handed to the slot was disposed exactly once.
            assert_eq!(calls.load(Ordering::SeqCst), 32);
        }
    }
}
