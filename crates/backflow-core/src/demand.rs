//! Demand accounting for backpressured delivery.
//!
//! [`Demand`] implements the `request(n)` model: the consumer adds to the
//! outstanding count, the producer takes one unit per delivered value.
//! [`UNBOUNDED`] is a sticky sentinel: once reached, requests are no-ops and
//! deliveries never decrement it.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ProtocolViolation;

/// Sentinel meaning "no backpressure": the consumer accepts everything.
pub const UNBOUNDED: u64 = u64::MAX;

/// Adds two demand amounts, capping at [`UNBOUNDED`].
#[inline]
#[must_use]
pub const fn add_cap(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Atomic outstanding-request counter.
#[derive(Debug, Default)]
pub struct Demand {
    requested: AtomicU64,
}

impl Demand {
    /// Creates a counter with no outstanding demand.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicU64::new(0),
        }
    }

    /// Creates a counter that is already unbounded.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            requested: AtomicU64::new(UNBOUNDED),
        }
    }

    /// Adds `n` to the outstanding demand, saturating at [`UNBOUNDED`].
    ///
    /// Returns the demand observed before the addition, so callers can tell
    /// whether delivery was stalled.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::NonPositiveRequest`] for `n == 0`; the
    /// counter is left untouched.
    pub fn request(&self, n: u64) -> Result<u64, ProtocolViolation> {
        if n == 0 {
            return Err(ProtocolViolation::NonPositiveRequest(n));
        }
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return Ok(UNBOUNDED);
            }
            match self.requested.compare_exchange_weak(
                current,
                add_cap(current, n),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Ok(previous),
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes `need` units of demand if that many are outstanding.
    ///
    /// Always succeeds, without decrementing, when the demand is unbounded.
    #[inline]
    #[must_use]
    pub fn try_take(&self, need: u64) -> bool {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return true;
            }
            if current < need {
                return false;
            }
            match self.requested.compare_exchange_weak(
                current,
                current - need,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Records `n` delivered values, returning the remaining demand.
    ///
    /// Subtraction stops at zero; unbounded demand is left as is.
    pub fn produced(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Acquire);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_sub(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns the outstanding demand.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Returns `true` once the demand reached [`UNBOUNDED`].
    #[inline]
    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.current() == UNBOUNDED
    }
}
