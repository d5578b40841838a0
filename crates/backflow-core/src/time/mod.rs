//! # Time Module
//!
//! Time units, clock drift normalization and clocks for time-driven
//! operators layered above the core.
//!
//! ## Clock Drift
//!
//! Schedulers detect wall-clock jumps by comparing elapsed time against a
//! tolerance configured as an amount plus a free-form unit name.
//! [`compute_clock_drift`] normalizes that pair to nanoseconds:
//!
//! ```rust
//! use backflow_core::time::compute_clock_drift;
//!
//! assert_eq!(compute_clock_drift(2, Some("seconds")), 2_000_000_000);
//! // Unknown or missing units fall back to minutes.
//! assert_eq!(compute_clock_drift(5, None), 300_000_000_000);
//! ```
//!
//! ## Virtual Time
//!
//! [`VirtualClock`] only moves when told to, which makes timing behavior
//! reproducible in tests:
//!
//! ```rust
//! use backflow_core::time::{Clock, TimeUnit, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! clock.advance_by(1500, TimeUnit::Milliseconds);
//! assert_eq!(clock.now(TimeUnit::Seconds), 1);
//! ```

mod drift;

pub use drift::{
    compute_clock_drift, DriftTolerance, DEFAULT_DRIFT_TOLERANCE, DEFAULT_DRIFT_TOLERANCE_UNIT,
    DRIFT_TOLERANCE_ENV, DRIFT_TOLERANCE_UNIT_ENV,
};

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unit of time with nanosecond-based conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeUnit {
    /// 10^-9 s.
    Nanoseconds,
    /// 10^-6 s.
    Microseconds,
    /// 10^-3 s.
    Milliseconds,
    /// One second.
    Seconds,
    /// 60 s.
    Minutes,
    /// 3600 s.
    Hours,
    /// 86400 s.
    Days,
}

impl TimeUnit {
    /// Nanoseconds in one unit.
    #[must_use]
    pub const fn nanos_per_unit(self) -> i64 {
        match self {
            TimeUnit::Nanoseconds => 1,
            TimeUnit::Microseconds => 1_000,
            TimeUnit::Milliseconds => 1_000_000,
            TimeUnit::Seconds => 1_000_000_000,
            TimeUnit::Minutes => 60_000_000_000,
            TimeUnit::Hours => 3_600_000_000_000,
            TimeUnit::Days => 86_400_000_000_000,
        }
    }

    /// Converts `amount` of this unit to nanoseconds, saturating at the
    /// `i64` bounds.
    #[must_use]
    pub const fn to_nanos(self, amount: i64) -> i64 {
        amount.saturating_mul(self.nanos_per_unit())
    }

    /// Converts `amount` expressed in `source` into this unit.
    ///
    /// Coarsening truncates toward zero; refining saturates.
    #[must_use]
    pub const fn convert(self, amount: i64, source: TimeUnit) -> i64 {
        let from = source.nanos_per_unit();
        let to = self.nanos_per_unit();
        if from >= to {
            amount.saturating_mul(from / to)
        } else {
            amount / (to / from)
        }
    }

    /// Parses a unit name, case-insensitively.
    ///
    /// Accepts the plural lowercase names (`"seconds"`) and the usual
    /// abbreviations (`"ms"`, `"s"`, `"min"`).
    #[must_use]
    pub fn parse(name: &str) -> Option<TimeUnit> {
        let unit = match name.trim().to_ascii_lowercase().as_str() {
            "nanoseconds" | "ns" => TimeUnit::Nanoseconds,
            "microseconds" | "us" => TimeUnit::Microseconds,
            "milliseconds" | "ms" => TimeUnit::Milliseconds,
            "seconds" | "s" => TimeUnit::Seconds,
            "minutes" | "min" => TimeUnit::Minutes,
            "hours" | "h" => TimeUnit::Hours,
            "days" | "d" => TimeUnit::Days,
            _ => return None,
        };
        Some(unit)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    /// Current time in `unit`.
    fn now(&self, unit: TimeUnit) -> i64;
}

/// Wall-clock time since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self, unit: TimeUnit) -> i64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
        unit.convert(nanos, TimeUnit::Nanoseconds)
    }
}

/// Manually advanced clock.
#[derive(Debug, Default)]
pub struct VirtualClock {
    nanos: AtomicI64,
}

impl VirtualClock {
    /// Creates a clock at time zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nanos: AtomicI64::new(0),
        }
    }

    /// Moves time forward by `amount` of `unit`.
    pub fn advance_by(&self, amount: i64, unit: TimeUnit) {
        let delta = unit.to_nanos(amount);
        let _ = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(delta))
            });
    }

    /// Sets time to `instant` of `unit`.
    pub fn advance_to(&self, instant: i64, unit: TimeUnit) {
        self.nanos.store(unit.to_nanos(instant), Ordering::Release);
    }
}

impl Clock for VirtualClock {
    fn now(&self, unit: TimeUnit) -> i64 {
        unit.convert(self.nanos.load(Ordering::Acquire), TimeUnit::Nanoseconds)
    }
}
