//! Clock drift tolerance.

use std::time::Duration;

use super::TimeUnit;

/// Environment variable holding the drift tolerance amount.
pub const DRIFT_TOLERANCE_ENV: &str = "BACKFLOW_SCHEDULER_DRIFT_TOLERANCE";

/// Environment variable holding the drift tolerance unit name.
pub const DRIFT_TOLERANCE_UNIT_ENV: &str = "BACKFLOW_SCHEDULER_DRIFT_TOLERANCE_UNIT";

/// Drift tolerance amount used when none is configured.
pub const DEFAULT_DRIFT_TOLERANCE: i64 = 15;

/// Drift tolerance unit used when none is configured.
pub const DEFAULT_DRIFT_TOLERANCE_UNIT: &str = "minutes";

/// Normalizes a drift amount with a free-form unit name to nanoseconds.
///
/// `"seconds"` and `"milliseconds"` (case-insensitive) are recognized; any
/// other name, or none, means minutes. Saturates at the `i64` bounds.
#[must_use]
pub fn compute_clock_drift(amount: i64, unit: Option<&str>) -> i64 {
    let unit = match unit {
        Some(name) if name.eq_ignore_ascii_case("seconds") => TimeUnit::Seconds,
        Some(name) if name.eq_ignore_ascii_case("milliseconds") => TimeUnit::Milliseconds,
        _ => TimeUnit::Minutes,
    };
    unit.to_nanos(amount)
}

/// How far the wall clock may jump before periodic schedules re-anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftTolerance {
    nanos: i64,
}

impl DriftTolerance {
    /// Creates a tolerance from an amount and a unit name, as
    /// [`compute_clock_drift`] interprets them.
    #[must_use]
    pub fn new(amount: i64, unit: Option<&str>) -> Self {
        Self {
            nanos: compute_clock_drift(amount, unit),
        }
    }

    /// Reads [`DRIFT_TOLERANCE_ENV`] and [`DRIFT_TOLERANCE_UNIT_ENV`].
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves the tolerance through `lookup` instead of the process
    /// environment.
    ///
    /// An unparseable amount falls back to [`DEFAULT_DRIFT_TOLERANCE`].
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let amount = match lookup(DRIFT_TOLERANCE_ENV) {
            None => DEFAULT_DRIFT_TOLERANCE,
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|_| {
                tracing::warn!(
                    var = DRIFT_TOLERANCE_ENV,
                    value = %raw,
                    default = DEFAULT_DRIFT_TOLERANCE,
                    "invalid drift tolerance, using default"
                );
                DEFAULT_DRIFT_TOLERANCE
            }),
        };
        let unit = lookup(DRIFT_TOLERANCE_UNIT_ENV)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| DEFAULT_DRIFT_TOLERANCE_UNIT.to_string());
        Self::new(amount, Some(&unit))
    }

    /// The tolerance in nanoseconds.
    #[inline]
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    /// The tolerance as a `Duration`; negative tolerances clamp to zero.
    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.nanos).unwrap_or(0))
    }

    /// Returns `true` if the clock moved backwards past the tolerance, or
    /// forward past one period plus the tolerance, since `last_now`.
    ///
    /// All arguments are in nanoseconds.
    #[must_use]
    pub fn is_drifted(&self, last_now: i64, now: i64, period: i64) -> bool {
        now.saturating_add(self.nanos) < last_now
            || now >= last_now.saturating_add(period).saturating_add(self.nanos)
    }
}

impl Default for DriftTolerance {
    fn default() -> Self {
        Self::new(DEFAULT_DRIFT_TOLERANCE, Some(DEFAULT_DRIFT_TOLERANCE_UNIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_compute_clock_drift() {
        assert_eq!(compute_clock_drift(100, Some("milliseconds")), 100_000_000);
        assert_eq!(compute_clock_drift(2, Some("seconds")), 2_000_000_000);
        assert_eq!(compute_clock_drift(3, Some("minutes")), 180_000_000_000);
        assert_eq!(compute_clock_drift(4, Some("random")), 240_000_000_000);
        assert_eq!(compute_clock_drift(5, None), 300_000_000_000);
    }

    #[test]
    fn test_compute_clock_drift_ignores_case() {
        assert_eq!(compute_clock_drift(1, Some("SECONDS")), 1_000_000_000);
        assert_eq!(compute_clock_drift(1, Some("MilliSeconds")), 1_000_000);
        // Abbreviations are not recognized.
        assert_eq!(compute_clock_drift(1, Some("ms")), 60_000_000_000);
    }

    #[test]
    fn test_compute_clock_drift_saturates() {
        assert_eq!(compute_clock_drift(i64::MAX, None), i64::MAX);
    }

    #[test]
    fn test_default_tolerance() {
        let tolerance = DriftTolerance::default();
        assert_eq!(tolerance.as_nanos(), 15 * 60_000_000_000);
        assert_eq!(tolerance.as_duration(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (DRIFT_TOLERANCE_ENV, "30"),
            (DRIFT_TOLERANCE_UNIT_ENV, "seconds"),
        ]
        .into_iter()
        .collect();
        let tolerance = DriftTolerance::from_lookup(|k| vars.get(k).map(ToString::to_string));
        assert_eq!(tolerance.as_nanos(), 30_000_000_000);
    }

    #[test]
    fn test_from_lookup_defaults() {
        assert_eq!(
            DriftTolerance::from_lookup(|_| None),
            DriftTolerance::default()
        );
        let garbage = DriftTolerance::from_lookup(|k| {
            (k == DRIFT_TOLERANCE_ENV).then(|| "soon".to_string())
        });
        assert_eq!(garbage, DriftTolerance::default());
    }

    #[test]
    fn test_is_drifted() {
        let tolerance = DriftTolerance::new(1, Some("seconds"));
        let second = 1_000_000_000;
        let period = 10 * second;
        let last = 100 * second;
        assert!(!tolerance.is_drifted(last, last + period, period));
        assert!(!tolerance.is_drifted(last, last - second / 2, period));
        assert!(tolerance.is_drifted(last, last - 2 * second, period));
        assert!(tolerance.is_drifted(last, last + period + second, period));
    }
}
