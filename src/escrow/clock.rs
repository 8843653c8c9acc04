//! Escrow Clock
//!
//! Host-supplied time source for deadline checks. Callers never pass a
//! timestamp into an operation; the escrow asks its `Clock` instead.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Nanoseconds since Unix epoch (1970-01-01 00:00:00 UTC).
pub type Nanos = i64;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Monotonically non-decreasing time source.
pub trait Clock {
    fn now(&self) -> Nanos;
}

/// Manually driven clock for simulations and tests.
///
/// # Contract
/// - `advance_to()` only moves forward, panics (debug builds) on backward movement
#[derive(Debug, Clone)]
pub struct SimClock {
    current: Nanos,
}

impl SimClock {
    #[inline]
    pub fn new(start_time: Nanos) -> Self {
        Self {
            current: start_time,
        }
    }

    /// Create a clock from a Unix timestamp in seconds.
    #[inline]
    pub fn from_unix_secs(secs: i64) -> Self {
        Self::new(secs.saturating_mul(NANOS_PER_SEC))
    }

    #[inline]
    pub fn now_secs(&self) -> i64 {
        self.current / NANOS_PER_SEC
    }

    /// Advance clock to a new time. Panics if time would go backward.
    #[inline]
    pub fn advance_to(&mut self, new_time: Nanos) {
        debug_assert!(
            new_time >= self.current,
            "SimClock: cannot go backward from {} to {}",
            self.current,
            new_time
        );
        self.current = new_time.max(self.current);
    }

    #[inline]
    pub fn advance_by(&mut self, delta: Nanos) {
        debug_assert!(delta >= 0, "SimClock: delta must be non-negative");
        self.current = self.current.saturating_add(delta.max(0));
    }
}

impl Clock for SimClock {
    #[inline]
    fn now(&self) -> Nanos {
        self.current
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.current / NANOS_PER_SEC;
        let nanos = self.current % NANOS_PER_SEC;
        write!(f, "{}.{:09}s", secs, nanos)
    }
}

/// A `SimClock` that can be advanced from outside while the escrow holds a handle.
#[derive(Debug, Clone, Default)]
pub struct SharedClock {
    inner: Arc<Mutex<SimClock>>,
}

impl SharedClock {
    pub fn new(start_time: Nanos) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimClock::new(start_time))),
        }
    }

    pub fn advance_to(&self, new_time: Nanos) {
        self.inner.lock().advance_to(new_time);
    }
}

impl Clock for SharedClock {
    fn now(&self) -> Nanos {
        self.inner.lock().now()
    }
}

/// Helper to convert Nanos to chrono DateTime.
#[inline]
pub fn nanos_to_datetime(nanos: Nanos) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::TimeZone;
    let secs = nanos.div_euclid(NANOS_PER_SEC);
    let nsecs = nanos.rem_euclid(NANOS_PER_SEC) as u32;
    chrono::Utc.timestamp_opt(secs, nsecs).single()
}

/// Helper to parse ISO8601/RFC3339 string to Nanos.
///
/// `None` for malformed input and for instants outside the i64 nanosecond
/// range (before 1677 or after 2262).
pub fn parse_timestamp(s: &str) -> Option<Nanos> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .and_then(|dt| dt.with_timezone(&chrono::Utc).timestamp_nanos_opt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_monotonic() {
        let mut clock = SimClock::new(1_000_000_000);
        assert_eq!(clock.now(), 1_000_000_000);

        clock.advance_to(2_000_000_000);
        assert_eq!(clock.now(), 2_000_000_000);

        clock.advance_by(500_000_000);
        assert_eq!(clock.now(), 2_500_000_000);

        clock.advance_by(Nanos::MAX);
        assert_eq!(clock.now(), Nanos::MAX);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "cannot go backward")]
    fn test_clock_backward_panics() {
        let mut clock = SimClock::new(1_000_000_000);
        clock.advance_to(500_000_000);
    }

    #[test]
    fn test_shared_clock_visible_through_clones() {
        let clock = SharedClock::new(0);
        let handle = clock.clone();
        clock.advance_to(5 * NANOS_PER_SEC);
        assert_eq!(handle.now(), 5 * NANOS_PER_SEC);
    }

    #[test]
    fn test_parse_timestamp() {
        let ns = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(ns, 1_704_067_200 * NANOS_PER_SEC);
        assert!(parse_timestamp("not a date").is_none());

        let dt = nanos_to_datetime(ns).unwrap();
        assert_eq!(dt.timestamp_nanos_opt(), Some(ns));

        // Representable by chrono, not by i64 nanoseconds
        assert!(parse_timestamp("2300-01-01T00:00:00Z").is_none());
    }

    #[test]
    fn test_display() {
        let clock = SimClock::new(1_500_000_000);
        assert_eq!(clock.to_string(), "1.500000000s");
        assert_eq!(SimClock::from_unix_secs(7).now_secs(), 7);
    }
}
