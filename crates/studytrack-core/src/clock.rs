//! Wall-clock abstraction.
//!
//! Timer recovery spans process restarts, so the engine reads wall-clock
//! time rather than a monotonic `Instant`. Tests drive a [`ManualClock`].

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock shared between clones.
///
/// Advancing one clone advances all of them, so a test can keep a handle
/// while the engine owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward (or backward, for negative values).
    pub fn advance_secs(&self, secs: i64) {
        let mut current = self.lock();
        *current += Duration::seconds(secs);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.lock() = at;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        // A poisoned clock still holds a valid timestamp.
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// Whole seconds from `from` to `to`, clamped at zero.
///
/// Returns `None` when `to` lies before `from`, i.e. the clock was rewound.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> Option<u64> {
    let delta = to.signed_duration_since(from).num_seconds();
    u64::try_from(delta).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(t0());
        let other = clock.clone();
        clock.advance_secs(90);
        assert_eq!(other.now(), t0() + Duration::seconds(90));
    }

    #[test]
    fn elapsed_secs_rejects_rewind() {
        assert_eq!(elapsed_secs(t0(), t0() + Duration::seconds(5)), Some(5));
        assert_eq!(elapsed_secs(t0(), t0()), Some(0));
        assert_eq!(elapsed_secs(t0(), t0() - Duration::seconds(1)), None);
    }
}
