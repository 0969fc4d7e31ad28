use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Source of local wall-clock time and a monotonic millisecond counter.
///
/// The wall-clock reading drives the daily profiles; the monotonic reading
/// drives uptime and alarm timing so that a wall-clock jump never raises or
/// clears an alarm early.
pub trait Clock: Send + Sync {
    /// Current local time.
    fn now(&self) -> NaiveDateTime;

    /// Milliseconds since an arbitrary fixed origin; never decreases.
    fn monotonic_ms(&self) -> u64;
}

/// The host's clock.
#[derive(Debug)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn monotonic_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chrono::NaiveDate;
/// use ess_modbus_sim::sim::clock::{Clock, ManualClock};
///
/// let start = NaiveDate::from_ymd_opt(2024, 6, 1)
///     .and_then(|d| d.and_hms_opt(12, 0, 0))
///     .expect("valid time");
/// let clock = ManualClock::new(start);
///
/// clock.advance(Duration::from_secs(90));
/// assert_eq!(clock.monotonic_ms(), 90_000);
/// assert_eq!(clock.now(), start + chrono::TimeDelta::seconds(90));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
    monotonic_ms: AtomicU64,
}

impl ManualClock {
    /// Creates a clock reading `start` with the monotonic counter at 0.
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
            monotonic_ms: AtomicU64::new(0),
        }
    }

    /// Moves both readings forward by `by`.
    pub fn advance(&self, by: Duration) {
        let ms = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.monotonic_ms.fetch_add(ms, Ordering::SeqCst);
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::zero());
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    /// Jumps the wall-clock reading without touching the monotonic counter.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn monotonic_ms(&self) -> u64 {
        self.monotonic_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 31)
            .and_then(|d| d.and_hms_opt(23, 59, 0))
            .expect("valid timestamp")
    }

    #[test]
    fn test_manual_advance_crosses_midnight() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_secs(120));
        assert_eq!(clock.now().date(), NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date"));
        assert_eq!(clock.monotonic_ms(), 120_000);
    }

    #[test]
    fn test_set_leaves_monotonic_alone() {
        let clock = ManualClock::new(start());
        clock.advance(Duration::from_millis(250));
        clock.set(start() - TimeDelta::hours(5));
        assert_eq!(clock.monotonic_ms(), 250);
        assert_eq!(clock.now(), start() - TimeDelta::hours(5));
    }

    #[test]
    fn test_wall_clock_is_monotonic() {
        let clock = WallClock::new();
        let a = clock.monotonic_ms();
        let b = clock.monotonic_ms();
        assert!(b >= a);
    }
}
