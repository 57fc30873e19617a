//! Time sources.
//!
//! Every component reads time through a [`Clock`] so that window expiry, TTL
//! eviction and lockout computation can be driven deterministically in tests
//! with a [`ManualClock`].

use std::{
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic time, used for in-memory windows and TTLs.
    fn instant(&self) -> Instant;

    /// Wall-clock time, used for persisted attempt timestamps.
    fn utc(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> Instant {
        Instant::now()
    }

    fn utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Both readings start at the moment of construction and advance together.
#[derive(Debug)]
pub struct ManualClock {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_utc: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn instant(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn utc(&self) -> DateTime<Utc> {
        // Offsets larger than chrono can represent saturate at the base time.
        let offset = chrono::Duration::from_std(self.offset()).unwrap_or_default();
        self.base_utc + offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_both_readings() {
        let clock = ManualClock::new();
        let instant = clock.instant();
        let utc = clock.utc();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.instant() - instant, Duration::from_secs(90));
        assert_eq!(clock.utc() - utc, chrono::Duration::seconds(90));
    }

    #[test]
    fn test_manual_clock_is_frozen_without_advance() {
        let clock = ManualClock::new();
        let first = clock.instant();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.instant(), first);
    }
}
