//! UTC clock abstraction (C1).
//!
//! Everything downstream that reasons about lease expiry or certificate
//! renewal windows takes a `&dyn TimeSource` instead of calling
//! `SystemTime::now()` directly, so tests can park the clock at an exact
//! instant and assert boundary behavior deterministically.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of the current UTC instant.
pub trait TimeSource: Send + Sync {
    /// The current UTC instant.
    fn now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock pinned to a fixed instant, advanced explicitly by tests.
///
/// Stores nanoseconds since the Unix epoch so that `advance`/`set` retain
/// sub-second precision — §8's boundary properties ("a claim one
/// nanosecond after `saveTokenExpiresAt` succeeds") are only testable if
/// this clock can actually represent a one-nanosecond step.
#[derive(Debug, Clone)]
pub struct FixedClock {
    nanos_since_epoch: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl FixedClock {
    /// Construct a clock pinned at `instant`.
    pub fn new(instant: SystemTime) -> Self {
        let nanos = instant
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        Self {
            nanos_since_epoch: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(nanos)),
        }
    }

    /// Construct a clock pinned at the current instant.
    pub fn now_fixed() -> Self {
        Self::new(SystemTime::now())
    }

    /// Advance the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        use std::sync::atomic::Ordering;
        self.nanos_since_epoch
            .fetch_add(delta.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Pin the clock to an exact instant.
    pub fn set(&self, instant: SystemTime) {
        use std::sync::atomic::Ordering;
        let nanos = instant
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        self.nanos_since_epoch.store(nanos, Ordering::SeqCst);
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> SystemTime {
        use std::sync::atomic::Ordering;
        UNIX_EPOCH + Duration::from_nanos(self.nanos_since_epoch.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_deterministically() {
        let clock = FixedClock::new(UNIX_EPOCH + Duration::from_secs(1000));
        assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1000));
        clock.advance(Duration::from_secs(900));
        assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1900));
    }

    #[test]
    fn fixed_clock_advances_by_one_nanosecond() {
        let clock = FixedClock::new(UNIX_EPOCH + Duration::from_secs(1000));
        clock.advance(Duration::from_nanos(1));
        assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_secs(1000) + Duration::from_nanos(1));
    }

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(1));
        let b = clock.now();
        assert!(b >= a);
    }
}
