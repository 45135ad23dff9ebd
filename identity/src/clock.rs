//! # Injectable Time Source
//!
//! Expiry, lockout, and challenge-TTL math all read `now()` through this
//! trait instead of calling `Utc::now()` directly, so tests can control
//! time deterministically instead of sleeping real wall-clock seconds.

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production implementation: the real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// A `Clock` whose value is set explicitly, for deterministic tests.
    pub struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub fn new(at: DateTime<Utc>) -> Self {
            Self(Mutex::new(at))
        }

        pub fn advance(&self, delta: chrono::Duration) {
            let mut guard = self.0.lock();
            *guard = *guard + delta;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FixedClock;
    use super::*;
    use chrono::Duration;

    #[test]
    fn system_clock_advances() {
        let a = SystemClock.now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = SystemClock.now();
        assert!(b >= a);
    }

    #[test]
    fn fixed_clock_is_controllable() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::minutes(15));
        assert_eq!(clock.now(), start + Duration::minutes(15));
    }
}
