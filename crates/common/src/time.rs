//! Injectable wall clock.
//!
//! Retention decisions compare message timestamps against "now", so every
//! component that reads the time goes through a [`Clock`]. Production code
//! uses [`SystemClock`]; tests drive a [`ManualClock`].

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, TimeDelta, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = saturating_add(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert a std duration into a chrono delta, saturating on overflow.
#[must_use]
pub fn delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// `at + d`, saturating at the representable maximum.
#[must_use]
pub fn saturating_add(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_add_signed(delta(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `at - d`, saturating at the representable minimum.
#[must_use]
pub fn saturating_sub(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(delta(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Time remaining until `at`, zero if it already passed.
#[must_use]
pub fn until(now: DateTime<Utc>, at: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1);
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), start + TimeDelta::seconds(90));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(DateTime::<Utc>::UNIX_EPOCH);
        let other = clock.clone();
        other.advance(Duration::from_secs(5));
        assert_eq!(clock.now(), other.now());
    }

    #[test]
    fn until_saturates_at_zero() {
        let now = Utc::now();
        assert_eq!(until(now, now - TimeDelta::seconds(3)), Duration::ZERO);
        assert_eq!(
            until(now, now + TimeDelta::seconds(3)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn delta_saturates() {
        assert_eq!(delta(Duration::MAX), TimeDelta::MAX);
        let now = Utc::now();
        assert_eq!(saturating_add(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(saturating_sub(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn closures_are_clocks() {
        let fixed = DateTime::<Utc>::UNIX_EPOCH;
        let clock = move || fixed;
        assert_eq!(Clock::now(&clock), fixed);
    }
}
