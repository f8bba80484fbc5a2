//! Time sources used to stamp uploads and compute expiry cutoffs.

use std::{
  fmt,
  sync::{PoisonError, RwLock},
};

use chrono::{DateTime, TimeDelta, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
  /// The current instant.
  fn now(&self) -> DateTime<Utc>;
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
  /// Create a clock frozen at `start`.
  #[must_use]
  pub const fn new(start: DateTime<Utc>) -> Self {
    Self {
      now: RwLock::new(start),
    }
  }

  /// Create a clock frozen at the current wall-clock time.
  #[must_use]
  pub fn starting_now() -> Self { Self::new(Utc::now()) }

  /// Move the clock forward by `delta`.
  pub fn advance(&self, delta: TimeDelta) {
    let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
    *now += delta;
  }

  /// Move the clock forward by whole days.
  pub fn advance_days(&self, days: i64) { self.advance(TimeDelta::days(days)); }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    *self.now.read().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_manual_clock_advances() {
    let clock = ManualClock::starting_now();
    let before = clock.now();
    clock.advance_days(3);
    assert_eq!(clock.now() - before, TimeDelta::days(3));
  }
}
