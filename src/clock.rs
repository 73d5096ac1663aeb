//! Time sources for validating time-bound claims

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// A moment in Unix time
///
/// Counted in whole seconds since 1970-01-01T00:00:00Z, the same
/// resolution the `exp` and `nbf` claims carry.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct UnixTime(pub u64);

impl From<SystemTime> for UnixTime {
    #[inline]
    fn from(t: SystemTime) -> Self {
        let time = t
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("system time predates the Unix epoch")
            .as_secs();

        UnixTime(time)
    }
}

/// A source of the current time
pub trait Clock {
    /// The current moment according to this source
    fn now(&self) -> UnixTime;
}

/// Tells time from the operating system via `std::time::SystemTime`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct System;

impl Clock for System {
    #[inline]
    fn now(&self) -> UnixTime {
        UnixTime::from(SystemTime::now())
    }
}

/// A clock under the test's control
///
/// Stands still until moved, so expiry boundaries can be probed
/// exactly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TestClock(UnixTime);

impl Clock for TestClock {
    #[inline]
    fn now(&self) -> UnixTime {
        self.0
    }
}

impl TestClock {
    /// A clock stopped at the given moment
    #[inline]
    pub const fn new(time: UnixTime) -> Self {
        Self(time)
    }

    /// Moves the clock to the given moment
    pub fn set(&mut self, val: UnixTime) {
        self.0 = val;
    }

    /// Advances the clock by `inc` seconds
    pub fn inc(&mut self, inc: u64) {
        (self.0).0 += inc;
    }
}
