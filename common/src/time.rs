//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Sub},
};

/// A wrapper around [`tokio::time::Instant`] that does not expose panicking `duration_since`
/// operations.
///
/// Reading the clock through tokio means a paused test runtime controls every timestamp the
/// speaker tracker sees, so expiry can be tested with `tokio::time::advance`.
///
/// Instead of subtraction, use `saturating_duration_since`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(tokio::time::Instant);

impl Instant {
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.saturating_duration_since(earlier.0))
    }

    pub fn now() -> Instant {
        Instant(tokio::time::Instant::now())
    }
}

impl From<tokio::time::Instant> for Instant {
    fn from(instant: tokio::time::Instant) -> Self {
        Self(instant)
    }
}

impl From<Instant> for tokio::time::Instant {
    fn from(instant: Instant) -> Self {
        instant.0
    }
}

impl Debug for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

/// A wrapper around [`std::time::Duration`] that does not expose panicking difference
/// operations.
///
/// Only the methods the tracker and session need are exposed. Add a wrapper here rather than
/// converting to the underlying value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const ZERO: Duration = Duration::from_secs(0);
    pub const MILLISECOND: Duration = Duration::from_millis(1);
    pub const SECOND: Duration = Duration::from_secs(1);

    pub const fn from_secs(secs: u64) -> Duration {
        Duration(std::time::Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Duration {
        Duration(std::time::Duration::from_millis(millis))
    }

}

impl From<std::time::Duration> for Duration {
    fn from(duration: std::time::Duration) -> Self {
        Self(duration)
    }
}

impl From<Duration> for std::time::Duration {
    fn from(duration: Duration) -> Self {
        duration.0
    }
}

impl Debug for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Duration(self.0 + rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_arithmetic() {
        let short = Duration::from_millis(2);
        let long = Duration::from_secs(5);
        let sum = Duration::from_millis(5002);

        assert_eq!(sum, short + long);
        assert_eq!(Duration::SECOND, Duration::from_millis(1000));
        assert_eq!(
            std::time::Duration::from_millis(5002),
            std::time::Duration::from(sum)
        );
    }

    #[test]
    fn instant_arithmetic() {
        let now = Instant::now();
        let duration = Duration::from_millis(2);
        let soon = now + duration;

        assert_eq!(now, soon - duration);
        assert_eq!(duration, soon.saturating_duration_since(now));
        assert_eq!(Duration::ZERO, now.saturating_duration_since(soon));

        let mut manual_sum = now;
        manual_sum += duration;
        assert_eq!(soon, manual_sum);
    }

    #[tokio::test(start_paused = true)]
    async fn instant_follows_paused_clock() {
        let before = Instant::now();
        tokio::time::advance(std::time::Duration::from_millis(1500)).await;
        assert_eq!(
            Duration::from_millis(1500),
            Instant::now().saturating_duration_since(before)
        );
    }
}
