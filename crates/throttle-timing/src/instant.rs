use std::ops::{Add, Sub};

use crate::Duration;

/// A monotonic-clock reading, used for interval bookkeeping (the
/// expiration scheduler's "now" and the metrics roll-up's `Repeater`).
/// Unlike `Nanos`, this never needs to survive a process restart and is
/// cheap to read repeatedly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(std::time::Instant);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Instant(std::time::Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from(self.0.elapsed())
    }

    #[inline]
    pub fn saturating_duration_since(&self, earlier: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(earlier.0))
    }

    #[inline]
    pub fn checked_add(&self, rhs: Duration) -> Option<Self> {
        self.0.checked_add(rhs.into()).map(Instant)
    }
}

impl Default for Instant {
    /// `Instant::ZERO`-equivalent: a fixed point in the past, so a
    /// freshly constructed `Repeater` fires immediately.
    fn default() -> Self {
        Instant(std::time::Instant::now() - std::time::Duration::from_secs(3600))
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        self.checked_add(rhs).unwrap_or(self)
    }
}

impl Sub for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.saturating_duration_since(rhs)
    }
}
