use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub, SubAssign};

/// A span of nanoseconds. Unlike `Nanos`, which names an absolute instant,
/// `Duration` names an elapsed quantity — the two convert into each other
/// but are not interchangeable in arithmetic.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(pub u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const MAX: Duration = Duration(u64::MAX);

    #[inline]
    pub const fn from_nanos(n: u64) -> Self {
        Duration(n)
    }

    #[inline]
    pub const fn from_micros(n: u64) -> Self {
        Duration(n * 1_000)
    }

    #[inline]
    pub const fn from_millis(n: u64) -> Self {
        Duration(n * 1_000_000)
    }

    #[inline]
    pub const fn from_secs(n: u64) -> Self {
        Duration(n * 1_000_000_000)
    }

    #[inline]
    pub const fn from_mins(n: u64) -> Self {
        Duration::from_secs(n * 60)
    }

    #[inline]
    pub const fn from_hours(n: u64) -> Self {
        Duration::from_mins(n * 60)
    }

    /// Converts a raw `ttl` quantity expressed in one of the protocol's TTL
    /// units into a nanosecond span.
    pub fn from_ttl_units(units: u64, ttl_unit: crate::TtlUnit) -> Self {
        use crate::TtlUnit::*;
        match ttl_unit {
            Nanoseconds => Duration::from_nanos(units),
            Microseconds => Duration::from_micros(units),
            Milliseconds => Duration::from_millis(units),
            Seconds => Duration::from_secs(units),
            Minutes => Duration::from_mins(units),
            Hours => Duration::from_hours(units),
        }
    }

    #[inline]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_add(self, rhs: Duration) -> Self {
        Duration(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Duration) -> Self {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::Nanos(self.0).fmt(f)
    }
}

impl From<std::time::Duration> for Duration {
    #[inline]
    fn from(value: std::time::Duration) -> Self {
        Duration(value.as_nanos() as u64)
    }
}

impl From<Duration> for std::time::Duration {
    #[inline]
    fn from(value: Duration) -> Self {
        std::time::Duration::from_nanos(value.0)
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.wrapping_add(rhs.0))
    }
}

impl AddAssign for Duration {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.wrapping_sub(rhs.0))
    }
}

impl SubAssign for Duration {
    #[inline]
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: u64) -> Duration {
        Duration(self.0 * rhs)
    }
}

impl MulAssign<u64> for Duration {
    #[inline]
    fn mul_assign(&mut self, rhs: u64) {
        *self = *self * rhs;
    }
}

impl Div<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn div(self, rhs: u64) -> Duration {
        Duration(self.0 / rhs)
    }
}

impl DivAssign<u64> for Duration {
    #[inline]
    fn div_assign(&mut self, rhs: u64) {
        *self = *self / rhs;
    }
}
