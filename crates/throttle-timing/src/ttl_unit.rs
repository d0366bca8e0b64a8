use std::fmt;

use thiserror::Error;

/// Interpretation of a raw TTL quantity carried on the wire.
///
/// Discriminants are the on-wire byte values; order follows the data model
/// as specified rather than any particular source ordering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TtlUnit {
    Nanoseconds = 0,
    Microseconds = 1,
    Milliseconds = 2,
    Seconds = 3,
    Minutes = 4,
    Hours = 5,
}

#[derive(Debug, Error)]
#[error("unknown ttl unit byte {0:#04x}")]
pub struct UnknownTtlUnit(pub u8);

impl TtlUnit {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(byte: u8) -> Result<Self, UnknownTtlUnit> {
        match byte {
            0 => Ok(TtlUnit::Nanoseconds),
            1 => Ok(TtlUnit::Microseconds),
            2 => Ok(TtlUnit::Milliseconds),
            3 => Ok(TtlUnit::Seconds),
            4 => Ok(TtlUnit::Minutes),
            5 => Ok(TtlUnit::Hours),
            other => Err(UnknownTtlUnit(other)),
        }
    }
}

impl fmt::Display for TtlUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TtlUnit::Nanoseconds => "ns",
            TtlUnit::Microseconds => "us",
            TtlUnit::Milliseconds => "ms",
            TtlUnit::Seconds => "s",
            TtlUnit::Minutes => "min",
            TtlUnit::Hours => "h",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_byte() {
        for b in 0..=5u8 {
            let unit = TtlUnit::from_u8(b).unwrap();
            assert_eq!(unit.as_u8(), b);
        }
    }

    #[test]
    fn rejects_unknown_byte() {
        assert!(TtlUnit::from_u8(6).is_err());
    }
}
