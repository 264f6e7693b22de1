//! Fixed-point timestamps.
//!
//! Values are timestamped with a 64-bit fixed-point number: the high 34 bits
//! hold whole seconds since the Unix epoch, the low 30 bits hold the fraction
//! of a second. Conversions round the fraction to the nearest representable value.

use std::fmt;
use std::ops::{Add, Mul};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const FRACTION_BITS: u32 = 30;
const FRACTION_MASK: u64 = (1 << FRACTION_BITS) - 1;
const NANOS_PER_SEC: u128 = 1_000_000_000;

/// A point in time, or a duration, in 2^-30 second units.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CdTime(pub u64);

impl CdTime {
    /// Converts a number of nanoseconds.
    pub fn from_nanos(nanos: u128) -> Self {
        let secs = (nanos / NANOS_PER_SEC) << FRACTION_BITS;
        let frac = (((nanos % NANOS_PER_SEC) << FRACTION_BITS) + NANOS_PER_SEC / 2) / NANOS_PER_SEC;
        CdTime((secs | frac) as u64)
    }

    /// Returns the current time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Whole seconds, rounded to the nearest second.
    pub fn as_secs_rounded(&self) -> u64 {
        (self.0 + (1 << (FRACTION_BITS - 1))) >> FRACTION_BITS
    }

    /// Converts to nanoseconds, rounding the fraction to the nearest nanosecond.
    pub fn as_nanos(&self) -> u128 {
        let secs = (self.0 >> FRACTION_BITS) as u128;
        let frac = (self.0 & FRACTION_MASK) as u128;
        secs * NANOS_PER_SEC + ((frac * NANOS_PER_SEC + (1 << (FRACTION_BITS - 1))) >> FRACTION_BITS)
    }

    /// Converts a timestamp to a [`SystemTime`].
    pub fn to_system_time(&self) -> SystemTime {
        let nanos = self.as_nanos();
        let secs = (nanos / NANOS_PER_SEC) as u64;
        let subsec = (nanos % NANOS_PER_SEC) as u32;
        UNIX_EPOCH + Duration::new(secs, subsec)
    }
}

impl From<Duration> for CdTime {
    fn from(value: Duration) -> Self {
        Self::from_nanos(value.as_nanos())
    }
}

impl From<SystemTime> for CdTime {
    fn from(value: SystemTime) -> Self {
        // times before the epoch are clamped to the epoch
        let since_epoch = value.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self::from(since_epoch)
    }
}

impl Add for CdTime {
    type Output = CdTime;

    fn add(self, rhs: CdTime) -> CdTime {
        CdTime(self.0.wrapping_add(rhs.0))
    }
}

impl Mul<u64> for CdTime {
    type Output = CdTime;

    fn mul(self, rhs: u64) -> CdTime {
        CdTime(self.0.wrapping_mul(rhs))
    }
}

impl fmt::Debug for CdTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CdTime({}.{:09})", self.0 >> FRACTION_BITS, self.as_nanos() % NANOS_PER_SEC)
    }
}

impl fmt::Display for CdTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::CdTime;

    #[test]
    fn whole_seconds() {
        assert_eq!(CdTime::from(Duration::from_secs(1)).0, 1 << 30);
        assert_eq!(CdTime::from(Duration::from_secs(10)).0, 10 << 30);
        assert_eq!(CdTime::from(UNIX_EPOCH + Duration::from_secs(1_700_000_000)).0, 1_700_000_000 << 30);
    }

    #[test]
    fn fraction_is_rounded_to_nearest() {
        // half a second is exactly representable
        assert_eq!(CdTime::from(Duration::from_millis(500)).0, 1 << 29);
        // 1ns is 1.07 units, rounded down
        assert_eq!(CdTime::from_nanos(1).0, 1);
        // 2ns is 2.147 units, rounded down
        assert_eq!(CdTime::from_nanos(2).0, 2);
        // 3ns is 3.22 units
        assert_eq!(CdTime::from_nanos(3).0, 3);
        // 7ns is 7.516 units, rounded up
        assert_eq!(CdTime::from_nanos(7).0, 8);
    }

    #[test]
    fn largest_fraction_stays_in_fraction_bits() {
        let t = CdTime::from_nanos(999_999_999);
        assert_eq!(t.0 >> 30, 0);
        assert_eq!(t.0, (1 << 30) - 1);
    }

    #[test]
    fn seconds_rounding() {
        assert_eq!(CdTime((5 << 30) + (1 << 29)).as_secs_rounded(), 6);
        assert_eq!(CdTime((5 << 30) + (1 << 29) - 1).as_secs_rounded(), 5);
    }

    #[test]
    fn to_system_time() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 250_000_000);
        assert_eq!(CdTime::from(t).to_system_time(), t);
    }

    #[test]
    fn arithmetic() {
        let start = CdTime::from(Duration::from_secs(100));
        let window = CdTime::from(Duration::from_millis(1500));
        assert_eq!(start + window * 2, CdTime::from(Duration::from_secs(103)));
    }
}
