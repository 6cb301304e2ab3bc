//! Time-related types based on the radio's 40-bit system time

use core::ops::{Add, Sub};

#[cfg(feature = "defmt")]
use defmt::Format;

/// Largest value of the 40-bit device clock
pub const TIME_MAX: u64 = 0xff_ffff_ffff;

/// Duration of one device time unit, in seconds: 1 / (128 * 499.2 MHz)
pub const DWT_TIME_UNITS: f64 = 1.0 / 499.2e6 / 128.0;

/// Device time units per UWB microsecond (512 / 499.2 µs)
pub const UUS_TO_DWT_TIME: u64 = 65536;

/// Delayed transmissions ignore the low 9 bits of the programmed instant.
const DELAYED_TX_MASK: u64 = !0x1ff;

/// A point in device time
///
/// Holds the full 40-bit counter value. Frames only carry the low 32 bits,
/// see [`Instant::truncated`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Instant(u64);

impl Instant {
    /// Wraps a 40-bit device timestamp
    ///
    /// Returns `None` for values above [`TIME_MAX`].
    ///
    /// ``` rust
    /// use uwb_twr::time::{Instant, TIME_MAX};
    ///
    /// assert!(Instant::new(TIME_MAX).is_some());
    /// assert!(Instant::new(TIME_MAX + 1).is_none());
    /// ```
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Instant(value))
        } else {
            None
        }
    }

    /// Creates an `Instant` from a raw register value, dropping bits above 40
    pub fn from_register(value: u64) -> Self {
        Instant(value & TIME_MAX)
    }

    /// The 40-bit device timestamp
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The low 32 bits of the timestamp, as embedded in ranging frames
    pub fn truncated(&self) -> u32 {
        self.0 as u32
    }

    /// The instant a delayed transmission programmed with `self` actually
    /// starts at
    ///
    /// The radio schedules on `(t >> 8) & 0xFFFF_FFFE`, so the low 9 bits are
    /// lost.
    pub fn delayed_tx_rounded(&self) -> Instant {
        Instant(self.0 & DELAYED_TX_MASK)
    }

    /// Time elapsed from `earlier` to `self`
    ///
    /// The device clock wraps every 2^40 units (about 17.2 s), so `earlier`
    /// may well have the larger value:
    ///
    /// ``` rust
    /// use uwb_twr::time::{Instant, TIME_MAX};
    ///
    /// let before_wrap = Instant::new(TIME_MAX - 9).unwrap();
    /// let after_wrap = Instant::new(40).unwrap();
    ///
    /// assert_eq!(after_wrap.duration_since(before_wrap).value(), 50);
    /// ```
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0) & TIME_MAX)
    }
}

impl Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Instant((self.0 + rhs.0) & TIME_MAX)
    }
}

impl Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Instant(self.0.wrapping_sub(rhs.0) & TIME_MAX)
    }
}

/// A span of device time, in device time units
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(C)]
pub struct Duration(u64);

impl Duration {
    /// Wraps a count of device time units
    ///
    /// Returns `None` above [`TIME_MAX`].
    pub fn new(value: u64) -> Option<Self> {
        if value <= TIME_MAX {
            Some(Duration(value))
        } else {
            None
        }
    }

    /// Creates a `Duration` from UWB microseconds
    ///
    /// Values past the 40-bit range wrap like the radio's counter does.
    pub fn from_uus(uus: u32) -> Self {
        Duration((uus as u64 * UUS_TO_DWT_TIME) & TIME_MAX)
    }

    /// Creates a `Duration` from a 32-bit count of device time units
    pub fn from_device_units(units: u32) -> Self {
        Duration(units as u64)
    }

    /// Returns the raw 40-bit value
    pub fn value(&self) -> u64 {
        self.0
    }
}
