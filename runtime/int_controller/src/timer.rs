//! Timer Calibration
//!
//! Controller countdown timers tick at a bus-derived rate that is not
//! discoverable from the hardware itself. It is measured instead: let the
//! countdown run for one interval of a reference timer with a known period,
//! then scale the consumed ticks up to one second.
//!
//! ## Calibration
//!
//! 1. Program the divider and load a large initial count
//! 2. Block on the reference timer for `interval_ms`
//! 3. `consumed = initial - current`
//! 4. `hertz = consumed * (1000 / interval_ms) * divide`
//!
//! With a 10 ms interval and divide-by-16 this is `consumed * 100 * 16`.

use crate::CalibrationError;

/// Reference clock of known period used only for calibration
pub trait ReferenceTimer {
    /// Length of one reference interval in milliseconds
    fn interval_ms(&self) -> u32;

    /// Block until one full reference interval has elapsed
    ///
    /// # Errors
    /// Returns `ReferenceUnavailable` if the timer cannot be programmed
    fn wait_interval(&mut self) -> Result<(), CalibrationError>;
}

/// Countdown clock divider
///
/// Discriminants are the Divide Configuration register encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DivideRatio {
    By1 = 0b1011,
    By2 = 0b0000,
    By4 = 0b0001,
    By8 = 0b0010,
    By16 = 0b0011,
    By32 = 0b1000,
    By64 = 0b1001,
    By128 = 0b1010,
}

impl DivideRatio {
    /// Value written to the Divide Configuration register
    pub const fn encoding(self) -> u32 {
        self as u32
    }

    /// Bus clock cycles per countdown tick
    pub const fn ratio(self) -> u32 {
        match self {
            Self::By1 => 1,
            Self::By2 => 2,
            Self::By4 => 4,
            Self::By8 => 8,
            Self::By16 => 16,
            Self::By32 => 32,
            Self::By64 => 64,
            Self::By128 => 128,
        }
    }
}

/// Timer state produced by a successful calibration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerState {
    /// Measured timer frequency, always non-zero
    pub hertz: u64,

    /// Divider the countdown runs with
    pub divide: DivideRatio,

    /// Whether the countdown reloads automatically
    pub periodic: bool,

    /// Count reloaded on every period
    pub initial_count: u32,
}

/// Scale ticks consumed during one reference interval to Hertz
///
/// # Errors
/// - `InvalidInterval` if `interval_ms` is zero
/// - `NoTicksElapsed` if `consumed` is zero
pub fn measure_hertz(
    consumed: u32,
    interval_ms: u32,
    divide: DivideRatio,
) -> Result<u64, CalibrationError> {
    if interval_ms == 0 {
        return Err(CalibrationError::InvalidInterval);
    }
    if consumed == 0 {
        return Err(CalibrationError::NoTicksElapsed);
    }

    // Multiply first: intervals that do not divide 1000 would truncate.
    Ok(u64::from(consumed) * 1000 * u64::from(divide.ratio()) / u64::from(interval_ms))
}

/// Countdown value that yields `rate_hz` interrupts per second
///
/// # Errors
/// Returns `CountOutOfRange` when the count would be zero or exceed the
/// 32-bit Initial Count register.
pub fn periodic_count(hertz: u64, rate_hz: u32) -> Result<u32, CalibrationError> {
    if rate_hz == 0 {
        return Err(CalibrationError::CountOutOfRange { hertz });
    }

    match u32::try_from(hertz / u64::from(rate_hz)) {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(CalibrationError::CountOutOfRange { hertz }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hertz_for_10ms_divide_by_16() {
        for ticks in [1u32, 7, 62_500, 1_000_000, u32::MAX] {
            let hertz = measure_hertz(ticks, 10, DivideRatio::By16).unwrap();
            assert_eq!(hertz, u64::from(ticks) * 100 * 16);
            assert!(hertz > 0);
        }
    }

    #[test]
    fn test_zero_ticks_is_an_error() {
        assert_eq!(
            measure_hertz(0, 10, DivideRatio::By16),
            Err(CalibrationError::NoTicksElapsed)
        );
    }

    #[test]
    fn test_zero_interval_is_an_error() {
        assert_eq!(
            measure_hertz(100, 0, DivideRatio::By16),
            Err(CalibrationError::InvalidInterval)
        );
    }

    #[test]
    fn test_uneven_interval_keeps_precision() {
        // 3 ms: 300 ticks * 1000 / 3 = 100_000 ticks/s, times the divider
        assert_eq!(measure_hertz(300, 3, DivideRatio::By1).unwrap(), 100_000);
    }

    #[test]
    fn test_divide_encodings() {
        assert_eq!(DivideRatio::By16.encoding(), 3);
        assert_eq!(DivideRatio::By16.ratio(), 16);
        assert_eq!(DivideRatio::By1.encoding(), 0b1011);
        assert_eq!(DivideRatio::By128.ratio(), 128);
    }

    #[test]
    fn test_periodic_count() {
        assert_eq!(periodic_count(1_000_000_000, 1000).unwrap(), 1_000_000);
        assert!(matches!(
            periodic_count(999, 1000),
            Err(CalibrationError::CountOutOfRange { hertz: 999 })
        ));
        assert!(periodic_count(u64::MAX, 1).is_err());
        assert!(periodic_count(1000, 0).is_err());
    }
}
