//! Time unit conversions
//!
//! The playback core works in two units:
//! - **Seconds (f64)**: presentation timestamps, durations, drift delay
//! - **Microseconds (i64)**: wall-clock checkpoints from the clock source
//!
//! Conversions saturate instead of overflowing and map non-finite seconds
//! to zero, so a corrupt timestamp can never poison a clock checkpoint.

/// Microseconds per second
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Convert seconds to whole microseconds (rounded to nearest)
///
/// # Examples
///
/// ```
/// use frameloop_common::time::seconds_to_micros;
///
/// assert_eq!(seconds_to_micros(1.5), 1_500_000);
/// assert_eq!(seconds_to_micros(-0.25), -250_000);
/// assert_eq!(seconds_to_micros(f64::NAN), 0);
/// ```
pub fn seconds_to_micros(seconds: f64) -> i64 {
    if !seconds.is_finite() {
        return 0;
    }
    let micros = (seconds * MICROS_PER_SECOND as f64).round();
    if micros >= i64::MAX as f64 {
        i64::MAX
    } else if micros <= i64::MIN as f64 {
        i64::MIN
    } else {
        micros as i64
    }
}

/// Convert microseconds to seconds
pub fn micros_to_seconds(micros: i64) -> f64 {
    micros as f64 / MICROS_PER_SECOND as f64
}

/// Convert a (possibly negative or non-finite) number of seconds into a
/// `Duration`, clamping anything below zero to zero.
pub fn seconds_to_duration(seconds: f64) -> std::time::Duration {
    if seconds.is_finite() && seconds > 0.0 {
        std::time::Duration::from_secs_f64(seconds)
    } else {
        std::time::Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_seconds_to_micros_round_trip() {
        assert_eq!(seconds_to_micros(0.0), 0);
        assert_eq!(seconds_to_micros(2.0), 2_000_000);
        assert_eq!(micros_to_seconds(2_000_000), 2.0);
        assert_eq!(micros_to_seconds(seconds_to_micros(0.040)), 0.040);
    }

    #[test]
    fn test_seconds_to_micros_saturates() {
        assert_eq!(seconds_to_micros(1e300), i64::MAX);
        assert_eq!(seconds_to_micros(-1e300), i64::MIN);
        assert_eq!(seconds_to_micros(f64::INFINITY), 0);
    }

    #[test]
    fn test_seconds_to_duration_clamps() {
        assert_eq!(seconds_to_duration(-1.0), Duration::ZERO);
        assert_eq!(seconds_to_duration(f64::NAN), Duration::ZERO);
        assert_eq!(seconds_to_duration(0.5), Duration::from_millis(500));
    }
}
