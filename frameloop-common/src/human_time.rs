//! Human-readable timestamp formatting
//!
//! Provides consistent presentation-timestamp display across log lines and
//! simulator output.

/// Seconds at which the hour field starts being shown
const HOUR_FORMAT_MIN: f64 = 3600.0;

/// Format a presentation timestamp (seconds) for display.
///
/// - Below one hour: `MM:SS.mmm`
/// - One hour and above: `H:MM:SS.mmm`
/// - Negative values keep a leading `-`
/// - Non-finite values render as `--:--.---`
///
/// # Examples
///
/// ```
/// use frameloop_common::human_time::format_pts;
///
/// assert_eq!(format_pts(0.0), "00:00.000");
/// assert_eq!(format_pts(65.25), "01:05.250");
/// assert_eq!(format_pts(3723.5), "1:02:03.500");
/// assert_eq!(format_pts(-1.5), "-00:01.500");
/// ```
pub fn format_pts(seconds: f64) -> String {
    if !seconds.is_finite() {
        return "--:--.---".to_string();
    }

    let is_negative = seconds < 0.0;
    let total_millis = (seconds.abs() * 1000.0).round() as u64;
    let millis = total_millis % 1000;
    let total_secs = total_millis / 1000;
    let secs = total_secs % 60;
    let mins = (total_secs / 60) % 60;
    let hours = total_secs / 3600;

    let formatted = if seconds.abs() >= HOUR_FORMAT_MIN {
        format!("{}:{:02}:{:02}.{:03}", hours, mins, secs, millis)
    } else {
        format!("{:02}:{:02}.{:03}", total_secs / 60, secs, millis)
    };

    if is_negative {
        format!("-{}", formatted)
    } else {
        formatted
    }
}

/// Format an optional timestamp; `None` renders as `none`.
///
/// ```
/// use frameloop_common::human_time::format_pts_opt;
///
/// assert_eq!(format_pts_opt(Some(1.0)), "00:01.000");
/// assert_eq!(format_pts_opt(None), "none");
/// ```
pub fn format_pts_opt(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) => format_pts(s),
        None => "none".to_string(),
    }
}
