//! Frame-skip filter for exact seeks
//!
//! Demuxers can only land on keyframes. After an exact seek the decoder
//! starts at the keyframe before the target and this filter discards the
//! decoded frames until the target is reached.

/// Frames this close to the target count as on target
pub const HRSEEK_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSkipFilter {
    /// Frames before `target - HRSEEK_TOLERANCE` are skipped
    pub target: f64,
    /// Skipped frames may be dropped by the decoder (and are not indexed
    /// in the frame history)
    pub framedrop: bool,
}

impl FrameSkipFilter {
    pub fn new(target: f64) -> Self {
        Self {
            target,
            framedrop: true,
        }
    }

    /// Whether a frame with this pts is at or past the target.
    /// Frames without a pts are let through.
    pub fn reached(&self, pts: Option<f64>) -> bool {
        pts.map_or(true, |pts| pts >= self.target - HRSEEK_TOLERANCE)
    }
}
