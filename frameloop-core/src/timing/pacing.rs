//! Frame pace controller
//!
//! Decides how long the loop waits before presenting the next frame, and
//! whether a late frame is dropped instead.
//!
//! **Pacing modes:**
//! - Timed audio with full buffers: `time_frame = buffered_audio - delay / speed`,
//!   i.e. video is slaved to the audio device.
//! - Otherwise frame durations accumulate into `time_frame` and anything
//!   further behind than [`CATCHUP_SLACK`] is forgiven.
//!
//! The arithmetic lives in free functions so it can be tested without a
//! session.

use super::audio_delay::AudioTiming;
use crate::config::FrameDropMode;
use tracing::{debug, warn};

/// Video more than this far behind is not caught up, it resets to "show now"
pub const CATCHUP_SLACK: f64 = 0.2;

/// How late a frame may be before dropping starts
pub const FRAMEDROP_SLACK: f64 = 0.1;

/// Backward pts steps up to this size are decoder jitter, larger ones a reset
pub const PTS_JITTER_TOLERANCE: f64 = 0.5;

/// Forward pts jumps of at least this size are a discontinuity
pub const PTS_DISCONTINUITY: f64 = 60.0;

/// Frames due further away than this are waited for instead of flipped
pub const VIDEO_WAIT_THRESHOLD: f64 = 0.050;

/// Wake up this long before a frame is due, leaving time to flip
pub const VIDEO_WAKE_EARLY: f64 = 0.040;

/// Audio kept in the output when computing how long we may sleep
pub const AUDIO_SAFETY_MARGIN: f64 = 0.050;

/// Shortest audio-driven sleep when the buffer is nearly empty
pub const AUDIO_MIN_SLEEP: f64 = 0.020;

/// Inputs for one pacing decision
#[derive(Debug, Clone, Copy)]
pub struct PaceInput {
    pub time_frame: f64,
    pub delay: f64,
    pub speed: f64,
    pub audio: AudioTiming,
    /// Audio output was topped up to capacity this iteration
    pub full_audio_buffers: bool,
    pub restarting: bool,
    /// Video output presents immediately
    pub untimed_output: bool,
}

/// Compute the new `time_frame` (seconds until the pending frame is due)
pub fn pace(input: &PaceInput) -> f64 {
    if input.full_audio_buffers && !input.restarting {
        if let AudioTiming::Buffered(buffered) = input.audio {
            return buffered - input.delay / input.speed;
        }
    }
    if input.time_frame < -CATCHUP_SLACK || input.untimed_output || !input.time_frame.is_finite() {
        0.0
    } else {
        input.time_frame
    }
}

/// How long to sleep for video, or `None` when the frame should be flipped now
pub fn video_wait(time_frame: f64) -> Option<f64> {
    (time_frame > VIDEO_WAIT_THRESHOLD).then(|| time_frame - VIDEO_WAKE_EARLY)
}

/// How long the audio side allows the loop to sleep.
///
/// `f64::INFINITY` means audio places no constraint.
pub fn audio_wait(audio: AudioTiming, has_audio: bool, paused: bool, full_audio_buffers: bool, video_left: bool) -> f64 {
    if !has_audio || paused {
        return f64::INFINITY;
    }
    match audio {
        AudioTiming::Untimed => {
            if video_left {
                f64::INFINITY
            } else {
                0.0
            }
        }
        AudioTiming::Buffered(buffered) if full_audio_buffers => {
            let sleep = buffered - AUDIO_SAFETY_MARGIN;
            if sleep > 0.1 {
                (sleep - 0.2).max(0.1)
            } else {
                sleep.max(AUDIO_MIN_SLEEP)
            }
        }
        _ => AUDIO_MIN_SLEEP,
    }
}

/// Everything the frame-drop check looks at
#[derive(Debug, Clone, Copy)]
pub struct DropContext {
    pub audio: AudioTiming,
    pub audio_eof: bool,
    pub speed: f64,
    pub delay: f64,
    pub paused: bool,
    pub restarting: bool,
}

/// Outcome of the frame-drop check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropDecision {
    Keep,
    Drop,
}

/// Timestamp of a decoded frame after hygiene
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacedFrame {
    /// pts to present the frame with
    pub pts: f64,
    /// Seconds the previous frame should stay on screen
    pub frame_time: f64,
}

/// Per-stream pacing state: frame duration bookkeeping and drop counters
#[derive(Debug, Clone)]
pub struct FramePacer {
    mode: FrameDropMode,
    fps: Option<f64>,
    last_pts: Option<f64>,
    dropped_in_row: u32,
    total_dropped: u64,
}

impl FramePacer {
    pub fn new(mode: FrameDropMode) -> Self {
        Self {
            mode,
            fps: None,
            last_pts: None,
            dropped_in_row: 0,
            total_dropped: 0,
        }
    }

    /// Set the nominal frame rate declared by the container
    pub fn set_fps(&mut self, fps: Option<f64>) {
        self.fps = fps.filter(|f| f.is_finite() && *f > 0.0);
    }

    pub fn mode(&self) -> FrameDropMode {
        self.mode
    }

    /// `1 / fps`, if the frame rate is known
    pub fn nominal_frame_duration(&self) -> Option<f64> {
        self.fps.map(|fps| 1.0 / fps)
    }

    pub fn last_pts(&self) -> Option<f64> {
        self.last_pts
    }

    pub fn dropped_in_row(&self) -> u32 {
        self.dropped_in_row
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    /// Forget timestamp history (after a seek or stream re-initialization)
    pub fn reset(&mut self) {
        self.last_pts = None;
        self.dropped_in_row = 0;
    }

    /// Account a decoded frame and work out how long the previous frame
    /// lasts.
    ///
    /// Uses the nominal frame duration when the frame rate is known and the
    /// timestamp delta otherwise. Discontinuities (first frame, pts resets,
    /// large jumps) yield a zero duration.
    pub fn advance(&mut self, pts: Option<f64>) -> PacedFrame {
        let Some(mut pts) = pts.filter(|p| p.is_finite()) else {
            let frame_time = self.nominal_frame_duration().unwrap_or(0.0);
            let pts = self.last_pts.map_or(0.0, |last| last + frame_time);
            self.last_pts = Some(pts);
            return PacedFrame { pts, frame_time };
        };

        let mut continuous = false;
        let mut delta = 0.0;
        match self.last_pts {
            None => {}
            Some(last) if last > pts => {
                if last - pts > PTS_JITTER_TOLERANCE {
                    warn!("Decreasing video pts: {:.3} < {:.3}, treating as reset", pts, last);
                } else {
                    debug!("Decreasing video pts: {:.3} < {:.3}, treating as jitter", pts, last);
                    pts = last;
                }
            }
            Some(last) if pts - last >= PTS_DISCONTINUITY => {
                warn!("Jump in video pts: {:.3} -> {:.3}", last, pts);
            }
            Some(last) => {
                continuous = true;
                delta = pts - last;
            }
        }
        self.last_pts = Some(pts);

        let frame_time = if continuous {
            self.nominal_frame_duration().unwrap_or(delta)
        } else {
            0.0
        };
        PacedFrame { pts, frame_time }
    }

    /// Count `decision` against a frame that was actually decoded.
    /// Any frame that is kept resets the consecutive drop counter.
    pub fn record(&mut self, decision: DropDecision) {
        match decision {
            DropDecision::Drop => {
                self.dropped_in_row += 1;
                self.total_dropped += 1;
                debug!(
                    "Dropping late frame ({} in a row, {} total)",
                    self.dropped_in_row, self.total_dropped
                );
            }
            DropDecision::Keep => self.dropped_in_row = 0,
        }
    }

    /// Decide whether the next frame is dropped, without touching the
    /// counters.
    ///
    /// With timed audio not at EOF, drop when
    /// `speed * buffered - delay < -dropped_in_row * frame_time - FRAMEDROP_SLACK`.
    pub fn evaluate(&self, ctx: &DropContext) -> DropDecision {
        if self.mode == FrameDropMode::Disabled || ctx.paused || ctx.restarting || ctx.audio_eof {
            return DropDecision::Keep;
        }
        let AudioTiming::Buffered(buffered) = ctx.audio else {
            return DropDecision::Keep;
        };
        let frame_time = self.nominal_frame_duration().unwrap_or(0.0);
        let behind = ctx.speed * buffered - ctx.delay;
        if behind < -f64::from(self.dropped_in_row) * frame_time - FRAMEDROP_SLACK {
            DropDecision::Drop
        } else {
            DropDecision::Keep
        }
    }
}
