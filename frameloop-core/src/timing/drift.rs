//! AV-sync drift correction
//!
//! Audio and video run off two independent clocks: the audio device's
//! sample clock and the loop's wall-clock sleeps. The drift corrector
//! compares where audio is against the frame being shown and nudges the
//! pacing `delay` by a bounded amount each frame.

use tracing::{debug, warn};

/// Fraction of the measured A/V difference corrected per frame
pub const DRIFT_DAMPING: f64 = 0.1;

/// Default per-frame correction cap, as a fraction of the frame duration
pub const DEFAULT_MAX_CORRECTION_FRACTION: f64 = 0.1;

/// A delay beyond this magnitude means the stream jumped, not drifted
pub const DELAY_RESET_THRESHOLD: f64 = 30.0;

/// Desync warning thresholds
const DESYNC_WARN_DIFFERENCE: f64 = 0.5;
const DESYNC_WARN_DROPS: u64 = 50;

/// Timing state shared by the pace controller and the drift corrector.
///
/// Reset to zero on every successful seek and stream re-initialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackClock {
    /// Audio written ahead of the presented video, in stream seconds
    pub delay: f64,
    /// Seconds until the pending frame is due
    pub time_frame: f64,
    /// Sum of all corrections applied since the last reset
    pub total_correction: f64,
    /// Most recent A/V difference (diagnostics only)
    pub last_av_difference: Option<f64>,
    /// How long the last flip took
    pub last_flip_duration: f64,
}

impl PlaybackClock {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Reset if `delay` became unusable. Returns true when a reset happened.
    pub fn ensure_sane(&mut self) -> bool {
        if self.delay.is_finite() && self.delay.abs() <= DELAY_RESET_THRESHOLD {
            return false;
        }
        warn!(
            "Drift delay {:.3}s out of range, treating as stream discontinuity",
            self.delay
        );
        self.reset();
        true
    }
}

/// One drift correction step
#[derive(Debug, Clone, Copy)]
pub struct DriftInput {
    /// pts just past the last audio written to the output
    pub written_audio_pts: Option<f64>,
    /// pts of the frame about to be presented
    pub video_pts: f64,
    pub frame_time: f64,
    pub syncing_audio: bool,
}

#[derive(Debug, Clone)]
pub struct DriftCorrector {
    max_correction: Option<f64>,
    audio_delay: f64,
    desync_warned: bool,
}

impl DriftCorrector {
    /// # Arguments
    /// * `max_correction` - per-frame cap; `None` for 10% of the frame duration
    /// * `audio_delay` - user audio delay bias in seconds
    pub fn new(max_correction: Option<f64>, audio_delay: f64) -> Self {
        Self {
            max_correction,
            audio_delay,
            desync_warned: false,
        }
    }

    /// Apply one bounded correction to `clock.delay`.
    ///
    /// # Returns
    /// The correction applied, or `None` when there is nothing to compare
    /// against (no audio written yet, or audio still syncing after a seek).
    pub fn adjust(&self, clock: &mut PlaybackClock, input: &DriftInput) -> Option<f64> {
        if input.syncing_audio {
            return None;
        }
        let written = input.written_audio_pts.filter(|p| p.is_finite())?;
        if !input.video_pts.is_finite() {
            return None;
        }

        let audio_pts = written - clock.delay;
        let av_delay = audio_pts - input.video_pts + clock.last_flip_duration - self.audio_delay;
        let max = self
            .max_correction
            .unwrap_or(input.frame_time.max(0.0) * DEFAULT_MAX_CORRECTION_FRACTION)
            .abs();
        let change = (av_delay * DRIFT_DAMPING).clamp(-max, max);
        if !change.is_finite() {
            return None;
        }

        clock.delay += change;
        clock.total_correction += change;
        if clock.ensure_sane() {
            return None;
        }
        Some(change)
    }

    /// Record the A/V difference for diagnostics and warn once on sustained desync.
    ///
    /// # Arguments
    /// * `playing_audio_pts` - pts the listener currently hears
    /// * `video_pts` - pts of the frame on screen
    /// * `dropped_frames` - total frames dropped so far
    pub fn update_av_difference(
        &mut self,
        clock: &mut PlaybackClock,
        playing_audio_pts: Option<f64>,
        video_pts: Option<f64>,
        speed: f64,
        dropped_frames: u64,
    ) {
        let (Some(audio), Some(video)) = (playing_audio_pts, video_pts) else {
            clock.last_av_difference = None;
            return;
        };
        let mut difference = audio - video - self.audio_delay;
        if clock.time_frame > 0.0 {
            difference += clock.time_frame * speed;
        }
        if !difference.is_finite() {
            clock.last_av_difference = None;
            return;
        }
        clock.last_av_difference = Some(difference);

        if difference.abs() > DESYNC_WARN_DIFFERENCE && dropped_frames > DESYNC_WARN_DROPS && !self.desync_warned {
            self.desync_warned = true;
            warn!(
                "Audio/video desynchronisation detected: A-V {:+.3}s after {} dropped frames; the system may be too slow for this stream",
                difference, dropped_frames
            );
        } else {
            debug!("A-V: {:+.3}s", difference);
        }
    }
}
