//! Audio delay tracking
//!
//! Answers "how much audio is queued on the device but not yet heard", the
//! quantity audio-driven pacing is built on.

use crate::backend::AudioOutput;

/// What the audio output can tell us about its buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioTiming {
    /// No audio output, or it reported nothing usable
    Absent,
    /// Output accepts audio but has no notion of buffering
    Untimed,
    /// Seconds of audio queued but not yet heard
    Buffered(f64),
}

impl AudioTiming {
    /// Read the timing state of an (optional) output.
    ///
    /// Negative durations are clamped to zero; non-finite ones are treated
    /// as unknown.
    pub fn query(output: Option<&dyn AudioOutput>) -> Self {
        let Some(output) = output else {
            return AudioTiming::Absent;
        };
        if output.is_untimed() {
            return AudioTiming::Untimed;
        }
        match output.buffered_duration() {
            Some(d) if d.is_finite() => AudioTiming::Buffered(d.max(0.0)),
            _ => AudioTiming::Absent,
        }
    }

    pub fn buffered(self) -> Option<f64> {
        match self {
            AudioTiming::Buffered(d) => Some(d),
            _ => None,
        }
    }
}

/// Smooths the reported buffer duration towards the value predicted from
/// the loop's own bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioDelayTracker {
    autosync: u32,
}

impl AudioDelayTracker {
    /// `autosync` of 0 disables smoothing
    pub fn new(autosync: u32) -> Self {
        Self { autosync }
    }

    /// Query `output` and apply smoothing.
    ///
    /// The prediction is `delay / speed + time_frame`: what the buffer would
    /// hold if the device consumed audio exactly as fast as the loop thinks.
    /// The result is `predicted + (reported - predicted) / autosync`.
    pub fn buffered(
        &self,
        output: Option<&dyn AudioOutput>,
        delay: f64,
        speed: f64,
        time_frame: f64,
    ) -> AudioTiming {
        match AudioTiming::query(output) {
            AudioTiming::Buffered(reported) => AudioTiming::Buffered(self.smooth(reported, delay, speed, time_frame)),
            other => other,
        }
    }

    fn smooth(&self, reported: f64, delay: f64, speed: f64, time_frame: f64) -> f64 {
        if self.autosync == 0 || !(speed > 0.0) {
            return reported;
        }
        let predicted = delay / speed + time_frame;
        if !predicted.is_finite() {
            return reported;
        }
        predicted + (reported - predicted) / f64::from(self.autosync)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimAudioOutput;
    use crate::backend::AudioChunk;
    use crate::timing::ManualTimeSource;

    fn output_with(seconds: f64) -> SimAudioOutput {
        let mut output = SimAudioOutput::new(ManualTimeSource::new());
        output.play(&AudioChunk {
            pts: 0.0,
            duration: seconds,
            data: Vec::new(),
        });
        output
    }

    #[test]
    fn test_absent_and_untimed_outputs() {
        assert_eq!(AudioTiming::query(None), AudioTiming::Absent);

        let untimed = SimAudioOutput::untimed(ManualTimeSource::new());
        assert_eq!(AudioTiming::query(Some(&untimed)), AudioTiming::Untimed);
    }

    #[test]
    fn test_without_autosync_reports_raw_value() {
        let output = output_with(0.2);
        let tracker = AudioDelayTracker::new(0);

        let timing = tracker.buffered(Some(&output), 5.0, 1.0, 1.0);
        assert_eq!(timing, AudioTiming::Buffered(0.2));
    }

    #[test]
    fn test_autosync_moves_towards_prediction() {
        let output = output_with(0.2);
        let tracker = AudioDelayTracker::new(2);

        // predicted = 0.1 / 1.0 + 0.0 = 0.1, result = 0.1 + (0.2 - 0.1) / 2
        let timing = tracker.buffered(Some(&output), 0.1, 1.0, 0.0);
        let buffered = timing.buffered().unwrap();
        assert!((buffered - 0.15).abs() < 1e-12);
    }
}
