//! Simulated backends
//!
//! Deterministic in-memory implementations of the collaborator traits. Each
//! type is a cheap clonable handle over shared state, so a test can hand one
//! clone to the session and keep another to script failures or inspect what
//! the core did.
//!
//! Audio "plays" against a [`TimeSource`]: the buffer drains as that source
//! advances. With a [`ManualTimeSource`](crate::timing::ManualTimeSource)
//! shared with the session clock, a whole playback run is reproducible.

use super::{
    AudioChunk, AudioOutput, Frame, MediaSource, SeekDirection, SeekFlags, SourceError, StreamCache,
    VideoOutput,
};
use crate::timing::TimeSource;
use frameloop_common::time::{micros_to_seconds, seconds_to_micros};
use std::cell::RefCell;
use std::rc::Rc;

/// Shape of a synthetic stream
#[derive(Debug, Clone, PartialEq)]
pub struct SimStreamSpec {
    /// Frame rate of the video stream
    pub fps: f64,
    /// Stream length in seconds
    pub duration: f64,
    /// Timestamp of the first frame
    pub start_time: f64,
    /// Frames between keyframes (demuxer seeks land on keyframes)
    pub keyframe_interval: usize,
    /// Length of each decoded audio chunk
    pub audio_chunk: f64,
    pub has_video: bool,
    pub has_audio: bool,
    pub accurate_seek: bool,
    pub seekable: bool,
    pub timestamps_may_reset: bool,
    /// Container declares its frame rate
    pub report_fps: bool,
    /// Container declares its duration
    pub report_duration: bool,
}

impl Default for SimStreamSpec {
    fn default() -> Self {
        Self {
            fps: 25.0,
            duration: 10.0,
            start_time: 0.0,
            keyframe_interval: 12,
            audio_chunk: 0.02,
            has_video: true,
            has_audio: true,
            accurate_seek: true,
            seekable: true,
            timestamps_may_reset: false,
            report_fps: true,
            report_duration: true,
        }
    }
}

impl SimStreamSpec {
    pub fn with_video(mut self, has_video: bool) -> Self {
        self.has_video = has_video;
        self
    }

    pub fn with_audio(mut self, has_audio: bool) -> Self {
        self.has_audio = has_audio;
        self
    }

    pub fn with_accurate_seek(mut self, accurate_seek: bool) -> Self {
        self.accurate_seek = accurate_seek;
        self
    }

    pub fn with_timestamps_may_reset(mut self, may_reset: bool) -> Self {
        self.timestamps_may_reset = may_reset;
        self
    }

    fn frame_count(&self) -> usize {
        if self.fps > 0.0 && self.duration > 0.0 {
            (self.duration * self.fps).ceil() as usize
        } else {
            0
        }
    }

    fn frame_pts(&self, index: usize) -> f64 {
        self.start_time + index as f64 / self.fps
    }

    fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// One seek performed on a [`SimSource`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRecord {
    pub target: f64,
    pub flags: SeekFlags,
}

#[derive(Debug)]
struct SimSourceState {
    spec: SimStreamSpec,
    next_frame: usize,
    next_audio_pts: f64,
    active: bool,
    seeks: Vec<SeekRecord>,
    fail_next_seek: Option<SourceError>,
    video_resets: u32,
    audio_resets: u32,
    frames_decoded: u64,
    drop_hints: u64,
}

/// Synthetic video/audio source
#[derive(Debug, Clone)]
pub struct SimSource {
    state: Rc<RefCell<SimSourceState>>,
}

impl SimSource {
    pub fn new(spec: SimStreamSpec) -> Self {
        let next_audio_pts = spec.start_time;
        Self {
            state: Rc::new(RefCell::new(SimSourceState {
                spec,
                next_frame: 0,
                next_audio_pts,
                active: true,
                seeks: Vec::new(),
                fail_next_seek: None,
                video_resets: 0,
                audio_resets: 0,
                frames_decoded: 0,
                drop_hints: 0,
            })),
        }
    }

    /// Make the next seek fail with `error`
    pub fn fail_next_seek(&self, error: SourceError) {
        self.state.borrow_mut().fail_next_seek = Some(error);
    }

    /// All seeks performed so far
    pub fn seeks(&self) -> Vec<SeekRecord> {
        self.state.borrow().seeks.clone()
    }

    pub fn last_seek(&self) -> Option<SeekRecord> {
        self.state.borrow().seeks.last().copied()
    }

    pub fn is_active(&self) -> bool {
        self.state.borrow().active
    }

    pub fn video_resets(&self) -> u32 {
        self.state.borrow().video_resets
    }

    pub fn audio_resets(&self) -> u32 {
        self.state.borrow().audio_resets
    }

    pub fn frames_decoded(&self) -> u64 {
        self.state.borrow().frames_decoded
    }

    /// Frames requested with the drop hint set
    pub fn drop_hints(&self) -> u64 {
        self.state.borrow().drop_hints
    }
}

impl MediaSource for SimSource {
    fn next_video_frame(&mut self, drop_hint: bool) -> Option<Frame> {
        let mut state = self.state.borrow_mut();
        if !state.spec.has_video || state.next_frame >= state.spec.frame_count() {
            return None;
        }
        let pts = state.spec.frame_pts(state.next_frame);
        state.next_frame += 1;
        state.frames_decoded += 1;
        if drop_hint {
            state.drop_hints += 1;
        }
        Some(Frame::new(Some(pts), Vec::new()))
    }

    fn next_audio_chunk(&mut self, _max_duration: f64) -> Option<AudioChunk> {
        let mut state = self.state.borrow_mut();
        if !state.spec.has_audio {
            return None;
        }
        let remaining = state.spec.end_time() - state.next_audio_pts;
        let duration = state.spec.audio_chunk.min(remaining);
        if duration <= 1e-9 {
            return None;
        }
        let pts = state.next_audio_pts;
        state.next_audio_pts += duration;
        Some(AudioChunk {
            pts,
            duration,
            data: Vec::new(),
        })
    }

    fn seek(&mut self, target: f64, flags: SeekFlags) -> Result<(), SourceError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.fail_next_seek.take() {
            return Err(error);
        }
        if !state.spec.seekable {
            return Err(SourceError::NotSeekable);
        }

        let current = state.spec.frame_pts(state.next_frame);
        let absolute = if flags.absolute { target } else { current + target };
        let clamped = absolute.clamp(state.spec.start_time, state.spec.end_time());

        let raw = ((clamped - state.spec.start_time) * state.spec.fps).max(0.0);
        let key = state.spec.keyframe_interval.max(1) as f64;
        let keyframe = match flags.direction {
            SeekDirection::Backward => (raw / key).floor(),
            SeekDirection::Forward => (raw / key).ceil(),
            SeekDirection::Any => (raw / key).round(),
        } * key;
        let index = (keyframe as usize).min(state.spec.frame_count());

        state.next_frame = index;
        state.next_audio_pts = state.spec.frame_pts(index).min(state.spec.end_time());
        state.seeks.push(SeekRecord { target, flags });
        Ok(())
    }

    fn stream_duration(&self) -> Option<f64> {
        let state = self.state.borrow();
        state.spec.report_duration.then_some(state.spec.duration)
    }

    fn start_time(&self) -> f64 {
        self.state.borrow().spec.start_time
    }

    fn supports_accurate_seek(&self) -> bool {
        self.state.borrow().spec.accurate_seek
    }

    fn timestamps_may_reset(&self) -> bool {
        self.state.borrow().spec.timestamps_may_reset
    }

    fn nominal_fps(&self) -> Option<f64> {
        let state = self.state.borrow();
        state.spec.report_fps.then_some(state.spec.fps)
    }

    fn position(&self) -> Option<f64> {
        let state = self.state.borrow();
        Some(state.spec.frame_pts(state.next_frame))
    }

    fn set_streams_active(&mut self, active: bool) {
        self.state.borrow_mut().active = active;
    }

    fn reset_video(&mut self) {
        self.state.borrow_mut().video_resets += 1;
    }

    fn reset_audio(&mut self) {
        self.state.borrow_mut().audio_resets += 1;
    }
}

#[derive(Debug)]
struct SimAudioState {
    buffered_us: i64,
    last_us: i64,
    paused: bool,
    untimed: bool,
    capacity: f64,
    chunks_played: u64,
    resets: u32,
}

/// Audio output whose buffer drains in step with a time source
#[derive(Clone)]
pub struct SimAudioOutput {
    state: Rc<RefCell<SimAudioState>>,
    time: Rc<dyn TimeSource>,
}

impl SimAudioOutput {
    pub fn new<T: TimeSource + 'static>(time: T) -> Self {
        let last_us = time.now_us();
        Self {
            state: Rc::new(RefCell::new(SimAudioState {
                buffered_us: 0,
                last_us,
                paused: false,
                untimed: false,
                capacity: 0.2,
                chunks_played: 0,
                resets: 0,
            })),
            time: Rc::new(time),
        }
    }

    /// Output that accepts audio but reports no buffering
    pub fn untimed<T: TimeSource + 'static>(time: T) -> Self {
        let output = Self::new(time);
        output.state.borrow_mut().untimed = true;
        output
    }

    pub fn with_capacity(self, seconds: f64) -> Self {
        self.state.borrow_mut().capacity = seconds;
        self
    }

    fn drain(&self) {
        let now = self.time.now_us();
        let mut state = self.state.borrow_mut();
        if !state.paused {
            let elapsed = now.saturating_sub(state.last_us).max(0);
            state.buffered_us = state.buffered_us.saturating_sub(elapsed).max(0);
        }
        state.last_us = now;
    }

    pub fn chunks_played(&self) -> u64 {
        self.state.borrow().chunks_played
    }

    pub fn resets(&self) -> u32 {
        self.state.borrow().resets
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }
}

impl std::fmt::Debug for SimAudioOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimAudioOutput")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl AudioOutput for SimAudioOutput {
    fn buffered_duration(&self) -> Option<f64> {
        self.drain();
        let state = self.state.borrow();
        if state.untimed {
            None
        } else {
            Some(micros_to_seconds(state.buffered_us))
        }
    }

    fn is_untimed(&self) -> bool {
        self.state.borrow().untimed
    }

    fn play(&mut self, chunk: &AudioChunk) {
        self.drain();
        let mut state = self.state.borrow_mut();
        state.chunks_played += 1;
        if !state.untimed {
            state.buffered_us = state.buffered_us.saturating_add(seconds_to_micros(chunk.duration));
        }
    }

    fn buffer_capacity(&self) -> f64 {
        self.state.borrow().capacity
    }

    fn reset(&mut self) {
        self.drain();
        let mut state = self.state.borrow_mut();
        state.buffered_us = 0;
        state.resets += 1;
    }

    fn pause(&mut self) {
        self.drain();
        self.state.borrow_mut().paused = true;
    }

    fn resume(&mut self) {
        self.drain();
        self.state.borrow_mut().paused = false;
    }
}

/// One presented frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipRecord {
    pub pts: Option<f64>,
    pub target_us: i64,
}

#[derive(Debug, Default)]
struct SimVideoState {
    flips: Vec<FlipRecord>,
    has_frame: bool,
    paused: bool,
    untimed: bool,
    resets: u32,
    releases: u32,
}

/// Video output recording every flip
#[derive(Debug, Clone, Default)]
pub struct SimVideoOutput {
    state: Rc<RefCell<SimVideoState>>,
}

impl SimVideoOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output that presents immediately, ignoring timing
    pub fn untimed() -> Self {
        let output = Self::default();
        output.state.borrow_mut().untimed = true;
        output
    }

    pub fn flips(&self) -> Vec<FlipRecord> {
        self.state.borrow().flips.clone()
    }

    /// pts of the most recently presented frame
    pub fn last_pts(&self) -> Option<f64> {
        self.state.borrow().flips.last().and_then(|f| f.pts)
    }

    pub fn flip_count(&self) -> usize {
        self.state.borrow().flips.len()
    }

    pub fn resets(&self) -> u32 {
        self.state.borrow().resets
    }

    pub fn releases(&self) -> u32 {
        self.state.borrow().releases
    }

    pub fn is_paused(&self) -> bool {
        self.state.borrow().paused
    }
}

impl VideoOutput for SimVideoOutput {
    fn flip(&mut self, frame: Frame, target_us: i64) {
        let mut state = self.state.borrow_mut();
        state.flips.push(FlipRecord {
            pts: frame.pts,
            target_us,
        });
        state.has_frame = true;
    }

    fn has_frame(&self) -> bool {
        self.state.borrow().has_frame
    }

    fn reset(&mut self) {
        let mut state = self.state.borrow_mut();
        state.has_frame = false;
        state.resets += 1;
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        state.has_frame = false;
        state.releases += 1;
    }

    fn pause(&mut self) {
        self.state.borrow_mut().paused = true;
    }

    fn resume(&mut self) {
        self.state.borrow_mut().paused = false;
    }

    fn is_untimed(&self) -> bool {
        self.state.borrow().untimed
    }
}

#[derive(Debug)]
struct SimCacheState {
    fill: Option<u8>,
    idle: bool,
}

/// Scripted stream cache
#[derive(Debug, Clone)]
pub struct SimCache {
    state: Rc<RefCell<SimCacheState>>,
}

impl SimCache {
    /// Cache that starts full and still reading
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimCacheState {
                fill: Some(100),
                idle: false,
            })),
        }
    }

    pub fn set_fill(&self, fill: Option<u8>) {
        self.state.borrow_mut().fill = fill.map(|f| f.min(100));
    }

    pub fn set_idle(&self, idle: bool) {
        self.state.borrow_mut().idle = idle;
    }
}

impl Default for SimCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCache for SimCache {
    fn cache_fill_percent(&self) -> Option<u8> {
        self.state.borrow().fill
    }

    fn cache_is_idle(&self) -> bool {
        self.state.borrow().idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualTimeSource;

    #[test]
    fn test_source_delivers_frames_in_order() {
        let mut source = SimSource::new(SimStreamSpec {
            fps: 10.0,
            duration: 0.3,
            ..Default::default()
        });

        let pts: Vec<_> = std::iter::from_fn(|| source.next_video_frame(false))
            .map(|f| f.pts)
            .collect();
        assert_eq!(pts, vec![Some(0.0), Some(0.1), Some(0.2)]);
    }

    #[test]
    fn test_backward_seek_lands_on_keyframe() {
        let mut source = SimSource::new(SimStreamSpec {
            fps: 10.0,
            keyframe_interval: 10,
            ..Default::default()
        });
        let flags = SeekFlags {
            absolute: true,
            direction: SeekDirection::Backward,
            ..Default::default()
        };

        source.seek(2.5, flags).unwrap();
        let frame = source.next_video_frame(false).unwrap();
        assert_eq!(frame.pts, Some(2.0));
        assert_eq!(source.last_seek().map(|s| s.target), Some(2.5));
    }

    #[test]
    fn test_scripted_seek_failure_is_one_shot() {
        let mut source = SimSource::new(SimStreamSpec::default());
        source.fail_next_seek(SourceError::Io("stall".into()));

        assert!(source.seek(1.0, SeekFlags::default()).is_err());
        assert!(source.seek(1.0, SeekFlags::default()).is_ok());
    }

    #[test]
    fn test_audio_output_drains_with_time() {
        let time = ManualTimeSource::new();
        let mut output = SimAudioOutput::new(time.clone());
        output.play(&AudioChunk {
            pts: 0.0,
            duration: 0.2,
            data: Vec::new(),
        });
        assert_eq!(output.buffered_duration(), Some(0.2));

        time.advance(0.05);
        assert_eq!(output.buffered_duration(), Some(0.15));

        output.pause();
        time.advance(1.0);
        assert_eq!(output.buffered_duration(), Some(0.15));

        output.resume();
        time.advance(1.0);
        assert_eq!(output.buffered_duration(), Some(0.0));
    }

    #[test]
    fn test_untimed_audio_output_reports_nothing() {
        let output = SimAudioOutput::untimed(ManualTimeSource::new());
        assert!(output.is_untimed());
        assert_eq!(output.buffered_duration(), None);
    }
}
