//! External collaborator contracts
//!
//! The playback core never decodes, demuxes, or touches hardware. It talks to
//! four narrow interfaces:
//!
//! - [`MediaSource`]: demuxer + decoder for one opened source (file, part of
//!   a virtual timeline, or an externally loaded track)
//! - [`AudioOutput`]: the audio device, queried for buffered duration
//! - [`VideoOutput`]: the video device, handed frames to present
//! - [`StreamCache`]: the stream cache, queried for fill level
//!
//! All calls are synchronous and expected to return promptly. Backends that
//! run their own threads (a device callback feeding from a ring buffer, for
//! example) are responsible for their own synchronization.
//!
//! [`sim`] provides deterministic in-memory implementations used by the
//! simulator binary and the test suites.

pub mod sim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Index of a media source owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub usize);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Decoded video frame
///
/// `pts` is in the source's own timeline; the session adds the timeline
/// part offset before using it.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Presentation timestamp in seconds, `None` when the decoder lost it
    pub pts: Option<f64>,
    /// Opaque image payload, passed through to the video output untouched
    pub image: Vec<u8>,
}

impl Frame {
    pub fn new(pts: Option<f64>, image: Vec<u8>) -> Self {
        Self { pts, image }
    }
}

/// Decoded audio ready to be queued on the output
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Timestamp of the first sample (seconds, source timeline)
    pub pts: f64,
    /// Duration of the chunk in seconds
    pub duration: f64,
    /// Opaque sample payload
    pub data: Vec<u8>,
}

impl AudioChunk {
    /// Timestamp just past the last sample
    pub fn end_pts(&self) -> f64 {
        self.pts + self.duration
    }
}

/// Direction hint for demuxer-level seeks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekDirection {
    /// Demuxer picks the nearest seek point
    #[default]
    Any,
    /// Land on a seek point at or after the target
    Forward,
    /// Land on a seek point at or before the target
    Backward,
}

/// Flags passed to [`MediaSource::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SeekFlags {
    /// Target is an absolute source timestamp (otherwise an offset from the current position)
    pub absolute: bool,
    /// Seek point selection
    pub direction: SeekDirection,
    /// Demuxer should also deliver subtitle packets preceding the target
    pub subtitle_preroll: bool,
    /// Frame-exact seek requested (the core filters frames before the target)
    pub exact: bool,
}

/// Failure reported by a source
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Stream cannot be repositioned
    #[error("stream is not seekable")]
    NotSeekable,

    /// Transient I/O failure; the stream may still be usable
    #[error("I/O error: {0}")]
    Io(String),

    /// The stream is gone for good (connection dropped, file truncated)
    #[error("irrecoverable stream error: {0}")]
    Irrecoverable(String),
}

/// Decoder/track layer for one opened source
pub trait MediaSource {
    /// Decode and return the next video frame.
    ///
    /// `drop_hint` tells the decoder the frame will not be presented, so it
    /// may skip expensive work. `None` means end of the video stream.
    fn next_video_frame(&mut self, drop_hint: bool) -> Option<Frame>;

    /// Decode the next chunk of audio, ideally no longer than `max_duration`.
    /// `None` means end of the audio stream.
    fn next_audio_chunk(&mut self, max_duration: f64) -> Option<AudioChunk>;

    /// Reposition the demuxer
    fn seek(&mut self, target: f64, flags: SeekFlags) -> Result<(), SourceError>;

    /// Total duration, if known
    fn stream_duration(&self) -> Option<f64>;

    /// Timestamp of the first packet
    fn start_time(&self) -> f64 {
        0.0
    }

    /// Whether the demuxer can position precisely enough for frame-exact seeking
    fn supports_accurate_seek(&self) -> bool;

    /// Whether timestamps may reset mid-stream (transport streams and similar)
    fn timestamps_may_reset(&self) -> bool;

    /// Nominal frame rate, if the container declares one
    fn nominal_fps(&self) -> Option<f64> {
        None
    }

    /// Demuxer read position (timestamp of the next packet), if known
    fn position(&self) -> Option<f64> {
        None
    }

    /// Enable or disable demuxing of this source's streams.
    /// Inactive sources stop buffering data nobody will read.
    fn set_streams_active(&mut self, _active: bool) {}

    /// Drop decoder state for the video stream (after a seek or part switch)
    fn reset_video(&mut self) {}

    /// Drop decoder state for the audio stream (after a seek or part switch)
    fn reset_audio(&mut self) {}
}

/// Audio device boundary
pub trait AudioOutput {
    /// Seconds of audio queued but not yet heard; `None` when unknown
    fn buffered_duration(&self) -> Option<f64>;

    /// Output has no buffering concept (null output, encoders)
    fn is_untimed(&self) -> bool {
        false
    }

    /// Queue decoded audio
    fn play(&mut self, chunk: &AudioChunk);

    /// Target amount of buffered audio in seconds
    fn buffer_capacity(&self) -> f64 {
        0.2
    }

    /// Drop everything queued
    fn reset(&mut self);

    /// Stop consuming, keeping queued data
    fn pause(&mut self);

    /// Resume consuming
    fn resume(&mut self);
}

/// Video device boundary
pub trait VideoOutput {
    /// Present `frame` at wall-clock time `target_us` (clock source microseconds)
    fn flip(&mut self, frame: Frame, target_us: i64);

    /// A frame is queued inside the output waiting to be flipped
    fn frame_loaded(&self) -> bool {
        false
    }

    /// Something is currently on screen
    fn has_frame(&self) -> bool;

    /// Forget queued/displayed frames (after a seek)
    fn reset(&mut self);

    /// Release device bindings; they are re-acquired on the next flip
    fn release(&mut self) {}

    /// Output is paused (stop screensaver handling, freeze timers)
    fn pause(&mut self) {}

    /// Output resumes
    fn resume(&mut self) {}

    /// Output presents immediately and ignores timing
    fn is_untimed(&self) -> bool {
        false
    }
}

/// Stream cache boundary
pub trait StreamCache {
    /// Fill level in percent (0..=100); `None` if there is no cache
    fn cache_fill_percent(&self) -> Option<u8>;

    /// Cache is not reading anymore (fully buffered or finite source exhausted)
    fn cache_is_idle(&self) -> bool;
}

/// Kind of elementary stream a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitle,
}

/// A selected track and the source it is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Track {
    pub kind: TrackKind,
    /// Source currently delivering this track
    pub source: SourceId,
    /// Track is rebound to the active part's source on timeline part switches
    pub follows_timeline: bool,
    /// Track comes from a separately loaded file and is seeked on its own
    pub external: bool,
}

impl Track {
    /// Track owned by the main (or timeline) source
    pub fn main(kind: TrackKind, source: SourceId) -> Self {
        Self {
            kind,
            source,
            follows_timeline: true,
            external: false,
        }
    }

    /// Track loaded from a separate file
    pub fn external(kind: TrackKind, source: SourceId) -> Self {
        Self {
            kind,
            source,
            follows_timeline: false,
            external: true,
        }
    }
}
