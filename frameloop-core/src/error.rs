//! Error types for frameloop-core
//!
//! Defines module-specific error types using thiserror for clear error propagation.
//!
//! Two layers:
//! - [`SeekError`]: typed seek failure. Playback continues at the prior
//!   position; the loop logs it and emits an event.
//! - [`Error`]: failures that leave the loop, such as a stream the source
//!   reports as no longer usable.

use thiserror::Error;

/// Main error type for frameloop-core
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shared configuration layer errors (file I/O, TOML parsing)
    #[error(transparent)]
    Common(#[from] frameloop_common::Error),

    /// The active source reported the stream as no longer usable.
    /// Playback of the current item must end; the core does not retry.
    #[error("Stream lost: {0}")]
    StreamLost(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Invalid request parameter
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience Result type using frameloop-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Why a seek could not be executed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeekError {
    /// The stream cannot be repositioned at all
    #[error("Stream is not seekable")]
    NotSeekable,

    /// There is no source to seek
    #[error("No active stream")]
    NoActiveStream,

    /// Target lies beyond the known timeline; callers treat this as end of stream
    #[error("Target {target:.3}s is beyond the timeline")]
    TimelinePartUnresolvable { target: f64 },

    /// The demuxer-level seek failed (I/O); the caller may retry or give up on the file
    #[error("Demuxer seek failed: {0}")]
    DemuxerSeekFailed(String),

    /// Fractional seek requested but the duration is unknown or timestamps may reset
    #[error("Cannot resolve fractional seek: duration unknown")]
    UnknownDuration,

    /// Chapter seek to an index that does not exist
    #[error("Chapter {0} out of range")]
    ChapterOutOfRange(usize),

    /// The source reported an irrecoverable failure while seeking
    #[error("Stream lost during seek: {0}")]
    StreamLost(String),
}

impl SeekError {
    /// Short machine-readable reason used in events
    pub fn reason(&self) -> &'static str {
        match self {
            SeekError::NotSeekable => "not_seekable",
            SeekError::NoActiveStream => "no_active_stream",
            SeekError::TimelinePartUnresolvable { .. } => "timeline_part_unresolvable",
            SeekError::DemuxerSeekFailed(_) => "demuxer_seek_failed",
            SeekError::UnknownDuration => "unknown_duration",
            SeekError::ChapterOutOfRange(_) => "chapter_out_of_range",
            SeekError::StreamLost(_) => "stream_lost",
        }
    }
}

impl From<SeekError> for Error {
    fn from(err: SeekError) -> Self {
        match err {
            SeekError::StreamLost(msg) => Error::StreamLost(msg),
            other => Error::InvalidState(other.to_string()),
        }
    }
}
