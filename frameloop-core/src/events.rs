//! Playback events
//!
//! The session queues events as things happen; the loop driver drains them
//! with [`PlaybackSession::take_events`](crate::PlaybackSession::take_events)
//! between iterations.

use crate::backend::SourceId;
use crate::playback::PlaybackState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlaybackEvent {
    /// Playback state changed
    StateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// A seek was executed
    SeekCompleted {
        /// Absolute target, when known (relative keyframe seeks have none)
        target: Option<f64>,
        /// Seek generation after the seek
        generation: u64,
        exact: bool,
        part_switched: bool,
        timestamp: DateTime<Utc>,
    },

    /// A seek could not be executed; playback continues where it was
    SeekFailed {
        reason: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A different timeline part became active
    TimelinePartChanged {
        part: usize,
        source: SourceId,
        timestamp: DateTime<Utc>,
    },

    /// Stepping one frame back did not work
    BackstepFailed {
        pts: Option<f64>,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Nothing left to play
    EndOfFile {
        position: Option<f64>,
        timestamp: DateTime<Utc>,
    },
}

impl PlaybackEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PlaybackEvent::StateChanged { timestamp, .. }
            | PlaybackEvent::SeekCompleted { timestamp, .. }
            | PlaybackEvent::SeekFailed { timestamp, .. }
            | PlaybackEvent::TimelinePartChanged { timestamp, .. }
            | PlaybackEvent::BackstepFailed { timestamp, .. }
            | PlaybackEvent::EndOfFile { timestamp, .. } => *timestamp,
        }
    }
}
