//! # frameloop Core
//!
//! Playback timing and seek coordination for a media player:
//! - Clock source and audio delay tracking
//! - Frame pacing, frame dropping and A/V drift correction
//! - Seek request coalescing, timeline resolution and seek execution
//! - Playback state machine, frame stepping and backstepping
//!
//! The core does not decode or present anything itself. It drives the
//! collaborator traits in [`backend`] from a single-threaded loop: the
//! caller owns a [`PlaybackSession`] and calls
//! [`run_iteration`](PlaybackSession::run_iteration) repeatedly, servicing
//! input between iterations.

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod seek;
pub mod timing;

pub use config::{FrameloopConfig, PlaybackConfig};
pub use error::{Error, Result, SeekError};
pub use events::PlaybackEvent;
pub use playback::{IterationOutcome, PlaybackSession, PlaybackState, SessionBuilder};
