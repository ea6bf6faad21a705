//! Playback session, state machine and loop

pub mod backstep;
pub mod history;
pub mod playloop;
pub mod session;
pub mod state;

pub use history::{FrameHistory, FrameTimingSample, HISTORY_LEN};
pub use playloop::IterationOutcome;
pub use session::{PlaybackSession, SessionBuilder};
pub use state::{PlaybackState, SettledState};
