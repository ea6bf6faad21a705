//! Timing: clock source, audio delay tracking, frame pacing, drift correction

pub mod audio_delay;
pub mod clock;
pub mod drift;
pub mod pacing;

pub use audio_delay::{AudioDelayTracker, AudioTiming};
pub use clock::{Clock, ManualTimeSource, SystemTimeSource, TimeSource};
pub use drift::{DriftCorrector, DriftInput, PlaybackClock};
pub use pacing::{DropContext, DropDecision, FramePacer, PaceInput, PacedFrame};
