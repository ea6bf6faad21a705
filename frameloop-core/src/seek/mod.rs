//! Seeking: request queue, timeline resolution, chapters and the executor

pub mod chapters;
pub mod executor;
pub mod queue;
pub mod skip_filter;
pub mod timeline;

pub use chapters::{Chapter, ChapterList};
pub use executor::{ResolvedSeek, ResolvedTarget, SeekContext, SeekOutcome};
pub use queue::{SeekPrecision, SeekQueue, SeekRequest, SeekTarget, SEEK_COALESCE_WINDOW};
pub use skip_filter::{FrameSkipFilter, HRSEEK_TOLERANCE};
pub use timeline::{PartPosition, Timeline, TimelinePart};
