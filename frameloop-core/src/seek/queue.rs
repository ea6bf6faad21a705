//! Seek request queue
//!
//! Input arrives faster than seeks can be executed (holding down an arrow
//! key produces a relative seek per key repeat). Requests are merged into at
//! most one pending request, which the loop consumes once per iteration.
//!
//! **Merge rules:**
//! - Relative requests accumulate onto a pending relative request
//! - Relative requests are ignored while an absolute-like request is pending
//! - Absolute, fractional and chapter requests replace whatever is pending
//! - A relative accumulation that nets to zero clears the queue

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Minimum time between executed seeks while the loop is still restarting
/// from the previous one, so each position gets a frame on screen
pub const SEEK_COALESCE_WINDOW: f64 = 0.3;

/// What the user asked to seek to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum SeekTarget {
    /// Absolute timestamp in seconds
    Absolute(f64),
    /// Offset from the current position in seconds
    Relative(f64),
    /// Position as a fraction (0..=1) of the stream duration
    Fractional(f64),
    /// Start of the chapter with this index
    Chapter(usize),
}

impl SeekTarget {
    /// Whether this counts as an absolute request for the hr-seek policy
    pub fn is_absolute_like(&self) -> bool {
        matches!(self, SeekTarget::Absolute(_) | SeekTarget::Chapter(_))
    }
}

/// How precisely the seek should land
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeekPrecision {
    /// Nearest keyframe is good enough
    Keyframe,
    /// Let the hr-seek policy decide
    #[default]
    Default,
    /// Frame-exact
    Exact,
}

/// A merged, not yet executed seek
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekRequest {
    pub target: SeekTarget,
    pub precision: SeekPrecision,
}

impl SeekRequest {
    pub fn new(target: SeekTarget, precision: SeekPrecision) -> Self {
        Self { target, precision }
    }

    pub fn absolute(seconds: f64) -> Self {
        Self::new(SeekTarget::Absolute(seconds), SeekPrecision::Default)
    }

    pub fn relative(seconds: f64) -> Self {
        Self::new(SeekTarget::Relative(seconds), SeekPrecision::Default)
    }

    pub fn exact(seconds: f64) -> Self {
        Self::new(SeekTarget::Absolute(seconds), SeekPrecision::Exact)
    }
}

/// Holds at most one pending seek
#[derive(Debug, Clone, Default)]
pub struct SeekQueue {
    pending: Option<SeekRequest>,
}

impl SeekQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `request` into the pending request
    pub fn queue(&mut self, request: SeekRequest) {
        match request.target {
            SeekTarget::Relative(amount) => self.queue_relative(amount, request.precision),
            _ => {
                if let Some(replaced) = self.pending.replace(request) {
                    debug!("Seek {:?} replaces pending {:?}", request.target, replaced.target);
                }
            }
        }
    }

    fn queue_relative(&mut self, amount: f64, precision: SeekPrecision) {
        if !amount.is_finite() {
            debug!("Ignoring non-finite relative seek");
            return;
        }
        match self.pending {
            None => {
                if amount != 0.0 {
                    self.pending = Some(SeekRequest::new(SeekTarget::Relative(amount), precision));
                }
            }
            Some(SeekRequest {
                target: SeekTarget::Relative(accumulated),
                precision: pending_precision,
            }) => {
                let total = accumulated + amount;
                if total == 0.0 {
                    debug!("Relative seeks cancel out, clearing queue");
                    self.pending = None;
                } else {
                    self.pending = Some(SeekRequest::new(
                        SeekTarget::Relative(total),
                        pending_precision.max(precision),
                    ));
                }
            }
            Some(pending) => {
                debug!(
                    "Ignoring relative seek {:+.3}s, {:?} already pending",
                    amount, pending.target
                );
            }
        }
    }

    /// Peek at the pending request
    pub fn pending(&self) -> Option<&SeekRequest> {
        self.pending.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending request, leaving the queue empty
    pub fn consume(&mut self) -> Option<SeekRequest> {
        self.pending.take()
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}
