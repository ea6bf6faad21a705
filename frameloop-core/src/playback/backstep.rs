//! Single-frame backward stepping
//!
//! Decoders only run forward, so stepping back means seeking exactly to the
//! timestamp of the frame before the one on screen. That timestamp comes
//! from the frame history. If the history does not know it (first frame
//! after a seek, or the step was requested before any frame was indexed),
//! an indexing seek to a point shortly before the displayed frame decodes
//! forward through it without showing anything, filling the history.
//!
//! At most [`MAX_INDEX_SEEKS`] indexing seeks are made per step.

use super::session::PlaybackSession;
use super::state::PlaybackState;
use crate::error::SeekError;
use crate::events::PlaybackEvent;
use crate::seek::executor::{execute_seek, SeekMode};
use crate::seek::SeekRequest;
use crate::{Error, Result};
use chrono::Utc;
use frameloop_common::human_time::format_pts;
use tracing::{debug, error, info, warn};

/// How far before the displayed frame an indexing seek lands
pub const BACKSTEP_INDEX_OFFSET: f64 = 1.0;

/// Skip-filter target past the displayed frame while indexing, so decoded
/// frames are recorded but never shown
pub const BACKSTEP_LOOKAHEAD: f64 = 10.0;

pub const MAX_INDEX_SEEKS: u8 = 2;

impl PlaybackSession {
    /// Advance a backstep in progress. Called once per iteration.
    pub(crate) fn handle_backstep(&mut self) -> Result<()> {
        let PlaybackState::Backstepping {
            start_generation,
            restarting,
            index_attempts,
        } = self.state
        else {
            return Ok(());
        };
        if !restarting && index_attempts > 0 && self.skip_filter.take().is_some() {
            debug!("Backstep: indexing pass ended without reaching its target");
        }

        let accurate = self
            .sources
            .get(self.active_source.0)
            .map_or(false, |s| s.supports_accurate_seek());
        if !accurate {
            self.fail_backstep(self.last_vo_pts, "source does not support frame-exact seeking");
            return Ok(());
        }
        let Some(current) = self.last_vo_pts else {
            self.fail_backstep(None, "no frame is displayed");
            return Ok(());
        };

        if let Some(previous) = self.history.find_previous(current) {
            info!("Backstep: {} -> {}", format_pts(current), format_pts(previous));
            return self.backstep_seek(SeekRequest::exact(previous), Some(current));
        }

        let indexed = self.history.last_frame_pts().map_or(false, |last| last >= current);
        if indexed && start_generation != self.history.generation() {
            self.fail_backstep(Some(current), "no earlier frame found");
            // Return to the frame that was on screen
            return self.backstep_seek(SeekRequest::exact(current), None);
        }

        // While an indexing seek is still decoding towards the displayed
        // frame the filter stays armed; check again next iteration.
        if self.skip_filter.is_none() {
            if index_attempts >= MAX_INDEX_SEEKS {
                self.fail_backstep(Some(current), "frame index still incomplete after indexing seeks");
                return Ok(());
            }
            let target = current - BACKSTEP_INDEX_OFFSET;
            debug!(
                "Backstep: indexing from {} (attempt {})",
                format_pts(target),
                index_attempts + 1
            );
            match execute_seek(self, SeekRequest::exact(target), SeekMode::BackstepIndex) {
                Ok(_) => match self.skip_filter.as_mut() {
                    Some(filter) => {
                        filter.target = current + BACKSTEP_LOOKAHEAD;
                        filter.framedrop = false;
                    }
                    None => self.fail_backstep(Some(current), "indexing seek was not frame-exact"),
                },
                Err(SeekError::StreamLost(message)) => return Err(Error::StreamLost(message)),
                Err(e) => self.fail_backstep(Some(current), &format!("indexing seek failed: {}", e)),
            }
        }
        Ok(())
    }

    /// Execute a seek issued by the backstep logic right away.
    ///
    /// `failing_at` is the displayed pts to report if the seek fails while
    /// the step is still in progress.
    fn backstep_seek(&mut self, request: SeekRequest, failing_at: Option<f64>) -> Result<()> {
        match execute_seek(self, request, SeekMode::Normal) {
            Ok(_) => Ok(()),
            Err(SeekError::StreamLost(message)) => Err(Error::StreamLost(message)),
            Err(e) => {
                warn!("Backstep seek failed: {}", e);
                if self.state.is_backstepping() {
                    self.fail_backstep(failing_at, &format!("seek failed: {}", e));
                }
                Ok(())
            }
        }
    }

    fn fail_backstep(&mut self, pts: Option<f64>, message: &str) {
        error!("Backstep failed: {}", message);
        let next = self.state.end_backstep(self.user_paused);
        self.set_state(next);
        self.emit(PlaybackEvent::BackstepFailed {
            pts,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
