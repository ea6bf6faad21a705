//! Seek executor and timeline resolver
//!
//! Turns a merged [`SeekRequest`] into a demuxer-level seek:
//!
//! 1. Normalize the request (fractional and chapter targets become absolute,
//!    relative targets are promoted to absolute where the position is known
//!    precisely enough)
//! 2. Resolve the timeline part and switch parts if the source changes
//! 3. Derive demuxer flags and seek the active source
//! 4. Seek external tracks to the equivalent position
//! 5. Reset decoders, outputs and timing state, arm the frame-skip filter
//!
//! A failed seek leaves the session where it was, except when a part switch
//! already happened: the new part is then restarted from wherever its source
//! ended up.

use super::queue::{SeekPrecision, SeekRequest, SeekTarget};
use super::skip_filter::FrameSkipFilter;
use super::ChapterList;
use crate::backend::{SeekDirection, SeekFlags, SourceError};
use crate::config::HrSeekPolicy;
use crate::error::SeekError;
use crate::events::PlaybackEvent;
use crate::playback::{PlaybackSession, PlaybackState};
use chrono::Utc;
use frameloop_common::human_time::format_pts;
use tracing::{debug, info, warn};

/// What the executor needs to know about the stream to normalize a request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekContext {
    pub duration: Option<f64>,
    pub start_time: f64,
    pub timestamps_may_reset: bool,
    pub accurate_seek: bool,
    pub timeline_active: bool,
    /// Current playback position, used to promote relative seeks
    pub current_position: Option<f64>,
}

/// Target after normalization
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedTarget {
    Absolute(f64),
    /// Left to the demuxer: offset from its current position
    Relative(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSeek {
    pub target: ResolvedTarget,
    pub direction: SeekDirection,
}

impl ResolvedSeek {
    pub fn absolute_target(&self) -> Option<f64> {
        match self.target {
            ResolvedTarget::Absolute(t) => Some(t),
            ResolvedTarget::Relative(_) => None,
        }
    }
}

/// Result of a successful seek
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekOutcome {
    /// Absolute target in virtual time, if known
    pub target: Option<f64>,
    /// Seek generation after the seek
    pub generation: u64,
    /// Frame-exact seek
    pub exact: bool,
    /// A different timeline part became active
    pub part_switched: bool,
}

fn direction_of(amount: f64) -> SeekDirection {
    if amount > 0.0 {
        SeekDirection::Forward
    } else {
        SeekDirection::Backward
    }
}

/// Normalize `request` against the stream described by `ctx`
pub fn resolve(request: &SeekRequest, ctx: &SeekContext, chapters: &ChapterList) -> Result<ResolvedSeek, SeekError> {
    let absolute = |t: f64| ResolvedSeek {
        target: ResolvedTarget::Absolute(t),
        direction: SeekDirection::Any,
    };
    match request.target {
        SeekTarget::Absolute(t) if t.is_finite() => Ok(absolute(t)),
        SeekTarget::Absolute(_) => Err(SeekError::DemuxerSeekFailed("non-finite seek target".to_string())),
        SeekTarget::Fractional(fraction) => match ctx.duration {
            Some(len) if len > 0.0 && fraction.is_finite() && !ctx.timestamps_may_reset => {
                Ok(absolute(fraction.clamp(0.0, 1.0) * len + ctx.start_time))
            }
            _ => Err(SeekError::UnknownDuration),
        },
        SeekTarget::Chapter(index) => chapters.start_of(index).map(absolute),
        SeekTarget::Relative(amount) => {
            let direction = direction_of(amount);
            match ctx.current_position {
                Some(current) if ctx.accurate_seek || ctx.timeline_active => Ok(ResolvedSeek {
                    target: ResolvedTarget::Absolute(current + amount),
                    direction,
                }),
                _ => Ok(ResolvedSeek {
                    target: ResolvedTarget::Relative(amount),
                    direction,
                }),
            }
        }
    }
}

/// Whether a request is executed as a frame-exact ("hr") seek
pub fn wants_hr_seek(policy: HrSeekPolicy, accurate_seek: bool, request: &SeekRequest) -> bool {
    if !accurate_seek || request.precision == SeekPrecision::Keyframe {
        return false;
    }
    if matches!(request.target, SeekTarget::Fractional(_)) {
        return false;
    }
    request.precision == SeekPrecision::Exact
        || policy == HrSeekPolicy::Always
        || (policy == HrSeekPolicy::Absolute && request.target.is_absolute_like())
}

/// Flags for the demuxer-level seek
pub fn demuxer_flags(resolved: &ResolvedSeek, hr_seek: bool, subtitle_preroll: bool) -> SeekFlags {
    let direction = if hr_seek || resolved.direction == SeekDirection::Backward {
        SeekDirection::Backward
    } else {
        resolved.direction
    };
    SeekFlags {
        absolute: matches!(resolved.target, ResolvedTarget::Absolute(_)),
        direction,
        subtitle_preroll: hr_seek || subtitle_preroll,
        exact: hr_seek,
    }
}

fn map_source_error(error: SourceError) -> SeekError {
    match error {
        SourceError::NotSeekable => SeekError::NotSeekable,
        SourceError::Io(msg) => SeekError::DemuxerSeekFailed(msg),
        SourceError::Irrecoverable(msg) => SeekError::StreamLost(msg),
    }
}

/// Why a seek is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeekMode {
    /// User or program request
    Normal,
    /// Automatic seek into the next timeline part at the end of a part:
    /// the seek generation is preserved and queued audio is kept
    Fallthrough,
    /// Indexing seek issued while backstepping: the session stays in
    /// `Backstepping` instead of restarting
    BackstepIndex,
}

/// Execute `request` on `session`
pub(crate) fn execute_seek(
    session: &mut PlaybackSession,
    request: SeekRequest,
    mode: SeekMode,
) -> Result<SeekOutcome, SeekError> {
    let fallthrough = mode == SeekMode::Fallthrough;
    let main = session.active_source;
    let Some(source) = session.sources.get(main.0) else {
        return Err(SeekError::NoActiveStream);
    };

    let previous_part = (session.timeline_part, session.video_offset);
    let previous_eof = session.end_of_file;
    session.end_of_file = false;

    let accurate = source.supports_accurate_seek();
    let ctx = SeekContext {
        duration: session.timeline.as_ref().map(|t| t.duration()).or(source.stream_duration()),
        start_time: if session.timeline.is_some() { 0.0 } else { source.start_time() },
        timestamps_may_reset: source.timestamps_may_reset(),
        accurate_seek: accurate,
        timeline_active: session.timeline.is_some(),
        current_position: session.current_position(),
    };
    let hr_seek = wants_hr_seek(session.config.hr_seek, accurate, &request);

    match request.target {
        SeekTarget::Fractional(_) => session.chapters.invalidate_seek_cache(),
        SeekTarget::Relative(amount) if amount < 0.0 => session.chapters.invalidate_seek_cache(),
        SeekTarget::Absolute(target) => session.chapters.invalidate_before(target),
        _ => {}
    }

    let resolved = resolve(&request, &ctx, &session.chapters)?;

    let mut demuxer_target = match resolved.target {
        ResolvedTarget::Absolute(t) | ResolvedTarget::Relative(t) => t,
    };
    let mut part_switched = false;
    if let Some(timeline) = session.timeline.as_ref() {
        let target = resolved.absolute_target().unwrap_or(demuxer_target);
        match timeline.locate(target) {
            Some(position) => {
                part_switched = session.set_timeline_part(position.index, false);
                demuxer_target = position.local;
            }
            None => {
                info!("Seek target {} is beyond the timeline, ending playback", format_pts(target));
                session.end_of_file = true;
                if !fallthrough {
                    if let Some(output) = session.audio_out.as_mut() {
                        output.reset();
                    }
                }
                return Err(SeekError::TimelinePartUnresolvable { target });
            }
        }
    }
    if part_switched {
        session.reinit_video();
    }

    let flags = demuxer_flags(&resolved, hr_seek, session.config.subtitle_preroll);
    if hr_seek {
        demuxer_target -= session.config.hr_seek_demuxer_offset;
    }

    let active = session.active_source;
    let result = match session.sources.get_mut(active.0) {
        Some(source) => source.seek(demuxer_target, flags).map_err(map_source_error),
        None => Err(SeekError::NoActiveStream),
    };
    if let Err(error) = result {
        warn!("Demuxer seek to {:.3} failed: {}", demuxer_target, error);
        if part_switched {
            session.reinit_audio();
            session.seek_reset(!fallthrough, false);
            session.set_state(session.state.after_seek(session.user_paused));
        } else {
            // Same source: it still plays the old position
            (session.timeline_part, session.video_offset) = previous_part;
            session.end_of_file = previous_eof;
        }
        return Err(error);
    }

    seek_external_tracks(session, resolved.absolute_target());

    if part_switched {
        session.reinit_audio();
    }
    session.seek_reset(!fallthrough, !part_switched);

    let generation = if fallthrough {
        session.history.generation()
    } else {
        session.history.bump_generation()
    };
    let next_state = match (mode, session.state) {
        (
            SeekMode::BackstepIndex,
            PlaybackState::Backstepping {
                start_generation,
                index_attempts,
                ..
            },
        ) => PlaybackState::Backstepping {
            start_generation,
            restarting: true,
            index_attempts: index_attempts.saturating_add(1),
        },
        (_, state) => state.after_seek(session.user_paused),
    };
    session.set_state(next_state);

    let target = resolved.absolute_target();
    session.video_pts = target;
    session.last_seek_pts = target;

    if hr_seek || session.timeline.is_some() {
        let part_start = session
            .timeline
            .as_ref()
            .and_then(|t| t.part(session.timeline_part))
            .map(|p| p.start);
        let filter_target = if hr_seek { target } else { part_start };
        if let Some(filter_target) = filter_target {
            session.skip_filter = Some(FrameSkipFilter::new(filter_target));
        }
    }

    if let SeekTarget::Chapter(index) = request.target {
        if let Some(start) = target {
            session.chapters.note_seek(index, start);
        }
    }

    session.seek_started_us = session.clock.now_us();

    match target {
        Some(t) => info!(
            "Seeked to {} ({}, generation {})",
            format_pts(t),
            if hr_seek { "exact" } else { "keyframe" },
            generation
        ),
        None => info!("Seeked by {:?} (generation {})", request.target, generation),
    }

    session.emit(PlaybackEvent::SeekCompleted {
        target,
        generation,
        exact: hr_seek,
        part_switched,
        timestamp: Utc::now(),
    });

    Ok(SeekOutcome {
        target,
        generation,
        exact: hr_seek,
        part_switched,
    })
}

/// Seek separately loaded tracks to where the main source now is.
/// Failures are logged; the main seek stands.
fn seek_external_tracks(session: &mut PlaybackSession, absolute_target: Option<f64>) {
    let externals: Vec<_> = session.selected_tracks().filter(|t| t.external).map(|t| t.source).collect();
    if externals.is_empty() {
        return;
    }

    let position = match absolute_target {
        Some(target) => Some(target - session.video_offset),
        None => session.sources.get(session.active_source.0).and_then(|s| s.position()),
    };
    let Some(position) = position else {
        debug!("Main source position unknown, not seeking external tracks");
        return;
    };

    let flags = SeekFlags {
        absolute: true,
        ..Default::default()
    };
    for id in externals {
        if let Some(source) = session.sources.get_mut(id.0) {
            if let Err(e) = source.seek(position, flags) {
                warn!("Seeking external track on {} failed: {}", id, e);
            }
        }
    }
}
