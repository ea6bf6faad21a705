//! Playback session
//!
//! [`PlaybackSession`] owns every piece of mutable playback state: the
//! collaborators, the timing state, the seek queue and the state machine.
//! The loop driver owns the session and calls
//! [`run_iteration`](PlaybackSession::run_iteration) repeatedly, servicing
//! input (pause, seek, step requests) between iterations.
//!
//! **Design:** no globals. Component logic lives in free functions and
//! `impl` blocks spread over the `timing`, `seek` and `playback` modules,
//! each operating on the session by reference.

use super::history::FrameHistory;
use super::state::{PlaybackState, SettledState};
use crate::backend::{
    AudioOutput, Frame, MediaSource, SourceId, StreamCache, Track, TrackKind, VideoOutput,
};
use crate::config::PlaybackConfig;
use crate::error::SeekError;
use crate::events::PlaybackEvent;
use crate::seek::executor::{execute_seek, SeekMode};
use crate::seek::{
    ChapterList, FrameSkipFilter, SeekPrecision, SeekQueue, SeekRequest, SeekTarget, Timeline,
    SEEK_COALESCE_WINDOW,
};
use crate::timing::{AudioDelayTracker, Clock, DriftCorrector, FramePacer, PlaybackClock, TimeSource};
use crate::{Error, Result};
use chrono::Utc;
use frameloop_common::human_time::format_pts_opt;
use frameloop_common::time::micros_to_seconds;
use tracing::{debug, info, warn};

/// Assembles a [`PlaybackSession`].
///
/// Sources are numbered in the order they are added, starting at
/// `SourceId(0)`.
pub struct SessionBuilder {
    config: PlaybackConfig,
    time: Box<dyn TimeSource>,
    sources: Vec<Box<dyn MediaSource>>,
    video: Option<(Track, Box<dyn VideoOutput>)>,
    audio: Option<(Track, Box<dyn AudioOutput>)>,
    subtitle: Option<Track>,
    cache: Option<Box<dyn StreamCache>>,
    timeline: Option<Timeline>,
    chapters: ChapterList,
}

impl SessionBuilder {
    pub fn new<T: TimeSource + 'static>(config: PlaybackConfig, time: T) -> Self {
        Self {
            config,
            time: Box::new(time),
            sources: Vec::new(),
            video: None,
            audio: None,
            subtitle: None,
            cache: None,
            timeline: None,
            chapters: ChapterList::default(),
        }
    }

    pub fn source<S: MediaSource + 'static>(mut self, source: S) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn video<V: VideoOutput + 'static>(mut self, track: Track, output: V) -> Self {
        self.video = Some((track, Box::new(output)));
        self
    }

    pub fn audio<A: AudioOutput + 'static>(mut self, track: Track, output: A) -> Self {
        self.audio = Some((track, Box::new(output)));
        self
    }

    pub fn subtitle(mut self, track: Track) -> Self {
        self.subtitle = Some(track);
        self
    }

    pub fn cache<C: StreamCache + 'static>(mut self, cache: C) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    pub fn timeline(mut self, timeline: Timeline) -> Self {
        self.timeline = Some(timeline);
        self
    }

    pub fn chapters(mut self, chapters: ChapterList) -> Self {
        self.chapters = chapters;
        self
    }

    /// Validate and build the session.
    ///
    /// The session starts restarting (waiting for its first frame). With a
    /// timeline, the first part's source is positioned at the part start.
    pub fn build(self) -> Result<PlaybackSession> {
        self.config.validate()?;
        if self.sources.is_empty() {
            return Err(Error::BadRequest("session needs at least one source".to_string()));
        }
        let source_count = self.sources.len();
        let check = |track: &Track, expected: TrackKind| -> Result<()> {
            if track.source.0 >= source_count {
                return Err(Error::BadRequest(format!("{:?} track refers to unknown {}", track.kind, track.source)));
            }
            if track.kind != expected {
                return Err(Error::BadRequest(format!("{:?} track used as {:?}", track.kind, expected)));
            }
            Ok(())
        };
        if let Some((track, _)) = &self.video {
            check(track, TrackKind::Video)?;
        }
        if let Some((track, _)) = &self.audio {
            check(track, TrackKind::Audio)?;
        }
        if let Some(track) = &self.subtitle {
            check(track, TrackKind::Subtitle)?;
        }
        if let Some(timeline) = &self.timeline {
            if let Some(unknown) = timeline.sources().into_iter().find(|s| s.0 >= source_count) {
                return Err(Error::BadRequest(format!("timeline refers to unknown {}", unknown)));
            }
        }

        let active_source = match (&self.timeline, &self.video, &self.audio) {
            (Some(timeline), _, _) => timeline.parts()[0].source,
            (None, Some((track, _)), _) => track.source,
            (None, None, Some((track, _))) => track.source,
            (None, None, None) => SourceId(0),
        };
        let video_offset = self.timeline.as_ref().map_or(0.0, |t| t.parts()[0].video_offset());

        let (video_track, video_out) = match self.video {
            Some((track, output)) => (Some(track), Some(output)),
            None => (None, None),
        };
        let (audio_track, audio_out) = match self.audio {
            Some((track, output)) => (Some(track), Some(output)),
            None => (None, None),
        };

        let mut pacer = FramePacer::new(self.config.frame_dropping);
        if let Some(track) = &video_track {
            pacer.set_fps(self.sources[track.source.0].nominal_fps());
        }

        let user_paused = self.config.start_paused;
        let has_timeline = self.timeline.is_some();
        let mut session = PlaybackSession {
            clock: Clock::new(self.time),
            sync: PlaybackClock::default(),
            drift: DriftCorrector::new(self.config.max_pts_correction, self.config.audio_delay),
            audio_delay: AudioDelayTracker::new(self.config.autosync),
            pacer,
            state: PlaybackState::RestartingAfterSeek {
                then: SettledState::from_user(user_paused),
            },
            user_paused,
            seeks: SeekQueue::new(),
            history: FrameHistory::new(),
            skip_filter: None,
            timeline: self.timeline,
            timeline_part: 0,
            video_offset,
            chapters: self.chapters,
            sources: self.sources,
            active_source,
            video_track,
            audio_track,
            subtitle_track: self.subtitle,
            audio_out,
            video_out,
            cache: self.cache,
            pending_frame: None,
            video_pts: None,
            last_vo_pts: None,
            playback_pts: None,
            last_seek_pts: None,
            written_audio_pts: None,
            audio_eof: false,
            syncing_audio: false,
            seek_started_us: 0,
            step_frames: 0,
            shown_frames: 0,
            end_of_file: false,
            events: Vec::new(),
            config: self.config,
        };
        session.seek_started_us = session.clock.now_us();
        session.preselect_streams();
        if user_paused {
            session.pause_outputs();
        }
        if has_timeline {
            execute_seek(&mut session, SeekRequest::absolute(0.0), SeekMode::Normal)?;
        }
        info!(
            "Playback session ready: {} source(s), video: {}, audio: {}, timeline parts: {}",
            session.sources.len(),
            session.has_video(),
            session.has_audio(),
            session.timeline.as_ref().map_or(0, |t| t.len())
        );
        Ok(session)
    }
}

/// All mutable playback state, owned by the loop driver
pub struct PlaybackSession {
    pub(crate) config: PlaybackConfig,
    pub(crate) clock: Clock,
    pub(crate) sync: PlaybackClock,
    pub(crate) drift: DriftCorrector,
    pub(crate) audio_delay: AudioDelayTracker,
    pub(crate) pacer: FramePacer,
    pub(crate) state: PlaybackState,
    /// User pause flag, independent of cache-induced pauses
    pub(crate) user_paused: bool,
    pub(crate) seeks: SeekQueue,
    pub(crate) history: FrameHistory,
    pub(crate) skip_filter: Option<FrameSkipFilter>,

    pub(crate) timeline: Option<Timeline>,
    pub(crate) timeline_part: usize,
    /// Added to source timestamps to get virtual time
    pub(crate) video_offset: f64,
    pub(crate) chapters: ChapterList,

    pub(crate) sources: Vec<Box<dyn MediaSource>>,
    /// Main source (the active timeline part's source)
    pub(crate) active_source: SourceId,
    pub(crate) video_track: Option<Track>,
    pub(crate) audio_track: Option<Track>,
    pub(crate) subtitle_track: Option<Track>,
    pub(crate) audio_out: Option<Box<dyn AudioOutput>>,
    pub(crate) video_out: Option<Box<dyn VideoOutput>>,
    pub(crate) cache: Option<Box<dyn StreamCache>>,

    /// Decoded frame waiting for its flip
    pub(crate) pending_frame: Option<Frame>,
    /// pts of the last decoded frame (or the seek target until one is decoded)
    pub(crate) video_pts: Option<f64>,
    /// pts of the frame on screen
    pub(crate) last_vo_pts: Option<f64>,
    /// Audio position for audio-only playback
    pub(crate) playback_pts: Option<f64>,
    pub(crate) last_seek_pts: Option<f64>,
    /// pts just past the last audio written to the output
    pub(crate) written_audio_pts: Option<f64>,
    pub(crate) audio_eof: bool,
    /// Discarding audio that precedes the first video frame after a seek
    pub(crate) syncing_audio: bool,

    pub(crate) seek_started_us: i64,
    pub(crate) step_frames: u32,
    pub(crate) shown_frames: u64,
    pub(crate) end_of_file: bool,
    pub(crate) events: Vec<PlaybackEvent>,
}

impl PlaybackSession {
    pub fn builder<T: TimeSource + 'static>(config: PlaybackConfig, time: T) -> SessionBuilder {
        SessionBuilder::new(config, time)
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Queue a seek; it is merged with pending requests and executed at the
    /// end of the next iteration.
    pub fn queue_seek(&mut self, request: SeekRequest) {
        debug!("Queue seek {:?} ({:?})", request.target, request.precision);
        self.seeks.queue(request);
    }

    /// Queue a seek to the start of chapter `index`
    pub fn seek_chapter(&mut self, index: usize) {
        self.queue_seek(SeekRequest::new(SeekTarget::Chapter(index), SeekPrecision::Default));
    }

    /// Whether new seek input should wait: the previous seek has not shown
    /// a frame yet and happened less than [`SEEK_COALESCE_WINDOW`] ago.
    pub fn should_defer_seek(&self) -> bool {
        self.state.is_restarting()
            && micros_to_seconds(self.clock.now_us() - self.seek_started_us) < SEEK_COALESCE_WINDOW
    }

    /// User pause
    pub fn pause(&mut self) {
        self.user_paused = true;
        self.step_frames = 0;
        let next = self.state.on_user_pause();
        self.set_state(next);
    }

    /// User unpause. A cache-induced pause stays in effect.
    pub fn unpause(&mut self) {
        self.user_paused = false;
        let next = self.state.on_user_unpause();
        self.set_state(next);
    }

    pub fn toggle_pause(&mut self) {
        if self.user_paused {
            self.unpause();
        } else {
            self.pause();
        }
    }

    /// Play exactly one more frame, then pause
    pub fn step_frame(&mut self) {
        if !self.has_video() {
            debug!("Frame step ignored without video");
            return;
        }
        self.unpause();
        self.step_frames = 1;
    }

    /// Step one frame back.
    ///
    /// Rejected (returns false) without video, while restarting after a
    /// seek, while already stepping, or while the frame-skip filter is
    /// active.
    pub fn request_backstep(&mut self) -> bool {
        if !self.has_video() {
            debug!("Backstep ignored without video");
            return false;
        }
        if self.skip_filter.is_some() {
            debug!("Backstep rejected: exact seek in progress");
            return false;
        }
        match self.state.begin_backstep(self.history.generation()) {
            Some(next) => {
                info!("Backstep from {}", format_pts_opt(self.last_vo_pts));
                self.step_frames = 0;
                self.set_state(next);
                true
            }
            None => {
                debug!("Backstep rejected in state {}", self.state);
                false
            }
        }
    }

    /// Change the playback speed
    pub fn set_speed(&mut self, speed: f64) -> Result<()> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(Error::BadRequest(format!("invalid speed {}", speed)));
        }
        info!("Playback speed {} -> {}", self.config.speed, speed);
        self.config.speed = speed;
        Ok(())
    }

    /// Drain queued events
    pub fn take_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_user_paused(&self) -> bool {
        self.user_paused
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Current position in seconds (virtual timeline)
    pub fn current_position(&self) -> Option<f64> {
        if self.has_video() {
            self.video_pts.or(self.last_vo_pts).or(self.last_seek_pts)
        } else {
            self.playback_pts.or(self.last_seek_pts)
        }
    }

    /// pts of the frame on screen
    pub fn displayed_pts(&self) -> Option<f64> {
        self.last_vo_pts
    }

    /// Drift delay in seconds
    pub fn drift_delay(&self) -> f64 {
        self.sync.delay
    }

    /// Drift correction applied since the last seek
    pub fn total_correction(&self) -> f64 {
        self.sync.total_correction
    }

    pub fn last_av_difference(&self) -> Option<f64> {
        self.sync.last_av_difference
    }

    pub fn seek_generation(&self) -> u64 {
        self.history.generation()
    }

    pub fn has_pending_seek(&self) -> bool {
        self.seeks.is_pending()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.pacer.total_dropped()
    }

    /// Consecutive dropped frames
    pub fn dropped_in_row(&self) -> u32 {
        self.pacer.dropped_in_row()
    }

    pub fn shown_frames(&self) -> u64 {
        self.shown_frames
    }

    pub fn current_chapter(&self) -> Option<usize> {
        self.chapters.current(self.current_position())
    }

    pub fn timeline_part(&self) -> Option<usize> {
        self.timeline.as_ref().map(|_| self.timeline_part)
    }

    pub fn is_end_of_file(&self) -> bool {
        self.end_of_file
    }

    pub fn skip_filter_active(&self) -> bool {
        self.skip_filter.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video_track.is_some() && self.video_out.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio_track.is_some() && self.audio_out.is_some()
    }

    // ========================================================================
    // Internal helpers shared by the loop, the executor and backstep
    // ========================================================================

    pub(crate) fn emit(&mut self, event: PlaybackEvent) {
        self.events.push(event);
    }

    /// Apply a state transition: pause/resume outputs when the paused-ness
    /// changes, keep `time_frame` accurate across the pause, emit an event.
    pub(crate) fn set_state(&mut self, next: PlaybackState) {
        let old = self.state;
        if next == old {
            return;
        }
        match (old.is_paused(), next.is_paused()) {
            (false, true) => {
                self.sync.time_frame -= self.clock.relative_time();
                self.pause_outputs();
            }
            (true, false) => {
                self.resume_outputs();
                // Time spent paused does not count
                self.clock.relative_time();
            }
            _ => {}
        }
        self.state = next;
        debug!("Playback state {} -> {}", old, next);
        self.emit(PlaybackEvent::StateChanged {
            old_state: old,
            new_state: next,
            timestamp: Utc::now(),
        });
    }

    fn pause_outputs(&mut self) {
        if let Some(output) = self.audio_out.as_mut() {
            output.pause();
        }
        if let Some(output) = self.video_out.as_mut() {
            output.pause();
        }
    }

    fn resume_outputs(&mut self) {
        if let Some(output) = self.audio_out.as_mut() {
            output.resume();
        }
        if let Some(output) = self.video_out.as_mut() {
            output.resume();
        }
    }

    pub(crate) fn selected_tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.video_track
            .iter()
            .chain(self.audio_track.iter())
            .chain(self.subtitle_track.iter())
    }

    /// Activate the streams of sources that something reads from, and
    /// deactivate the rest
    pub(crate) fn preselect_streams(&mut self) {
        let in_use: Vec<SourceId> = self
            .selected_tracks()
            .map(|t| t.source)
            .chain(std::iter::once(self.active_source))
            .collect();
        for (index, source) in self.sources.iter_mut().enumerate() {
            source.set_streams_active(in_use.contains(&SourceId(index)));
        }
    }

    /// Drop decoder and output state after a seek.
    ///
    /// # Arguments
    /// * `reset_audio_output` - also drop audio queued on the output
    /// * `reset_audio_decoder` - also drop audio decoder state
    pub(crate) fn seek_reset(&mut self, reset_audio_output: bool, reset_audio_decoder: bool) {
        if let Some(track) = self.video_track {
            if let Some(source) = self.sources.get_mut(track.source.0) {
                source.reset_video();
            }
            if let Some(output) = self.video_out.as_mut() {
                output.reset();
            }
            self.pending_frame = None;
            self.pacer.reset();
            self.video_pts = None;
        }

        if let Some(track) = self.audio_track {
            if reset_audio_decoder {
                if let Some(source) = self.sources.get_mut(track.source.0) {
                    source.reset_audio();
                }
            }
            if reset_audio_output {
                if let Some(output) = self.audio_out.as_mut() {
                    output.reset();
                }
            }
            self.written_audio_pts = None;
            self.audio_eof = false;
        }

        self.sync.reset();
        self.syncing_audio = false;
        self.skip_filter = None;
        self.playback_pts = None;
    }

    /// Re-create the video decoding state (after a part switch)
    pub(crate) fn reinit_video(&mut self) {
        if let Some(track) = self.video_track {
            self.pacer.reset();
            self.pacer.set_fps(self.sources.get(track.source.0).and_then(|s| s.nominal_fps()));
            self.pending_frame = None;
        }
    }

    /// Re-create the audio decoding state (after a part switch)
    pub(crate) fn reinit_audio(&mut self) {
        if let Some(track) = self.audio_track {
            if let Some(source) = self.sources.get_mut(track.source.0) {
                source.reset_audio();
            }
            self.written_audio_pts = None;
            self.audio_eof = false;
        }
    }

    /// Make timeline part `index` active.
    ///
    /// # Returns
    /// true when the part's source differs from the previous one (or
    /// `force` is set) and decoders were torn down
    pub(crate) fn set_timeline_part(&mut self, index: usize, force: bool) -> bool {
        let Some(timeline) = self.timeline.as_ref() else {
            return false;
        };
        let (Some(previous), Some(next)) = (timeline.part(self.timeline_part).copied(), timeline.part(index).copied())
        else {
            return false;
        };

        self.timeline_part = index;
        self.video_offset = next.video_offset();
        if previous.source == next.source && !force {
            return false;
        }

        info!("Switching to timeline part {} ({})", index, next.source);

        if let Some(track) = self.video_track {
            if let Some(source) = self.sources.get_mut(track.source.0) {
                source.reset_video();
            }
        }
        if let Some(track) = self.audio_track {
            if let Some(source) = self.sources.get_mut(track.source.0) {
                source.reset_audio();
            }
        }
        if !self.config.fixed_vo {
            if let Some(output) = self.video_out.as_mut() {
                output.release();
            }
        }
        if !self.config.gapless_audio {
            if let Some(output) = self.audio_out.as_mut() {
                output.reset();
            }
        }
        self.pending_frame = None;

        self.active_source = next.source;
        for track in [&mut self.video_track, &mut self.audio_track, &mut self.subtitle_track]
            .into_iter()
            .flatten()
        {
            if track.follows_timeline {
                track.source = next.source;
            }
        }
        self.preselect_streams();

        self.emit(PlaybackEvent::TimelinePartChanged {
            part: index,
            source: next.source,
            timestamp: Utc::now(),
        });
        true
    }

    /// Execute the pending seek, if any.
    ///
    /// Seek failures are logged and reported as events; only a lost stream
    /// is returned as an error.
    pub(crate) fn execute_queued_seek(&mut self) -> Result<()> {
        let Some(request) = self.seeks.consume() else {
            return Ok(());
        };
        match execute_seek(self, request, SeekMode::Normal) {
            Ok(_) => Ok(()),
            Err(error) => {
                warn!("Seek {:?} failed: {}", request.target, error);
                self.report_seek_failure(error)
            }
        }
    }

    /// Emit the events for a failed seek; a lost stream becomes an error
    pub(crate) fn report_seek_failure(&mut self, error: SeekError) -> Result<()> {
        self.emit(PlaybackEvent::SeekFailed {
            reason: error.reason().to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
        if let SeekError::StreamLost(_) = error {
            return Err(error.into());
        }
        if self.end_of_file {
            self.emit(PlaybackEvent::EndOfFile {
                position: self.current_position(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PlaybackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackSession")
            .field("state", &self.state)
            .field("user_paused", &self.user_paused)
            .field("sync", &self.sync)
            .field("video_pts", &self.video_pts)
            .field("timeline_part", &self.timeline_part)
            .field("active_source", &self.active_source)
            .finish_non_exhaustive()
    }
}
