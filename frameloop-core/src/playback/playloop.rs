//! Playback loop iteration
//!
//! **Responsibilities:**
//! - Feed the audio output up to its capacity
//! - Decode at most one video frame, pace it against audio (or the wall
//!   clock) and flip it
//! - Detect end of part / end of file and fall through to the next
//!   timeline part
//! - Idle for a bounded duration
//! - Service cache pauses, backstep progress and the queued seek
//!
//! Input is serviced by the loop driver between iterations.

use super::session::PlaybackSession;
use crate::config::FrameDropMode;
use crate::events::PlaybackEvent;
use crate::seek::executor::{execute_seek, SeekMode};
use crate::seek::SeekRequest;
use crate::timing::pacing::{audio_wait, pace, video_wait};
use crate::timing::{AudioTiming, DriftInput, DropContext, DropDecision, PaceInput};
use crate::Result;
use chrono::Utc;
use frameloop_common::human_time::{format_pts, format_pts_opt};
use frameloop_common::time::{micros_to_seconds, seconds_to_micros};
use tracing::{debug, info, trace, warn};

/// Audio buffered below this counts as drained at end of file
const AUDIO_DRAINED: f64 = 0.05;

/// Upper bound on chunks handled by one audio fill
const MAX_CHUNKS_PER_FILL: usize = 1000;

/// Flip without sleeping when less than this remains
const FLIP_SLEEP_MIN: f64 = 0.001;

/// What one call to [`PlaybackSession::run_iteration`] did
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationOutcome {
    /// A video frame was presented
    pub frame_shown: bool,
    /// Seconds spent idling at the end of the iteration
    pub idle: f64,
    /// Nothing is left to play
    pub end_of_file: bool,
}

/// Result of topping up the audio output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AudioFill {
    /// Buffered up to capacity
    Full,
    /// Wrote what was possible (untimed output, or the fill was cut short)
    Partial,
    /// Audio stream (or the current timeline part) is exhausted
    Eof,
}

/// Result of asking for the next video frame
#[derive(Debug, Clone, Copy, PartialEq)]
enum VideoStep {
    /// A new frame is pending; previous frame lasts this long
    Frame(f64),
    /// A frame decoded earlier is still waiting for its flip
    Pending,
    /// Frame before the seek target, discarded
    Skipped,
    /// Late frame dropped; it would have lasted this long
    Dropped(f64),
    /// No more frames (stream end or end of the timeline part)
    Eof,
}

impl PlaybackSession {
    /// Run one iteration of the playback loop.
    ///
    /// # Returns
    /// What the iteration did. Seek failures are reported as events; only a
    /// lost stream is an error.
    pub fn run_iteration(&mut self) -> Result<IterationOutcome> {
        let mut outcome = IterationOutcome::default();
        if self.end_of_file {
            self.execute_queued_seek()?;
            outcome.end_of_file = self.end_of_file;
            return Ok(outcome);
        }

        let speed = self.config.speed;
        let end_pts = self.part_end_pts();
        let was_restarting = self.state.is_restarting();
        let has_audio = self.has_audio();
        let has_video = self.has_video();
        let audio_untimed = self.audio_out.as_ref().map_or(false, |o| o.is_untimed());

        // ---- audio ----
        let mut full_audio_buffers = false;
        let mut audio_left = false;
        if has_audio {
            if !was_restarting && !audio_untimed && !self.state.is_paused() {
                let fill = self.fill_audio(end_pts);
                full_audio_buffers = fill == AudioFill::Full;
                audio_left = fill != AudioFill::Eof;
            } else {
                audio_left = !self.audio_eof;
            }
        }

        // ---- video ----
        let mut video_left = false;
        let mut video_sleep = f64::INFINITY;
        let mut paced_audio: Option<f64> = None;
        if has_video {
            video_left = self.pending_frame.is_some() || self.video_out.as_ref().map_or(false, |o| o.has_frame());
            if !self.state.is_paused() || self.state.is_restarting() {
                match self.update_video(end_pts) {
                    VideoStep::Frame(frame_time) | VideoStep::Dropped(frame_time) => {
                        video_left = true;
                        if !self.state.is_restarting() {
                            self.sync.time_frame += frame_time / speed;
                            self.adjust_sync(frame_time);
                        }
                    }
                    VideoStep::Pending | VideoStep::Skipped => video_left = true,
                    VideoStep::Eof => {
                        video_left = false;
                        self.sync.delay = 0.0;
                        self.sync.last_av_difference = None;
                    }
                }
            }

            if video_left && (!self.state.is_paused() || self.state.is_restarting()) {
                if self.pending_frame.is_none() {
                    video_sleep = 0.0;
                } else {
                    self.sync.time_frame -= self.clock.relative_time();
                    let restarting = self.state.is_restarting();
                    let audio = if full_audio_buffers && !restarting {
                        self.audio_delay.buffered(
                            self.audio_out.as_deref(),
                            self.sync.delay,
                            speed,
                            self.sync.time_frame,
                        )
                    } else {
                        AudioTiming::Absent
                    };
                    paced_audio = audio.buffered();
                    self.sync.time_frame = pace(&PaceInput {
                        time_frame: self.sync.time_frame,
                        delay: self.sync.delay,
                        speed,
                        audio,
                        full_audio_buffers,
                        restarting,
                        untimed_output: self.video_out.as_ref().map_or(false, |o| o.is_untimed()),
                    });

                    match video_wait(self.sync.time_frame) {
                        Some(wait) => video_sleep = wait,
                        None => {
                            video_sleep = 0.0;
                            self.flip_pending_frame(end_pts);
                            outcome.frame_shown = true;
                        }
                    }
                }
            }
        }

        // Audio without video to follow, or untimed audio, is fed here
        if has_audio {
            let wants_fill = if self.state.is_restarting() {
                !video_left
            } else {
                audio_untimed && !self.state.is_paused() && (self.sync.delay <= 0.0 || !video_left)
            };
            if wants_fill {
                let fill = self.fill_audio(end_pts);
                full_audio_buffers = fill == AudioFill::Full && !audio_untimed;
                audio_left = fill != AudioFill::Eof;
            }
        }
        if !video_left && self.state.is_restarting() {
            let next = self.state.after_restart();
            self.set_state(next);
        }

        let paused = self.state.is_paused();
        let buffered_audio = match paced_audio {
            Some(buffered) => buffered,
            None if has_audio && !paused => AudioTiming::query(self.audio_out.as_deref()).buffered().unwrap_or(0.0),
            None => 0.0,
        };

        if !video_left && (!paused || was_restarting) && has_audio {
            self.playback_pts = self.written_audio_pts.map(|written| written - speed * buffered_audio);
        }

        // ---- end of part / end of file ----
        if (has_audio || has_video)
            && !audio_left
            && !video_left
            && (self.config.gapless_audio || buffered_audio < AUDIO_DRAINED)
            && (!paused || was_restarting)
            && !self.state.is_backstepping()
        {
            match self.next_part_start() {
                Some(start) => {
                    debug!("End of timeline part {}, continuing at {}", self.timeline_part, format_pts(start));
                    if let Err(error) = execute_seek(self, SeekRequest::absolute(start), SeekMode::Fallthrough) {
                        warn!("Falling through to the next part failed: {}", error);
                        self.report_seek_failure(error)?;
                    }
                }
                None => {
                    info!("End of file at {}", format_pts_opt(self.current_position()));
                    self.end_of_file = true;
                    self.emit(PlaybackEvent::EndOfFile {
                        position: self.current_position(),
                        timestamp: Utc::now(),
                    });
                }
            }
            video_sleep = 0.0;
        }

        if !self.end_of_file && !self.state.is_restarting() && self.step_frames > 0 && !self.state.is_paused() {
            if outcome.frame_shown || !video_left {
                self.step_frames -= 1;
            }
            if self.step_frames == 0 {
                debug!("Frame step done");
                self.pause();
            }
        }

        // ---- idle ----
        if !self.end_of_file {
            let audio = if audio_untimed {
                AudioTiming::Untimed
            } else if full_audio_buffers {
                AudioTiming::Buffered(buffered_audio)
            } else {
                AudioTiming::Absent
            };
            let sleep = self
                .config
                .wakeup_period
                .min(video_sleep)
                .min(audio_wait(audio, has_audio, self.state.is_paused(), full_audio_buffers, video_left));
            if sleep > 0.0 {
                trace!("Idle {:.3}s", sleep);
                self.clock.idle(sleep);
                outcome.idle = sleep;
            }
        }

        // ---- cache, backstep, seeks ----
        self.handle_pause_on_low_cache();
        self.handle_backstep()?;
        self.execute_queued_seek()?;

        outcome.end_of_file = self.end_of_file;
        Ok(outcome)
    }

    /// Virtual time at which the current timeline part ends
    fn part_end_pts(&self) -> Option<f64> {
        self.timeline.as_ref().and_then(|t| t.part_end(self.timeline_part))
    }

    fn next_part_start(&self) -> Option<f64> {
        let timeline = self.timeline.as_ref()?;
        if !timeline.has_next_part(self.timeline_part) {
            return None;
        }
        timeline.part(self.timeline_part + 1).map(|p| p.start)
    }

    /// Top up the audio output.
    ///
    /// Written chunks advance `written_audio_pts` and add their (stream
    /// time) duration to the drift delay. While `syncing_audio` is set,
    /// chunks ending before the first video frame are discarded.
    fn fill_audio(&mut self, end_pts: Option<f64>) -> AudioFill {
        let Some(track) = self.audio_track else {
            return AudioFill::Eof;
        };
        let offset = self.video_offset;
        let (Some(output), Some(source)) = (self.audio_out.as_mut(), self.sources.get_mut(track.source.0)) else {
            return AudioFill::Eof;
        };
        let untimed = output.is_untimed();
        let capacity = output.buffer_capacity();

        let mut written = 0usize;
        for _ in 0..MAX_CHUNKS_PER_FILL {
            let room = if untimed {
                if written > 0 {
                    return AudioFill::Partial;
                }
                capacity
            } else {
                let buffered = output.buffered_duration().unwrap_or(0.0);
                if buffered >= capacity {
                    return AudioFill::Full;
                }
                capacity - buffered
            };

            let Some(chunk) = source.next_audio_chunk(room) else {
                debug!("Audio stream ended at {}", format_pts_opt(self.written_audio_pts));
                self.audio_eof = true;
                return AudioFill::Eof;
            };
            let start = chunk.pts + offset;
            let end = chunk.end_pts() + offset;
            if end_pts.map_or(false, |part_end| start >= part_end) {
                debug!("Audio reached the end of timeline part {}", self.timeline_part);
                self.audio_eof = true;
                return AudioFill::Eof;
            }
            if self.syncing_audio {
                match self.video_pts {
                    Some(video) if end <= video => {
                        trace!("Discarding audio {} before first video frame", format_pts(start));
                        continue;
                    }
                    _ => self.syncing_audio = false,
                }
            }

            output.play(&chunk);
            written += 1;
            self.written_audio_pts = Some(end);
            self.sync.delay += chunk.duration;
        }
        AudioFill::Partial
    }

    /// Decode the next video frame and run it through the frame-drop
    /// policy and the frame-skip filter
    fn update_video(&mut self, end_pts: Option<f64>) -> VideoStep {
        if self.pending_frame.is_some() {
            return VideoStep::Pending;
        }
        let Some(track) = self.video_track else {
            return VideoStep::Eof;
        };
        let has_audio = self.has_audio();

        let filter_dropping = self.skip_filter.map_or(false, |f| f.framedrop);
        let decision = if filter_dropping {
            DropDecision::Keep
        } else {
            let audio = if has_audio {
                AudioTiming::query(self.audio_out.as_deref())
            } else {
                AudioTiming::Absent
            };
            self.pacer.evaluate(&DropContext {
                audio,
                audio_eof: self.audio_eof,
                speed: self.config.speed,
                delay: self.sync.delay,
                paused: self.state.is_paused(),
                restarting: self.state.is_restarting(),
            })
        };
        let drop_hint =
            filter_dropping || (decision == DropDecision::Drop && self.pacer.mode() == FrameDropMode::Decoder);

        let Some(source) = self.sources.get_mut(track.source.0) else {
            return VideoStep::Eof;
        };
        let Some(mut frame) = source.next_video_frame(drop_hint) else {
            debug!("Video stream ended after {}", format_pts_opt(self.last_vo_pts));
            return VideoStep::Eof;
        };
        let pts = frame.pts.map(|p| p + self.video_offset);
        frame.pts = pts;

        if let Some(filter) = self.skip_filter.as_mut() {
            if filter.reached(pts) {
                filter.framedrop = false;
            }
        }
        let before_end = match (end_pts, pts) {
            (Some(end), Some(pts)) => pts < end,
            _ => true,
        };
        if !before_end {
            debug!("Video reached the end of timeline part {}", self.timeline_part);
            return VideoStep::Eof;
        }
        self.history.push(pts, self.skip_filter.map_or(false, |f| f.framedrop));

        if let Some(filter) = self.skip_filter {
            if !filter.reached(pts) {
                trace!("Skipping frame {} before {}", format_pts_opt(pts), format_pts(filter.target));
                return VideoStep::Skipped;
            }
            debug!("Seek target {} reached at {}", format_pts(filter.target), format_pts_opt(pts));
            self.skip_filter = None;
        }

        if !filter_dropping {
            self.pacer.record(decision);
        }
        let paced = self.pacer.advance(pts);
        if has_audio {
            self.sync.delay -= paced.frame_time;
        }
        self.video_pts = Some(paced.pts);
        if decision == DropDecision::Drop {
            return VideoStep::Dropped(paced.frame_time);
        }
        self.pending_frame = Some(frame);
        VideoStep::Frame(paced.frame_time)
    }

    fn adjust_sync(&mut self, frame_time: f64) {
        if !self.has_audio() {
            return;
        }
        let Some(video_pts) = self.video_pts else {
            return;
        };
        let input = DriftInput {
            written_audio_pts: self.written_audio_pts,
            video_pts,
            frame_time,
            syncing_audio: self.syncing_audio,
        };
        if let Some(change) = self.drift.adjust(&mut self.sync, &input) {
            trace!("Drift correction {:+.4}s (total {:+.4}s)", change, self.sync.total_correction);
        }
    }

    /// Present the pending frame, sleeping until it is due
    fn flip_pending_frame(&mut self, end_pts: Option<f64>) {
        let Some(frame) = self.pending_frame.take() else {
            return;
        };

        self.sync.time_frame -= self.clock.relative_time();
        if self.sync.time_frame > FLIP_SLEEP_MIN {
            self.sync.time_frame = self.clock.timing_sleep(self.sync.time_frame, self.config.softsleep);
        }

        let flip_start = self.clock.now_us();
        let target_us = self
            .clock
            .checkpoint_us()
            .saturating_add(seconds_to_micros(self.sync.time_frame.max(-1.0)));
        if let Some(output) = self.video_out.as_mut() {
            output.flip(frame, target_us);
        }
        self.sync.last_flip_duration = micros_to_seconds(self.clock.now_us().saturating_sub(flip_start));

        self.last_vo_pts = self.video_pts;
        self.playback_pts = self.video_pts;
        self.shown_frames += 1;
        trace!("Flipped frame {}", format_pts_opt(self.video_pts));

        if self.state.is_restarting() {
            if self.has_audio() {
                self.syncing_audio = true;
                self.fill_audio(end_pts);
            }
            let next = self.state.after_restart();
            self.set_state(next);
            self.sync.time_frame = 0.0;
            self.clock.relative_time();
            debug!(
                "First frame after seek shown at {} ({:.3}s after the seek)",
                format_pts_opt(self.video_pts),
                micros_to_seconds(self.clock.now_us() - self.seek_started_us)
            );
        }

        self.update_av_difference();
    }

    fn update_av_difference(&mut self) {
        let speed = self.config.speed;
        let playing_audio = if self.has_audio() {
            let buffered = AudioTiming::query(self.audio_out.as_deref()).buffered();
            self.written_audio_pts
                .zip(buffered)
                .map(|(written, buffered)| written - speed * buffered)
        } else {
            None
        };
        let dropped = self.pacer.total_dropped();
        self.drift
            .update_av_difference(&mut self.sync, playing_audio, self.last_vo_pts, speed, dropped);
    }

    /// Pause while the stream cache is nearly empty; resume once it has
    /// recovered, honouring the user pause flag
    fn handle_pause_on_low_cache(&mut self) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        if self.state.is_backstepping() {
            return;
        }
        let fill = cache.cache_fill_percent();
        let idle = cache.cache_is_idle();

        if self.state.is_paused_for_cache() {
            if fill.map_or(true, |f| f >= self.config.cache_resume_percent) || idle {
                info!("Cache recovered ({:?}%), resuming", fill);
                let next = self.state.on_cache_recovered(self.user_paused);
                self.set_state(next);
            }
        } else if let Some(fill) = fill {
            if fill <= self.config.cache_pause_percent && !idle {
                info!("Cache at {}%, pausing until it refills", fill);
                let next = self.state.on_cache_low();
                self.set_state(next);
            }
        }
    }
}
