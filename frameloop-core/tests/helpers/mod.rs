//! Shared fixtures for the session integration tests
//!
//! A [`Harness`] keeps a handle on every simulated backend the session was
//! built with, so tests can script failures and inspect what the core did.

#![allow(dead_code)]

use frameloop_core::backend::sim::{SimAudioOutput, SimCache, SimSource, SimStreamSpec, SimVideoOutput};
use frameloop_core::backend::{SourceId, Track, TrackKind};
use frameloop_core::timing::ManualTimeSource;
use frameloop_core::{IterationOutcome, PlaybackConfig, PlaybackEvent, PlaybackSession, SessionBuilder};

pub struct Harness {
    pub time: ManualTimeSource,
    pub source: SimSource,
    pub video: SimVideoOutput,
    pub audio: SimAudioOutput,
    pub cache: SimCache,
    pub session: PlaybackSession,
}

/// Stream description with the given length, everything else default
pub fn spec(duration: f64) -> SimStreamSpec {
    SimStreamSpec {
        duration,
        ..Default::default()
    }
}

/// Builder with the shared clock, one source, and video/audio as `spec` says
pub fn builder_for(
    config: PlaybackConfig,
    spec: SimStreamSpec,
) -> (SessionBuilder, ManualTimeSource, SimSource, SimVideoOutput, SimAudioOutput, SimCache) {
    let time = ManualTimeSource::new();
    let source = SimSource::new(spec.clone());
    let video = SimVideoOutput::new();
    let audio = SimAudioOutput::new(time.clone());
    let cache = SimCache::new();

    let mut builder = PlaybackSession::builder(config, time.clone())
        .source(source.clone())
        .cache(cache.clone());
    if spec.has_video {
        builder = builder.video(Track::main(TrackKind::Video, SourceId(0)), video.clone());
    }
    if spec.has_audio {
        builder = builder.audio(Track::main(TrackKind::Audio, SourceId(0)), audio.clone());
    }
    (builder, time, source, video, audio, cache)
}

pub fn harness_with(config: PlaybackConfig, spec: SimStreamSpec) -> Harness {
    let (builder, time, source, video, audio, cache) = builder_for(config, spec);
    let session = builder.build().expect("session should build");
    Harness {
        time,
        source,
        video,
        audio,
        cache,
        session,
    }
}

/// Audio + video, 10 seconds at 25 fps
pub fn av_harness() -> Harness {
    harness_with(PlaybackConfig::default(), spec(10.0))
}

/// Video only, 10 seconds at 25 fps
pub fn video_harness() -> Harness {
    harness_with(
        PlaybackConfig::default(),
        SimStreamSpec {
            has_audio: false,
            ..spec(10.0)
        },
    )
}

impl Harness {
    pub fn iterate(&mut self) -> IterationOutcome {
        self.session.run_iteration().expect("iteration should not fail")
    }

    /// Iterate until `done` holds, at most `max` times.
    /// Returns whether `done` was reached.
    pub fn iterate_until<F: FnMut(&PlaybackSession) -> bool>(&mut self, max: usize, mut done: F) -> bool {
        for _ in 0..max {
            if done(&self.session) {
                return true;
            }
            self.iterate();
        }
        done(&self.session)
    }

    /// Iterate until `count` frames have been shown
    pub fn play_frames(&mut self, count: u64) {
        let target = self.session.shown_frames() + count;
        assert!(
            self.iterate_until(count as usize * 20 + 20, |s| s.shown_frames() >= target),
            "expected {} more frames, state {}",
            count,
            self.session.state()
        );
    }

    pub fn events(&mut self) -> Vec<PlaybackEvent> {
        self.session.take_events()
    }
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
