//! Seek coordination tests
//!
//! Drives real sessions over the simulated backends:
//! - Request coalescing as seen from the session
//! - Post-seek reset of timing state
//! - Fractional and chapter target resolution
//! - Failure reporting (demuxer errors, lost streams)
//! - External track seeking

mod helpers;

use frameloop_core::backend::sim::{SimAudioOutput, SimSource, SimVideoOutput};
use frameloop_core::backend::{SourceError, SourceId, Track, TrackKind};
use frameloop_core::config::HrSeekPolicy;
use frameloop_core::seek::{Chapter, ChapterList, SeekPrecision, SeekRequest, SeekTarget};
use frameloop_core::timing::ManualTimeSource;
use frameloop_core::{Error, PlaybackConfig, PlaybackEvent, PlaybackSession, PlaybackState};
use helpers::{approx_eq, av_harness, builder_for, harness_with, spec};

fn seek_failures(events: &[PlaybackEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::SeekFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_opposite_relative_seeks_cancel() {
    let mut h = av_harness();
    h.session.queue_seek(SeekRequest::relative(5.0));
    h.session.queue_seek(SeekRequest::relative(-5.0));
    assert!(!h.session.has_pending_seek());

    let seeks_before = h.source.seeks().len();
    h.iterate();
    assert_eq!(h.source.seeks().len(), seeks_before);
}

#[test]
fn test_relative_seeks_execute_as_one() {
    let mut h = harness_with(
        PlaybackConfig::default(),
        spec(30.0).with_accurate_seek(false),
    );
    h.play_frames(3);

    h.session.queue_seek(SeekRequest::relative(2.0));
    h.session.queue_seek(SeekRequest::relative(3.0));
    h.iterate();

    let seeks = h.source.seeks();
    assert_eq!(seeks.len(), 1);
    assert_eq!(seeks[0].target, 5.0);
    assert!(!seeks[0].flags.absolute);
}

#[test]
fn test_absolute_discards_relative_accumulation() {
    let mut h = av_harness();
    h.play_frames(3);

    h.session.queue_seek(SeekRequest::relative(3.0));
    h.session.queue_seek(SeekRequest::relative(1.0));
    h.session.queue_seek(SeekRequest::absolute(7.0));
    h.iterate();

    let seek = h.source.last_seek().expect("a seek was executed");
    assert_eq!(seek.target, 7.0);
    assert!(seek.flags.absolute);
    assert_eq!(h.source.seeks().len(), 1);
}

#[test]
fn test_successful_seek_resets_timing_state() {
    let mut h = av_harness();
    h.play_frames(10);
    assert!(h.session.drift_delay() != 0.0, "audio is buffered ahead while playing");
    let generation = h.session.seek_generation();

    h.session.queue_seek(SeekRequest::absolute(5.0));
    h.iterate();

    assert_eq!(h.session.drift_delay(), 0.0);
    assert_eq!(h.session.total_correction(), 0.0);
    assert!(matches!(h.session.state(), PlaybackState::RestartingAfterSeek { .. }));
    assert_eq!(h.session.seek_generation(), generation + 1);
    assert!(h.session.skip_filter_active(), "absolute seeks are frame-exact by default");
    assert_eq!(h.session.current_position(), Some(5.0));
}

#[test]
fn test_exact_seek_shows_target_frame_first() {
    let mut h = av_harness();
    h.play_frames(2);

    // 25 fps, keyframes every 12 frames: 5.2s is frame 130, keyframe 120
    h.session.queue_seek(SeekRequest::exact(5.2));
    h.iterate();
    let flips_before = h.video.flip_count();
    h.play_frames(1);

    let flips = h.video.flips();
    let first = flips[flips_before].pts.expect("sim frames carry pts");
    assert!(approx_eq(first, 5.2), "first frame after seek was {}", first);
    assert!(!h.session.skip_filter_active());
    assert_eq!(h.session.state(), PlaybackState::Playing);
}

#[test]
fn test_keyframe_seek_lands_on_keyframe() {
    let mut h = av_harness();
    h.play_frames(2);

    h.session
        .queue_seek(SeekRequest::new(SeekTarget::Absolute(5.2), SeekPrecision::Keyframe));
    h.iterate();
    assert!(!h.session.skip_filter_active());
    h.play_frames(1);

    // Frame 130 rounds to keyframe 132
    let shown = h.session.displayed_pts().expect("frame shown");
    assert!(approx_eq(shown, 132.0 / 25.0), "shown {}", shown);
}

#[test]
fn test_fractional_seek_resolves_against_duration() {
    let mut h = harness_with(PlaybackConfig::default(), spec(100.0));
    h.play_frames(1);
    h.events();

    h.session
        .queue_seek(SeekRequest::new(SeekTarget::Fractional(0.5), SeekPrecision::Default));
    h.iterate();

    let seek = h.source.last_seek().expect("a seek was executed");
    assert_eq!(seek.target, 50.0);
    assert!(!seek.flags.exact, "fractional seeks are never frame-exact");

    let completed = h.events().into_iter().find_map(|e| match e {
        PlaybackEvent::SeekCompleted { target, .. } => Some(target),
        _ => None,
    });
    assert_eq!(completed, Some(Some(50.0)));
}

#[test]
fn test_fractional_seek_needs_reliable_duration() {
    let mut h = harness_with(
        PlaybackConfig::default(),
        spec(100.0).with_timestamps_may_reset(true),
    );
    h.play_frames(1);
    let state = h.session.state();
    h.events();

    h.session
        .queue_seek(SeekRequest::new(SeekTarget::Fractional(0.5), SeekPrecision::Default));
    h.iterate();

    assert_eq!(seek_failures(&h.events()), vec!["unknown_duration".to_string()]);
    assert_eq!(h.session.state(), state);
}

#[test]
fn test_demuxer_failure_leaves_playback_alone() {
    let mut h = av_harness();
    h.play_frames(5);
    let generation = h.session.seek_generation();
    h.events();

    h.source.fail_next_seek(SourceError::Io("read error".to_string()));
    h.session.queue_seek(SeekRequest::absolute(8.0));
    h.iterate();

    assert_eq!(seek_failures(&h.events()), vec!["demuxer_seek_failed".to_string()]);
    assert_eq!(h.session.state(), PlaybackState::Playing);
    assert_eq!(h.session.seek_generation(), generation);

    // Playback carries on from where it was
    let before = h.session.displayed_pts().expect("frame shown");
    h.play_frames(1);
    assert!(h.session.displayed_pts().expect("frame shown") > before);
}

#[test]
fn test_lost_stream_is_returned_as_error() {
    let mut h = av_harness();
    h.play_frames(2);

    h.source.fail_next_seek(SourceError::Irrecoverable("device gone".to_string()));
    h.session.queue_seek(SeekRequest::absolute(3.0));

    let result = h.session.run_iteration();
    assert!(matches!(result, Err(Error::StreamLost(_))), "got {:?}", result);
    assert_eq!(seek_failures(&h.session.take_events()), vec!["stream_lost".to_string()]);
}

#[test]
fn test_chapter_seek_cache() {
    let config = PlaybackConfig {
        hr_seek: HrSeekPolicy::Never,
        ..Default::default()
    };
    let (builder, ..) = builder_for(config, spec(12.0));
    let mut session = builder
        .chapters(ChapterList::new(vec![
            Chapter::new(0.0, Some("Intro".to_string())),
            Chapter::new(4.0, Some("Middle".to_string())),
            Chapter::new(8.0, None),
        ]))
        .build()
        .unwrap();
    for _ in 0..3 {
        session.run_iteration().unwrap();
    }
    assert_eq!(session.current_chapter(), Some(0));

    // Keyframe seek: 4.0s is frame 100, nearest keyframe 96 (3.84s)
    session.seek_chapter(1);
    session.run_iteration().unwrap();
    let shown = session.shown_frames();
    for _ in 0..10 {
        if session.shown_frames() > shown {
            break;
        }
        session.run_iteration().unwrap();
    }
    let displayed = session.displayed_pts().expect("frame shown");
    assert!(displayed < 4.0, "landed at {}", displayed);
    assert_eq!(session.current_chapter(), Some(1));

    // Seeking before the chapter start drops the cache
    session.queue_seek(SeekRequest::absolute(1.0));
    session.run_iteration().unwrap();
    assert_eq!(session.current_chapter(), Some(0));
}

#[test]
fn test_chapter_out_of_range() {
    let mut h = av_harness();
    h.play_frames(1);
    h.events();

    h.session.seek_chapter(3);
    h.iterate();
    assert_eq!(seek_failures(&h.events()), vec!["chapter_out_of_range".to_string()]);
}

#[test]
fn test_external_track_follows_seek() {
    let time = ManualTimeSource::new();
    let main = SimSource::new(spec(10.0).with_audio(false));
    let external = SimSource::new(spec(10.0).with_video(false));
    let mut session = PlaybackSession::builder(PlaybackConfig::default(), time.clone())
        .source(main.clone())
        .source(external.clone())
        .video(Track::main(TrackKind::Video, SourceId(0)), SimVideoOutput::new())
        .audio(Track::external(TrackKind::Audio, SourceId(1)), SimAudioOutput::new(time.clone()))
        .build()
        .unwrap();
    session.run_iteration().unwrap();

    session.queue_seek(SeekRequest::absolute(3.0));
    session.run_iteration().unwrap();

    let seek = external.last_seek().expect("external source was seeked");
    assert_eq!(seek.target, 3.0);
    assert!(seek.flags.absolute);
    assert_eq!(main.last_seek().map(|s| s.target), Some(3.0));
}

#[test]
fn test_seek_input_is_deferred_until_a_frame_is_shown() {
    let mut h = av_harness();
    h.play_frames(2);
    assert!(!h.session.should_defer_seek());

    h.session.queue_seek(SeekRequest::absolute(4.0));
    h.iterate();
    assert!(h.session.should_defer_seek());

    h.play_frames(1);
    assert!(!h.session.should_defer_seek());
}
