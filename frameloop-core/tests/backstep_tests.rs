//! Backward frame stepping over the simulated backends

mod helpers;

use frameloop_core::{PlaybackConfig, PlaybackEvent, PlaybackState};
use helpers::{approx_eq, av_harness, harness_with, spec, video_harness, Harness};

fn backstep_failures(events: &[PlaybackEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::BackstepFailed { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// Iterate `count` times, collecting every event
fn collect(h: &mut Harness, count: usize) -> Vec<PlaybackEvent> {
    let mut events = Vec::new();
    for _ in 0..count {
        h.iterate();
        events.extend(h.events());
    }
    events
}

#[test]
fn test_backstep_shows_previous_frame() {
    let mut h = video_harness();
    h.play_frames(20);
    assert!(approx_eq(h.session.displayed_pts().unwrap(), 19.0 / 25.0));

    h.session.pause();
    assert!(h.session.request_backstep());
    assert!(h.session.state().is_backstepping());

    let shown = h.session.shown_frames();
    assert!(h.iterate_until(40, |s| s.state() == PlaybackState::Paused && s.shown_frames() > shown));

    let displayed = h.session.displayed_pts().expect("frame shown");
    assert!(approx_eq(displayed, 18.0 / 25.0), "displayed {}", displayed);
    assert!(backstep_failures(&h.events()).is_empty());

    let seek = h.source.last_seek().expect("backstep seeks");
    assert!(seek.flags.exact);
}

#[test]
fn test_repeated_backsteps_walk_backwards() {
    let mut h = video_harness();
    h.play_frames(30);
    h.session.pause();

    for expected in [28, 27, 26] {
        assert!(h.session.request_backstep());
        let shown = h.session.shown_frames();
        assert!(h.iterate_until(60, |s| s.state() == PlaybackState::Paused && s.shown_frames() > shown));
        let displayed = h.session.displayed_pts().expect("frame shown");
        assert!(
            approx_eq(displayed, expected as f64 / 25.0),
            "expected frame {}, displayed {}",
            expected,
            displayed
        );
    }
    assert!(backstep_failures(&h.events()).is_empty());
}

#[test]
fn test_backstep_while_playing_resumes_playing() {
    let mut h = video_harness();
    h.play_frames(10);

    assert!(h.session.request_backstep());
    let shown = h.session.shown_frames();
    assert!(h.iterate_until(40, |s| {
        !s.state().is_restarting() && !s.state().is_backstepping() && s.shown_frames() > shown
    }));

    // Without a user pause the step resumes playback from the earlier frame
    assert_eq!(h.session.state(), PlaybackState::Playing);
    assert!(!h.session.is_user_paused());
}

#[test]
fn test_backstep_from_first_frame_fails_and_returns() {
    let mut h = video_harness();
    h.play_frames(1);
    h.session.pause();
    assert_eq!(h.session.displayed_pts(), Some(0.0));
    h.events();

    assert!(h.session.request_backstep());
    let events = collect(&mut h, 3);
    assert_eq!(backstep_failures(&events).len(), 1, "events: {:?}", events);
    assert!(h.iterate_until(20, |s| s.state() == PlaybackState::Paused));
    assert_eq!(h.session.displayed_pts(), Some(0.0));
    assert!(!h.session.state().is_backstepping());
}

#[test]
fn test_backstep_needs_accurate_seeking() {
    let mut h = harness_with(
        PlaybackConfig::default(),
        spec(10.0).with_audio(false).with_accurate_seek(false),
    );
    h.play_frames(5);
    h.session.pause();
    let displayed = h.session.displayed_pts();
    h.events();

    assert!(h.session.request_backstep());
    let events = collect(&mut h, 1);
    assert_eq!(backstep_failures(&events).len(), 1);
    assert_eq!(h.session.state(), PlaybackState::Paused);
    assert_eq!(h.session.displayed_pts(), displayed);
}

#[test]
fn test_backstep_rejected_while_restarting() {
    let mut h = video_harness();
    assert!(h.session.state().is_restarting());
    assert!(!h.session.request_backstep());

    h.play_frames(2);
    assert!(h.session.request_backstep());
    assert!(!h.session.request_backstep(), "already stepping");
}

#[test]
fn test_backstep_rejected_without_video() {
    let mut h = harness_with(PlaybackConfig::default(), spec(10.0).with_video(false));
    for _ in 0..3 {
        h.iterate();
    }
    assert!(!h.session.request_backstep());
}

#[test]
fn test_backstep_with_audio() {
    let mut h = av_harness();
    h.play_frames(15);
    h.session.pause();

    assert!(h.session.request_backstep());
    let shown = h.session.shown_frames();
    assert!(h.iterate_until(40, |s| s.state() == PlaybackState::Paused && s.shown_frames() > shown));
    let displayed = h.session.displayed_pts().expect("frame shown");
    assert!(approx_eq(displayed, 13.0 / 25.0), "displayed {}", displayed);
}
