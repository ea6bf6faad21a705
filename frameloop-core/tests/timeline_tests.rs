//! Multi-part timeline playback: part switching on seeks, fall-through at
//! part ends, and seeks past the end of the timeline.

mod helpers;

use frameloop_core::backend::sim::{SimAudioOutput, SimSource, SimVideoOutput};
use frameloop_core::backend::{SourceError, SourceId, Track, TrackKind};
use frameloop_core::seek::{SeekRequest, Timeline, TimelinePart};
use frameloop_core::timing::ManualTimeSource;
use frameloop_core::{PlaybackConfig, PlaybackEvent, PlaybackSession, PlaybackState};
use helpers::spec;

struct TimelineFixture {
    sources: Vec<SimSource>,
    audio: SimAudioOutput,
    session: PlaybackSession,
}

fn build(durations: &[f64], parts: Vec<TimelinePart>, total: f64) -> TimelineFixture {
    let time = ManualTimeSource::new();
    let sources: Vec<SimSource> = durations.iter().map(|&d| SimSource::new(spec(d))).collect();
    let mut builder = PlaybackSession::builder(PlaybackConfig::default(), time.clone());
    for source in &sources {
        builder = builder.source(source.clone());
    }
    let audio = SimAudioOutput::new(time);
    let session = builder
        .timeline(Timeline::new(parts, total).unwrap())
        .video(Track::main(TrackKind::Video, SourceId(0)), SimVideoOutput::new())
        .audio(Track::main(TrackKind::Audio, SourceId(0)), audio.clone())
        .build()
        .unwrap();
    TimelineFixture { sources, audio, session }
}

/// A: 30s, B: 100s. Parts: [0, 30) from A, [30, 70) from B at 5s,
/// [70, 100) from B at 45s.
fn three_parts() -> TimelineFixture {
    build(
        &[30.0, 100.0],
        vec![
            TimelinePart::new(SourceId(0), 0.0, 0.0),
            TimelinePart::new(SourceId(1), 30.0, 5.0),
            TimelinePart::new(SourceId(1), 70.0, 45.0),
        ],
        100.0,
    )
}

fn part_changes(events: &[PlaybackEvent]) -> Vec<(usize, SourceId)> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::TimelinePartChanged { part, source, .. } => Some((*part, *source)),
            _ => None,
        })
        .collect()
}

fn seek_failures(events: &[PlaybackEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::SeekFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .collect()
}

/// Iterate until one more frame has been shown
fn next_frame(session: &mut PlaybackSession) {
    let shown = session.shown_frames();
    for _ in 0..60 {
        if session.shown_frames() > shown {
            return;
        }
        session.run_iteration().unwrap();
    }
    assert!(session.shown_frames() > shown, "no frame shown, state {}", session.state());
}

#[test]
fn test_build_positions_first_part() {
    let fixture = three_parts();
    let seek = fixture.sources[0].last_seek().expect("first part is positioned");
    assert_eq!(seek.target, 0.0);
    assert!(seek.flags.absolute);
    assert_eq!(fixture.session.timeline_part(), Some(0));
    assert!(fixture.sources[0].is_active());
    assert!(!fixture.sources[1].is_active());
}

#[test]
fn test_seek_switches_part_and_source() {
    let mut fixture = three_parts();
    let session = &mut fixture.session;
    session.run_iteration().unwrap();
    session.take_events();

    session.queue_seek(SeekRequest::absolute(45.0));
    session.run_iteration().unwrap();

    assert_eq!(session.timeline_part(), Some(1));
    let seek = fixture.sources[1].last_seek().expect("second source seeked");
    assert_eq!(seek.target, 20.0);
    assert_eq!(part_changes(&session.take_events()), vec![(1, SourceId(1))]);
    assert!(fixture.sources[1].is_active());
    assert!(!fixture.sources[0].is_active());

    // Frames are reported in virtual time
    next_frame(session);
    let displayed = session.displayed_pts().expect("frame shown");
    assert!((displayed - 45.0).abs() < 0.01, "displayed {}", displayed);
}

#[test]
fn test_seek_within_same_source_keeps_decoders() {
    let mut fixture = three_parts();
    let session = &mut fixture.session;
    session.run_iteration().unwrap();
    session.queue_seek(SeekRequest::absolute(45.0));
    session.run_iteration().unwrap();
    session.take_events();

    session.queue_seek(SeekRequest::absolute(80.0));
    session.run_iteration().unwrap();

    assert_eq!(session.timeline_part(), Some(2));
    assert_eq!(fixture.sources[1].last_seek().map(|s| s.target), Some(55.0));
    assert!(part_changes(&session.take_events()).is_empty());
}

#[test]
fn test_seek_beyond_timeline_ends_playback() {
    let mut fixture = three_parts();
    let session = &mut fixture.session;
    session.run_iteration().unwrap();
    session.take_events();

    session.queue_seek(SeekRequest::absolute(150.0));
    let outcome = session.run_iteration().unwrap();
    assert!(outcome.end_of_file);
    assert!(session.is_end_of_file());

    let events = session.take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        PlaybackEvent::SeekFailed { reason, .. } if reason == "timeline_part_unresolvable"
    )));
    assert!(events.iter().any(|e| matches!(e, PlaybackEvent::EndOfFile { .. })));

    // A later seek back into the timeline resumes
    session.queue_seek(SeekRequest::absolute(10.0));
    let outcome = session.run_iteration().unwrap();
    assert!(!outcome.end_of_file);
    assert_eq!(session.timeline_part(), Some(0));
}

#[test]
fn test_playback_falls_through_to_next_part() {
    let mut fixture = build(
        &[1.0, 1.0],
        vec![
            TimelinePart::new(SourceId(0), 0.0, 0.0),
            TimelinePart::new(SourceId(1), 1.0, 0.0),
        ],
        2.0,
    );
    let session = &mut fixture.session;

    let mut events = Vec::new();
    let mut ended = false;
    for _ in 0..5000 {
        let outcome = session.run_iteration().unwrap();
        events.extend(session.take_events());
        if outcome.end_of_file {
            ended = true;
            break;
        }
    }

    assert!(ended);
    assert_eq!(part_changes(&events), vec![(1, SourceId(1))]);
    assert_eq!(session.shown_frames() + session.dropped_frames(), 50);

    // The automatic part switch keeps the generation of the initial seek
    let generations: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            PlaybackEvent::SeekCompleted { generation, .. } => Some(*generation),
            _ => None,
        })
        .collect();
    assert_eq!(generations.len(), 2);
    assert!(generations.iter().all(|&g| g == session.seek_generation()));

    // Second part is decoded from its source start
    let seek = fixture.sources[1].last_seek().expect("second part positioned");
    assert_eq!(seek.target, 0.0);
}

#[test]
fn test_failed_seek_within_source_keeps_current_part() {
    let mut fixture = three_parts();
    let session = &mut fixture.session;
    session.run_iteration().unwrap();
    session.queue_seek(SeekRequest::absolute(45.0));
    session.run_iteration().unwrap();
    next_frame(session);
    next_frame(session);
    let before = session.displayed_pts().expect("frame shown");
    session.take_events();

    fixture.sources[1].fail_next_seek(SourceError::Io("read error".to_string()));
    session.queue_seek(SeekRequest::absolute(80.0));
    session.run_iteration().unwrap();

    assert_eq!(seek_failures(&session.take_events()), vec!["demuxer_seek_failed".to_string()]);
    assert_eq!(session.timeline_part(), Some(1));
    assert_eq!(session.state(), PlaybackState::Playing);

    // The source still plays the old position, reported with the old offset
    next_frame(session);
    let displayed = session.displayed_pts().expect("frame shown");
    assert!(displayed > before && displayed < before + 0.5, "before {} displayed {}", before, displayed);
}

#[test]
fn test_failed_seek_after_source_switch_restarts_new_part() {
    let mut fixture = three_parts();
    let session = &mut fixture.session;
    session.run_iteration().unwrap();
    session.take_events();
    let resets = fixture.audio.resets();

    fixture.sources[1].fail_next_seek(SourceError::Io("read error".to_string()));
    session.queue_seek(SeekRequest::absolute(45.0));
    session.run_iteration().unwrap();

    let events = session.take_events();
    assert_eq!(seek_failures(&events), vec!["demuxer_seek_failed".to_string()]);
    assert_eq!(part_changes(&events), vec![(1, SourceId(1))]);

    // The switch already happened: the new part is restarted in place
    assert_eq!(session.timeline_part(), Some(1));
    assert!(session.state().is_restarting());
    assert!(fixture.sources[1].is_active());
    assert!(!fixture.sources[0].is_active());
    assert!(fixture.audio.resets() > resets);
    assert_eq!(session.drift_delay(), 0.0);

    next_frame(session);
    assert_eq!(session.state(), PlaybackState::Playing);
}
