//! Playback simulator (frameloop-sim) - Main entry point
//!
//! Plays a synthetic stream through the playback core using the simulated
//! backends, applying a script of seeks, pauses and steps given on the
//! command line, and reports the resulting events.
//!
//! By default time is simulated: sleeps advance a manual clock and a ten
//! second stream finishes instantly. `--real-time` uses the system clock.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use frameloop_common::config::{resolve_config_path, CONFIG_ENV_VAR};
use frameloop_common::human_time::{format_pts, format_pts_opt};
use frameloop_core::backend::sim::{SimAudioOutput, SimCache, SimSource, SimStreamSpec, SimVideoOutput};
use frameloop_core::backend::{SourceId, Track, TrackKind};
use frameloop_core::seek::{Chapter, ChapterList, SeekPrecision, SeekRequest, SeekTarget, Timeline, TimelinePart};
use frameloop_core::timing::{ManualTimeSource, SystemTimeSource, TimeSource};
use frameloop_core::{FrameloopConfig, PlaybackEvent, PlaybackSession};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for frameloop-sim
#[derive(Parser, Debug)]
#[command(name = "frameloop-sim")]
#[command(about = "Drive the frameloop playback core with a synthetic stream")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to FRAMELOOP_CONFIG, then the platform config locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Video frame rate
    #[arg(long, default_value = "25")]
    fps: f64,

    /// Stream duration in seconds
    #[arg(short, long, default_value = "10")]
    duration: f64,

    /// Split the stream into this many timeline parts, one source each
    #[arg(long, default_value = "1")]
    parts: usize,

    /// Place a chapter mark every this many seconds
    #[arg(long)]
    chapter_every: Option<f64>,

    /// Play video only
    #[arg(long)]
    no_audio: bool,

    /// Play audio only
    #[arg(long)]
    no_video: bool,

    /// Use the system clock instead of simulated time
    #[arg(long, env = "FRAMELOOP_REAL_TIME")]
    real_time: bool,

    /// Scripted seek, "AT:KIND:VALUE" with KIND one of abs, exact, rel, frac, chapter
    /// (e.g. "2.0:abs:7.5"); AT is seconds of loop time
    #[arg(long = "seek", value_name = "AT:KIND:VALUE")]
    seeks: Vec<ScriptedSeek>,

    /// Pause at this loop time
    #[arg(long, value_name = "AT")]
    pause_at: Vec<f64>,

    /// Unpause at this loop time
    #[arg(long, value_name = "AT")]
    resume_at: Vec<f64>,

    /// Step one frame forward at this loop time
    #[arg(long, value_name = "AT")]
    step_at: Vec<f64>,

    /// Step one frame back at this loop time
    #[arg(long, value_name = "AT")]
    backstep_at: Vec<f64>,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json_events: bool,

    /// Stop after this many loop iterations
    #[arg(long, default_value = "100000")]
    max_iterations: u64,

    /// Stop after this much loop time even if playback has not ended
    #[arg(long)]
    max_time: Option<f64>,
}

/// One scripted seek
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScriptedSeek {
    at: f64,
    request: SeekRequest,
}

impl FromStr for ScriptedSeek {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut fields = s.splitn(3, ':');
        let (Some(at), Some(kind), Some(value)) = (fields.next(), fields.next(), fields.next()) else {
            return Err(format!("expected AT:KIND:VALUE, got {:?}", s));
        };
        let at: f64 = at.parse().map_err(|e| format!("bad time {:?}: {}", at, e))?;
        let number = || value.parse::<f64>().map_err(|e| format!("bad value {:?}: {}", value, e));
        let request = match kind {
            "abs" => SeekRequest::absolute(number()?),
            "exact" => SeekRequest::exact(number()?),
            "rel" => SeekRequest::relative(number()?),
            "frac" => SeekRequest::new(SeekTarget::Fractional(number()?), SeekPrecision::Default),
            "chapter" => {
                let index = value.parse::<usize>().map_err(|e| format!("bad chapter {:?}: {}", value, e))?;
                SeekRequest::new(SeekTarget::Chapter(index), SeekPrecision::Default)
            }
            other => return Err(format!("unknown seek kind {:?}", other)),
        };
        Ok(ScriptedSeek { at, request })
    }
}

/// Scripted input, fired once its loop time has passed
#[derive(Debug, Clone, Copy)]
enum Action {
    Seek(SeekRequest),
    Pause,
    Resume,
    Step,
    Backstep,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), CONFIG_ENV_VAR);
    let config = FrameloopConfig::load(config_path.as_deref())
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    init_tracing(&config)?;
    info!("Starting frameloop-sim");
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    if !(args.fps.is_finite() && args.fps > 0.0) {
        bail!("--fps must be positive, got {}", args.fps);
    }
    if !(args.duration.is_finite() && args.duration > 0.0) {
        bail!("--duration must be positive, got {}", args.duration);
    }
    if args.parts == 0 {
        bail!("--parts must be at least 1");
    }
    if args.no_audio && args.no_video {
        bail!("--no-audio and --no-video leave nothing to play");
    }

    if args.real_time {
        run(&args, config, SystemTimeSource::new())
    } else {
        run(&args, config, ManualTimeSource::new())
    }
}

fn init_tracing(config: &FrameloopConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level in configuration")?;

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };
    let stderr_layer = file_layer
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn run<T: TimeSource + Clone + 'static>(args: &Args, config: FrameloopConfig, time: T) -> Result<()> {
    let spec = SimStreamSpec {
        fps: args.fps,
        duration: args.duration / args.parts as f64,
        has_video: !args.no_video,
        has_audio: !args.no_audio,
        ..Default::default()
    };

    let mut builder = PlaybackSession::builder(config.playback, time.clone()).cache(SimCache::new());
    for _ in 0..args.parts {
        builder = builder.source(SimSource::new(spec.clone()));
    }
    if args.parts > 1 {
        let parts = (0..args.parts)
            .map(|i| TimelinePart::new(SourceId(i), i as f64 * spec.duration, 0.0))
            .collect();
        builder = builder.timeline(Timeline::new(parts, args.duration).context("Failed to build timeline")?);
    }
    if let Some(every) = args.chapter_every.filter(|e| *e > 0.0) {
        let count = (args.duration / every).ceil() as usize;
        let chapters = (0..count)
            .map(|i| Chapter::new(i as f64 * every, Some(format!("Chapter {}", i + 1))))
            .collect();
        builder = builder.chapters(ChapterList::new(chapters));
    }

    let video = SimVideoOutput::new();
    if !args.no_video {
        builder = builder.video(Track::main(TrackKind::Video, SourceId(0)), video.clone());
    }
    if !args.no_audio {
        builder = builder.audio(Track::main(TrackKind::Audio, SourceId(0)), SimAudioOutput::new(time.clone()));
    }

    let mut session = builder.build().context("Failed to build playback session")?;

    let mut script: Vec<(f64, Action)> = args.seeks.iter().map(|s| (s.at, Action::Seek(s.request))).collect();
    script.extend(args.pause_at.iter().map(|&at| (at, Action::Pause)));
    script.extend(args.resume_at.iter().map(|&at| (at, Action::Resume)));
    script.extend(args.step_at.iter().map(|&at| (at, Action::Step)));
    script.extend(args.backstep_at.iter().map(|&at| (at, Action::Backstep)));
    script.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut script = script.into_iter().peekable();

    let start_us = time.now_us();
    let elapsed = || (time.now_us() - start_us) as f64 / 1e6;

    let mut iterations = 0u64;
    let mut deferred: Option<SeekRequest> = None;
    loop {
        while let Some(&(at, action)) = script.peek() {
            if at > elapsed() {
                break;
            }
            script.next();
            debug!("Script at {:.3}s: {:?}", at, action);
            match action {
                Action::Seek(request) => deferred = Some(request),
                Action::Pause => session.pause(),
                Action::Resume => session.unpause(),
                Action::Step => session.step_frame(),
                Action::Backstep => {
                    if !session.request_backstep() {
                        warn!("Backstep at {:.3}s rejected in state {}", at, session.state());
                    }
                }
            }
        }
        if let Some(request) = deferred {
            if !session.should_defer_seek() {
                session.queue_seek(request);
                deferred = None;
            }
        }

        let outcome = session.run_iteration().context("Playback failed")?;
        iterations += 1;
        report_events(&mut session, args.json_events)?;

        if outcome.end_of_file && script.peek().is_none() && deferred.is_none() {
            break;
        }
        if iterations >= args.max_iterations {
            warn!("Stopping after {} iterations", iterations);
            break;
        }
        if args.max_time.map_or(false, |max| elapsed() >= max) {
            info!("Stopping after {:.3}s", elapsed());
            break;
        }
        if outcome.end_of_file && !outcome.frame_shown && outcome.idle == 0.0 {
            // Waiting at end of file for scripted input
            if let Some(&(at, _)) = script.peek() {
                time.sleep_us(((at - elapsed()).max(0.0) * 1e6) as i64 + 1);
            }
        }
    }

    info!(
        "Done: {} iterations, {} frames shown, {} dropped, position {}, loop time {}",
        iterations,
        session.shown_frames(),
        session.dropped_frames(),
        format_pts_opt(session.current_position()),
        format_pts(elapsed())
    );
    if !args.no_video {
        info!("Video output received {} frames", video.flip_count());
    }
    Ok(())
}

fn report_events(session: &mut PlaybackSession, json: bool) -> Result<()> {
    for event in session.take_events() {
        if json {
            println!("{}", serde_json::to_string(&event).context("Failed to serialize event")?);
            continue;
        }
        match &event {
            PlaybackEvent::StateChanged { old_state, new_state, .. } => {
                info!("State: {} -> {}", old_state, new_state)
            }
            PlaybackEvent::SeekCompleted { target, generation, exact, .. } => info!(
                "Seek to {} done (generation {}, {})",
                format_pts_opt(*target),
                generation,
                if *exact { "exact" } else { "keyframe" }
            ),
            PlaybackEvent::SeekFailed { reason, message, .. } => warn!("Seek failed ({}): {}", reason, message),
            PlaybackEvent::TimelinePartChanged { part, source, .. } => info!("Timeline part {} ({})", part, source),
            PlaybackEvent::BackstepFailed { message, .. } => warn!("Backstep failed: {}", message),
            PlaybackEvent::EndOfFile { position, .. } => info!("End of file at {}", format_pts_opt(*position)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scripted_seeks() {
        let seek: ScriptedSeek = "1.5:abs:30".parse().unwrap();
        assert_eq!(seek.at, 1.5);
        assert_eq!(seek.request, SeekRequest::absolute(30.0));

        let seek: ScriptedSeek = "0:chapter:2".parse().unwrap();
        assert_eq!(seek.request.target, SeekTarget::Chapter(2));

        let seek: ScriptedSeek = "3:rel:-5".parse().unwrap();
        assert_eq!(seek.request, SeekRequest::relative(-5.0));
    }

    #[test]
    fn test_reject_malformed_seeks() {
        assert!("1.5:abs".parse::<ScriptedSeek>().is_err());
        assert!("x:abs:1".parse::<ScriptedSeek>().is_err());
        assert!("1:sideways:1".parse::<ScriptedSeek>().is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["frameloop-sim", "--parts", "3", "--seek", "1:frac:0.5", "--no-audio"]).unwrap();
        assert_eq!(args.parts, 3);
        assert_eq!(args.seeks.len(), 1);
        assert!(args.no_audio);
    }
}
