//! Playback configuration
//!
//! Loaded from the `[playback]` section of the bootstrap TOML file. Every
//! field has a built-in default, so an empty (or missing) file yields a
//! working configuration.
//!
//! ```toml
//! [logging]
//! level = "info"
//!
//! [playback]
//! speed = 1.0
//! frame_dropping = "vo"
//! hr_seek = "absolute"
//! cache_pause_percent = 10
//! cache_resume_percent = 20
//! ```

use crate::{Error, Result};
use frameloop_common::config::{load_toml, LoggingConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Frame-drop policy when video falls behind audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDropMode {
    /// Never drop; video may fall arbitrarily far behind
    Disabled,
    /// Decode late frames but do not present them
    #[default]
    Vo,
    /// Ask the decoder to skip late frames
    Decoder,
}

/// When to use frame-exact ("hr") seeking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HrSeekPolicy {
    /// Only when the request explicitly asks for exact precision
    Never,
    /// Absolute and chapter seeks, plus explicit exact requests
    #[default]
    Absolute,
    /// Every seek that does not explicitly ask for keyframe precision
    Always,
}

/// Tunables of the playback loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Playback speed multiplier
    pub speed: f64,
    /// Audio delay bias in seconds (positive delays audio relative to video)
    pub audio_delay: f64,
    /// Per-frame cap on drift correction; `None` means 10% of the frame duration
    pub max_pts_correction: Option<f64>,
    /// Smoothing factor for the audio buffer estimate (0 disables)
    pub autosync: u32,
    pub frame_dropping: FrameDropMode,
    pub hr_seek: HrSeekPolicy,
    /// Extra distance the demuxer is moved back for hr-seeks (seconds)
    pub hr_seek_demuxer_offset: f64,
    /// Always ask the demuxer for subtitle preroll
    pub subtitle_preroll: bool,
    /// Keep the video output bound across timeline part switches
    pub fixed_vo: bool,
    /// Keep queued audio across timeline part switches and at end of file
    pub gapless_audio: bool,
    /// Pause for buffering when the cache fill drops to this percentage
    pub cache_pause_percent: u8,
    /// Resume after a buffering pause once the cache reaches this percentage
    pub cache_resume_percent: u8,
    /// Upper bound on a single idle period between iterations (seconds)
    pub wakeup_period: f64,
    /// Busy-wait the last few milliseconds before a flip
    pub softsleep: bool,
    /// Start in the paused state
    pub start_paused: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            audio_delay: 0.0,
            max_pts_correction: None,
            autosync: 0,
            frame_dropping: FrameDropMode::default(),
            hr_seek: HrSeekPolicy::default(),
            hr_seek_demuxer_offset: 0.0,
            subtitle_preroll: false,
            fixed_vo: false,
            gapless_audio: false,
            cache_pause_percent: 10,
            cache_resume_percent: 20,
            wakeup_period: 0.5,
            softsleep: false,
            start_paused: false,
        }
    }
}

impl PlaybackConfig {
    /// Reject values the loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(Error::Config(format!(
                "speed must be finite and positive, got {}",
                self.speed
            )));
        }
        if !self.audio_delay.is_finite() {
            return Err(Error::Config("audio_delay must be finite".to_string()));
        }
        if let Some(max) = self.max_pts_correction {
            if !(max.is_finite() && max >= 0.0) {
                return Err(Error::Config(format!(
                    "max_pts_correction must be finite and non-negative, got {}",
                    max
                )));
            }
        }
        if !(self.hr_seek_demuxer_offset.is_finite() && self.hr_seek_demuxer_offset >= 0.0) {
            return Err(Error::Config(
                "hr_seek_demuxer_offset must be finite and non-negative".to_string(),
            ));
        }
        if self.cache_resume_percent > 100 || self.cache_pause_percent > self.cache_resume_percent {
            return Err(Error::Config(format!(
                "cache thresholds must satisfy pause <= resume <= 100 (pause {}, resume {})",
                self.cache_pause_percent, self.cache_resume_percent
            )));
        }
        if !(self.wakeup_period.is_finite() && self.wakeup_period > 0.0) {
            return Err(Error::Config("wakeup_period must be positive".to_string()));
        }
        Ok(())
    }
}

/// Bootstrap configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FrameloopConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

impl FrameloopConfig {
    /// Load and validate the configuration at `path`.
    ///
    /// A missing file yields defaults; a malformed or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: FrameloopConfig = load_toml(path)?;
        config.playback.validate()?;
        Ok(config)
    }
}
