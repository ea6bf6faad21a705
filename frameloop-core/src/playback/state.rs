//! Playback state machine
//!
//! **States:**
//! - `Playing`, `Paused`: settled, driven by the user
//! - `PausedForCache`: settled, driven by the stream cache fill level
//! - `RestartingAfterSeek`: waiting for the first frame from the new
//!   position; remembers which settled state to return to
//! - `Backstepping`: stepping one frame back, outputs paused
//!
//! The user pause flag lives outside the enum (on the session), so a
//! cache-induced pause can end in either `Playing` or `Paused`.
//!
//! Transitions are pure functions returning the next state; the session
//! applies them and handles the side effects (pausing outputs, events).

use serde::{Deserialize, Serialize};

/// State the loop returns to after a transient state ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettledState {
    Playing,
    Paused,
    PausedForCache,
}

impl SettledState {
    /// Settled state implied by the user pause flag alone
    pub fn from_user(user_paused: bool) -> Self {
        if user_paused {
            SettledState::Paused
        } else {
            SettledState::Playing
        }
    }
}

impl From<SettledState> for PlaybackState {
    fn from(settled: SettledState) -> Self {
        match settled {
            SettledState::Playing => PlaybackState::Playing,
            SettledState::Paused => PlaybackState::Paused,
            SettledState::PausedForCache => PlaybackState::PausedForCache,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Paused,
    PausedForCache,
    RestartingAfterSeek {
        then: SettledState,
    },
    Backstepping {
        /// Seek generation when the step was requested
        start_generation: u64,
        /// An indexing seek is in flight and its first frame not decoded yet
        restarting: bool,
        /// Indexing seeks performed so far
        index_attempts: u8,
    },
}

impl PlaybackState {
    /// Settled state, if this is one
    pub fn settled(self) -> Option<SettledState> {
        match self {
            PlaybackState::Playing => Some(SettledState::Playing),
            PlaybackState::Paused => Some(SettledState::Paused),
            PlaybackState::PausedForCache => Some(SettledState::PausedForCache),
            _ => None,
        }
    }

    /// Frames do not advance and outputs are paused
    pub fn is_paused(self) -> bool {
        match self {
            PlaybackState::Playing => false,
            PlaybackState::Paused | PlaybackState::PausedForCache | PlaybackState::Backstepping { .. } => true,
            PlaybackState::RestartingAfterSeek { then } => then != SettledState::Playing,
        }
    }

    /// Waiting for the first frame after a seek
    pub fn is_restarting(self) -> bool {
        matches!(
            self,
            PlaybackState::RestartingAfterSeek { .. } | PlaybackState::Backstepping { restarting: true, .. }
        )
    }

    pub fn is_backstepping(self) -> bool {
        matches!(self, PlaybackState::Backstepping { .. })
    }

    /// Paused (now or after restarting) because of the cache
    pub fn is_paused_for_cache(self) -> bool {
        matches!(
            self,
            PlaybackState::PausedForCache
                | PlaybackState::RestartingAfterSeek {
                    then: SettledState::PausedForCache
                }
        )
    }

    /// State after a successful seek. A seek cancels a backstep in progress.
    pub fn after_seek(self, user_paused: bool) -> Self {
        let then = match self {
            PlaybackState::RestartingAfterSeek { then } => then,
            PlaybackState::Backstepping { .. } => SettledState::from_user(user_paused),
            settled => settled.settled().unwrap_or(SettledState::from_user(user_paused)),
        };
        PlaybackState::RestartingAfterSeek { then }
    }

    /// State after the first frame from the new position was shown
    pub fn after_restart(self) -> Self {
        match self {
            PlaybackState::RestartingAfterSeek { then } => then.into(),
            PlaybackState::Backstepping {
                start_generation,
                index_attempts,
                ..
            } => PlaybackState::Backstepping {
                start_generation,
                restarting: false,
                index_attempts,
            },
            other => other,
        }
    }

    pub fn on_user_pause(self) -> Self {
        match self {
            PlaybackState::Playing => PlaybackState::Paused,
            PlaybackState::RestartingAfterSeek {
                then: SettledState::Playing,
            } => PlaybackState::RestartingAfterSeek {
                then: SettledState::Paused,
            },
            other => other,
        }
    }

    /// A cache-induced pause is kept; the user flag decides where it ends.
    pub fn on_user_unpause(self) -> Self {
        match self {
            PlaybackState::Paused => PlaybackState::Playing,
            PlaybackState::RestartingAfterSeek {
                then: SettledState::Paused,
            } => PlaybackState::RestartingAfterSeek {
                then: SettledState::Playing,
            },
            other => other,
        }
    }

    /// Cache fill fell to the low-water mark
    pub fn on_cache_low(self) -> Self {
        match self {
            PlaybackState::Playing | PlaybackState::Paused => PlaybackState::PausedForCache,
            PlaybackState::RestartingAfterSeek { .. } => PlaybackState::RestartingAfterSeek {
                then: SettledState::PausedForCache,
            },
            other => other,
        }
    }

    /// Cache recovered (above the high-water mark, idle, or unknown)
    pub fn on_cache_recovered(self, user_paused: bool) -> Self {
        match self {
            PlaybackState::PausedForCache => SettledState::from_user(user_paused).into(),
            PlaybackState::RestartingAfterSeek {
                then: SettledState::PausedForCache,
            } => PlaybackState::RestartingAfterSeek {
                then: SettledState::from_user(user_paused),
            },
            other => other,
        }
    }

    /// Enter `Backstepping`. Rejected while restarting or already stepping.
    pub fn begin_backstep(self, generation: u64) -> Option<Self> {
        match self {
            PlaybackState::Playing | PlaybackState::Paused | PlaybackState::PausedForCache => {
                Some(PlaybackState::Backstepping {
                    start_generation: generation,
                    restarting: false,
                    index_attempts: 0,
                })
            }
            PlaybackState::RestartingAfterSeek { .. } | PlaybackState::Backstepping { .. } => None,
        }
    }

    /// Leave `Backstepping` without a seek (failure)
    pub fn end_backstep(self, user_paused: bool) -> Self {
        match self {
            PlaybackState::Backstepping { .. } => SettledState::from_user(user_paused).into(),
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::PausedForCache => "paused_for_cache",
            PlaybackState::RestartingAfterSeek { .. } => "restarting_after_seek",
            PlaybackState::Backstepping { .. } => "backstepping",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
