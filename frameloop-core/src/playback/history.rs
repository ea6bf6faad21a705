//! Shown-frame history
//!
//! Fixed circular array of the last [`HISTORY_LEN`] frame timestamps, each
//! tagged with the seek generation it was decoded in. Backstepping uses it
//! to find the frame before the one on screen; a predecessor only counts if
//! it belongs to the same generation (no seek or discontinuity in between).

/// Frames remembered
pub const HISTORY_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimingSample {
    pub pts: f64,
    pub generation: u64,
}

#[derive(Debug, Clone)]
pub struct FrameHistory {
    samples: [FrameTimingSample; HISTORY_LEN],
    /// Slot the next sample is written to
    head: usize,
    len: usize,
    generation: u64,
}

impl Default for FrameHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHistory {
    pub fn new() -> Self {
        Self {
            samples: [FrameTimingSample {
                pts: 0.0,
                generation: 0,
            }; HISTORY_LEN],
            head: 0,
            len: 0,
            generation: 1,
        }
    }

    /// Current seek generation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Start a new generation; older samples no longer chain to new ones
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Record a decoded frame.
    ///
    /// A missing pts or a frame flagged as discontinuous starts a new
    /// generation instead of being recorded.
    pub fn push(&mut self, pts: Option<f64>, discontinuity: bool) {
        match pts.filter(|p| p.is_finite()) {
            Some(pts) if !discontinuity => {
                self.samples[self.head] = FrameTimingSample {
                    pts,
                    generation: self.generation,
                };
                self.head = (self.head + 1) % HISTORY_LEN;
                self.len = (self.len + 1).min(HISTORY_LEN);
            }
            _ => {
                self.bump_generation();
            }
        }
    }

    /// Sample `age` entries back (0 = newest)
    fn at(&self, age: usize) -> Option<&FrameTimingSample> {
        if age >= self.len {
            return None;
        }
        Some(&self.samples[(self.head + HISTORY_LEN - 1 - age) % HISTORY_LEN])
    }

    /// Samples from newest to oldest
    pub fn newest_first(&self) -> impl Iterator<Item = &FrameTimingSample> + '_ {
        (0..self.len).filter_map(move |age| self.at(age))
    }

    /// pts of the frame decoded right before the one with `pts`, if both
    /// belong to the same generation
    pub fn find_previous(&self, pts: f64) -> Option<f64> {
        (0..self.len.saturating_sub(1)).find_map(|age| {
            let sample = self.at(age)?;
            let previous = self.at(age + 1)?;
            (sample.pts == pts && sample.generation == previous.generation).then_some(previous.pts)
        })
    }

    /// Newest recorded pts, if it belongs to the current generation
    pub fn last_frame_pts(&self) -> Option<f64> {
        self.at(0)
            .filter(|s| s.generation == self.generation)
            .map(|s| s.pts)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_previous_same_generation() {
        let mut history = FrameHistory::new();
        for pts in [1.0, 1.04, 1.08] {
            history.push(Some(pts), false);
        }

        assert_eq!(history.find_previous(1.08), Some(1.04));
        assert_eq!(history.find_previous(1.04), Some(1.0));
        assert_eq!(history.find_previous(1.0), None);
        assert_eq!(history.last_frame_pts(), Some(1.08));
    }

    #[test]
    fn test_generation_break_hides_predecessor() {
        let mut history = FrameHistory::new();
        history.push(Some(5.0), false);
        history.bump_generation();
        history.push(Some(5.04), false);

        assert_eq!(history.find_previous(5.04), None);
        assert_eq!(history.last_frame_pts(), Some(5.04));

        history.bump_generation();
        assert_eq!(history.last_frame_pts(), None);
    }

    #[test]
    fn test_missing_pts_starts_new_generation() {
        let mut history = FrameHistory::new();
        let before = history.generation();
        history.push(None, false);
        history.push(Some(1.0), true);

        assert_eq!(history.generation(), before + 2);
        assert!(history.is_empty());
    }

    #[test]
    fn test_ring_wraps() {
        let mut history = FrameHistory::new();
        for i in 0..(HISTORY_LEN + 10) {
            history.push(Some(i as f64), false);
        }

        assert_eq!(history.len(), HISTORY_LEN);
        assert_eq!(history.last_frame_pts(), Some((HISTORY_LEN + 9) as f64));
        assert_eq!(history.newest_first().last().map(|s| s.pts), Some(10.0));
        assert_eq!(history.find_previous(10.0), None);
        assert_eq!(history.find_previous(11.0), Some(10.0));
    }
}
