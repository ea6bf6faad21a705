//! Multi-part timelines
//!
//! A timeline concatenates ranges of one or more sources into a single
//! virtual stream (ordered chapters, edit lists). Each part maps a range of
//! virtual time onto a source; the list ends with a sentinel part whose
//! start is the total duration.

use crate::backend::SourceId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One segment of the virtual timeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimelinePart {
    /// Source that plays this part
    pub source: SourceId,
    /// Start of the part in virtual time
    pub start: f64,
    /// Timestamp inside the source where the part begins
    pub source_start: f64,
}

impl TimelinePart {
    pub fn new(source: SourceId, start: f64, source_start: f64) -> Self {
        Self {
            source,
            start,
            source_start,
        }
    }

    /// Add to a source timestamp to get virtual time
    pub fn video_offset(&self) -> f64 {
        self.start - self.source_start
    }
}

/// Where a virtual timestamp lands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartPosition {
    /// Index of the part containing the timestamp
    pub index: usize,
    /// Equivalent timestamp inside that part's source
    pub local: f64,
}

/// Immutable list of parts terminated by a sentinel
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    parts: Vec<TimelinePart>,
}

impl Timeline {
    /// Build a timeline from `parts` (without sentinel) and the total duration.
    ///
    /// Parts must be non-empty, finite, and ordered by non-decreasing start,
    /// the first starting at zero and none at or beyond `total_duration`.
    pub fn new(parts: Vec<TimelinePart>, total_duration: f64) -> Result<Self> {
        let Some(last) = parts.last().copied() else {
            return Err(Error::BadRequest("timeline needs at least one part".to_string()));
        };
        if !total_duration.is_finite() {
            return Err(Error::BadRequest("timeline duration must be finite".to_string()));
        }
        if parts.first().map(|p| p.start) != Some(0.0) {
            return Err(Error::BadRequest("first timeline part must start at 0".to_string()));
        }
        for pair in parts.windows(2) {
            if !(pair[1].start >= pair[0].start) {
                return Err(Error::BadRequest(format!(
                    "timeline parts out of order: {} after {}",
                    pair[1].start, pair[0].start
                )));
            }
        }
        if parts.iter().any(|p| !p.start.is_finite() || !p.source_start.is_finite()) {
            return Err(Error::BadRequest("timeline part times must be finite".to_string()));
        }
        if last.start >= total_duration {
            return Err(Error::BadRequest(format!(
                "timeline duration {} does not extend past the last part start {}",
                total_duration, last.start
            )));
        }

        let mut parts = parts;
        parts.push(TimelinePart::new(last.source, total_duration, last.source_start + (total_duration - last.start)));
        Ok(Self { parts })
    }

    /// Number of playable parts (sentinel excluded)
    pub fn len(&self) -> usize {
        self.parts.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration(&self) -> f64 {
        self.parts[self.parts.len() - 1].start
    }

    /// Part at `index`, sentinel excluded
    pub fn part(&self, index: usize) -> Option<&TimelinePart> {
        if index < self.len() {
            self.parts.get(index)
        } else {
            None
        }
    }

    /// Playable parts
    pub fn parts(&self) -> &[TimelinePart] {
        &self.parts[..self.len()]
    }

    /// Virtual time at which part `index` ends
    pub fn part_end(&self, index: usize) -> Option<f64> {
        if index < self.len() {
            Some(self.parts[index + 1].start)
        } else {
            None
        }
    }

    /// Whether part `index` ends before the timeline does
    pub fn has_next_part(&self, index: usize) -> bool {
        index + 1 < self.len()
    }

    /// Find the part containing virtual time `pts`.
    ///
    /// Negative times resolve to the start. Times at or beyond the end have
    /// no part.
    pub fn locate(&self, pts: f64) -> Option<PartPosition> {
        if pts.is_nan() {
            return None;
        }
        let pts = pts.max(0.0);
        (0..self.len())
            .find(|&i| pts < self.parts[i + 1].start)
            .map(|index| {
                let part = &self.parts[index];
                PartPosition {
                    index,
                    local: pts - part.start + part.source_start,
                }
            })
    }

    /// Every source referenced by the timeline, in order of first use
    pub fn sources(&self) -> Vec<SourceId> {
        let mut sources = Vec::new();
        for part in self.parts() {
            if !sources.contains(&part.source) {
                sources.push(part.source);
            }
        }
        sources
    }
}
