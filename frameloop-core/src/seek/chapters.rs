//! Chapter list and chapter-seek cache
//!
//! After a chapter seek the player reports the chapter it seeked to, even
//! though the first frames shown may still carry timestamps from the end of
//! the previous chapter (keyframe seeks, timestamp rounding). The cache is
//! dropped by seeks that may land before the cached chapter: fractional
//! seeks, backward relative seeks, and absolute seeks before its start.

use crate::error::SeekError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Start time in seconds (virtual timeline)
    pub start: f64,
    pub title: Option<String>,
}

impl Chapter {
    pub fn new(start: f64, title: Option<String>) -> Self {
        Self { start, title }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChapterList {
    chapters: Vec<Chapter>,
    /// Index and start of the last chapter seeked to
    last_seek: Option<(usize, f64)>,
}

impl ChapterList {
    /// Chapters are sorted by start time; non-finite starts are discarded
    pub fn new(mut chapters: Vec<Chapter>) -> Self {
        chapters.retain(|c| c.start.is_finite());
        chapters.sort_by(|a, b| a.start.total_cmp(&b.start));
        Self {
            chapters,
            last_seek: None,
        }
    }

    pub fn len(&self) -> usize {
        self.chapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index)
    }

    /// Start time of chapter `index`
    pub fn start_of(&self, index: usize) -> Result<f64, SeekError> {
        self.chapters
            .get(index)
            .map(|c| c.start)
            .ok_or(SeekError::ChapterOutOfRange(index))
    }

    /// Remember a completed chapter seek
    pub fn note_seek(&mut self, index: usize, start: f64) {
        self.last_seek = Some((index, start));
    }

    pub fn invalidate_seek_cache(&mut self) {
        self.last_seek = None;
    }

    /// Drop the cache if a seek to absolute `target` may land before the
    /// cached chapter
    pub fn invalidate_before(&mut self, target: f64) {
        if matches!(self.last_seek, Some((_, start)) if target < start) {
            self.last_seek = None;
        }
    }

    pub fn cached_seek(&self) -> Option<usize> {
        self.last_seek.map(|(index, _)| index)
    }

    /// Chapter playing at `pts`: the last chapter starting at or before
    /// `pts`, or the cached chapter-seek target if that is later.
    pub fn current(&self, pts: Option<f64>) -> Option<usize> {
        let by_position = pts.and_then(|pts| self.chapters.iter().rposition(|c| c.start <= pts));
        by_position.max(self.cached_seek())
    }
}
