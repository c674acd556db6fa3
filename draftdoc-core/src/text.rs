//! Text records and run maintenance.
//!
//! Runs address the content by byte range. The run list stays sorted, does
//! not overlap and covers the whole content; an empty content keeps a single
//! zero-length run so that the next insertion inherits its style.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use glam::Vec2;

use crate::geometry::{Bounds2D, Point2};
use crate::style::PackedColor;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct TextStyleFlags: u8 {
        const BOLD = 1 << 0;
        const ITALIC = 1 << 1;
        const UNDERLINE = 1 << 2;
        const STRIKE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextBoxMode {
    #[default]
    AutoWidth = 0,
    FixedWidth = 1,
}

impl TextBoxMode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::AutoWidth),
            1 => Some(Self::FixedWidth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum TextAlign {
    #[default]
    Left = 0,
    Center = 1,
    Right = 2,
}

impl TextAlign {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Left),
            1 => Some(Self::Center),
            2 => Some(Self::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub start: u32,
    pub len: u32,
    pub font_id: u32,
    pub size: f32,
    pub color: PackedColor,
    pub flags: TextStyleFlags,
}

impl TextRun {
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    fn same_style(&self, other: &TextRun) -> bool {
        self.font_id == other.font_id
            && self.size == other.size
            && self.color == other.color
            && self.flags == other.flags
    }
}

impl Default for TextRun {
    fn default() -> Self {
        Self {
            start: 0,
            len: 0,
            font_id: 0,
            size: 16.0,
            color: PackedColor::BLACK,
            flags: TextStyleFlags::empty(),
        }
    }
}

/// Cached output of the external shaper, in the text's local frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextLayout {
    pub width: f32,
    pub height: f32,
    pub line_height: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRecord {
    /// Top-left anchor of the text box.
    pub origin: Point2,
    pub rotation: f32,
    pub box_mode: TextBoxMode,
    pub align: TextAlign,
    pub constraint_width: f32,
    pub content: String,
    pub runs: Vec<TextRun>,
    pub layout: TextLayout,
    pub elevation: f32,
}

impl TextRecord {
    pub fn new(origin: Point2, content: impl Into<String>) -> Self {
        let content = content.into();
        let runs = vec![TextRun {
            len: content.len() as u32,
            ..TextRun::default()
        }];
        Self {
            origin,
            rotation: 0.0,
            box_mode: TextBoxMode::AutoWidth,
            align: TextAlign::Left,
            constraint_width: 0.0,
            content,
            runs,
            layout: TextLayout::default(),
            elevation: 0.0,
        }
    }

    /// Local box corners (BL, BR, TR, TL) relative to the origin, unrotated.
    pub fn local_corners(&self) -> [Vec2; 4] {
        let (w, h) = (self.layout.width, self.layout.height);
        [
            Vec2::new(0.0, -h),
            Vec2::new(w, -h),
            Vec2::new(w, 0.0),
            Vec2::new(0.0, 0.0),
        ]
    }

    /// World-space corners of the laid-out box (BL, BR, TR, TL).
    pub fn corners(&self) -> [Point2; 4] {
        self.local_corners()
            .map(|local| Point2::from_local(local, self.origin, self.rotation))
    }

    pub fn bounds(&self) -> Bounds2D {
        Bounds2D::from_points(self.corners())
    }

    /// Maps a world point into the box frame: x grows right from the origin, y grows up.
    pub fn to_local(&self, point: Point2) -> Vec2 {
        point.to_local(self.origin, self.rotation)
    }

    /// Repairs a caller-supplied run list so that it covers the content.
    pub fn normalize_runs(&mut self) {
        let len = self.content.len() as u32;
        let template = self.runs.first().copied().unwrap_or_default();
        self.runs.sort_by_key(|run| run.start);
        let mut cursor = 0u32;
        let mut fixed: Vec<TextRun> = Vec::with_capacity(self.runs.len());
        for run in &self.runs {
            let start = run.start.max(cursor).min(len);
            let end = run.end().min(len);
            if end <= start {
                continue;
            }
            if start > cursor {
                let filler = fixed.last().copied().unwrap_or(template);
                fixed.push(TextRun {
                    start: cursor,
                    len: start - cursor,
                    ..filler
                });
            }
            fixed.push(TextRun {
                start,
                len: end - start,
                ..*run
            });
            cursor = end;
        }
        if cursor < len || fixed.is_empty() {
            let filler = fixed.last().copied().unwrap_or(template);
            fixed.push(TextRun {
                start: cursor,
                len: len - cursor,
                ..filler
            });
        }
        self.runs = fixed;
        merge_adjacent(&mut self.runs);
    }

    pub fn insert_content(&mut self, index: u32, text: &str) -> Result<(), TextEditError> {
        self.check_boundary(index)?;
        if text.is_empty() {
            return Ok(());
        }
        let added = text.len() as u32;
        self.content.insert_str(index as usize, text);

        let host = self
            .runs
            .iter()
            .position(|run| run.start < index && index <= run.end())
            .or_else(|| self.runs.iter().position(|run| run.start == index))
            .unwrap_or(0);
        if self.runs.is_empty() {
            self.runs.push(TextRun::default());
        }
        for (i, run) in self.runs.iter_mut().enumerate() {
            if i == host {
                run.len += added;
            } else if i > host {
                run.start += added;
            }
        }
        Ok(())
    }

    pub fn delete_content(&mut self, start: u32, end: u32) -> Result<(), TextEditError> {
        if start > end {
            return Err(TextEditError::InvertedRange { start, end });
        }
        self.check_boundary(start)?;
        self.check_boundary(end)?;
        if start == end {
            return Ok(());
        }
        let removed = end - start;
        self.content.replace_range(start as usize..end as usize, "");

        let carrier = self
            .runs
            .iter()
            .find(|run| run.end() > start)
            .or(self.runs.first())
            .copied()
            .unwrap_or_default();
        for run in &mut self.runs {
            let overlap = run.end().min(end).saturating_sub(run.start.max(start));
            let new_start = if run.start >= end {
                run.start - removed
            } else if run.start > start {
                start
            } else {
                run.start
            };
            run.start = new_start;
            run.len -= overlap;
        }
        self.runs.retain(|run| run.len > 0);
        if self.runs.is_empty() {
            self.runs.push(TextRun {
                start: 0,
                len: 0,
                ..carrier
            });
        }
        merge_adjacent(&mut self.runs);
        Ok(())
    }

    /// Applies `op` for `flags` over `[start, end)`. A collapsed range only
    /// affects an empty text, where it restyles the carrier run.
    pub fn apply_style(
        &mut self,
        start: u32,
        end: u32,
        flags: TextStyleFlags,
        op: TextStyleOp,
    ) -> Result<bool, TextEditError> {
        if start > end {
            return Err(TextEditError::InvertedRange { start, end });
        }
        self.check_boundary(start)?;
        self.check_boundary(end)?;
        if start == end {
            if !self.content.is_empty() {
                return Ok(false);
            }
            let Some(run) = self.runs.first_mut() else {
                return Ok(false);
            };
            let before = run.flags;
            run.flags = op.apply(run.flags, flags, run.flags.contains(flags));
            return Ok(before != run.flags);
        }

        self.split_at(start);
        self.split_at(end);
        let covered: Vec<usize> = self
            .runs
            .iter()
            .enumerate()
            .filter(|(_, run)| run.start >= start && run.end() <= end)
            .map(|(i, _)| i)
            .collect();
        // Toggle resolves against the whole range, not per run.
        let all_on = covered
            .iter()
            .all(|&i| self.runs[i].flags.contains(flags));
        let mut changed = false;
        for i in covered {
            let run = &mut self.runs[i];
            let next = op.apply(run.flags, flags, all_on);
            changed |= next != run.flags;
            run.flags = next;
        }
        merge_adjacent(&mut self.runs);
        Ok(changed)
    }

    pub fn style_summary(&self, start: u32, end: u32) -> TextStyleSummary {
        let hits: Vec<&TextRun> = if start == end {
            self.runs
                .iter()
                .find(|run| run.start < start && start <= run.end())
                .or_else(|| self.runs.iter().find(|run| run.start == start))
                .into_iter()
                .collect()
        } else {
            self.runs
                .iter()
                .filter(|run| run.start < end && run.end() > start)
                .collect()
        };
        let state = |flag: TextStyleFlags| {
            let on = hits.iter().filter(|run| run.flags.contains(flag)).count();
            TriState::from_counts(on, hits.len())
        };
        TextStyleSummary {
            bold: state(TextStyleFlags::BOLD),
            italic: state(TextStyleFlags::ITALIC),
            underline: state(TextStyleFlags::UNDERLINE),
            strike: state(TextStyleFlags::STRIKE),
        }
    }

    fn split_at(&mut self, pos: u32) {
        let Some(i) = self
            .runs
            .iter()
            .position(|run| run.start < pos && pos < run.end())
        else {
            return;
        };
        let head = self.runs[i];
        let tail = TextRun {
            start: pos,
            len: head.end() - pos,
            ..head
        };
        self.runs[i].len = pos - head.start;
        self.runs.insert(i + 1, tail);
    }

    fn check_boundary(&self, index: u32) -> Result<(), TextEditError> {
        let len = self.content.len() as u32;
        if index > len {
            return Err(TextEditError::OutOfBounds { index, len });
        }
        if !self.content.is_char_boundary(index as usize) {
            return Err(TextEditError::NotCharBoundary { index });
        }
        Ok(())
    }
}

fn merge_adjacent(runs: &mut Vec<TextRun>) {
    let mut merged: Vec<TextRun> = Vec::with_capacity(runs.len());
    for run in runs.drain(..) {
        match merged.last_mut() {
            Some(prev) if prev.end() == run.start && prev.same_style(&run) => prev.len += run.len,
            _ => merged.push(run),
        }
    }
    *runs = merged;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextStyleOp {
    Set,
    Clear,
    Toggle,
}

impl TextStyleOp {
    fn apply(self, current: TextStyleFlags, flags: TextStyleFlags, all_on: bool) -> TextStyleFlags {
        match self {
            TextStyleOp::Set => current | flags,
            TextStyleOp::Clear => current - flags,
            TextStyleOp::Toggle if all_on => current - flags,
            TextStyleOp::Toggle => current | flags,
        }
    }
}

/// Resolved value of one style flag over a range of runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    Off,
    On,
    Mixed,
}

impl TriState {
    fn from_counts(on: usize, total: usize) -> Self {
        if on == 0 {
            TriState::Off
        } else if on == total {
            TriState::On
        } else {
            TriState::Mixed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextStyleSummary {
    pub bold: TriState,
    pub italic: TriState,
    pub underline: TriState,
    pub strike: TriState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextEditError {
    #[error("byte index {index} is past the end of a {len}-byte text")]
    OutOfBounds { index: u32, len: u32 },
    #[error("byte index {index} does not fall on a character boundary")]
    NotCharBoundary { index: u32 },
    #[error("range start {start} is after its end {end}")]
    InvertedRange { start: u32, end: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(content: &str) -> TextRecord {
        TextRecord::new(Point2::ORIGIN, content)
    }

    #[test]
    fn insertion_grows_the_run_under_the_caret() {
        let mut text = record("hello");
        text.apply_style(0, 2, TextStyleFlags::BOLD, TextStyleOp::Set)
            .unwrap();
        text.insert_content(2, "XY").unwrap();
        assert_eq!(text.content, "heXYllo");
        assert_eq!(text.runs.len(), 2);
        assert_eq!((text.runs[0].start, text.runs[0].len), (0, 4));
        assert!(text.runs[0].flags.contains(TextStyleFlags::BOLD));
        assert_eq!((text.runs[1].start, text.runs[1].len), (4, 3));
    }

    #[test]
    fn deleting_everything_keeps_a_style_carrier() {
        let mut text = record("abc");
        text.apply_style(0, 3, TextStyleFlags::ITALIC, TextStyleOp::Set)
            .unwrap();
        text.delete_content(0, 3).unwrap();
        assert!(text.content.is_empty());
        assert_eq!(text.runs.len(), 1);
        assert_eq!(text.runs[0].len, 0);
        assert!(text.runs[0].flags.contains(TextStyleFlags::ITALIC));

        text.insert_content(0, "z").unwrap();
        assert_eq!(text.runs[0].len, 1);
        assert!(text.runs[0].flags.contains(TextStyleFlags::ITALIC));
    }

    #[test]
    fn deletion_across_runs_shifts_followers() {
        let mut text = record("aaabbbccc");
        text.apply_style(3, 6, TextStyleFlags::BOLD, TextStyleOp::Set)
            .unwrap();
        assert_eq!(text.runs.len(), 3);
        text.delete_content(2, 7).unwrap();
        assert_eq!(text.content, "aacc");
        let spans: Vec<(u32, u32)> = text.runs.iter().map(|r| (r.start, r.len)).collect();
        // The two plain remnants become neighbours and merge.
        assert_eq!(spans, vec![(0, 4)]);
    }

    #[test]
    fn summary_reports_mixed_over_partial_styling() {
        let mut text = record("abcdef");
        text.apply_style(0, 3, TextStyleFlags::BOLD, TextStyleOp::Set)
            .unwrap();
        let summary = text.style_summary(0, 6);
        assert_eq!(summary.bold, TriState::Mixed);
        assert_eq!(summary.italic, TriState::Off);
        assert_eq!(text.style_summary(0, 2).bold, TriState::On);
        assert_eq!(text.style_summary(4, 5).bold, TriState::Off);
    }

    #[test]
    fn toggle_over_mixed_range_turns_everything_on_then_off() {
        let mut text = record("abcdef");
        text.apply_style(0, 3, TextStyleFlags::UNDERLINE, TextStyleOp::Set)
            .unwrap();
        text.apply_style(0, 6, TextStyleFlags::UNDERLINE, TextStyleOp::Toggle)
            .unwrap();
        assert_eq!(text.style_summary(0, 6).underline, TriState::On);
        assert_eq!(text.runs.len(), 1);
        text.apply_style(0, 6, TextStyleFlags::UNDERLINE, TextStyleOp::Toggle)
            .unwrap();
        assert_eq!(text.style_summary(0, 6).underline, TriState::Off);
    }

    #[test]
    fn multibyte_boundaries_are_enforced() {
        let mut text = record("añb");
        assert_eq!(
            text.insert_content(2, "x"),
            Err(TextEditError::NotCharBoundary { index: 2 })
        );
        assert_eq!(text.content, "añb");
        assert!(text.insert_content(3, "x").is_ok());
        assert_eq!(text.content, "añxb");
    }

    #[test]
    fn normalize_fills_gaps_and_clamps() {
        let mut text = record("abcdef");
        text.runs = vec![
            TextRun {
                start: 2,
                len: 2,
                flags: TextStyleFlags::BOLD,
                ..TextRun::default()
            },
            TextRun {
                start: 5,
                len: 10,
                ..TextRun::default()
            },
        ];
        text.normalize_runs();
        let covered: u32 = text.runs.iter().map(|r| r.len).sum();
        assert_eq!(covered, 6);
        assert_eq!(text.runs[0].start, 0);
        for pair in text.runs.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start);
        }
    }
}
