//! Text shaping seam. The engine stores run metadata and cached layout
//! numbers; measuring glyphs belongs to whatever implements [`TextShaper`].

use std::fmt::Debug;

use draftdoc_core::text::{TextAlign, TextBoxMode, TextLayout, TextRecord};
use glam::Vec2;

const FALLBACK_SIZE: f32 = 16.0;

pub trait TextShaper: Debug {
    /// Measures the laid-out box of `text`.
    fn layout(&self, text: &TextRecord) -> TextLayout;

    /// Nearest caret to a point given in the text's local frame (x right
    /// from the origin, y up). Returns the byte index and its distance.
    fn caret_at(&self, text: &TextRecord, local: Vec2) -> Option<(u32, f32)>;
}

/// Fixed-advance estimate: every glyph is `size * advance_ratio` wide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonospaceShaper {
    pub advance_ratio: f32,
    pub line_height_ratio: f32,
}

impl Default for MonospaceShaper {
    fn default() -> Self {
        Self {
            advance_ratio: 0.6,
            line_height_ratio: 1.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LineBox {
    /// Caret stops as (byte index, x offset from the line start).
    stops: Vec<(u32, f32)>,
    width: f32,
    height: f32,
}

impl MonospaceShaper {
    fn size_at(text: &TextRecord, byte: u32) -> f32 {
        text.runs
            .iter()
            .find(|run| run.start <= byte && byte < run.end())
            .or(text.runs.last())
            .map(|run| run.size)
            .filter(|size| size.is_finite() && *size > 0.0)
            .unwrap_or(FALLBACK_SIZE)
    }

    fn lines(&self, text: &TextRecord) -> Vec<LineBox> {
        let wrap = match text.box_mode {
            TextBoxMode::FixedWidth if text.constraint_width > 0.0 => Some(text.constraint_width),
            _ => None,
        };
        let mut lines = Vec::new();
        let mut current = LineBox {
            stops: vec![(0, 0.0)],
            width: 0.0,
            height: 0.0,
        };
        let mut tallest = 0.0f32;

        for (index, ch) in text.content.char_indices() {
            let byte = index as u32;
            let size = Self::size_at(text, byte);
            if ch == '\n' {
                current.height = self.line_height(tallest, text, byte);
                lines.push(current);
                let next = byte + 1;
                current = LineBox {
                    stops: vec![(next, 0.0)],
                    width: 0.0,
                    height: 0.0,
                };
                tallest = 0.0;
                continue;
            }
            let advance = size * self.advance_ratio;
            if let Some(limit) = wrap {
                if current.width > 0.0 && current.width + advance > limit {
                    current.height = self.line_height(tallest, text, byte);
                    lines.push(current);
                    current = LineBox {
                        stops: vec![(byte, 0.0)],
                        width: 0.0,
                        height: 0.0,
                    };
                    tallest = 0.0;
                }
            }
            current.width += advance;
            tallest = tallest.max(size);
            current
                .stops
                .push((byte + ch.len_utf8() as u32, current.width));
        }
        current.height = self.line_height(tallest, text, text.content.len() as u32);
        lines.push(current);
        lines
    }

    fn line_height(&self, tallest: f32, text: &TextRecord, byte: u32) -> f32 {
        let size = if tallest > 0.0 {
            tallest
        } else {
            Self::size_at(text, byte)
        };
        size * self.line_height_ratio
    }

    fn box_width(text: &TextRecord, lines: &[LineBox]) -> f32 {
        match text.box_mode {
            TextBoxMode::FixedWidth => text.constraint_width.max(0.0),
            TextBoxMode::AutoWidth => lines.iter().map(|line| line.width).fold(0.0, f32::max),
        }
    }

    fn align_offset(align: TextAlign, box_width: f32, line_width: f32) -> f32 {
        match align {
            TextAlign::Left => 0.0,
            TextAlign::Center => (box_width - line_width) * 0.5,
            TextAlign::Right => box_width - line_width,
        }
    }
}

impl TextShaper for MonospaceShaper {
    fn layout(&self, text: &TextRecord) -> TextLayout {
        let lines = self.lines(text);
        TextLayout {
            width: Self::box_width(text, &lines),
            height: lines.iter().map(|line| line.height).sum(),
            line_height: lines.iter().map(|line| line.height).fold(0.0, f32::max),
        }
    }

    fn caret_at(&self, text: &TextRecord, local: Vec2) -> Option<(u32, f32)> {
        let lines = self.lines(text);
        let box_width = Self::box_width(text, &lines);
        let mut top = 0.0f32;
        let mut best: Option<(u32, f32)> = None;
        for line in &lines {
            let bottom = top - line.height;
            let dy = if local.y > top {
                local.y - top
            } else if local.y < bottom {
                bottom - local.y
            } else {
                0.0
            };
            let offset = Self::align_offset(text.align, box_width, line.width);
            for &(byte, x) in &line.stops {
                let distance = Vec2::new(local.x - (offset + x), dy).length();
                if best.is_none_or(|(_, d)| distance < d) {
                    best = Some((byte, distance));
                }
            }
            top = bottom;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use draftdoc_core::geometry::Point2;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn auto_width_measures_the_longest_line() {
        let shaper = MonospaceShaper::default();
        let text = TextRecord::new(Point2::ORIGIN, "abcd\nab");
        let layout = shaper.layout(&text);
        assert!(approx(layout.width, 4.0 * 16.0 * 0.6));
        assert!(approx(layout.line_height, 16.0 * 1.2));
        assert!(approx(layout.height, 2.0 * 16.0 * 1.2));
    }

    #[test]
    fn fixed_width_wraps_at_the_constraint() {
        let shaper = MonospaceShaper::default();
        let mut text = TextRecord::new(Point2::ORIGIN, "abcdef");
        text.box_mode = TextBoxMode::FixedWidth;
        text.constraint_width = 30.0;
        let layout = shaper.layout(&text);
        // 9.6 per glyph: three glyphs per line.
        assert!(approx(layout.width, 30.0));
        assert!(approx(layout.height, 2.0 * 19.2));
    }

    #[test]
    fn caret_snaps_to_the_nearest_boundary() {
        let shaper = MonospaceShaper::default();
        let text = TextRecord::new(Point2::ORIGIN, "héllo");
        // Boundaries at x = 0, 9.6, 19.2 ... bytes 0, 1, 3 ...
        let (byte, distance) = shaper.caret_at(&text, Vec2::new(18.0, -5.0)).unwrap();
        assert_eq!(byte, 3);
        assert!(approx(distance, 1.2));

        let (byte, _) = shaper.caret_at(&text, Vec2::new(500.0, -5.0)).unwrap();
        assert_eq!(byte, text.content.len() as u32);
    }

    #[test]
    fn empty_text_still_has_one_line() {
        let shaper = MonospaceShaper::default();
        let text = TextRecord::new(Point2::ORIGIN, "");
        let layout = shaper.layout(&text);
        assert_eq!(layout.width, 0.0);
        assert!(approx(layout.height, 19.2));
        assert_eq!(shaper.caret_at(&text, Vec2::ZERO), Some((0, 0.0)));
    }
}
