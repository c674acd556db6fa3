use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Linear RGBA color as stored in geometry records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    /// Whether the color contributes anything when painted.
    #[inline]
    pub fn is_visible(&self) -> bool {
        self.a > 0.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl From<PackedColor> for Color {
    fn from(value: PackedColor) -> Self {
        let [r, g, b, a] = value.0.to_le_bytes();
        Color::rgba(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            f32::from(a) / 255.0,
        )
    }
}

/// 8-bit RGBA packed little-endian as `r | g << 8 | b << 16 | a << 24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PackedColor(pub u32);

impl PackedColor {
    pub const BLACK: PackedColor = PackedColor::from_rgba8(0, 0, 0, 255);
    pub const WHITE: PackedColor = PackedColor::from_rgba8(255, 255, 255, 255);
    pub const TRANSPARENT: PackedColor = PackedColor(0);

    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self(u32::from_le_bytes([r, g, b, a]))
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl From<Color> for PackedColor {
    fn from(value: Color) -> Self {
        let quantize = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        PackedColor::from_rgba8(
            quantize(value.r),
            quantize(value.g),
            quantize(value.b),
            quantize(value.a),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    pub color: Color,
    pub enabled: bool,
    pub width: f32,
}

impl StrokeStyle {
    pub fn solid(color: Color, width: f32) -> Self {
        Self {
            color,
            enabled: true,
            width,
        }
    }
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self::solid(Color::BLACK, 1.0)
    }
}

bitflags! {
    /// The four style channels an entity can override.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StyleTargets: u8 {
        const STROKE = 1 << 0;
        const FILL = 1 << 1;
        const TEXT_COLOR = 1 << 2;
        const TEXT_BACKGROUND = 1 << 3;
    }
}

/// Per-entity override record. Bits in `color_mask` select the entity's own
/// color, bits in `enabled_mask` select its own enabled switch; everything
/// else comes from the layer.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StyleOverride {
    pub color_mask: StyleTargets,
    pub enabled_mask: StyleTargets,
    pub text_color: PackedColor,
    pub text_background: PackedColor,
    pub fill_enabled: bool,
    pub text_background_enabled: bool,
}

impl StyleOverride {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.color_mask.is_empty() && self.enabled_mask.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleEntry {
    pub color: PackedColor,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub stroke: StyleEntry,
    pub fill: StyleEntry,
    pub text_color: StyleEntry,
    pub text_background: StyleEntry,
}

impl LayerStyle {
    pub fn entry(&self, target: StyleTargets) -> Option<&StyleEntry> {
        match target {
            StyleTargets::STROKE => Some(&self.stroke),
            StyleTargets::FILL => Some(&self.fill),
            StyleTargets::TEXT_COLOR => Some(&self.text_color),
            StyleTargets::TEXT_BACKGROUND => Some(&self.text_background),
            _ => None,
        }
    }

    pub fn entry_mut(&mut self, target: StyleTargets) -> Option<&mut StyleEntry> {
        match target {
            StyleTargets::STROKE => Some(&mut self.stroke),
            StyleTargets::FILL => Some(&mut self.fill),
            StyleTargets::TEXT_COLOR => Some(&mut self.text_color),
            StyleTargets::TEXT_BACKGROUND => Some(&mut self.text_background),
            _ => None,
        }
    }
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            stroke: StyleEntry {
                color: PackedColor::BLACK,
                enabled: true,
            },
            fill: StyleEntry {
                color: PackedColor::WHITE,
                enabled: true,
            },
            text_color: StyleEntry {
                color: PackedColor::BLACK,
                enabled: true,
            },
            text_background: StyleEntry {
                color: PackedColor::TRANSPARENT,
                enabled: false,
            },
        }
    }
}

/// Effective style after merging an entity override over its layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedStyle {
    pub stroke: Color,
    pub stroke_enabled: bool,
    pub fill: Color,
    pub fill_enabled: bool,
    pub text_color: Color,
    pub text_background: Color,
    pub text_background_enabled: bool,
}
