//! Scene objects: a tagged union resolved once at load time.

use serde::{Deserialize, Serialize};

use crate::geometry::{PixelRect, Rect};
use crate::layout::{MaskShape, SlotImageAssignment};
use crate::raster::{Mask, Placement};

use super::cache::{ImageCache, ImageHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    Decoration,
    ImageFrame,
    TextField,
}

/// Object bounds in layout pixels, rotated around their center.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectGeometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation_deg: f64,
}

impl ObjectGeometry {
    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height, self.rotation_deg]
            .iter()
            .all(|v| v.is_finite())
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn pixel_rect(&self, scale: f64) -> PixelRect {
        self.rect().scaled(scale).round()
    }

    pub fn placement(&self, scale: f64) -> Placement {
        Placement::new(self.pixel_rect(scale), self.rotation_deg)
    }

    /// Component-wise comparison within `eps`.
    pub fn approx_eq(&self, other: &ObjectGeometry, eps: f64) -> bool {
        (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.width - other.width).abs() <= eps
            && (self.height - other.height).abs() <= eps
            && (self.rotation_deg - other.rotation_deg).abs() <= eps
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    #[serde(default)]
    pub font_ref: Option<String>,
    #[serde(default = "default_text_size")]
    pub size_px: f64,
    #[serde(default = "default_text_color")]
    pub color: [u8; 4],
    #[serde(default)]
    pub align: TextAlign,
}

fn default_text_size() -> f64 { 32.0 }
fn default_text_color() -> [u8; 4] { [20, 20, 20, 255] }

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_ref: None,
            size_px: default_text_size(),
            color: default_text_color(),
            align: TextAlign::default(),
        }
    }
}

/// Locked artwork: a bitmap, a flat fill, or both.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoration {
    pub asset_ref: Option<String>,
    pub fill: Option<[u8; 4]>,
    pub(crate) handle: Option<ImageHandle>,
}

/// A user photo bound to a frame. `handle` is `None` while the bitmap is
/// missing (failed load), in which case the placeholder renders.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameImage {
    pub assignment: SlotImageAssignment,
    pub(crate) handle: Option<ImageHandle>,
}

impl FrameImage {
    /// True while the handle still points at a live bitmap in `images`.
    pub fn is_loaded(&self, images: &ImageCache) -> bool {
        self.handle.is_some_and(|h| images.get(h).is_some())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageFrame {
    pub mask_shape: MaskShape,
    pub corner_radius_pct: f64,
    pub fill: Option<[u8; 4]>,
    pub image: Option<FrameImage>,
}

impl ImageFrame {
    pub fn mask(&self) -> Mask {
        Mask::new(self.mask_shape, self.corner_radius_pct)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextField {
    pub value: String,
    pub max_chars: Option<usize>,
    pub style: TextStyle,
}

impl TextField {
    /// Clip `value` to the character budget. Returns the stored value and
    /// whether anything was cut.
    pub fn clip(value: &str, max_chars: Option<usize>) -> (String, bool) {
        match max_chars {
            Some(max) if value.chars().count() > max => (value.chars().take(max).collect(), true),
            _ => (value.to_string(), false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Drawable {
    Decoration(Decoration),
    ImageFrame(ImageFrame),
    TextField(TextField),
}

impl Drawable {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Drawable::Decoration(_) => ObjectKind::Decoration,
            Drawable::ImageFrame(_) => ObjectKind::ImageFrame,
            Drawable::TextField(_) => ObjectKind::TextField,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub id: String,
    pub geometry: ObjectGeometry,
    pub drawable: Drawable,
}

impl SceneObject {
    pub fn kind(&self) -> ObjectKind {
        self.drawable.kind()
    }

    pub fn is_editable(&self) -> bool {
        !matches!(self.drawable, Drawable::Decoration(_))
    }

    pub fn as_frame(&self) -> Option<&ImageFrame> {
        match &self.drawable {
            Drawable::ImageFrame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextField> {
        match &self.drawable {
            Drawable::TextField(t) => Some(t),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_counts_characters() {
        assert_eq!(TextField::clip("héllo", Some(3)), ("hél".to_string(), true));
        assert_eq!(TextField::clip("hi", Some(3)), ("hi".to_string(), false));
        assert_eq!(TextField::clip("anything", None), ("anything".to_string(), false));
    }

    #[test]
    fn test_geometry_validity() {
        let g = ObjectGeometry { x: 0.0, y: 0.0, width: 10.0, height: 5.0, rotation_deg: 12.0 };
        assert!(g.is_valid());
        assert!(!ObjectGeometry { width: 0.0, ..g }.is_valid());
        assert!(!ObjectGeometry { x: f64::INFINITY, ..g }.is_valid());
    }
}
