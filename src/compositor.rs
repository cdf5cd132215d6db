//! Raster Compositor - Slots First, Base Artwork Last
//!
//! CRITICAL: the base artwork is always painted after every slot. Authored
//! artwork carries transparent cut-outs where slot photos show through.

use image::{Rgba, RgbaImage};
use rusttype::Font;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{DecodeLimits, RenderConfig};
use crate::error::{DecodeError, GeometryError};
use crate::geometry::PixelRect;
use crate::hashing::raster_digest;
use crate::layout::{LayoutBase, SlotDef, SlotImageAssignment};
use crate::raster::{self, Mask, Placement};

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Layout {id} has invalid dimensions {width}x{height}")]
    InvalidLayout { id: String, width: u32, height: u32 },

    #[error("Surface {width}x{height} exceeds the {max} pixel limit")]
    SurfaceTooLarge { width: u32, height: u32, max: u64 },

    #[error("Invalid render scale {0}")]
    InvalidScale(f64),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),
}

/// Pixels for an assigned slot, either still encoded or already decoded.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Encoded(Vec<u8>),
    Decoded(Arc<RgbaImage>),
}

#[derive(Debug, Clone)]
pub struct AssignedImage {
    pub assignment: SlotImageAssignment,
    pub source: ImageSource,
}

impl AssignedImage {
    pub fn decoded(assignment: SlotImageAssignment, image: RgbaImage) -> Self {
        Self {
            assignment,
            source: ImageSource::Decoded(Arc::new(image)),
        }
    }

    pub fn encoded(assignment: SlotImageAssignment, bytes: Vec<u8>) -> Self {
        Self {
            assignment,
            source: ImageSource::Encoded(bytes),
        }
    }
}

/// Per-call rendering inputs.
pub struct RenderOptions<'a> {
    /// Surface multiplier: 1.0 for the preview, the supersample factor for export.
    pub scale: f64,
    pub render: &'a RenderConfig,
    pub decode: &'a DecodeLimits,
    pub label_font: Option<&'a Font<'static>>,
}

impl<'a> RenderOptions<'a> {
    pub fn preview(render: &'a RenderConfig, decode: &'a DecodeLimits) -> Self {
        Self {
            scale: 1.0,
            render,
            decode,
            label_font: None,
        }
    }

    pub fn export(render: &'a RenderConfig, decode: &'a DecodeLimits) -> Self {
        Self {
            scale: render.supersample_factor,
            ..Self::preview(render, decode)
        }
    }

    pub fn with_label_font(mut self, font: Option<&'a Font<'static>>) -> Self {
        self.label_font = font;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CompositeWarning {
    SlotImageUndecodable { slot_id: String, reason: String },
    UnknownSlot { slot_id: String },
    BaseArtworkMissing { reference: Option<String> },
}

/// Per-region output handed to the order collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionDescriptor {
    pub id: String,
    pub asset_reference: Option<String>,
    pub preview_reference: String,
}

#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbaImage,
    pub warnings: Vec<CompositeWarning>,
    pub regions: Vec<RegionDescriptor>,
}

/// Compute the surface size for `layout` at `scale`.
pub fn surface_size(layout: &LayoutBase, scale: f64, max_pixels: u64) -> Result<(u32, u32), CompositeError> {
    if !layout.has_valid_dimensions() {
        return Err(CompositeError::InvalidLayout {
            id: layout.id.clone(),
            width: layout.print_area_width_px,
            height: layout.print_area_height_px,
        });
    }
    if !scale.is_finite() || scale <= 0.0 {
        return Err(CompositeError::InvalidScale(scale));
    }
    let width = (layout.width() * scale).round().max(1.0) as u32;
    let height = (layout.height() * scale).round().max(1.0) as u32;
    if width as u64 * height as u64 > max_pixels {
        return Err(CompositeError::SurfaceTooLarge {
            width,
            height,
            max: max_pixels,
        });
    }
    Ok((width, height))
}

/// Flatten a layout, its slot images and the base artwork into one raster.
///
/// Deterministic: identical inputs give byte-identical pixels. A slot whose
/// image cannot be decoded falls back to the placeholder and is reported in
/// the warnings; it never aborts the composite.
pub fn compose(
    layout: &LayoutBase,
    base_artwork: Option<&RgbaImage>,
    assignments: &[AssignedImage],
    options: &RenderOptions<'_>,
) -> Result<Composite, CompositeError> {
    let (width, height) = surface_size(layout, options.scale, options.render.max_surface_pixels)?;
    let mut canvas = RgbaImage::from_pixel(width, height, raster::TRANSPARENT);
    let mut warnings = Vec::new();

    let mut by_slot: HashMap<&str, &AssignedImage> = HashMap::new();
    for assigned in assignments {
        let slot_id = assigned.assignment.slot_id.as_str();
        if layout.slot(slot_id).is_none() {
            log::warn!("Layout {} has no slot {}, assignment ignored", layout.id, slot_id);
            warnings.push(CompositeWarning::UnknownSlot {
                slot_id: slot_id.to_string(),
            });
            continue;
        }
        // Last assignment for a slot wins.
        by_slot.insert(slot_id, assigned);
    }

    let mut regions = Vec::with_capacity(layout.slots.len());
    for slot in layout.slots_in_paint_order() {
        let assigned = by_slot.get(slot.id.as_str()).copied();
        let region = draw_slot(&mut canvas, layout, slot, assigned, options, &mut warnings)?;
        regions.push(region);
    }

    match base_artwork {
        Some(base) => raster::overlay_full(&mut canvas, base),
        None => {
            if layout.base_artwork_ref.is_some() {
                log::warn!("Base artwork for layout {} unavailable, compositing without it", layout.id);
                warnings.push(CompositeWarning::BaseArtworkMissing {
                    reference: layout.base_artwork_ref.clone(),
                });
            }
        }
    }

    log::debug!(
        "Composited layout {} at {}x{} ({} slots, {} warnings)",
        layout.id,
        width,
        height,
        layout.slots.len(),
        warnings.len()
    );

    Ok(Composite {
        image: canvas,
        warnings,
        regions,
    })
}

/// Slot rectangle on the scaled surface, in whole pixels.
pub fn slot_pixel_rect(layout: &LayoutBase, slot: &SlotDef, scale: f64) -> PixelRect {
    slot.rect_on(layout.width(), layout.height())
        .scaled(scale)
        .round()
}

fn draw_slot(
    canvas: &mut RgbaImage,
    layout: &LayoutBase,
    slot: &SlotDef,
    assigned: Option<&AssignedImage>,
    options: &RenderOptions<'_>,
    warnings: &mut Vec<CompositeWarning>,
) -> Result<RegionDescriptor, CompositeError> {
    let rect = slot_pixel_rect(layout, slot, options.scale);
    let max = options.render.max_surface_pixels;
    if rect.width as u64 * rect.height as u64 > max {
        return Err(CompositeError::SurfaceTooLarge {
            width: rect.width,
            height: rect.height,
            max,
        });
    }
    let placement = Placement::new(rect, slot.rotation_deg);
    let mask = Mask::new(slot.mask_shape, slot.corner_radius_pct);

    let photo = match assigned {
        Some(a) => match resolve_source(&a.source, options.decode) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Slot {} image undecodable, using placeholder: {}", slot.id, e);
                warnings.push(CompositeWarning::SlotImageUndecodable {
                    slot_id: slot.id.clone(),
                    reason: e.to_string(),
                });
                None
            }
        },
        None => None,
    };

    let tile = match &photo {
        Some(image) => raster::cover_tile(image, rect.width, rect.height)?,
        None => placeholder_for(rect.width, rect.height, options),
    };
    raster::blit_tile(canvas, &tile, &placement, &mask, 1.0)?;

    Ok(RegionDescriptor {
        id: slot.id.clone(),
        asset_reference: photo
            .as_ref()
            .and(assigned)
            .map(|a| a.assignment.source_image_ref.clone()),
        preview_reference: format!("sha256:{}", raster_digest(&tile)),
    })
}

pub(crate) fn placeholder_for(width: u32, height: u32, options: &RenderOptions<'_>) -> RgbaImage {
    let render = options.render;
    raster::placeholder_tile(
        width,
        height,
        render.placeholder_color,
        render.label_color,
        &render.placeholder_label,
        render.label_height_ratio,
        options.label_font,
    )
}

fn resolve_source(source: &ImageSource, limits: &DecodeLimits) -> Result<Arc<RgbaImage>, DecodeError> {
    match source {
        ImageSource::Decoded(image) => Ok(Arc::clone(image)),
        ImageSource::Encoded(bytes) => raster::decode_image(bytes, limits).map(Arc::new),
    }
}

/// Colour of the composite at layout coordinates `(x, y)` for a given scale.
pub fn sample_at(image: &RgbaImage, x: f64, y: f64, scale: f64) -> Option<Rgba<u8>> {
    let px = (x * scale).floor();
    let py = (y * scale).floor();
    if px < 0.0 || py < 0.0 || px >= image.width() as f64 || py >= image.height() as f64 {
        return None;
    }
    Some(*image.get_pixel(px as u32, py as u32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ItemType, MaskShape};

    fn layout_with(slots: Vec<SlotDef>) -> LayoutBase {
        LayoutBase {
            id: "card".into(),
            name: "Card".into(),
            item_type: ItemType::Card,
            print_area_width_px: 100,
            print_area_height_px: 50,
            base_artwork_ref: None,
            slots,
            physical_width_m: None,
            physical_height_m: None,
            engine_min_version: "1.0.0".into(),
        }
    }

    fn slot(id: &str, x: f64, z: i32) -> SlotDef {
        SlotDef {
            id: id.into(),
            x_pct: x,
            y_pct: 0.0,
            width_pct: 50.0,
            height_pct: 100.0,
            rotation_deg: 0.0,
            z_index: z,
            mask_shape: MaskShape::Rect,
            corner_radius_pct: 0.0,
        }
    }

    fn assignment(slot_id: &str) -> SlotImageAssignment {
        SlotImageAssignment {
            slot_id: slot_id.into(),
            source_image_ref: format!("uploads/{slot_id}.png"),
            natural_width: 10,
            natural_height: 10,
        }
    }

    #[test]
    fn test_higher_z_paints_over_lower() {
        let layout = layout_with(vec![slot("top", 25.0, 5), slot("bottom", 0.0, 1)]);
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let red = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]));
        let blue = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]));
        let assigned = vec![
            AssignedImage::decoded(assignment("top"), blue),
            AssignedImage::decoded(assignment("bottom"), red),
        ];
        let out = compose(&layout, None, &assigned, &RenderOptions::preview(&render, &decode)).unwrap();
        // Overlap region x in [25, 50) belongs to the higher z slot.
        assert_eq!(*out.image.get_pixel(30, 10), Rgba([0, 0, 255, 255]));
        assert_eq!(*out.image.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(out.regions[0].id, "bottom");
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_export_scale_multiplies_surface() {
        let layout = layout_with(vec![]);
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let out = compose(&layout, None, &[], &RenderOptions::export(&render, &decode)).unwrap();
        assert_eq!(out.image.dimensions(), (200, 100));
    }

    #[test]
    fn test_unknown_slot_is_warned() {
        let layout = layout_with(vec![slot("a", 0.0, 0)]);
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let stray = AssignedImage::decoded(assignment("nope"), RgbaImage::new(2, 2));
        let out = compose(&layout, None, &[stray], &RenderOptions::preview(&render, &decode)).unwrap();
        assert_eq!(
            out.warnings,
            vec![CompositeWarning::UnknownSlot { slot_id: "nope".into() }]
        );
        assert_eq!(out.regions[0].asset_reference, None);
    }

    #[test]
    fn test_invalid_layout_is_fatal() {
        let mut layout = layout_with(vec![]);
        layout.print_area_height_px = 0;
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let err = compose(&layout, None, &[], &RenderOptions::preview(&render, &decode)).unwrap_err();
        assert!(matches!(err, CompositeError::InvalidLayout { .. }));
    }

    #[test]
    fn test_unbounded_slot_is_rejected() {
        let mut wild = slot("wild", -1e30, 0);
        wild.width_pct = 2e30;
        let layout = layout_with(vec![wild]);
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let err = compose(&layout, None, &[], &RenderOptions::preview(&render, &decode)).unwrap_err();
        assert!(matches!(err, CompositeError::SurfaceTooLarge { .. }));
    }
}
