//! Scene rendering. Objects paint in vector order, each through the same
//! tile-then-blit path the slot compositor uses.

use image::{Rgba, RgbaImage};
use rusttype::Font;

use crate::compositor::{placeholder_for, CompositeError, RegionDescriptor, RenderOptions};
use crate::hashing::raster_digest;
use crate::raster::{self, Mask, Placement};

use super::cache::{FontCache, ImageCache};
use super::object::{Decoration, Drawable, ImageFrame, SceneObject, TextAlign, TextField};
use super::SceneError;

pub(crate) struct SceneRender {
    pub image: RgbaImage,
    pub regions: Vec<RegionDescriptor>,
    /// Text fields with a value but no usable font.
    pub unfonted: Vec<String>,
}

fn scene_surface(width_px: u32, height_px: u32, options: &RenderOptions<'_>) -> Result<(u32, u32), CompositeError> {
    let scale = options.scale;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(CompositeError::InvalidScale(scale));
    }
    let width = (width_px as f64 * scale).round().max(1.0) as u32;
    let height = (height_px as f64 * scale).round().max(1.0) as u32;
    let max = options.render.max_surface_pixels;
    if width as u64 * height as u64 > max {
        return Err(CompositeError::SurfaceTooLarge { width, height, max });
    }
    Ok((width, height))
}

pub(crate) fn render_scene(
    objects: &[SceneObject],
    images: &ImageCache,
    fonts: &FontCache,
    width_px: u32,
    height_px: u32,
    options: &RenderOptions<'_>,
) -> Result<SceneRender, SceneError> {
    let (width, height) = scene_surface(width_px, height_px, options)?;
    let mut canvas = RgbaImage::from_pixel(width, height, raster::TRANSPARENT);
    let mut regions = Vec::new();
    let mut unfonted = Vec::new();

    for object in objects {
        let placement = object.geometry.placement(options.scale);
        match &object.drawable {
            Drawable::Decoration(d) => draw_decoration(&mut canvas, d, &placement, images)?,
            Drawable::ImageFrame(f) => {
                let tile_ref = draw_frame(&mut canvas, f, &placement, images, options)?;
                regions.push(RegionDescriptor {
                    id: object.id.clone(),
                    asset_reference: f
                        .image
                        .as_ref()
                        .filter(|i| i.is_loaded(images))
                        .map(|i| i.assignment.source_image_ref.clone()),
                    preview_reference: tile_ref,
                });
            }
            Drawable::TextField(t) => {
                let font = t
                    .style
                    .font_ref
                    .as_deref()
                    .and_then(|r| fonts.get(r))
                    .or(options.label_font);
                match font {
                    Some(font) => draw_text_field(&mut canvas, t, &placement, font, options.scale)?,
                    None if t.value.is_empty() => {}
                    None => {
                        log::warn!("No font for text field {}, not drawn", object.id);
                        unfonted.push(object.id.clone());
                    }
                }
            }
        }
    }

    Ok(SceneRender {
        image: canvas,
        regions,
        unfonted,
    })
}

fn draw_decoration(
    canvas: &mut RgbaImage,
    decoration: &Decoration,
    placement: &Placement,
    images: &ImageCache,
) -> Result<(), SceneError> {
    let rect = placement.rect;
    if let Some(fill) = decoration.fill {
        let tile = raster::solid_tile(rect.width, rect.height, fill);
        raster::blit_tile(canvas, &tile, placement, &Mask::RECT, 1.0)?;
    }
    if let Some(bitmap) = decoration.handle.and_then(|h| images.get(h)) {
        let tile = raster::stretch_tile(bitmap, rect.width, rect.height);
        raster::blit_tile(canvas, &tile, placement, &Mask::RECT, 1.0)?;
    }
    Ok(())
}

/// Fill, then photo or dimmed placeholder, all under the frame's mask.
/// Returns the preview reference of the content tile.
fn draw_frame(
    canvas: &mut RgbaImage,
    frame: &ImageFrame,
    placement: &Placement,
    images: &ImageCache,
    options: &RenderOptions<'_>,
) -> Result<String, SceneError> {
    let rect = placement.rect;
    let mask = frame.mask();
    if let Some(fill) = frame.fill {
        let tile = raster::solid_tile(rect.width, rect.height, fill);
        raster::blit_tile(canvas, &tile, placement, &mask, 1.0)?;
    }

    let photo = frame
        .image
        .as_ref()
        .and_then(|i| i.handle)
        .and_then(|h| images.get(h));
    let (tile, opacity) = match photo {
        Some(bitmap) => (raster::cover_tile(bitmap, rect.width, rect.height)?, 1.0),
        None => (
            placeholder_for(rect.width, rect.height, options),
            options.render.placeholder_dim_opacity.clamp(0.0, 1.0),
        ),
    };
    raster::blit_tile(canvas, &tile, placement, &mask, opacity)?;
    Ok(format!("sha256:{}", raster_digest(&tile)))
}

fn draw_text_field(
    canvas: &mut RgbaImage,
    field: &TextField,
    placement: &Placement,
    font: &Font<'static>,
    scale: f64,
) -> Result<(), SceneError> {
    if field.value.is_empty() {
        return Ok(());
    }
    let rect = placement.rect;
    let (w, h) = (rect.width as f32, rect.height as f32);

    // Shrink until the line fits the box.
    let mut size = (field.style.size_px * scale).max(1.0) as f32;
    while size > 1.0 && (raster::text_width(font, size, &field.value) > w || raster::line_height(font, size) > h) {
        size *= 0.9;
    }

    let text_w = raster::text_width(font, size, &field.value);
    let x = match field.style.align {
        TextAlign::Left => 0.0,
        TextAlign::Center => ((w - text_w) / 2.0).round(),
        TextAlign::Right => (w - text_w).max(0.0).round(),
    };
    let y = ((h - raster::line_height(font, size)) / 2.0).round();

    let mut tile = RgbaImage::from_pixel(rect.width, rect.height, raster::TRANSPARENT);
    raster::draw_text(&mut tile, font, size, x, y, Rgba(field.style.color), &field.value);
    raster::blit_tile(canvas, &tile, placement, &Mask::RECT, 1.0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecodeLimits, RenderConfig};
    use crate::layout::{MaskShape, SlotImageAssignment};
    use crate::scene::object::{FrameImage, ObjectGeometry, TextStyle};
    use std::sync::Arc;

    fn frame(id: &str, x: f64, image: Option<FrameImage>) -> SceneObject {
        SceneObject {
            id: id.into(),
            geometry: ObjectGeometry {
                x,
                y: 0.0,
                width: 10.0,
                height: 10.0,
                rotation_deg: 0.0,
            },
            drawable: Drawable::ImageFrame(ImageFrame {
                mask_shape: MaskShape::Rect,
                corner_radius_pct: 0.0,
                fill: None,
                image,
            }),
        }
    }

    #[test]
    fn test_empty_frame_is_dimmed_placeholder() {
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let options = RenderOptions::preview(&render, &decode);
        let out = render_scene(&[frame("f", 0.0, None)], &ImageCache::new(), &FontCache::new(), 20, 10, &options)
            .unwrap();
        let corner = out.image.get_pixel(1, 1);
        assert!(corner.0[3] > 0 && corner.0[3] < 255);
        assert_eq!(out.image.get_pixel(15, 5).0[3], 0);
        assert_eq!(out.regions.len(), 1);
        assert_eq!(out.regions[0].asset_reference, None);
    }

    #[test]
    fn test_loaded_frame_shows_photo() {
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let options = RenderOptions::preview(&render, &decode);
        let mut images = ImageCache::new();
        let handle = images.insert(Arc::new(RgbaImage::from_pixel(4, 4, Rgba([0, 200, 0, 255]))));
        let image = FrameImage {
            assignment: SlotImageAssignment {
                slot_id: "f".into(),
                source_image_ref: "uploads/green.png".into(),
                natural_width: 4,
                natural_height: 4,
            },
            handle: Some(handle),
        };
        let out = render_scene(&[frame("f", 10.0, Some(image))], &images, &FontCache::new(), 20, 10, &options)
            .unwrap();
        assert_eq!(*out.image.get_pixel(15, 5), Rgba([0, 200, 0, 255]));
        assert_eq!(out.regions[0].asset_reference.as_deref(), Some("uploads/green.png"));
        assert!(out.regions[0].preview_reference.starts_with("sha256:"));
    }

    #[test]
    fn test_released_photo_is_not_reported() {
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let options = RenderOptions::preview(&render, &decode);
        let mut images = ImageCache::new();
        let handle = images.insert(Arc::new(RgbaImage::from_pixel(4, 4, Rgba([0, 200, 0, 255]))));
        images.release(handle);
        let image = FrameImage {
            assignment: SlotImageAssignment {
                slot_id: "f".into(),
                source_image_ref: "uploads/green.png".into(),
                natural_width: 4,
                natural_height: 4,
            },
            handle: Some(handle),
        };
        let out = render_scene(&[frame("f", 0.0, Some(image))], &images, &FontCache::new(), 20, 10, &options)
            .unwrap();
        assert_eq!(out.regions[0].asset_reference, None);
    }

    const MONO: &[u8] = include_bytes!("../../tests/fixtures/fonts/DejaVuSansMono.ttf");

    fn text(value: &str, align: TextAlign, size_px: f64) -> SceneObject {
        SceneObject {
            id: "line".into(),
            geometry: ObjectGeometry {
                x: 0.0,
                y: 0.0,
                width: 200.0,
                height: 40.0,
                rotation_deg: 0.0,
            },
            drawable: Drawable::TextField(TextField {
                value: value.into(),
                max_chars: None,
                style: TextStyle {
                    font_ref: Some("fonts/mono.ttf".into()),
                    size_px,
                    color: [0, 0, 0, 255],
                    align,
                },
            }),
        }
    }

    /// Leftmost and rightmost inked columns.
    fn ink_span(image: &RgbaImage) -> Option<(u32, u32)> {
        let xs: Vec<u32> = image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[3] > 0)
            .map(|(x, _, _)| x)
            .collect();
        Some((*xs.iter().min()?, *xs.iter().max()?))
    }

    fn render_text(object: SceneObject, fonts: &FontCache) -> SceneRender {
        let render = RenderConfig::default();
        let decode = DecodeLimits::default();
        let options = RenderOptions::preview(&render, &decode);
        render_scene(&[object], &ImageCache::new(), fonts, 200, 40, &options).unwrap()
    }

    #[test]
    fn test_text_alignment_moves_ink() {
        let mut fonts = FontCache::new();
        fonts.insert_bytes("fonts/mono.ttf", MONO.to_vec()).unwrap();

        let (left, _) = ink_span(&render_text(text("Hi", TextAlign::Left, 24.0), &fonts).image).unwrap();
        let (center, _) = ink_span(&render_text(text("Hi", TextAlign::Center, 24.0), &fonts).image).unwrap();
        let (_, right) = ink_span(&render_text(text("Hi", TextAlign::Right, 24.0), &fonts).image).unwrap();
        assert!(left < 20);
        assert!(center > 70 && center < 110);
        assert!(right > 180);
    }

    #[test]
    fn test_long_text_shrinks_to_box() {
        let mut fonts = FontCache::new();
        fonts.insert_bytes("fonts/mono.ttf", MONO.to_vec()).unwrap();
        let out = render_text(text("Congratulations graduate", TextAlign::Left, 64.0), &fonts);
        let (first, last) = ink_span(&out.image).unwrap();
        assert!(first < last);
        assert!(last < 200);
        assert!(out.unfonted.is_empty());
    }

    #[test]
    fn test_text_without_font_is_reported() {
        let out = render_text(text("Hi", TextAlign::Left, 24.0), &FontCache::new());
        assert!(ink_span(&out.image).is_none());
        assert_eq!(out.unfonted, vec!["line".to_string()]);
    }
}
