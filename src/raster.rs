//! Raster Primitives
//!
//! Decode boundary, PNG encoding and the tile/mask/blit operations every
//! renderer shares. A region is always drawn in two steps: its content is
//! rendered into an upright tile the size of the region, then the tile is
//! stamped onto the canvas through the region's rotation and mask.

use image::imageops::{self, FilterType};
use image::{ImageEncoder, ImageFormat, ImageReader, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use std::io::Cursor;

use crate::config::DecodeLimits;
use crate::error::{DecodeError, GeometryError};
use crate::geometry::{compute_aspect_fit, FitMode, PixelRect, Point, Rect, Transform};
use crate::layout::MaskShape;

pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Resampling filter for every resize in the engine.
pub const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Decode user or asset bytes into RGBA8, rejecting anything that is not a
/// supported, sanely sized image.
pub fn decode_image(bytes: &[u8], limits: &DecodeLimits) -> Result<RgbaImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match reader.format() {
        Some(ImageFormat::Png) | Some(ImageFormat::Jpeg) => {}
        Some(other) => return Err(DecodeError::UnsupportedFormat(format!("{:?}", other))),
        None => return Err(DecodeError::UnsupportedFormat("unknown".into())),
    }

    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?
        .into_dimensions()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if width == 0 || height == 0 || width > limits.max_side_px || height > limits.max_side_px {
        return Err(DecodeError::TooLarge {
            width,
            height,
            max_side: limits.max_side_px,
        });
    }

    let decoded = reader
        .decode()
        .map_err(|e| DecodeError::Malformed(e.to_string()))?;
    Ok(decoded.to_rgba8())
}

/// Lossless PNG encoding. Output is deterministic for identical pixels.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    encoder.write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8.into(),
    )?;
    Ok(buf)
}

/// Source-over blend of `src` onto `dst` with an extra opacity factor.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, opacity: f64) {
    let sa = src.0[3] as f64 / 255.0 * opacity;
    if sa <= 0.0 {
        return;
    }
    let da = dst.0[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = TRANSPARENT;
        return;
    }
    for i in 0..3 {
        let s = src.0[i] as f64 * sa;
        let d = dst.0[i] as f64 * da * (1.0 - sa);
        dst.0[i] = ((s + d) / out_a).round().clamp(0.0, 255.0) as u8;
    }
    dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Draw `over` on top of `base` covering the whole canvas, resizing when the
/// sizes differ.
pub fn overlay_full(base: &mut RgbaImage, over: &RgbaImage) {
    let resized;
    let over = if over.dimensions() == base.dimensions() {
        over
    } else {
        resized = imageops::resize(over, base.width(), base.height(), RESAMPLE_FILTER);
        &resized
    };
    for (dst, src) in base.pixels_mut().zip(over.pixels()) {
        blend_pixel(dst, *src, 1.0);
    }
}

/// Clip shape of a region, evaluated in tile-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mask {
    pub shape: MaskShape,
    /// Corner radius as a percentage of the shorter side (rect masks only).
    pub corner_radius_pct: f64,
}

impl Mask {
    pub const RECT: Mask = Mask {
        shape: MaskShape::Rect,
        corner_radius_pct: 0.0,
    };

    pub fn new(shape: MaskShape, corner_radius_pct: f64) -> Self {
        Self {
            shape,
            corner_radius_pct,
        }
    }

    /// Whether local point `(u, v)` inside a `w × h` tile is visible.
    pub fn contains(&self, u: f64, v: f64, w: f64, h: f64) -> bool {
        if u < 0.0 || v < 0.0 || u >= w || v >= h {
            return false;
        }
        match self.shape {
            MaskShape::Circle => {
                let rx = w / 2.0;
                let ry = h / 2.0;
                let dx = (u - rx) / rx;
                let dy = (v - ry) / ry;
                dx * dx + dy * dy <= 1.0
            }
            MaskShape::Rect => {
                let r = self.corner_radius_pct.clamp(0.0, 50.0) / 100.0 * w.min(h);
                if r <= 0.0 {
                    return true;
                }
                rounded_rect_contains(u, v, w, h, r)
            }
        }
    }
}

fn rounded_rect_contains(u: f64, v: f64, w: f64, h: f64, r: f64) -> bool {
    if (u >= r && u <= w - r) || (v >= r && v <= h - r) {
        return true;
    }
    let cx = if u < r { r } else { w - r };
    let cy = if v < r { r } else { h - r };
    let dx = u - cx;
    let dy = v - cy;
    dx * dx + dy * dy <= r * r
}

/// Where a tile lands on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub rect: PixelRect,
    pub rotation_deg: f64,
}

impl Placement {
    pub fn new(rect: PixelRect, rotation_deg: f64) -> Self {
        Self { rect, rotation_deg }
    }

    pub fn transform(&self) -> Transform {
        crate::geometry::rotate_around_center(&self.rect.to_rect(), self.rotation_deg)
    }
}

/// Stamp `tile` onto `canvas` at `placement`, clipped to `mask`.
///
/// Every canvas pixel whose center maps inside the rotated region samples the
/// tile (nearest) and is blended source-over.
pub fn blit_tile(
    canvas: &mut RgbaImage,
    tile: &RgbaImage,
    placement: &Placement,
    mask: &Mask,
    opacity: f64,
) -> Result<(), GeometryError> {
    let region = placement.rect.to_rect();
    let forward = placement.transform();
    let inverse = forward.inverse()?;
    let bounds = forward.bounds_of(&region);

    let x0 = bounds.x.floor().max(0.0) as i64;
    let y0 = bounds.y.floor().max(0.0) as i64;
    let x1 = (bounds.right().ceil() as i64).min(canvas.width() as i64);
    let y1 = (bounds.bottom().ceil() as i64).min(canvas.height() as i64);
    if x0 >= x1 || y0 >= y1 {
        return Ok(());
    }

    let (tw, th) = (tile.width() as f64, tile.height() as f64);
    let (sx, sy) = (tw / region.width, th / region.height);
    for py in y0..y1 {
        for px in x0..x1 {
            let local = inverse.apply(Point::new(px as f64 + 0.5, py as f64 + 0.5));
            let u = (local.x - region.x) * sx;
            let v = (local.y - region.y) * sy;
            if !mask.contains(u, v, tw, th) {
                continue;
            }
            let tx = (u as u32).min(tile.width() - 1);
            let ty = (v as u32).min(tile.height() - 1);
            let src = *tile.get_pixel(tx, ty);
            blend_pixel(canvas.get_pixel_mut(px as u32, py as u32), src, opacity);
        }
    }
    Ok(())
}

/// Cover-fit `source` into a `width × height` tile, center-cropping the overflow.
pub fn cover_tile(source: &RgbaImage, width: u32, height: u32) -> Result<RgbaImage, GeometryError> {
    let fit = compute_aspect_fit(
        source.width() as f64,
        source.height() as f64,
        width as f64,
        height as f64,
        FitMode::Cover,
    )?;
    let crop = crop_bounds(&fit.source_crop, source.width(), source.height());
    let visible = imageops::crop_imm(source, crop.0, crop.1, crop.2, crop.3).to_image();
    if visible.dimensions() == (width, height) {
        return Ok(visible);
    }
    Ok(imageops::resize(&visible, width, height, RESAMPLE_FILTER))
}

/// Stretch `source` to exactly `width × height`.
pub fn stretch_tile(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if source.dimensions() == (width, height) {
        return source.clone();
    }
    imageops::resize(source, width, height, RESAMPLE_FILTER)
}

/// Round a floating crop to integer source bounds, never empty.
pub fn crop_bounds(rect: &Rect, max_w: u32, max_h: u32) -> (u32, u32, u32, u32) {
    let x = (rect.x.round().max(0.0) as u32).min(max_w.saturating_sub(1));
    let y = (rect.y.round().max(0.0) as u32).min(max_h.saturating_sub(1));
    let w = (rect.width.round() as u32).clamp(1, max_w - x);
    let h = (rect.height.round() as u32).clamp(1, max_h - y);
    (x, y, w, h)
}

pub fn solid_tile(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Placeholder for an empty region: neutral fill plus a label sized to the
/// region height. Without a font the label is a "+" mark.
pub fn placeholder_tile(
    width: u32,
    height: u32,
    fill: [u8; 4],
    label_color: [u8; 4],
    label: &str,
    label_ratio: f64,
    font: Option<&Font<'static>>,
) -> RgbaImage {
    let mut tile = solid_tile(width, height, fill);
    let px = (height as f64 * label_ratio).max(1.0) as f32;
    match font {
        Some(font) if !label.is_empty() => {
            let max_w = width as f32 * 0.9;
            let mut size = px;
            while size > 1.0 && text_width(font, size, label) > max_w {
                size *= 0.9;
            }
            let cx = width as f32 / 2.0;
            let cy = height as f32 / 2.0;
            draw_text_centered(&mut tile, font, size, cx, cy, Rgba(label_color), label);
        }
        _ => draw_plus(&mut tile, px as f64 * 2.0, Rgba(label_color)),
    }
    tile
}

fn draw_plus(tile: &mut RgbaImage, arm: f64, color: Rgba<u8>) {
    let (w, h) = (tile.width() as f64, tile.height() as f64);
    let arm = arm.min(w * 0.4).min(h * 0.4).max(1.0);
    let thickness = (arm / 5.0).max(1.0);
    let (cx, cy) = (w / 2.0, h / 2.0);
    let bars = [
        Rect::new(cx - arm, cy - thickness / 2.0, arm * 2.0, thickness),
        Rect::new(cx - thickness / 2.0, cy - arm, thickness, arm * 2.0),
    ];
    for (x, y, pixel) in tile.enumerate_pixels_mut() {
        let p = Point::new(x as f64 + 0.5, y as f64 + 0.5);
        if bars.iter().any(|b| b.contains(p)) {
            blend_pixel(pixel, color, 1.0);
        }
    }
}

/// Pixel width of a single line of text.
pub fn text_width(font: &Font<'static>, px: f32, text: &str) -> f32 {
    if text.is_empty() {
        return 0.0;
    }
    let scale = Scale::uniform(px);
    let v_metrics = font.v_metrics(scale);
    font.layout(text, scale, point(0.0, v_metrics.ascent))
        .filter_map(|g| g.pixel_bounding_box())
        .map(|bb| bb.max.x as f32)
        .fold(0.0, f32::max)
}

/// Draw one line of text with its top-left corner at `(x, y)`.
pub fn draw_text(img: &mut RgbaImage, font: &Font<'static>, px: f32, x: f32, y: f32, color: Rgba<u8>, text: &str) {
    let scale = Scale::uniform(px);
    let v_metrics = font.v_metrics(scale);
    for glyph in font.layout(text, scale, point(x, y + v_metrics.ascent)) {
        let Some(bb) = glyph.pixel_bounding_box() else {
            continue;
        };
        glyph.draw(|gx, gy, coverage| {
            let px = gx as i32 + bb.min.x;
            let py = gy as i32 + bb.min.y;
            if px < 0 || py < 0 || px as u32 >= img.width() || py as u32 >= img.height() {
                return;
            }
            blend_pixel(img.get_pixel_mut(px as u32, py as u32), color, coverage as f64);
        });
    }
}

pub fn line_height(font: &Font<'static>, px: f32) -> f32 {
    let vm = font.v_metrics(Scale::uniform(px));
    (vm.ascent - vm.descent).max(1.0)
}

pub fn draw_text_centered(
    img: &mut RgbaImage,
    font: &Font<'static>,
    px: f32,
    cx: f32,
    cy: f32,
    color: Rgba<u8>,
    text: &str,
) {
    let w = text_width(font, px, text);
    let h = line_height(font, px);
    draw_text(img, font, px, (cx - w / 2.0).round(), (cy - h / 2.0).round(), color, text);
}
