//! Crop Tool - Affine Selection and Bounded Shrink-to-Budget
//!
//! The source image is never mutated. Every adjustment produces a new
//! candidate selection; commit resamples the selection and shrinks it in
//! fixed steps until the PNG fits the byte budget or the iteration budget
//! runs out.

use image::imageops;
use image::RgbaImage;
use std::sync::Arc;
use thiserror::Error;

use crate::config::CropConfig;
use crate::geometry::Rect;
use crate::layout::SlotImageAssignment;
use crate::raster::{self, RESAMPLE_FILTER};

#[derive(Debug, Error)]
pub enum CropError {
    #[error("Source image is empty")]
    EmptySource,

    #[error("Invalid target aspect {0}")]
    InvalidAspect(f64),

    #[error("Invalid selection ({x}, {y}, {width}x{height})")]
    InvalidSelection { x: f64, y: f64, width: f64, height: f64 },

    #[error("Encoded size {size} still exceeds budget {budget} after {iterations} reductions (scale {scale:.3})")]
    SizeBudgetExceeded {
        budget: usize,
        size: usize,
        iterations: u32,
        scale: f64,
    },

    #[error("Encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Largest centered rectangle of `aspect` (width / height) inside the source.
pub fn initial_selection(source_w: u32, source_h: u32, aspect: f64) -> Rect {
    let (sw, sh) = (source_w as f64, source_h as f64);
    let (w, h) = if sw / sh > aspect {
        (sh * aspect, sh)
    } else {
        (sw, sw / aspect)
    };
    Rect::new((sw - w) / 2.0, (sh - h) / 2.0, w, h)
}

fn clamp_selection(rect: Rect, source_w: u32, source_h: u32) -> Result<Rect, CropError> {
    if ![rect.x, rect.y, rect.width, rect.height].iter().all(|v| v.is_finite()) {
        return Err(CropError::InvalidSelection {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        });
    }
    let (sw, sh) = (source_w as f64, source_h as f64);
    let width = rect.width.clamp(1.0, sw);
    let height = rect.height.clamp(1.0, sh);
    let x = rect.x.clamp(0.0, sw - width);
    let y = rect.y.clamp(0.0, sh - height);
    Ok(Rect::new(x, y, width, height))
}

fn check_aspect(aspect: f64) -> Result<f64, CropError> {
    if aspect.is_finite() && aspect > 0.0 {
        Ok(aspect)
    } else {
        Err(CropError::InvalidAspect(aspect))
    }
}

/// Interactive crop session over one source image.
#[derive(Debug, Clone)]
pub struct CropTool {
    source: Arc<RgbaImage>,
    aspect: f64,
    selection: Rect,
}

impl CropTool {
    pub fn new(source: Arc<RgbaImage>, target_aspect: Option<f64>, config: &CropConfig) -> Result<Self, CropError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(CropError::EmptySource);
        }
        let aspect = check_aspect(target_aspect.unwrap_or(config.default_aspect))?;
        let selection = initial_selection(source.width(), source.height(), aspect);
        Ok(Self {
            source,
            aspect,
            selection,
        })
    }

    pub fn source(&self) -> &RgbaImage {
        &self.source
    }

    pub fn aspect(&self) -> f64 {
        self.aspect
    }

    pub fn selection(&self) -> Rect {
        self.selection
    }

    /// Replace the selection with a free-form rectangle, clamped into the
    /// source. Non-finite rectangles are rejected and the selection kept.
    pub fn set_selection(&mut self, rect: Rect) -> Result<Rect, CropError> {
        self.selection = clamp_selection(rect, self.source.width(), self.source.height())?;
        Ok(self.selection)
    }

    /// Pan the selection, stopping at the source edges.
    pub fn move_by(&mut self, dx: f64, dy: f64) -> Rect {
        let s = self.selection;
        self.set_selection(Rect::new(s.x + dx, s.y + dy, s.width, s.height))
            .unwrap_or(s)
    }

    /// Zoom the selection around its center at the target aspect. The
    /// selection never grows beyond the initial (largest) fit.
    pub fn scale_by(&mut self, factor: f64) -> Rect {
        if !factor.is_finite() || factor <= 0.0 {
            return self.selection;
        }
        let max = initial_selection(self.source.width(), self.source.height(), self.aspect);
        let width = (self.selection.width * factor).min(max.width).max(1.0);
        let height = width / self.aspect;
        let current = self.selection;
        let c = current.center();
        self.set_selection(Rect::new(c.x - width / 2.0, c.y - height / 2.0, width, height))
            .unwrap_or(current)
    }

    pub fn reset(&mut self) -> Rect {
        self.selection = initial_selection(self.source.width(), self.source.height(), self.aspect);
        self.selection
    }

    pub fn commit(&self, config: &CropConfig) -> Result<CropOutput, CropError> {
        crop(&self.source, Some(self.selection), Some(self.aspect), config)
    }
}

#[derive(Debug, Clone)]
pub struct CropOutput {
    pub image: RgbaImage,
    /// PNG bytes of `image`, within the configured budget.
    pub encoded: Vec<u8>,
    pub selection: Rect,
    pub scale: f64,
    pub reductions: u32,
}

impl CropOutput {
    pub fn assignment(&self, slot_id: &str, source_image_ref: &str) -> SlotImageAssignment {
        SlotImageAssignment {
            slot_id: slot_id.to_string(),
            source_image_ref: source_image_ref.to_string(),
            natural_width: self.image.width(),
            natural_height: self.image.height(),
        }
    }
}

/// Crop `selection` (or the centered `target_aspect` fit) out of `source`
/// and shrink it until the encoded PNG fits `config.max_bytes`.
pub fn crop(
    source: &RgbaImage,
    selection: Option<Rect>,
    target_aspect: Option<f64>,
    config: &CropConfig,
) -> Result<CropOutput, CropError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(CropError::EmptySource);
    }
    let aspect = check_aspect(target_aspect.unwrap_or(config.default_aspect))?;
    let selection = clamp_selection(
        selection.unwrap_or_else(|| initial_selection(source.width(), source.height(), aspect)),
        source.width(),
        source.height(),
    )?;

    let (x, y, w, h) = raster::crop_bounds(&selection, source.width(), source.height());
    let region = imageops::crop_imm(source, x, y, w, h).to_image();

    let mut scale = 1.0_f64;
    let mut reductions = 0u32;
    let mut image = region.clone();
    let mut encoded = raster::encode_png(&image)?;

    while encoded.len() > config.max_bytes {
        if reductions >= config.max_iterations {
            log::warn!(
                "Crop budget exhausted: {} bytes > {} after {} reductions",
                encoded.len(),
                config.max_bytes,
                reductions
            );
            return Err(CropError::SizeBudgetExceeded {
                budget: config.max_bytes,
                size: encoded.len(),
                iterations: reductions,
                scale,
            });
        }
        reductions += 1;
        scale *= 1.0 - config.step;
        let next_w = ((region.width() as f64 * scale).round() as u32).clamp(1, image.width());
        let next_h = ((region.height() as f64 * scale).round() as u32).clamp(1, image.height());
        image = imageops::resize(&region, next_w, next_h, RESAMPLE_FILTER);
        encoded = raster::encode_png(&image)?;
        log::debug!(
            "Crop reduction {}: {}x{} -> {} bytes",
            reductions,
            next_w,
            next_h,
            encoded.len()
        );
    }

    Ok(CropOutput {
        image,
        encoded,
        selection,
        scale,
        reductions,
    })
}
