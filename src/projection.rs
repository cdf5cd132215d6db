//! UV Projector - 2D Layout Proportions to 3D Surface Wrap
//!
//! Produces the texture placement a 3D viewer needs: a flat plane, or an arc
//! of a cylinder whose angular extent follows the layout's aspect ratio.
//! Nothing here is cached; call again whenever layout dimensions change.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::error::GeometryError;
use crate::hashing::raster_digest;
use crate::layout::{ItemType, LayoutBase};
use crate::print::PhysicalSpec;

/// Wrap angle used when the derived angle is unusable.
pub const FALLBACK_WRAP_ANGLE: f64 = FRAC_PI_2;

/// Clearance kept below the handle limit so the wrap never touches it.
pub const WRAP_CLEARANCE_RAD: f64 = 1e-6;

const MIN_LAYOUT_HEIGHT: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMode {
    Planar,
    Cylindrical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UvProjection {
    pub mapping: MappingMode,
    pub physical_width_m: f64,
    pub physical_height_m: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_angle_rad: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrap_start_rad: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceTexture {
    pub surface: String,
    pub projection: UvProjection,
    pub texture_width_px: u32,
    pub texture_height_px: u32,
    pub texture_digest: String,
    /// Fraction of the circumference (cylinder) or plane width covered.
    pub u_span: f64,
    /// Start of the texture as a fraction of the circumference.
    pub u_offset: f64,
}

/// Outcome of the cylindrical derivation.
#[derive(Debug, Clone, PartialEq)]
pub struct WrapAngle {
    pub width_m: f64,
    pub theta: f64,
    pub clamped: bool,
    /// Set when the derived angle was unusable and the fallback applied.
    pub corrected: Option<GeometryError>,
}

/// Upper bound for the wrap angle given the reserved handle gap.
pub fn max_wrap_angle(handle_gap_rad: f64) -> f64 {
    let gap = if handle_gap_rad.is_finite() {
        handle_gap_rad.clamp(0.0, PI - WRAP_CLEARANCE_RAD)
    } else {
        0.0
    };
    TAU - 2.0 * gap
}

/// Derive the angular extent of a `layout_w × layout_h` print wrapped on a
/// cylinder: `width = aspect × print_height`, `theta = width / radius`,
/// clamped below the handle limit, `π/2` for degenerate input.
pub fn cylindrical_wrap(
    layout_w: f64,
    layout_h: f64,
    print_height_m: f64,
    radius_m: f64,
    handle_gap_rad: f64,
) -> WrapAngle {
    let width_m = (layout_w / layout_h) * print_height_m;
    let theta = width_m / radius_m;

    let problem = if !(layout_h.abs() > MIN_LAYOUT_HEIGHT) {
        Some(GeometryError::InvalidDimensions {
            width: layout_w,
            height: layout_h,
        })
    } else if !theta.is_finite() {
        Some(GeometryError::NonFinite("wrap angle"))
    } else if theta <= 0.0 {
        Some(GeometryError::InvalidDimensions {
            width: layout_w,
            height: layout_h,
        })
    } else {
        None
    };

    if let Some(err) = problem {
        log::warn!("Wrap angle corrected to fallback {:.4} rad: {}", FALLBACK_WRAP_ANGLE, err);
        return WrapAngle {
            width_m: FALLBACK_WRAP_ANGLE * radius_m.max(0.0),
            theta: FALLBACK_WRAP_ANGLE,
            clamped: false,
            corrected: Some(err),
        };
    }

    let limit = max_wrap_angle(handle_gap_rad) - WRAP_CLEARANCE_RAD;
    if theta > limit {
        log::debug!("Wrap angle {:.4} clamped to {:.4}", theta, limit);
        return WrapAngle {
            width_m,
            theta: limit,
            clamped: true,
            corrected: None,
        };
    }

    WrapAngle {
        width_m,
        theta,
        clamped: false,
        corrected: None,
    }
}

/// Projection parameters for `layout` printed on `item_type`.
pub fn projection_for(layout: &LayoutBase, item_type: ItemType, spec: &PhysicalSpec) -> UvProjection {
    if item_type.is_cylindrical() {
        let wrap = cylindrical_wrap(
            layout.width(),
            layout.height(),
            spec.print_height_m,
            spec.cylinder_radius_m,
            spec.handle_gap_rad,
        );
        return UvProjection {
            mapping: MappingMode::Cylindrical,
            physical_width_m: wrap.width_m,
            physical_height_m: spec.print_height_m,
            wrap_angle_rad: Some(wrap.theta),
            // Centered on the front, opposite the handle.
            wrap_start_rad: Some(-wrap.theta / 2.0),
        };
    }

    let height = spec.print_height_m;
    let width = match spec.print_width_m {
        Some(w) => w,
        None => {
            let aspect = layout.aspect_ratio();
            if aspect.is_finite() && aspect > 0.0 {
                aspect * height
            } else {
                log::warn!("Layout {} has degenerate aspect, using a square plane", layout.id);
                height
            }
        }
    };
    UvProjection {
        mapping: MappingMode::Planar,
        physical_width_m: width,
        physical_height_m: height,
        wrap_angle_rad: None,
        wrap_start_rad: None,
    }
}

/// Texture descriptors for the 3D viewer, using `final_raster` as the source.
pub fn project(
    layout: &LayoutBase,
    final_raster: &RgbaImage,
    item_type: ItemType,
    spec: &PhysicalSpec,
) -> Vec<SurfaceTexture> {
    let projection = projection_for(layout, item_type, spec);
    let (surface, u_span, u_offset) = match (projection.wrap_angle_rad, projection.wrap_start_rad) {
        (Some(theta), Some(start)) => ("wrap", theta / TAU, start.rem_euclid(TAU) / TAU),
        _ => ("front", 1.0, 0.0),
    };
    vec![SurfaceTexture {
        surface: surface.to_string(),
        projection,
        texture_width_px: final_raster.width(),
        texture_height_px: final_raster.height(),
        texture_digest: raster_digest(final_raster),
        u_span,
        u_offset,
    }]
}
