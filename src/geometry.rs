//! Geometry & Fit Utilities
//!
//! Pure math shared by every renderer: percentage regions, rotation around a
//! center, and cover/contain aspect fitting. Nothing here allocates or
//! touches pixels, and identical inputs always produce identical bits.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Convert a percentage of a dimension into pixels.
pub fn percent_to_pixel(value_pct: f64, dimension_px: f64) -> f64 {
    value_pct / 100.0 * dimension_px
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in floating point pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn aspect(&self) -> f64 {
        self.width / self.height
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }

    /// True when `other` lies entirely inside `self` (edges inclusive).
    pub fn encloses(&self, other: &Rect, eps: f64) -> bool {
        other.x >= self.x - eps
            && other.y >= self.y - eps
            && other.right() <= self.right() + eps
            && other.bottom() <= self.bottom() + eps
    }

    pub fn scaled(&self, factor: f64) -> Rect {
        Rect::new(
            self.x * factor,
            self.y * factor,
            self.width * factor,
            self.height * factor,
        )
    }

    /// Snap to whole pixels. Width and height never drop below one pixel.
    pub fn round(&self) -> PixelRect {
        let x = self.x.round() as i64;
        let y = self.y.round() as i64;
        let right = self.right().round() as i64;
        let bottom = self.bottom().round() as i64;
        // Casts saturate, so extreme inputs must not overflow the subtraction.
        let extent = |lo: i64, hi: i64| hi.saturating_sub(lo).clamp(1, u32::MAX as i64) as u32;
        PixelRect {
            x,
            y,
            width: extent(x, right),
            height: extent(y, bottom),
        }
    }
}

/// Integer rectangle on a raster surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn to_rect(self) -> Rect {
        Rect::new(
            self.x as f64,
            self.y as f64,
            self.width as f64,
            self.height as f64,
        )
    }
}

/// Resolve a percentage region against a surface of `width × height` pixels.
pub fn percent_rect(
    x_pct: f64,
    y_pct: f64,
    width_pct: f64,
    height_pct: f64,
    width: f64,
    height: f64,
) -> Rect {
    Rect::new(
        percent_to_pixel(x_pct, width),
        percent_to_pixel(y_pct, height),
        percent_to_pixel(width_pct, width),
        percent_to_pixel(height_pct, height),
    )
}

/// 2D affine transform: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    pub fn rotate_degrees(degrees: f64) -> Self {
        // Exact quarter turns keep axis-aligned slots pixel exact.
        let (sin, cos) = match normalize_degrees(degrees) {
            d if d == 0.0 => (0.0, 1.0),
            d if d == 90.0 => (1.0, 0.0),
            d if d == 180.0 => (0.0, -1.0),
            d if d == 270.0 => (-1.0, 0.0),
            d => d.to_radians().sin_cos(),
        };
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self` applied after `first`.
    pub fn then(&self, first: &Transform) -> Transform {
        Transform {
            a: self.a * first.a + self.c * first.b,
            b: self.b * first.a + self.d * first.b,
            c: self.a * first.c + self.c * first.d,
            d: self.b * first.c + self.d * first.d,
            e: self.a * first.e + self.c * first.f + self.e,
            f: self.b * first.e + self.d * first.f + self.f,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    pub fn inverse(&self) -> Result<Transform, GeometryError> {
        let det = self.determinant();
        if !det.is_finite() || det == 0.0 {
            return Err(GeometryError::NonFinite("transform determinant"));
        }
        let inv = 1.0 / det;
        Ok(Transform {
            a: self.d * inv,
            b: -self.b * inv,
            c: -self.c * inv,
            d: self.a * inv,
            e: (self.c * self.f - self.d * self.e) * inv,
            f: (self.b * self.e - self.a * self.f) * inv,
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Axis-aligned bounds of `rect` after the transform.
    pub fn bounds_of(&self, rect: &Rect) -> Rect {
        let corners = [
            self.apply(Point::new(rect.x, rect.y)),
            self.apply(Point::new(rect.right(), rect.y)),
            self.apply(Point::new(rect.x, rect.bottom())),
            self.apply(Point::new(rect.right(), rect.bottom())),
        ];
        let min_x = corners.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = corners.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        let max_x = corners.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
        let max_y = corners.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
        Rect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

fn normalize_degrees(degrees: f64) -> f64 {
    let d = degrees % 360.0;
    if d < 0.0 {
        d + 360.0
    } else {
        d
    }
}

/// Rotation of `rect` by `degrees` (clockwise in raster space) around its center.
pub fn rotate_around_center(rect: &Rect, degrees: f64) -> Transform {
    let c = rect.center();
    Transform::translate(c.x, c.y)
        .then(&Transform::rotate_degrees(degrees))
        .then(&Transform::translate(-c.x, -c.y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Fill the target, cropping the overflow around the center.
    Cover,
    /// Fit inside the target, leaving margins.
    Contain,
}

/// Result of fitting a source into a target box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectFit {
    pub scale: f64,
    /// Where the scaled source lands, in target coordinates. May overflow the
    /// target for `cover`.
    pub dest: Rect,
    /// Portion of the source that ends up visible inside the target.
    pub source_crop: Rect,
}

pub fn compute_aspect_fit(
    source_w: f64,
    source_h: f64,
    target_w: f64,
    target_h: f64,
    mode: FitMode,
) -> Result<AspectFit, GeometryError> {
    for (w, h) in [(source_w, source_h), (target_w, target_h)] {
        if !w.is_finite() || !h.is_finite() || w <= 0.0 || h <= 0.0 {
            return Err(GeometryError::InvalidDimensions { width: w, height: h });
        }
    }

    let sx = target_w / source_w;
    let sy = target_h / source_h;
    let scale = match mode {
        FitMode::Cover => sx.max(sy),
        FitMode::Contain => sx.min(sy),
    };

    let scaled_w = source_w * scale;
    let scaled_h = source_h * scale;
    let dest = Rect::new(
        (target_w - scaled_w) / 2.0,
        (target_h - scaled_h) / 2.0,
        scaled_w,
        scaled_h,
    );

    let source_crop = match mode {
        FitMode::Cover => {
            let visible_w = (target_w / scale).min(source_w);
            let visible_h = (target_h / scale).min(source_h);
            Rect::new(
                (source_w - visible_w) / 2.0,
                (source_h - visible_h) / 2.0,
                visible_w,
                visible_h,
            )
        }
        FitMode::Contain => Rect::new(0.0, 0.0, source_w, source_h),
    };

    Ok(AspectFit {
        scale,
        dest,
        source_crop,
    })
}
