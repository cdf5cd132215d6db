//! Print Authority System
//!
//! Defines where physical print dimensions come from, so the projector never
//! branches on "does the layout say / did the user say / use defaults".

use serde::{Deserialize, Serialize};

use crate::config::ProjectionConfig;
use crate::layout::{ItemType, LayoutBase};

const METERS_PER_INCH: f64 = 0.0254;

/// PrintAuthority determines where physical specifications come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrintAuthority {
    /// Engine defaults for the item type (fallback)
    #[default]
    System,
    /// Dimensions declared by the layout
    Layout,
    /// User-provided overrides (with validation)
    User,
}

/// Physical properties of the printed surface, in viewer meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalSpec {
    pub authority: PrintAuthority,
    pub dpi: u32,
    /// Print height on the object. For planar items also the plane height.
    pub print_height_m: f64,
    /// Plane width for planar items; derived from the aspect for cylinders.
    pub print_width_m: Option<f64>,
    pub cylinder_radius_m: f64,
    pub handle_gap_rad: f64,
}

impl PhysicalSpec {
    /// Engine defaults for `item_type`.
    pub fn system(item_type: ItemType, config: &ProjectionConfig) -> Self {
        // Only mugs reserve a handle region.
        let handle_gap_rad = match item_type {
            ItemType::Mug => config.handle_gap_rad,
            _ => 0.0,
        };
        Self {
            authority: PrintAuthority::System,
            dpi: config.dpi,
            print_height_m: config.print_height_m,
            print_width_m: None,
            cylinder_radius_m: config.cylinder_radius_m,
            handle_gap_rad,
        }
    }

    /// Resolve for a layout: layout-declared dimensions override the system
    /// defaults. Planar layouts without declared dimensions derive them from dpi.
    pub fn for_layout(layout: &LayoutBase, config: &ProjectionConfig) -> Self {
        let mut spec = Self::system(layout.item_type, config);
        if let Some(h) = layout.physical_height_m.filter(|h| *h > 0.0 && h.is_finite()) {
            spec.print_height_m = h;
            spec.authority = PrintAuthority::Layout;
        }
        if let Some(w) = layout.physical_width_m.filter(|w| *w > 0.0 && w.is_finite()) {
            spec.print_width_m = Some(w);
            spec.authority = PrintAuthority::Layout;
        }
        if !layout.item_type.is_cylindrical() && spec.authority == PrintAuthority::System {
            let dpi = spec.dpi.max(1) as f64;
            spec.print_width_m = Some(layout.width() / dpi * METERS_PER_INCH);
            spec.print_height_m = layout.height() / dpi * METERS_PER_INCH;
        }
        spec
    }

    /// Apply user overrides with validation.
    pub fn with_user_override(
        mut self,
        print_height_m: Option<f64>,
        cylinder_radius_m: Option<f64>,
    ) -> Result<Self, &'static str> {
        if let Some(h) = print_height_m {
            if !(h > 0.0 && h <= 10.0) {
                return Err("Print height must be between 0 and 10 meters");
            }
            self.print_height_m = h;
            self.authority = PrintAuthority::User;
        }
        if let Some(r) = cylinder_radius_m {
            if !(r > 0.0 && r <= 10.0) {
                return Err("Cylinder radius must be between 0 and 10 meters");
            }
            self.cylinder_radius_m = r;
            self.authority = PrintAuthority::User;
        }
        Ok(self)
    }
}
