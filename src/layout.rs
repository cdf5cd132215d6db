//! Slot Layout Model - Printable Region Contracts
//!
//! A layout is read-only input: print area, base artwork reference and the
//! percentage-based slots a user may fill.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::geometry::{percent_rect, Rect};

pub type LayoutId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LayoutBase {
    pub id: LayoutId,
    pub name: String,
    pub item_type: ItemType,
    pub print_area_width_px: u32,
    pub print_area_height_px: u32,
    #[serde(default)]
    pub base_artwork_ref: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotDef>,
    #[serde(default)]
    pub physical_width_m: Option<f64>,
    #[serde(default)]
    pub physical_height_m: Option<f64>,
    #[serde(default = "default_engine_min_version")]
    pub engine_min_version: String,
}

fn default_engine_min_version() -> String {
    crate::MIN_LAYOUT_ENGINE_VERSION.to_string()
}

impl LayoutBase {
    pub fn width(&self) -> f64 {
        self.print_area_width_px as f64
    }

    pub fn height(&self) -> f64 {
        self.print_area_height_px as f64
    }

    pub fn has_valid_dimensions(&self) -> bool {
        self.print_area_width_px > 0 && self.print_area_height_px > 0
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width() / self.height()
    }

    pub fn slot(&self, id: &str) -> Option<&SlotDef> {
        self.slots.iter().find(|s| s.id == id)
    }

    /// Slots in paint order: ascending `z_index`, declaration order on ties.
    pub fn slots_in_paint_order(&self) -> Vec<&SlotDef> {
        let mut ordered: Vec<&SlotDef> = self.slots.iter().collect();
        ordered.sort_by_key(|s| s.z_index);
        ordered
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Mug,
    Tumbler,
    Bottle,
    Canvas,
    Poster,
    Card,
    Other,
}

impl ItemType {
    /// Items whose print wraps around a cylinder.
    pub fn is_cylindrical(&self) -> bool {
        matches!(self, ItemType::Mug | ItemType::Tumbler | ItemType::Bottle)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MaskShape {
    #[default]
    Rect,
    #[serde(alias = "ellipse")]
    Circle,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlotDef {
    pub id: String,
    pub x_pct: f64,
    pub y_pct: f64,
    pub width_pct: f64,
    pub height_pct: f64,
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default)]
    pub z_index: i32,
    #[serde(default)]
    pub mask_shape: MaskShape,
    #[serde(default)]
    pub corner_radius_pct: f64,
}

impl SlotDef {
    /// Slot rectangle on a surface of `width × height` pixels.
    pub fn rect_on(&self, width: f64, height: f64) -> Rect {
        percent_rect(
            self.x_pct,
            self.y_pct,
            self.width_pct,
            self.height_pct,
            width,
            height,
        )
    }

    pub fn percentages(&self) -> [f64; 4] {
        [self.x_pct, self.y_pct, self.width_pct, self.height_pct]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SlotImageAssignment {
    pub slot_id: String,
    pub source_image_ref: String,
    pub natural_width: u32,
    pub natural_height: u32,
}

/// Layout registry - loads and holds layout definitions
pub struct LayoutRegistry {
    layouts: HashMap<LayoutId, LayoutBase>,
}

impl LayoutRegistry {
    pub fn new() -> Self {
        Self {
            layouts: HashMap::new(),
        }
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        if dir.exists() {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().map_or(false, |e| e == "json") {
                    let content = fs::read_to_string(&path)?;
                    match serde_json::from_str::<LayoutBase>(&content) {
                        Ok(layout) => registry.register(layout),
                        Err(e) => log::warn!("Skipping layout {}: {}", path.display(), e),
                    }
                }
            }
        }
        log::debug!("Loaded {} layouts from {}", registry.len(), dir.display());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&LayoutBase> {
        self.layouts.get(id)
    }

    /// Layouts sorted by id.
    pub fn list(&self) -> Vec<&LayoutBase> {
        let mut layouts: Vec<_> = self.layouts.values().collect();
        layouts.sort_by(|a, b| a.id.cmp(&b.id));
        layouts
    }

    pub fn register(&mut self, layout: LayoutBase) {
        self.layouts.insert(layout.id.clone(), layout);
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}
