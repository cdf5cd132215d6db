//! Scene snapshots: the persisted form of an editable scene.
//!
//! A snapshot is plain data. Resolving it into live objects happens once, at
//! load, and rejects anything a renderer could not draw.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::hashing::{canonical_json, sha256_hex};
use crate::layout::{LayoutBase, MaskShape, SlotImageAssignment};

use super::object::{
    Decoration, Drawable, FrameImage, ImageFrame, ObjectGeometry, ObjectKind, SceneObject, TextField, TextStyle,
};
use super::SceneError;

/// Snapshot format version written by this engine.
pub const SNAPSHOT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSnapshot {
    #[serde(default = "default_snapshot_version")]
    pub version: String,
    pub layout_id: String,
    pub width_px: u32,
    pub height_px: u32,
    #[serde(default)]
    pub objects: Vec<SnapshotObject>,
}

fn default_snapshot_version() -> String { SNAPSHOT_VERSION.to_string() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotObject {
    pub id: String,
    pub kind: ObjectKind,
    pub geometry: ObjectGeometry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_shape: Option<MaskShape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corner_radius_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment: Option<SlotImageAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<[u8; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_style: Option<TextStyle>,
}

impl SnapshotObject {
    fn bare(id: &str, kind: ObjectKind, geometry: ObjectGeometry) -> Self {
        Self {
            id: id.to_string(),
            kind,
            geometry,
            mask_shape: None,
            corner_radius_pct: None,
            assignment: None,
            text_value: None,
            max_chars: None,
            asset_ref: None,
            fill: None,
            text_style: None,
        }
    }
}

/// A text value cut to its budget during import.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportTruncation {
    pub object_id: String,
    pub max_chars: usize,
}

impl SceneSnapshot {
    pub fn from_json(json: &str) -> Result<Self, SceneError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, SceneError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Content digest over the canonical JSON form.
    pub fn digest(&self) -> Result<String, SceneError> {
        Ok(sha256_hex(canonical_json(self)?.as_bytes()))
    }

    /// Accept any snapshot sharing the engine's snapshot major version.
    pub fn check_version(&self) -> Result<(), SceneError> {
        let incompatible = || SceneError::IncompatibleVersion {
            found: self.version.clone(),
            supported: SNAPSHOT_VERSION.to_string(),
        };
        let found = semver::Version::parse(&self.version).map_err(|_| incompatible())?;
        let supported = semver::Version::parse(SNAPSHOT_VERSION).map_err(|_| incompatible())?;
        if found.major != supported.major {
            return Err(incompatible());
        }
        Ok(())
    }

    /// Starting scene for a layout: one frame per slot in paint order, with
    /// the base artwork as a locked decoration on top.
    pub fn from_layout(layout: &LayoutBase) -> Self {
        let (w, h) = (layout.width(), layout.height());
        let mut objects: Vec<SnapshotObject> = layout
            .slots_in_paint_order()
            .into_iter()
            .map(|slot| {
                let r = slot.rect_on(w, h);
                let geometry = ObjectGeometry {
                    x: r.x,
                    y: r.y,
                    width: r.width,
                    height: r.height,
                    rotation_deg: slot.rotation_deg,
                };
                SnapshotObject {
                    mask_shape: Some(slot.mask_shape),
                    corner_radius_pct: Some(slot.corner_radius_pct),
                    ..SnapshotObject::bare(&slot.id, ObjectKind::ImageFrame, geometry)
                }
            })
            .collect();

        if let Some(base) = &layout.base_artwork_ref {
            let geometry = ObjectGeometry {
                x: 0.0,
                y: 0.0,
                width: w,
                height: h,
                rotation_deg: 0.0,
            };
            objects.push(SnapshotObject {
                asset_ref: Some(base.clone()),
                ..SnapshotObject::bare("base-artwork", ObjectKind::Decoration, geometry)
            });
        }

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            layout_id: layout.id.clone(),
            width_px: layout.print_area_width_px,
            height_px: layout.print_area_height_px,
            objects,
        }
    }

    /// Capture live objects. Selection is not part of a snapshot.
    pub fn from_objects(layout_id: &str, width_px: u32, height_px: u32, objects: &[SceneObject]) -> Self {
        let objects = objects
            .iter()
            .map(|object| {
                let bare = SnapshotObject::bare(&object.id, object.kind(), object.geometry);
                match &object.drawable {
                    Drawable::Decoration(d) => SnapshotObject {
                        asset_ref: d.asset_ref.clone(),
                        fill: d.fill,
                        ..bare
                    },
                    Drawable::ImageFrame(f) => SnapshotObject {
                        mask_shape: Some(f.mask_shape),
                        corner_radius_pct: Some(f.corner_radius_pct),
                        fill: f.fill,
                        assignment: f.image.as_ref().map(|i| i.assignment.clone()),
                        ..bare
                    },
                    Drawable::TextField(t) => SnapshotObject {
                        text_value: Some(t.value.clone()),
                        max_chars: t.max_chars,
                        text_style: Some(t.style.clone()),
                        ..bare
                    },
                }
            })
            .collect();

        Self {
            version: SNAPSHOT_VERSION.to_string(),
            layout_id: layout_id.to_string(),
            width_px,
            height_px,
            objects,
        }
    }

    /// Resolve into live objects. Duplicate ids, unusable geometry and an
    /// empty surface are errors; over-long text is truncated and reported.
    pub fn resolve(&self) -> Result<(Vec<SceneObject>, Vec<ImportTruncation>), SceneError> {
        self.check_version()?;
        if self.width_px == 0 || self.height_px == 0 {
            return Err(SceneError::InvalidGeometry(format!(
                "scene surface {}x{}",
                self.width_px, self.height_px
            )));
        }

        let mut seen = HashSet::new();
        let mut objects = Vec::with_capacity(self.objects.len());
        let mut truncations = Vec::new();

        for entry in &self.objects {
            if !seen.insert(entry.id.as_str()) {
                return Err(SceneError::DuplicateObject(entry.id.clone()));
            }
            if !entry.geometry.is_valid() {
                return Err(SceneError::InvalidGeometry(entry.id.clone()));
            }

            let drawable = match entry.kind {
                ObjectKind::Decoration => Drawable::Decoration(Decoration {
                    asset_ref: entry.asset_ref.clone(),
                    fill: entry.fill,
                    handle: None,
                }),
                ObjectKind::ImageFrame => Drawable::ImageFrame(ImageFrame {
                    mask_shape: entry.mask_shape.unwrap_or_default(),
                    corner_radius_pct: entry.corner_radius_pct.unwrap_or(0.0),
                    fill: entry.fill,
                    image: entry.assignment.clone().map(|assignment| FrameImage {
                        assignment,
                        handle: None,
                    }),
                }),
                ObjectKind::TextField => {
                    let raw = entry.text_value.as_deref().unwrap_or_default();
                    let (value, truncated) = TextField::clip(raw, entry.max_chars);
                    if truncated {
                        if let Some(max_chars) = entry.max_chars {
                            log::warn!("Text {} exceeds {} characters, truncated on import", entry.id, max_chars);
                            truncations.push(ImportTruncation {
                                object_id: entry.id.clone(),
                                max_chars,
                            });
                        }
                    }
                    Drawable::TextField(TextField {
                        value,
                        max_chars: entry.max_chars,
                        style: entry.text_style.clone().unwrap_or_default(),
                    })
                }
            };

            objects.push(SceneObject {
                id: entry.id.clone(),
                geometry: entry.geometry,
                drawable,
            });
        }

        Ok((objects, truncations))
    }
}
