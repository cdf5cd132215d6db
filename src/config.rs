//! Engine Configuration
//!
//! Every knob has a serde default so a partial (or empty) JSON file is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::validation::FailureMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub crop: CropConfig,
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub decode: DecodeLimits,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.check()?;
        Ok(config)
    }

    /// Reject values that would break the renderers' invariants.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.render.supersample_factor >= 1.0 && self.render.supersample_factor.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "render.supersampleFactor",
                reason: format!("must be >= 1, got {}", self.render.supersample_factor),
            });
        }
        if !(self.crop.step > 0.0 && self.crop.step < 1.0) {
            return Err(ConfigError::Invalid {
                field: "crop.step",
                reason: format!("must be in (0, 1), got {}", self.crop.step),
            });
        }
        if self.crop.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                field: "crop.maxIterations",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.projection.cylinder_radius_m > 0.0) {
            return Err(ConfigError::Invalid {
                field: "projection.cylinderRadiusM",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    #[serde(default = "default_supersample")]
    pub supersample_factor: f64,
    #[serde(default = "default_placeholder_color")]
    pub placeholder_color: [u8; 4],
    #[serde(default = "default_label_color")]
    pub label_color: [u8; 4],
    #[serde(default = "default_placeholder_label")]
    pub placeholder_label: String,
    /// Label glyph height as a fraction of the slot height.
    #[serde(default = "default_label_ratio")]
    pub label_height_ratio: f64,
    /// Opacity of the scene-mode placeholder (dimmed frames).
    #[serde(default = "default_dim_opacity")]
    pub placeholder_dim_opacity: f64,
    #[serde(default = "default_max_surface_pixels")]
    pub max_surface_pixels: u64,
    /// Font used for placeholder labels and unstyled text fields.
    #[serde(default)]
    pub label_font_ref: Option<String>,
}

fn default_supersample() -> f64 { 2.0 }
fn default_placeholder_color() -> [u8; 4] { [226, 228, 233, 255] }
fn default_label_color() -> [u8; 4] { [110, 116, 128, 255] }
fn default_placeholder_label() -> String { "Add your photo".to_string() }
fn default_label_ratio() -> f64 { 0.08 }
fn default_dim_opacity() -> f64 { 0.6 }
fn default_max_surface_pixels() -> u64 { 120_000_000 }

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            supersample_factor: default_supersample(),
            placeholder_color: default_placeholder_color(),
            label_color: default_label_color(),
            placeholder_label: default_placeholder_label(),
            label_height_ratio: default_label_ratio(),
            placeholder_dim_opacity: default_dim_opacity(),
            max_surface_pixels: default_max_surface_pixels(),
            label_font_ref: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CropConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_aspect")]
    pub default_aspect: f64,
}

fn default_max_bytes() -> usize { 2 * 1024 * 1024 }
fn default_step() -> f64 { 0.1 }
fn default_max_iterations() -> u32 { 10 }
fn default_aspect() -> f64 { 1.0 }

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            step: default_step(),
            max_iterations: default_max_iterations(),
            default_aspect: default_aspect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionConfig {
    #[serde(default = "default_radius")]
    pub cylinder_radius_m: f64,
    #[serde(default = "default_print_height")]
    pub print_height_m: f64,
    #[serde(default = "default_handle_gap")]
    pub handle_gap_rad: f64,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
}

fn default_radius() -> f64 { 0.46 }
fn default_print_height() -> f64 { 0.95 }
fn default_handle_gap() -> f64 { 0.35 }
fn default_dpi() -> u32 { 300 }

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            cylinder_radius_m: default_radius(),
            print_height_m: default_print_height(),
            handle_gap_rad: default_handle_gap(),
            dpi: default_dpi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadingConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 { 10_000 }

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecodeLimits {
    #[serde(default = "default_max_side")]
    pub max_side_px: u32,
}

fn default_max_side() -> u32 { 12_000 }

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_side_px: default_max_side(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPolicy {
    #[serde(default)]
    pub failure_mode: FailureMode,
}
