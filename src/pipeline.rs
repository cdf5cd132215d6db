//! Render Pipeline - Single Entry Point
//!
//! CRITICAL: render MUST call validate internally. No bypass.

use base64::Engine;
use chrono::{DateTime, Utc};
use image::RgbaImage;
use rusttype::Font;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::assets::{self, AssetLoader};

use crate::compositor::{self, AssignedImage, CompositeError, CompositeWarning, RegionDescriptor, RenderOptions};
use crate::config::EngineConfig;
use crate::error::AssetLoadError;
use crate::hashing::{canonical_json, compute_job_hash, compute_manifest_hash, sha256_hex};
use crate::layout::{LayoutBase, LayoutRegistry, SlotImageAssignment};
use crate::print::PhysicalSpec;
use crate::projection::{self, SurfaceTexture};
use crate::raster;
use crate::scene::FontCache;
use crate::validation::{LayoutInput, ValidationResult, Validator};
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Layout not found: {0}")]
    LayoutNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Layout {0} requires engine >= {1}, current is {2}")]
    EngineVersionMismatch(String, String, String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Invalid physical override: {0}")]
    InvalidOverride(&'static str),

    #[error("Composite failed: {0}")]
    Composite(#[from] CompositeError),

    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPayload {
    pub assignment: SlotImageAssignment,
    /// Base64 encoded PNG or JPEG bytes.
    pub data_base64: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhysicalOverride {
    #[serde(default)]
    pub print_height_m: Option<f64>,
    #[serde(default)]
    pub cylinder_radius_m: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub layout_id: String,
    /// Base64 encoded base artwork.
    #[serde(default)]
    pub base_artwork: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotPayload>,
    /// Also produce 3D surface textures.
    #[serde(default)]
    pub project: bool,
    #[serde(default)]
    pub physical_override: Option<PhysicalOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFile {
    pub id: String,
    pub filename: String,
    pub format: String,
    pub size: [u32; 2],
    pub data_base64: String,
    pub hash: String,
}

impl ExportedFile {
    fn png(id: &str, image: &RgbaImage) -> Result<Self, PipelineError> {
        let data = raster::encode_png(image)?;
        Ok(Self {
            id: id.to_string(),
            filename: format!("{}.png", id),
            format: "png".to_string(),
            size: [image.width(), image.height()],
            hash: sha256_hex(&data),
            data_base64: base64::engine::general_purpose::STANDARD.encode(&data),
        })
    }

    pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data_base64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedPersonalization {
    pub id: String,
    pub layout_id: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub manifest_hash: String,
    pub job_hash: String,
    pub validation: ValidationResult,
    pub warnings: Vec<CompositeWarning>,
    pub regions: Vec<RegionDescriptor>,
    pub exports: Vec<ExportedFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub surfaces: Vec<SurfaceTexture>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical: Option<PhysicalSpec>,
}

/// The render pipeline - single entry point for slot-fill personalization
pub struct RenderPipeline {
    registry: LayoutRegistry,
    validator: Validator,
    config: EngineConfig,
    fonts: FontCache,
}

impl RenderPipeline {
    pub fn new(registry: LayoutRegistry, config: EngineConfig) -> Self {
        Self {
            registry,
            validator: Validator::new(),
            config,
            fonts: FontCache::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Register font bytes under `reference`. Empty slots draw the
    /// instructional label once `render.labelFontRef` names a registered font.
    pub fn register_font(&mut self, reference: &str, bytes: Vec<u8>) -> Result<(), AssetLoadError> {
        self.fonts.insert_bytes(reference, bytes)
    }

    /// Fetch `render.labelFontRef` through `loader`. No-op when unset.
    pub async fn load_label_font<L: AssetLoader>(&mut self, loader: &L) -> Result<(), AssetLoadError> {
        let Some(reference) = self.config.render.label_font_ref.clone() else {
            return Ok(());
        };
        let timeout = Duration::from_millis(self.config.loading.timeout_ms);
        let bytes = assets::load_tagged(loader, &reference, 0, timeout).await.into_bytes()?;
        self.register_font(&reference, bytes)?;
        log::info!("Label font {} loaded", reference);
        Ok(())
    }

    fn label_font(&self) -> Option<&Font<'static>> {
        self.config
            .render
            .label_font_ref
            .as_deref()
            .and_then(|r| self.fonts.get(r))
    }

    /// List all available layouts
    pub fn list_layouts(&self) -> Vec<&LayoutBase> {
        self.registry.list()
    }

    pub fn get_layout(&self, id: &str) -> Option<&LayoutBase> {
        self.registry.get(id)
    }

    fn resolve(&self, layout_id: &str) -> Result<&LayoutBase, PipelineError> {
        let layout = self
            .registry
            .get(layout_id)
            .ok_or_else(|| PipelineError::LayoutNotFound(layout_id.to_string()))?;
        check_engine_version(layout)?;
        Ok(layout)
    }

    /// Validate a layout, optionally against its base artwork.
    ///
    /// This is the ONLY validation entry point.
    pub fn validate_layout(
        &self,
        layout_id: &str,
        base_artwork: Option<&RgbaImage>,
    ) -> Result<ValidationResult, PipelineError> {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let layout = self.resolve(layout_id)?;
        let input = LayoutInput { layout, base_artwork };
        Ok(self.validator.validate(&input, &self.config.validation.failure_mode))
    }

    /// Render a personalization.
    ///
    /// CRITICAL: This ALWAYS calls validate_layout internally. No bypass possible.
    pub fn render(&self, request: &RenderRequest) -> Result<RenderedPersonalization, PipelineError> {
        let layout = self.resolve(&request.layout_id)?;

        // Base artwork is decoded first so the cut-out rule can inspect it.
        let mut warnings = Vec::new();
        let base = match &request.base_artwork {
            Some(encoded) => match self.decode_payload(encoded) {
                Ok(image) => Some(image),
                Err(reason) => {
                    log::warn!("Base artwork for {} rejected: {}", layout.id, reason);
                    warnings.push(CompositeWarning::BaseArtworkMissing {
                        reference: layout.base_artwork_ref.clone(),
                    });
                    None
                }
            },
            None => None,
        };

        // MANDATORY: Validation is always called. This is non-negotiable.
        let validation = self.validate_layout(&layout.id, base.as_ref())?;
        if !validation.valid {
            let messages: Vec<_> = validation
                .violations
                .iter()
                .map(|v| format!("{}: {}", v.rule, v.message))
                .collect();
            return Err(PipelineError::ValidationFailed(messages.join("; ")));
        }

        let assigned = self.assigned_images(layout, request, &mut warnings);

        let render = &self.config.render;
        let decode = &self.config.decode;
        let label_font = self.label_font();
        let preview = compositor::compose(
            layout,
            base.as_ref(),
            &assigned,
            &RenderOptions::preview(render, decode).with_label_font(label_font),
        )?;
        let print = compositor::compose(
            layout,
            base.as_ref(),
            &assigned,
            &RenderOptions::export(render, decode).with_label_font(label_font),
        )?;

        for w in preview.warnings {
            if !warnings.contains(&w) {
                warnings.push(w);
            }
        }

        let (surfaces, physical) = if request.project {
            let spec = self.physical_spec(layout, request.physical_override.as_ref())?;
            (
                projection::project(layout, &print.image, layout.item_type, &spec),
                Some(spec),
            )
        } else {
            (Vec::new(), None)
        };

        let exports = vec![
            ExportedFile::png("preview", &preview.image)?,
            ExportedFile::png("print", &print.image)?,
        ];

        let layout_digest = sha256_hex(canonical_json(layout)?.as_bytes());
        let job_hash = compute_job_hash(&layout.id, &layout_digest, request, ENGINE_VERSION)?;

        let mut rendered = RenderedPersonalization {
            id: Uuid::new_v4().to_string(),
            layout_id: layout.id.clone(),
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            manifest_hash: String::new(), // Computed after
            job_hash,
            validation,
            warnings,
            regions: preview.regions,
            exports,
            surfaces,
            physical,
        };

        // Manifest hash covers everything
        rendered.manifest_hash = compute_manifest_hash(&rendered)?;

        log::info!(
            "Rendered layout {} ({} slots, {} warnings, job {})",
            rendered.layout_id,
            request.slots.len(),
            rendered.warnings.len(),
            &rendered.job_hash[..12]
        );
        Ok(rendered)
    }

    /// Surface textures for an already rendered raster.
    pub fn project(
        &self,
        layout_id: &str,
        raster: &RgbaImage,
        physical_override: Option<&PhysicalOverride>,
    ) -> Result<(PhysicalSpec, Vec<SurfaceTexture>), PipelineError> {
        let layout = self.resolve(layout_id)?;
        let spec = self.physical_spec(layout, physical_override)?;
        let surfaces = projection::project(layout, raster, layout.item_type, &spec);
        Ok((spec, surfaces))
    }

    fn physical_spec(
        &self,
        layout: &LayoutBase,
        physical_override: Option<&PhysicalOverride>,
    ) -> Result<PhysicalSpec, PipelineError> {
        let spec = PhysicalSpec::for_layout(layout, &self.config.projection);
        match physical_override {
            Some(o) => spec
                .with_user_override(o.print_height_m, o.cylinder_radius_m)
                .map_err(PipelineError::InvalidOverride),
            None => Ok(spec),
        }
    }

    fn decode_payload(&self, encoded: &str) -> Result<RgbaImage, String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| e.to_string())?;
        raster::decode_image(&bytes, &self.config.decode).map_err(|e| e.to_string())
    }

    /// Decode every slot payload once, ahead of both composites. A payload
    /// that fails leaves its slot on the placeholder with a warning. Payloads
    /// for slots the layout lacks stay encoded; the compositor reports them.
    fn assigned_images(
        &self,
        layout: &LayoutBase,
        request: &RenderRequest,
        warnings: &mut Vec<CompositeWarning>,
    ) -> Vec<AssignedImage> {
        let mut assigned = Vec::with_capacity(request.slots.len());
        for slot in &request.slots {
            let slot_id = &slot.assignment.slot_id;
            let bytes = match base64::engine::general_purpose::STANDARD.decode(&slot.data_base64) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("Slot {} payload is not base64: {}", slot_id, e);
                    warnings.push(CompositeWarning::SlotImageUndecodable {
                        slot_id: slot_id.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if layout.slot(slot_id).is_none() {
                assigned.push(AssignedImage::encoded(slot.assignment.clone(), bytes));
                continue;
            }
            match raster::decode_image(&bytes, &self.config.decode) {
                Ok(image) => assigned.push(AssignedImage::decoded(slot.assignment.clone(), image)),
                Err(e) => {
                    log::warn!("Slot {} image undecodable, using placeholder: {}", slot_id, e);
                    warnings.push(CompositeWarning::SlotImageUndecodable {
                        slot_id: slot_id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        assigned
    }
}

fn check_engine_version(layout: &LayoutBase) -> Result<(), PipelineError> {
    let engine_ver = semver::Version::parse(ENGINE_VERSION)
        .map_err(|_| PipelineError::InvalidVersion(format!("engine {}", ENGINE_VERSION)))?;
    let min_ver = semver::Version::parse(&layout.engine_min_version)
        .map_err(|_| PipelineError::InvalidVersion(format!("layout {} min {}", layout.id, layout.engine_min_version)))?;

    if engine_ver < min_ver {
        return Err(PipelineError::EngineVersionMismatch(
            layout.id.clone(),
            layout.engine_min_version.clone(),
            ENGINE_VERSION.to_string(),
        ));
    }

    Ok(())
}

impl Default for RenderPipeline {
    fn default() -> Self {
        Self::new(LayoutRegistry::default(), EngineConfig::default())
    }
}
