//! PrintForge Core - Personalization Rendering Engine
//!
//! # The Five Rules (Non-Negotiable)
//! 1. Layouts Are Read-Only Input
//! 2. Slots Paint First, Base Artwork Last
//! 3. Bad Uploads Degrade, Never Abort
//! 4. Deterministic Output
//! 5. Stale Loads Never Touch a Live Scene

pub mod assets;
pub mod compositor;
pub mod config;
pub mod crop;
pub mod error;
pub mod geometry;
pub mod hashing;
pub mod layout;
pub mod pipeline;
pub mod print;
pub mod projection;
pub mod raster;
pub mod scene;
pub mod validation;

pub use compositor::{compose, AssignedImage, Composite, CompositeError, RegionDescriptor, RenderOptions};
pub use config::EngineConfig;
pub use crop::{crop, CropError, CropOutput, CropTool};
pub use error::{AssetLoadError, DecodeError, GeometryError};
pub use geometry::{compute_aspect_fit, AspectFit, FitMode};
pub use hashing::{canonical_json, compute_job_hash, compute_manifest_hash};
pub use layout::{ItemType, LayoutBase, LayoutRegistry, MaskShape, SlotDef, SlotImageAssignment};
pub use pipeline::{PipelineError, RenderPipeline, RenderRequest, RenderedPersonalization};
pub use print::{PhysicalSpec, PrintAuthority};
pub use projection::{project, SurfaceTexture, UvProjection};
pub use scene::{SceneError, SceneSession, SceneSnapshot, SceneState, SNAPSHOT_VERSION};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const MIN_LAYOUT_ENGINE_VERSION: &str = "1.0.0";
