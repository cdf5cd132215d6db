//! Editable Scene Graph Adapter
//!
//! Loads a snapshot into typed objects, keeps them editable for one session,
//! renders previews on every edit and exports final rasters plus a snapshot
//! that reproduces the scene.

pub mod cache;
pub mod object;
mod render;
pub mod session;
pub mod snapshot;

use thiserror::Error;

use crate::compositor::CompositeError;
use crate::error::{AssetLoadError, DecodeError, GeometryError};

pub use cache::{FontCache, ImageCache, ImageHandle};
pub use object::{ObjectGeometry, ObjectKind, SceneObject, TextAlign, TextStyle};
pub use session::{LoadPlan, LoadStatus, SceneExport, SceneSession, SceneState, SceneWarning, TextEdit};
pub use snapshot::{SceneSnapshot, SnapshotObject, SNAPSHOT_VERSION};

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Cannot {operation} while the scene is {state:?}")]
    InvalidState { operation: &'static str, state: SceneState },

    #[error("Unknown scene object: {0}")]
    UnknownObject(String),

    #[error("Object {id} is a {actual:?}, expected {expected:?}")]
    WrongKind {
        id: String,
        expected: ObjectKind,
        actual: ObjectKind,
    },

    #[error("Object {0} is locked")]
    Locked(String),

    #[error("Duplicate scene object id: {0}")]
    DuplicateObject(String),

    #[error("Invalid geometry for {0}")]
    InvalidGeometry(String),

    #[error("Snapshot version {found} is incompatible with {supported}")]
    IncompatibleVersion { found: String, supported: String },

    #[error("Asset load failed: {0}")]
    AssetLoad(#[from] AssetLoadError),

    #[error("Rejected image: {0}")]
    Decode(#[from] DecodeError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Render failed: {0}")]
    Composite(#[from] CompositeError),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
