//! Error Taxonomy
//!
//! Boundary errors shared by the compositor, crop tool, scene adapter and
//! projector. Each component wraps these in its own error where it needs
//! extra context.

use thiserror::Error;

/// Base artwork, decoration bitmap, font or model failed to arrive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetLoadError {
    #[error("Asset {reference} timed out after {timeout_ms}ms")]
    TimedOut { reference: String, timeout_ms: u64 },

    #[error("Asset {reference} failed to load: {reason}")]
    Failed { reference: String, reason: String },

    #[error("Font {reference} is not a usable font")]
    InvalidFont { reference: String },
}

impl AssetLoadError {
    pub fn reference(&self) -> &str {
        match self {
            Self::TimedOut { reference, .. }
            | Self::Failed { reference, .. }
            | Self::InvalidFont { reference } => reference,
        }
    }
}

/// Uploaded bytes rejected at the input boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Image payload is empty")]
    Empty,

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Malformed image: {0}")]
    Malformed(String),

    #[error("Image {width}x{height} exceeds the {max_side}px side limit")]
    TooLarge { width: u32, height: u32, max_side: u32 },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GeometryError {
    #[error("Invalid dimensions {width}x{height}")]
    InvalidDimensions { width: f64, height: f64 },

    #[error("Non-finite value for {0}")]
    NonFinite(&'static str),
}
