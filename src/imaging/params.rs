//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between [`operations`](super::operations), which decides the
//! transform, and the [`backend`](super::backend), which does the pixel work.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`Sharpening`]: Unsharp-mask parameters (sigma + threshold) applied after downscaling.
//! - [`SaveOptions`]: Output format selection and encoder settings.
//! - [`Encoded`]: Bytes produced by the backend plus the format it actually chose.

use super::format::Format;
use serde::{Deserialize, Serialize};

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian blur (higher = more sharpening)
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub threshold: i32,
}

impl Sharpening {
    /// Light sharpening that restores crispness lost to downsampling.
    pub fn light() -> Self {
        Self {
            sigma: 0.5,
            threshold: 0,
        }
    }
}

/// How the transformed image should be encoded.
///
/// Choosing between lossless and lossy output is the backend's policy; the
/// only knob the core exposes is
/// [`lossless_max_bits_per_pixel`](SaveOptions::lossless_max_bits_per_pixel).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaveOptions {
    /// Force a specific output format. `None` lets the backend choose.
    pub format: Option<Format>,
    pub quality: Quality,
    /// Always prefer a lossless format for non-JPEG sources.
    pub lossless: bool,
    /// Keep lossless output for non-JPEG sources while it costs at most
    /// this many bits per pixel, or is no larger than JPEG. 0 disables the
    /// check.
    pub lossless_max_bits_per_pixel: u32,
    /// Allow WebP output when the client accepts it.
    pub allow_webp: bool,
}

/// Output of a save operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub format: Format,
}
