//! Codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait is the boundary to the pixel codec: header
//! parsing, decode, resize, crop, filters and encode. Everything above it
//! only decides *which* operations to request.
//!
//! Decoded images are exposed as the backend's associated
//! [`Image`](ImageBackend::Image) type. A value of that type is owned by
//! exactly one job and its native resources are released when it is
//! dropped, on every exit path, including early returns through `?`.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::format::Format;
use super::orientation::Orientation;
use super::params::{Encoded, SaveOptions, Sharpening};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// The blob is not a supported image, or is truncated/corrupt.
    #[error("Unknown image format")]
    UnknownFormat,
    /// Decoding would allocate more than the codec allows.
    #[error("Image too large to decode")]
    TooLarge,
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Header-level facts about an encoded image.
///
/// `width` and `height` are the displayed dimensions, after applying
/// `orientation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub width: u32,
    pub height: u32,
    pub format: Format,
    pub orientation: Orientation,
}

/// Trait for image codec backends.
///
/// `metadata` must not decode pixels: it runs before validation, so it is
/// the only call that ever sees an image of hostile dimensions.
pub trait ImageBackend: Send + Sync {
    /// Exclusively owned decoded image. Dropping it releases the codec's
    /// resources.
    type Image: Send;

    /// Detect the format and read dimensions from the header.
    fn metadata(&self, blob: &[u8]) -> Result<Metadata, BackendError>;

    /// Decode pixels, already rotated to match `metadata`.
    fn load(&self, blob: &[u8], metadata: &Metadata) -> Result<Self::Image, BackendError>;

    /// Resize to exactly `width`×`height`.
    fn resize(
        &self,
        image: &mut Self::Image,
        width: u32,
        height: u32,
        fast: bool,
    ) -> Result<(), BackendError>;

    /// Trim to a centred `width`×`height` region.
    fn crop(&self, image: &mut Self::Image, width: u32, height: u32) -> Result<(), BackendError>;

    fn sharpen(&self, image: &mut Self::Image, sharpening: Sharpening) -> Result<(), BackendError>;

    fn blur(&self, image: &mut Self::Image, sigma: f32) -> Result<(), BackendError>;

    /// Encode, choosing the output format per `options`.
    fn save(&self, image: &Self::Image, options: &SaveOptions) -> Result<Encoded, BackendError>;
}
