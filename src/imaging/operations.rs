//! High-level image operations.
//!
//! These functions combine validation, calculations and backend execution:
//! read the header, check the request, then drive the backend through the
//! planned resize/crop/filter/encode steps.

use super::backend::{ImageBackend, Metadata};
use super::format::Format;
use super::options::{Options, ThumbnailError};
use super::params::Sharpening;

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, ThumbnailError>;

/// A transformed, encoded image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub format: Format,
    pub width: u32,
    pub height: u32,
}

/// Read and sanity-check image metadata without decoding pixels.
pub fn read_metadata(backend: &impl ImageBackend, blob: &[u8]) -> Result<Metadata> {
    Ok(backend.metadata(blob)?)
}

/// Produce a thumbnail of `blob` according to `options`.
///
/// Validation happens before decode, so oversized or malformed input never
/// reaches the pixel decoder. The decoded image is dropped, releasing the
/// codec's resources, whichever step fails.
pub fn thumbnail(backend: &impl ImageBackend, blob: &[u8], options: &Options) -> Result<Thumbnail> {
    let metadata = read_metadata(backend, blob)?;
    let plan = options.check(&metadata)?;

    let mut image = backend.load(blob, &metadata)?;

    let resized = plan.needs_resize(metadata.width, metadata.height);
    if resized {
        let (w, h) = plan.resize_target();
        backend.resize(&mut image, w, h, options.fast_resize)?;
    }

    if plan.needs_crop() {
        let (w, h) = plan.output();
        backend.crop(&mut image, w, h)?;
    }

    if options.blur_sigma > 0.0 {
        backend.blur(&mut image, options.blur_sigma as f32)?;
    } else if options.sharpen && resized {
        backend.sharpen(&mut image, Sharpening::light())?;
    }

    let encoded = backend.save(&image, &options.save)?;
    let (width, height) = plan.output();

    Ok(Thumbnail {
        bytes: encoded.bytes,
        format: encoded.format,
        width,
        height,
    })
}
