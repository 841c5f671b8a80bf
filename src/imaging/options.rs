//! Transform requests and their validation.
//!
//! [`Options`] is what a caller asks for; [`Options::check`] turns it into a
//! [`Plan`] the backend can execute, or refuses it. Validation treats both
//! the request and the origin's image as untrusted: the source dimensions
//! are re-checked here even though the codec already parsed them.
//!
//! Options travel across process boundaries (embedded in URLs, queued in
//! messages) as compact JSON. Field names are stable and unknown fields are
//! ignored, so older and newer peers can exchange them.

use super::backend::{BackendError, Metadata};
use super::calculations::{MAX_DIMENSION, MIN_DIMENSION, Plan, fits_buffer, plan_crop, plan_fit};
use super::params::SaveOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Largest accepted gaussian blur sigma.
pub const MAX_BLUR_SIGMA: f64 = 8.0;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Unknown image format")]
    UnknownFormat,
    #[error("Image is too small")]
    TooSmall,
    #[error("Image is too wide or tall")]
    TooBig,
    #[error("Bad option specified")]
    BadOption,
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for ThumbnailError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::UnknownFormat => ThumbnailError::UnknownFormat,
            BackendError::TooLarge => ThumbnailError::TooBig,
            other => ThumbnailError::Backend(other),
        }
    }
}

/// How a thumbnail operation should modify an image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Maximum output width in pixels; 0 keeps the original width.
    pub width: u32,
    /// Maximum output height in pixels; 0 keeps the original height.
    pub height: u32,
    /// Produce exactly `width`×`height`, trimming excess from the sides.
    /// Without it the aspect ratio is preserved and the tighter bound wins.
    pub crop: bool,
    /// Largest decode buffer to allow, in pixels. 0 means unlimited.
    pub max_buffer_pixels: u64,
    /// Mild sharpening pass after downscaling.
    pub sharpen: bool,
    /// Gaussian blur sigma, `0.0..=8.0`. 0 disables.
    pub blur_sigma: f64,
    /// Trade resize quality for speed.
    pub fast_resize: bool,
    /// Longest time to wait for a worker. Zero uses the pool default.
    #[serde(rename = "max_queue_ms", with = "duration_ms")]
    pub max_queue_duration: Duration,
    /// Longest time a worker may spend on this image before the process is
    /// considered wedged. Zero uses the pool default.
    #[serde(rename = "max_processing_ms", with = "duration_ms")]
    pub max_processing_duration: Duration,
    pub save: SaveOptions,
}

impl Options {
    /// Validate against the source image and plan the transform.
    pub fn check(&self, m: &Metadata) -> Result<Plan, ThumbnailError> {
        // Security: confirm that source sizes are sane.
        if m.width < MIN_DIMENSION || m.height < MIN_DIMENSION {
            return Err(ThumbnailError::TooSmall);
        }
        if m.width > MAX_DIMENSION || m.height > MAX_DIMENSION {
            return Err(ThumbnailError::TooBig);
        }

        let width = if self.width == 0 { m.width } else { self.width };
        let height = if self.height == 0 { m.height } else { self.height };

        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ThumbnailError::TooBig);
        }

        if !fits_buffer(
            m.width,
            m.height,
            self.max_buffer_pixels,
            m.format.decode_prescale(),
        ) {
            return Err(ThumbnailError::TooBig);
        }

        if !(0.0..=MAX_BLUR_SIGMA).contains(&self.blur_sigma) {
            return Err(ThumbnailError::BadOption);
        }

        let source = (m.width, m.height);
        Ok(if self.crop {
            plan_crop(source, (width, height))
        } else {
            plan_fit(source, (width, height))
        })
    }

    /// Compact JSON representation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// `Duration` as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
