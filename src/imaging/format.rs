//! Image formats accepted from the origin and produced for clients.
//!
//! Only JPEG, PNG, GIF and WebP are ever handed to a decoder. Anything else
//! the `image` crate could sniff (TIFF, BMP, ICO, ...) is refused up front:
//! origin bytes are untrusted, and every extra decoder is extra attack
//! surface.

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl Format {
    /// Sniff the format from magic bytes. Returns `None` for anything we
    /// refuse to decode.
    pub fn detect(blob: &[u8]) -> Option<Self> {
        match image::guess_format(blob).ok()? {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            ImageFormat::WebP => Some(Self::Webp),
            _ => None,
        }
    }

    /// Parse a user-facing name (`jpg`, `jpeg`, `png`, `gif`, `webp`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    /// How far the decoder can shrink each dimension while decoding.
    ///
    /// JPEG decoders can emit 1/2, 1/4 or 1/8 scale directly from the DCT
    /// coefficients, so the full-size buffer never has to exist.
    pub fn decode_prescale(self) -> u64 {
        match self {
            Self::Jpeg => 8,
            _ => 1,
        }
    }

    pub(crate) fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::Webp => ImageFormat::WebP,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::Webp => "webp",
        };
        f.write_str(name)
    }
}
