//! Pure Rust codec backend built on the `image` crate.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Sniff + header | `image::guess_format`, `ImageReader::into_dimensions` |
//! | Orientation | `kamadak-exif` (see [`Orientation`]) |
//! | Decode (JPEG, PNG, GIF, WebP) | `image` crate (pure Rust decoders) |
//! | Resize | `DynamicImage::resize_exact`, `Lanczos3` (`Triangle` when fast) |
//! | Crop | `DynamicImage::crop_imm`, centred |
//! | Sharpen / blur | `DynamicImage::unsharpen` / `DynamicImage::blur` |
//! | Encode JPEG | `JpegEncoder::new_with_quality` |
//! | Encode PNG, GIF, WebP (lossless) | `DynamicImage::write_to` |
//!
//! ## Output format policy
//!
//! 1. An explicit `SaveOptions::format` wins.
//! 2. `allow_webp` selects WebP. The pure-Rust WebP encoder is lossless only.
//! 3. JPEG sources stay JPEG: re-encoding them losslessly only bloats them.
//! 4. `lossless` selects PNG.
//! 5. With `lossless_max_bits_per_pixel > 0`, PNG is kept if it costs at
//!    most that many bits per pixel; otherwise JPEG.
//! 6. Otherwise JPEG.

use super::backend::{BackendError, ImageBackend, Metadata};
use super::format::Format;
use super::orientation::Orientation;
use super::params::{Encoded, Quality, SaveOptions, Sharpening};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageError, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded image plus the format it was decoded from.
pub struct RustImage {
    image: DynamicImage,
    source: Format,
}

impl RustImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

fn reader(blob: &[u8], format: Format) -> ImageReader<Cursor<&[u8]>> {
    ImageReader::with_format(Cursor::new(blob), format.image_format())
}

/// Allocation limits mean the image is real but too big; anything else
/// means we can't read it.
fn decode_error(err: ImageError) -> BackendError {
    match err {
        ImageError::Limits(_) => BackendError::TooLarge,
        _ => BackendError::UnknownFormat,
    }
}

fn encode_jpeg(img: &DynamicImage, quality: Quality) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
    // JPEG has no alpha channel and only 8-bit samples.
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {e}")))?;
    Ok(buf)
}

fn encode_with(img: &DynamicImage, format: Format) -> Result<Vec<u8>, BackendError> {
    let converted;
    let img = match format {
        // The GIF and WebP encoders only take 8-bit RGBA.
        Format::Gif | Format::Webp => {
            converted = DynamicImage::ImageRgba8(img.to_rgba8());
            &converted
        }
        _ => img,
    };
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, format.image_format())
        .map_err(|e| BackendError::ProcessingFailed(format!("{format} encode failed: {e}")))?;
    Ok(cursor.into_inner())
}

fn encode(img: &DynamicImage, format: Format, quality: Quality) -> Result<Encoded, BackendError> {
    let bytes = match format {
        Format::Jpeg => encode_jpeg(img, quality)?,
        other => encode_with(img, other)?,
    };
    Ok(Encoded { bytes, format })
}

/// Bits per pixel of an encoded image.
fn bits_per_pixel(encoded_len: usize, width: u32, height: u32) -> u64 {
    let pixels = (u64::from(width) * u64::from(height)).max(1);
    (encoded_len as u64 * 8).div_ceil(pixels)
}

impl ImageBackend for RustBackend {
    type Image = RustImage;

    fn metadata(&self, blob: &[u8]) -> Result<Metadata, BackendError> {
        let format = Format::detect(blob).ok_or(BackendError::UnknownFormat)?;
        let (width, height) = reader(blob, format)
            .into_dimensions()
            .map_err(decode_error)?;
        let orientation = Orientation::read(blob);
        let (width, height) = orientation.dimensions(width, height);
        Ok(Metadata {
            width,
            height,
            format,
            orientation,
        })
    }

    fn load(&self, blob: &[u8], metadata: &Metadata) -> Result<RustImage, BackendError> {
        // Truncated or corrupt pixel data is reported like an unknown
        // format: the client sent something we can't read.
        let image = reader(blob, metadata.format)
            .decode()
            .map_err(decode_error)?;
        Ok(RustImage {
            image: metadata.orientation.apply(image),
            source: metadata.format,
        })
    }

    fn resize(
        &self,
        image: &mut RustImage,
        width: u32,
        height: u32,
        fast: bool,
    ) -> Result<(), BackendError> {
        let filter = if fast {
            FilterType::Triangle
        } else {
            FilterType::Lanczos3
        };
        image.image = image.image.resize_exact(width, height, filter);
        Ok(())
    }

    fn crop(&self, image: &mut RustImage, width: u32, height: u32) -> Result<(), BackendError> {
        let (cw, ch) = (image.width(), image.height());
        if width > cw || height > ch {
            return Err(BackendError::ProcessingFailed(format!(
                "cannot crop {cw}x{ch} to {width}x{height}"
            )));
        }
        let x = (cw - width) / 2;
        let y = (ch - height) / 2;
        image.image = image.image.crop_imm(x, y, width, height);
        Ok(())
    }

    fn sharpen(&self, image: &mut RustImage, sharpening: Sharpening) -> Result<(), BackendError> {
        image.image = image.image.unsharpen(sharpening.sigma, sharpening.threshold);
        Ok(())
    }

    fn blur(&self, image: &mut RustImage, sigma: f32) -> Result<(), BackendError> {
        image.image = image.image.blur(sigma);
        Ok(())
    }

    fn save(&self, image: &RustImage, options: &SaveOptions) -> Result<Encoded, BackendError> {
        let img = &image.image;

        if let Some(format) = options.format {
            return encode(img, format, options.quality);
        }
        if options.allow_webp {
            return encode(img, Format::Webp, options.quality);
        }
        if image.source == Format::Jpeg {
            return encode(img, Format::Jpeg, options.quality);
        }
        if options.lossless {
            return encode(img, Format::Png, options.quality);
        }
        if options.lossless_max_bits_per_pixel > 0 {
            let png = encode(img, Format::Png, options.quality)?;
            let bpp = bits_per_pixel(png.bytes.len(), img.width(), img.height());
            if bpp <= u64::from(options.lossless_max_bits_per_pixel) {
                return Ok(png);
            }
            // Tiny images never meet a per-pixel budget, but their PNG is
            // still smaller than JPEG's fixed tables.
            let jpeg = encode(img, Format::Jpeg, options.quality)?;
            return Ok(if png.bytes.len() <= jpeg.bytes.len() { png } else { jpeg });
        }
        encode(img, Format::Jpeg, options.quality)
    }
}
