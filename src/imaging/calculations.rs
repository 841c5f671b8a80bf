//! Pure calculation functions for image dimensions.
//!
//! All functions here are pure and testable without any I/O or images.
//! Arithmetic is done in `u64` integers with round-half-up division, so the
//! same request always produces the same pixel dimensions on every platform.

/// Smallest accepted source dimension. Anything smaller invites
/// divide-by-zero and off-by-one geometry.
pub const MIN_DIMENSION: u32 = 2;

/// Largest accepted dimension, leaving headroom in a signed 16-bit
/// coordinate.
pub const MAX_DIMENSION: u32 = (1 << 15) - 2;

/// Integer division rounding halves up.
fn div_round(numerator: u64, denominator: u64) -> u32 {
    let q = (numerator + denominator / 2) / denominator;
    u32::try_from(q).unwrap_or(u32::MAX).max(1)
}

/// Scale `src` against a `box_w`×`box_h` box, preserving aspect ratio.
///
/// - `cover = false` (fit): the result fits entirely inside the box; the
///   smaller of the two scale factors wins.
/// - `cover = true` (cover): the result covers the box; the larger of the
///   two scale factors wins. This sizes an image before a crop.
///
/// Never scales up: if the winning factor is ≥ 1 the source dimensions are
/// returned unchanged.
///
/// # Examples
/// ```
/// # use thumbd::imaging::scale_aspect;
/// // 398x536 fit into 200x300 → width-limited
/// assert_eq!(scale_aspect(398, 536, 200, 300, false), (200, 269));
///
/// // Same source covering 300x400 → width-limited, height overflows
/// assert_eq!(scale_aspect(398, 536, 300, 400, true), (300, 404));
/// ```
pub fn scale_aspect(src_w: u32, src_h: u32, box_w: u32, box_h: u32, cover: bool) -> (u32, u32) {
    let (sw, sh) = (u64::from(src_w.max(1)), u64::from(src_h.max(1)));
    let (bw, bh) = (u64::from(box_w.max(1)), u64::from(box_h.max(1)));

    // box_w / src_w <= box_h / src_h, cross-multiplied.
    let width_factor_smaller = bw * sh <= bh * sw;
    let match_width = width_factor_smaller != cover;

    if match_width {
        if bw >= sw {
            return (src_w, src_h);
        }
        (box_w, div_round(sh * bw, sw))
    } else {
        if bh >= sh {
            return (src_w, src_h);
        }
        (div_round(sw * bh, sh), box_h)
    }
}

/// Validated geometry for one transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    /// Scale to fit inside the requested box.
    Fit { width: u32, height: u32 },
    /// Scale to cover the box, then trim to exactly `width`×`height`.
    Crop {
        width: u32,
        height: u32,
        intermediate_width: u32,
        intermediate_height: u32,
    },
}

impl Plan {
    /// Final output dimensions.
    pub fn output(&self) -> (u32, u32) {
        match *self {
            Plan::Fit { width, height } | Plan::Crop { width, height, .. } => (width, height),
        }
    }

    /// The size to resize to before any crop.
    pub fn resize_target(&self) -> (u32, u32) {
        match *self {
            Plan::Fit { width, height } => (width, height),
            Plan::Crop {
                intermediate_width,
                intermediate_height,
                ..
            } => (intermediate_width, intermediate_height),
        }
    }

    /// Whether a source of the given size must be resized at all.
    pub fn needs_resize(&self, src_w: u32, src_h: u32) -> bool {
        let (w, h) = self.resize_target();
        w < src_w || h < src_h
    }

    /// Whether the intermediate image must be trimmed.
    pub fn needs_crop(&self) -> bool {
        match *self {
            Plan::Fit { .. } => false,
            Plan::Crop {
                width,
                height,
                intermediate_width,
                intermediate_height,
            } => intermediate_width > width || intermediate_height > height,
        }
    }
}

/// Plan a fit-to-box resize.
pub fn plan_fit(source: (u32, u32), requested: (u32, u32)) -> Plan {
    let (width, height) = scale_aspect(source.0, source.1, requested.0, requested.1, false);
    Plan::Fit { width, height }
}

/// Plan a crop-to-box resize.
///
/// A box larger than the source in either dimension is first shrunk to fit
/// inside it (keeping the box's aspect ratio), since a crop can never
/// enlarge. The intermediate size is the smallest that still covers the box.
pub fn plan_crop(source: (u32, u32), requested: (u32, u32)) -> Plan {
    let (src_w, src_h) = source;
    let (mut width, mut height) = requested;

    if width > src_w || height > src_h {
        (width, height) = scale_aspect(width, height, src_w, src_h, false);
    }

    let (iw, ih) = scale_aspect(src_w, src_h, width, height, true);

    Plan::Crop {
        width,
        height,
        intermediate_width: iw.max(width),
        intermediate_height: ih.max(height),
    }
}

/// Whether decoding a `width`×`height` image stays within a pixel budget.
///
/// `prescale` is how far the decoder can shrink each dimension during
/// decode (8 for JPEG). A budget of 0 means unlimited.
pub fn fits_buffer(width: u32, height: u32, max_buffer_pixels: u64, prescale: u64) -> bool {
    if max_buffer_pixels == 0 {
        return true;
    }
    let pixels = u64::from(width) * u64::from(height);
    pixels <= max_buffer_pixels.saturating_mul(prescale * prescale)
}
