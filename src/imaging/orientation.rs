//! EXIF orientation handling.
//!
//! Cameras store pixels in sensor order and record how to display them in
//! the EXIF `Orientation` tag. All geometry in this crate works on the
//! *displayed* (logical) dimensions, so values 5–8, which rotate by a
//! quarter turn, swap width and height.

use image::DynamicImage;

/// Value of the EXIF `Orientation` tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u16)]
pub enum Orientation {
    #[default]
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl Orientation {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::FlipHorizontal),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipVertical),
            5 => Some(Self::Transpose),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Transverse),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }

    /// Read the orientation tag from an encoded image.
    ///
    /// Missing or unreadable EXIF is not an error; the image is simply
    /// displayed as stored.
    pub fn read(blob: &[u8]) -> Self {
        let mut cursor = std::io::Cursor::new(blob);
        exif::Reader::new()
            .read_from_container(&mut cursor)
            .ok()
            .and_then(|exif| {
                exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                    .and_then(|field| field.value.get_uint(0))
            })
            .and_then(|value| u16::try_from(value).ok())
            .and_then(Self::from_u16)
            .unwrap_or_default()
    }

    /// Whether displaying the image turns it by 90 or 270 degrees.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Self::Transpose | Self::Rotate90 | Self::Transverse | Self::Rotate270
        )
    }

    /// Map stored dimensions to displayed dimensions.
    pub fn dimensions(self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Rotate/flip decoded pixels so they match the displayed dimensions.
    pub fn apply(self, img: DynamicImage) -> DynamicImage {
        match self {
            Self::Normal => img,
            Self::FlipHorizontal => img.fliph(),
            Self::Rotate180 => img.rotate180(),
            Self::FlipVertical => img.flipv(),
            Self::Transpose => img.rotate90().fliph(),
            Self::Rotate90 => img.rotate90(),
            Self::Transverse => img.rotate270().fliph(),
            Self::Rotate270 => img.rotate270(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_with_orientation, png_bytes};

    #[test]
    fn from_u16_covers_exif_range() {
        assert_eq!(Orientation::from_u16(1), Some(Orientation::Normal));
        assert_eq!(Orientation::from_u16(6), Some(Orientation::Rotate90));
        assert_eq!(Orientation::from_u16(8), Some(Orientation::Rotate270));
        assert_eq!(Orientation::from_u16(0), None);
        assert_eq!(Orientation::from_u16(9), None);
    }

    #[test]
    fn quarter_turns_swap_dimensions() {
        for value in 1..=8 {
            let o = Orientation::from_u16(value).unwrap();
            let expected = if value >= 5 { (80, 48) } else { (48, 80) };
            assert_eq!(o.dimensions(48, 80), expected, "orientation {value}");
        }
    }

    #[test]
    fn apply_matches_dimensions() {
        for value in 1..=8 {
            let o = Orientation::from_u16(value).unwrap();
            let rotated = o.apply(DynamicImage::new_rgb8(10, 20));
            assert_eq!(
                (rotated.width(), rotated.height()),
                o.dimensions(10, 20),
                "orientation {value}"
            );
        }
    }

    #[test]
    fn read_without_exif_is_normal() {
        assert_eq!(Orientation::read(&png_bytes(4, 4)), Orientation::Normal);
        assert_eq!(Orientation::read(b"garbage"), Orientation::Normal);
    }

    #[test]
    fn read_exif_orientation_tag() {
        for value in 1..=8 {
            let blob = jpeg_with_orientation(16, 8, value);
            assert_eq!(
                Orientation::read(&blob),
                Orientation::from_u16(value).unwrap(),
                "orientation {value}"
            );
        }
    }

    #[test]
    fn out_of_range_tag_is_normal() {
        assert_eq!(Orientation::read(&jpeg_with_orientation(16, 8, 9)), Orientation::Normal);
    }
}
