//! Format tags stored in headers and image records

use std::fmt;

use crate::stream::common::error::{Result, StreamError};

/// Pixel layout of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataFormat {
    Raw8 = 1,
    Jpeg8 = 2,
    ColorSepRaw8 = 3,
    ColorSepJpeg8 = 4,
    HalfHeightRaw8 = 5,
    ColorSepHalfHeightJpeg8 = 6,
    Raw16 = 7,
    ColorSepJpeg12 = 8,
    HalfHeightRaw16 = 9,
    ColorSepHalfHeightJpeg12 = 10,
    Raw12 = 11,
    HalfHeightRaw12 = 12,
}

impl DataFormat {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            1 => DataFormat::Raw8,
            2 => DataFormat::Jpeg8,
            3 => DataFormat::ColorSepRaw8,
            4 => DataFormat::ColorSepJpeg8,
            5 => DataFormat::HalfHeightRaw8,
            6 => DataFormat::ColorSepHalfHeightJpeg8,
            7 => DataFormat::Raw16,
            8 => DataFormat::ColorSepJpeg12,
            9 => DataFormat::HalfHeightRaw16,
            10 => DataFormat::ColorSepHalfHeightJpeg12,
            11 => DataFormat::Raw12,
            12 => DataFormat::HalfHeightRaw12,
            other => {
                return Err(StreamError::UnsupportedFormat(format!(
                    "data format tag {other}"
                )));
            }
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// JPEG payloads declare their size per frame; everything else is a
    /// fixed-size raw buffer.
    pub fn is_jpeg(self) -> bool {
        matches!(
            self,
            DataFormat::Jpeg8
                | DataFormat::ColorSepJpeg8
                | DataFormat::ColorSepHalfHeightJpeg8
                | DataFormat::ColorSepJpeg12
                | DataFormat::ColorSepHalfHeightJpeg12
        )
    }

    pub fn is_half_height(self) -> bool {
        matches!(
            self,
            DataFormat::HalfHeightRaw8
                | DataFormat::ColorSepHalfHeightJpeg8
                | DataFormat::HalfHeightRaw16
                | DataFormat::ColorSepHalfHeightJpeg12
                | DataFormat::HalfHeightRaw12
        )
    }

    /// High bit-depth formats carry post-processing adjustments.
    pub fn requires_post_processing(self) -> bool {
        matches!(
            self,
            DataFormat::Raw16
                | DataFormat::HalfHeightRaw16
                | DataFormat::Raw12
                | DataFormat::HalfHeightRaw12
                | DataFormat::ColorSepJpeg12
                | DataFormat::ColorSepHalfHeightJpeg12
        )
    }

    /// Storage bits per pixel for raw formats, `None` for JPEG.
    pub fn raw_bits_per_pixel(self) -> Option<u32> {
        match self {
            DataFormat::Raw8 | DataFormat::ColorSepRaw8 | DataFormat::HalfHeightRaw8 => Some(8),
            DataFormat::Raw12 | DataFormat::HalfHeightRaw12 => Some(12),
            DataFormat::Raw16 | DataFormat::HalfHeightRaw16 => Some(16),
            _ => None,
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Raw per-sensor resolution of the camera head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Resolution {
    R1024x768 = 4,
    R1616x1232 = 8,
    R2448x2048 = 9,
    R2464x2048 = 12,
}

impl Resolution {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            4 => Resolution::R1024x768,
            8 => Resolution::R1616x1232,
            9 => Resolution::R2448x2048,
            12 => Resolution::R2464x2048,
            other => {
                return Err(StreamError::UnsupportedFormat(format!(
                    "resolution tag {other}"
                )));
            }
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// (columns, rows) of one sensor.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::R1024x768 => (1024, 768),
            Resolution::R1616x1232 => (1616, 1232),
            Resolution::R2448x2048 => (2448, 2048),
            Resolution::R2464x2048 => (2464, 2048),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cols, rows) = self.dimensions();
        write!(f, "{cols}x{rows}")
    }
}

/// Bayer pattern of the top-left 2x2 block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum StippledFormat {
    Bggr = 0,
    Gbrg = 1,
    Grbg = 2,
    #[default]
    Rggb = 3,
    CameraDefault = 4,
}

impl StippledFormat {
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0 => StippledFormat::Bggr,
            1 => StippledFormat::Gbrg,
            2 => StippledFormat::Grbg,
            3 => StippledFormat::Rggb,
            4 => StippledFormat::CameraDefault,
            other => {
                return Err(StreamError::UnsupportedFormat(format!(
                    "stippled format tag {other}"
                )));
            }
        })
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Output flavour of the GPS summary export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsFileType {
    Text,
    Html,
    Kml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_format_tags() {
        for tag in 1..=12 {
            let format = DataFormat::from_u32(tag).unwrap();
            assert_eq!(format.as_u32(), tag);
        }
        assert!(DataFormat::from_u32(0).is_err());
        assert!(DataFormat::from_u32(13).is_err());
    }

    #[test]
    fn test_format_properties() {
        assert!(DataFormat::ColorSepJpeg8.is_jpeg());
        assert!(!DataFormat::Raw8.is_jpeg());
        assert_eq!(DataFormat::Raw12.raw_bits_per_pixel(), Some(12));
        assert_eq!(DataFormat::Jpeg8.raw_bits_per_pixel(), None);
        assert!(DataFormat::Raw16.requires_post_processing());
        assert!(!DataFormat::Raw8.requires_post_processing());
        assert!(DataFormat::HalfHeightRaw8.is_half_height());
    }

    #[test]
    fn test_resolution_dimensions() {
        assert_eq!(Resolution::R2448x2048.dimensions(), (2448, 2048));
        assert_eq!(Resolution::from_u32(12).unwrap(), Resolution::R2464x2048);
        assert!(Resolution::from_u32(10).is_err());
    }
}
