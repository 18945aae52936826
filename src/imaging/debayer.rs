//! CPU demosaicing of a single sensor image

use std::io::Cursor;

use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use tracing::debug;

use crate::imaging::error::{ImagingError, Result};
use crate::imaging::types::{RgbImageData, SensorImage};
use crate::stream::format::StippledFormat;

pub struct CpuDebayer {
    algorithm: Demosaic,
}

impl Default for CpuDebayer {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDebayer {
    pub fn new() -> Self {
        Self {
            algorithm: Demosaic::Linear,
        }
    }

    pub fn with_algorithm(algorithm: Demosaic) -> Self {
        Self { algorithm }
    }

    fn cfa(pattern: StippledFormat) -> CFA {
        match pattern {
            StippledFormat::Bggr => CFA::BGGR,
            StippledFormat::Gbrg => CFA::GBRG,
            StippledFormat::Grbg => CFA::GRBG,
            StippledFormat::Rggb | StippledFormat::CameraDefault => CFA::RGGB,
        }
    }

    pub fn process(&self, image: &SensorImage) -> Result<RgbImageData> {
        let (width, height) = (image.width, image.height);
        if width < 2 || height < 2 || image.data.len() != width * height {
            return Err(ImagingError::InvalidDimensions(width, height));
        }
        debug!("Demosaicing {}x{} sensor image ({:?})", width, height, image.pattern);

        // bayer only supports 8 and 16 bit rasters
        let (bayer_depth, raster_depth, bytes_per_pixel) = if image.bits_per_sample <= 8 {
            (BayerDepth::Depth8, RasterDepth::Depth8, 1)
        } else {
            (BayerDepth::Depth16LE, RasterDepth::Depth16, 2)
        };
        let bayer_bytes: Vec<u8> = if bytes_per_pixel == 1 {
            image.data.iter().map(|&v| v as u8).collect()
        } else {
            image.data.iter().flat_map(|&v| v.to_le_bytes()).collect()
        };

        let mut output_buf = vec![0u8; width * height * 3 * bytes_per_pixel];
        let mut output_raster = RasterMut::new(width, height, raster_depth, &mut output_buf);
        bayer::run_demosaic(
            &mut Cursor::new(&bayer_bytes[..]),
            bayer_depth,
            Self::cfa(image.pattern),
            self.algorithm,
            &mut output_raster,
        )
        .map_err(|e| ImagingError::DemosaicError(format!("{e:?}")))?;

        // Scale every sample to the full 16 bit range.
        let shift = 16u32.saturating_sub(image.bits_per_sample.clamp(8, 16));
        let data: Vec<u16> = if bytes_per_pixel == 1 {
            output_buf.iter().map(|&v| (v as u16) << shift).collect()
        } else {
            output_buf
                .chunks_exact(2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]).saturating_mul(1 << shift))
                .collect()
        };

        Ok(RgbImageData {
            width,
            height,
            data,
            bits_per_sample: 16,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_field_stays_flat() {
        let image = SensorImage::new(8, 8, 8, vec![100; 64]).with_pattern(StippledFormat::Grbg);
        let rgb = CpuDebayer::new().process(&image).unwrap();
        assert_eq!(rgb.data.len(), 8 * 8 * 3);
        assert_eq!(rgb.bits_per_sample, 16);
        assert!(rgb.data.iter().all(|&v| v == 100 << 8));
    }

    #[test]
    fn test_rejects_mismatched_buffer() {
        let image = SensorImage::new(8, 8, 16, vec![0; 10]);
        assert!(matches!(
            CpuDebayer::new().process(&image),
            Err(ImagingError::InvalidDimensions(8, 8))
        ));
    }
}
