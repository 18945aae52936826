//! TIFF export of decoded sensor images

use std::io::{Cursor, Write};

use tiff::encoder::colortype::{Gray16, RGB16};
use tiff::encoder::compression::DeflateLevel;
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Predictor;
use tracing::debug;

use crate::imaging::error::{ImagingError, Result};
use crate::imaging::types::{ExportConfig, RgbImageData, SensorImage, TiffCompression};

pub trait TiffWriter {
    fn write_mosaic(&self, image: &SensorImage, output: &mut dyn Write, config: &ExportConfig) -> Result<()>;
    fn write_rgb(&self, image: &RgbImageData, output: &mut dyn Write, config: &ExportConfig) -> Result<()>;
}

pub struct StandardTiffWriter;

impl StandardTiffWriter {
    fn compression(config: &ExportConfig) -> Compression {
        match config.compression {
            TiffCompression::None => Compression::Uncompressed,
            TiffCompression::Lzw => Compression::Lzw,
            TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
            TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
            TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
        }
    }

    /// The encoder needs `Seek`, so the image is built in memory first.
    fn encode<F>(config: &ExportConfig, output: &mut dyn Write, write: F) -> Result<()>
    where
        F: FnOnce(TiffEncoder<&mut Cursor<Vec<u8>>>) -> tiff::TiffResult<()>,
    {
        let mut buffer = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut buffer)
            .map_err(|e| ImagingError::TiffError(e.to_string()))?
            .with_compression(Self::compression(config));
        if config.predictor == Some(2) {
            encoder = encoder.with_predictor(Predictor::Horizontal);
        }
        write(encoder).map_err(|e| ImagingError::TiffError(e.to_string()))?;
        output.write_all(buffer.get_ref())?;
        Ok(())
    }
}

impl TiffWriter for StandardTiffWriter {
    fn write_mosaic(&self, image: &SensorImage, output: &mut dyn Write, config: &ExportConfig) -> Result<()> {
        debug!("Encoding TIFF mosaic: {}x{}", image.width, image.height);
        if image.data.len() != image.width * image.height {
            return Err(ImagingError::InvalidDimensions(image.width, image.height));
        }
        let shift = 16u32.saturating_sub(image.bits_per_sample.clamp(1, 16));
        let scaled: Vec<u16> = image.data.iter().map(|&v| v << shift).collect();
        Self::encode(config, output, |mut encoder| {
            encoder.write_image::<Gray16>(image.width as u32, image.height as u32, &scaled)
        })
    }

    fn write_rgb(&self, image: &RgbImageData, output: &mut dyn Write, config: &ExportConfig) -> Result<()> {
        debug!("Encoding TIFF RGB: {}x{}", image.width, image.height);
        if image.data.len() != image.width * image.height * 3 {
            return Err(ImagingError::InvalidDimensions(image.width, image.height));
        }
        Self::encode(config, output, |mut encoder| {
            encoder.write_image::<RGB16>(image.width as u32, image.height as u32, &image.data)
        })
    }
}
