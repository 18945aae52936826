//! Types exchanged with the imaging engine

use crate::stream::format::{DataFormat, StippledFormat};

/// One sensor's image as captured, before or after payload encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorImage {
    pub width: usize,
    pub height: usize,
    /// Single channel Bayer mosaic, one sample per pixel.
    pub data: Vec<u16>,
    /// Significant bits per sample (8 to 16).
    pub bits_per_sample: u32,
    pub pattern: StippledFormat,
}

impl SensorImage {
    pub fn new(width: usize, height: usize, bits_per_sample: u32, data: Vec<u16>) -> Self {
        Self {
            width,
            height,
            data,
            bits_per_sample,
            pattern: StippledFormat::default(),
        }
    }

    pub fn with_pattern(mut self, pattern: StippledFormat) -> Self {
        self.pattern = pattern;
        self
    }
}

/// Everything the camera head produced for one capture.
#[derive(Debug, Clone, Default)]
pub struct RawFrame {
    pub sensors: Vec<SensorImage>,
    /// NMEA text delivered with the frame by a camera-attached receiver.
    pub nmea: Option<String>,
}

/// Payload produced by an engine, ready for the record codec.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    pub payload: Vec<u8>,
    pub declared_size: u32,
    pub data_format: DataFormat,
}

/// RGB image data after debayering
#[derive(Debug, Clone)]
pub struct RgbImageData {
    pub width: usize,
    pub height: usize,
    /// Interleaved [R, G, B, R, G, B, ...]
    pub data: Vec<u16>,
    pub bits_per_sample: u32,
}

/// TIFF compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffCompression {
    /// No compression (fastest, largest file)
    None,
    /// LZW compression (slow, good compression)
    Lzw,
    DeflateFast,
    DeflateBest,
    /// Deflate compression - balanced (default)
    DeflateBalanced,
}

/// Settings for exporting decoded sensor images
#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub compression: TiffCompression,
    /// Predictor for compression (2 = horizontal differencing)
    pub predictor: Option<u16>,
    /// Demosaic to RGB (true) or write the grayscale Bayer mosaic (false)
    pub debayer: bool,
    /// Sensors to export; `None` exports all of them
    pub sensors: Option<Vec<usize>>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            compression: TiffCompression::None,
            predictor: None,
            debayer: false,
            sensors: None,
        }
    }
}

impl ExportConfig {
    pub fn builder() -> ExportConfigBuilder {
        ExportConfigBuilder::default()
    }

    pub fn exports_sensor(&self, sensor: usize) -> bool {
        self.sensors.as_ref().is_none_or(|s| s.contains(&sensor))
    }
}

/// Builder for ExportConfig
#[derive(Default)]
pub struct ExportConfigBuilder {
    compression: Option<TiffCompression>,
    predictor: Option<Option<u16>>,
    debayer: Option<bool>,
    sensors: Option<Option<Vec<usize>>>,
}

impl ExportConfigBuilder {
    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn predictor(mut self, predictor: Option<u16>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn debayer(mut self, enable: bool) -> Self {
        self.debayer = Some(enable);
        self
    }

    pub fn sensors(mut self, sensors: Option<Vec<usize>>) -> Self {
        self.sensors = Some(sensors);
        self
    }

    pub fn build(self) -> ExportConfig {
        let default = ExportConfig::default();
        ExportConfig {
            compression: self.compression.unwrap_or(default.compression),
            predictor: self.predictor.unwrap_or(default.predictor),
            debayer: self.debayer.unwrap_or(default.debayer),
            sensors: self.sensors.unwrap_or(default.sensors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ExportConfig::builder()
            .compression(TiffCompression::DeflateBest)
            .predictor(Some(2))
            .sensors(Some(vec![0, 5]))
            .build();

        assert_eq!(config.compression, TiffCompression::DeflateBest);
        assert_eq!(config.predictor, Some(2));
        assert!(!config.debayer);
        assert!(config.exports_sensor(5));
        assert!(!config.exports_sensor(3));
        assert!(ExportConfig::default().exports_sensor(3));
    }
}
