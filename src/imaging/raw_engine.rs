use tracing::debug;

use crate::imaging::engine::ImagingEngine;
use crate::imaging::error::{ImagingError, Result};
use crate::imaging::types::{EncodedFrame, RawFrame, SensorImage};
use crate::stream::format::{DataFormat, NUM_CAMERAS};
use crate::stream::record::ImageGeometry;

/// Engine for uncompressed 8 and 16 bit payloads: the six sensor mosaics
/// stored back to back, row major, 16 bit samples little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEngine;

impl RawEngine {
    pub fn new() -> Self {
        Self
    }

    fn bytes_per_sample(format: DataFormat) -> Result<usize> {
        match format.raw_bits_per_pixel() {
            Some(8) => Ok(1),
            Some(16) => Ok(2),
            _ => Err(ImagingError::UnsupportedFormat(format)),
        }
    }
}

impl ImagingEngine for RawEngine {
    fn encode_frame(&self, frame: &RawFrame, format: DataFormat) -> Result<EncodedFrame> {
        let bytes_per_sample = Self::bytes_per_sample(format)?;
        if frame.sensors.len() != NUM_CAMERAS {
            return Err(ImagingError::EncodeError(format!(
                "expected {NUM_CAMERAS} sensor images, got {}",
                frame.sensors.len()
            )));
        }
        let (width, height) = (frame.sensors[0].width, frame.sensors[0].height);
        if width == 0 || height == 0 {
            return Err(ImagingError::InvalidDimensions(width, height));
        }

        let mut payload = Vec::with_capacity(width * height * NUM_CAMERAS * bytes_per_sample);
        for (i, sensor) in frame.sensors.iter().enumerate() {
            if sensor.width != width || sensor.height != height || sensor.data.len() != width * height {
                return Err(ImagingError::EncodeError(format!(
                    "sensor {i} is {}x{} with {} samples, expected {width}x{height}",
                    sensor.width,
                    sensor.height,
                    sensor.data.len()
                )));
            }
            let bits = sensor.bits_per_sample.clamp(1, 16);
            if bytes_per_sample == 1 {
                let shift = bits.saturating_sub(8);
                payload.extend(sensor.data.iter().map(|&v| (v >> shift).min(255) as u8));
            } else {
                let shift = 16 - bits;
                payload.extend(sensor.data.iter().flat_map(|&v| (v << shift).to_le_bytes()));
            }
        }

        let declared_size = u32::try_from(payload.len())
            .map_err(|_| ImagingError::EncodeError(format!("payload of {} bytes", payload.len())))?;
        debug!("Encoded {}x{} {} frame into {} bytes", width, height, format, declared_size);
        Ok(EncodedFrame {
            payload,
            declared_size,
            data_format: format,
        })
    }

    fn decode_frame(
        &self,
        payload: &[u8],
        format: DataFormat,
        geometry: &ImageGeometry,
    ) -> Result<Vec<SensorImage>> {
        let bytes_per_sample = Self::bytes_per_sample(format)?;
        let (width, height) = (geometry.full_cols as usize, geometry.full_rows as usize);
        if width == 0 || height == 0 {
            return Err(ImagingError::InvalidDimensions(width, height));
        }
        if payload.is_empty() {
            return Err(ImagingError::DecodeError {
                format,
                reason: "empty payload".to_string(),
            });
        }
        let sensor_bytes = width * height * bytes_per_sample;
        if payload.len() != sensor_bytes * NUM_CAMERAS {
            return Err(ImagingError::DecodeError {
                format,
                reason: format!(
                    "{} bytes, expected {} for {width}x{height}",
                    payload.len(),
                    sensor_bytes * NUM_CAMERAS
                ),
            });
        }

        let sensors = payload
            .chunks_exact(sensor_bytes)
            .map(|chunk| {
                let data = if bytes_per_sample == 1 {
                    chunk.iter().map(|&b| b as u16).collect()
                } else {
                    chunk
                        .chunks_exact(2)
                        .map(|b| u16::from_le_bytes([b[0], b[1]]))
                        .collect()
                };
                SensorImage::new(width, height, bytes_per_sample as u32 * 8, data)
            })
            .collect();
        Ok(sensors)
    }

    fn extract_embedded_gps(&self, frame: &RawFrame) -> Option<String> {
        frame.nmea.clone().filter(|text| !text.trim().is_empty())
    }
}
