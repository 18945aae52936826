use crate::imaging::error::Result;
use crate::imaging::types::{EncodedFrame, RawFrame, SensorImage};
use crate::stream::adjustment::FullAdjustment;
use crate::stream::format::DataFormat;
use crate::stream::record::ImageGeometry;

/// Pixel codec collaborator of the stream container.
pub trait ImagingEngine {
    /// Encodes all sensors of a capture into one payload of `format`.
    fn encode_frame(&self, frame: &RawFrame, format: DataFormat) -> Result<EncodedFrame>;

    /// Splits a payload back into per-sensor images.
    fn decode_frame(
        &self,
        payload: &[u8],
        format: DataFormat,
        geometry: &ImageGeometry,
    ) -> Result<Vec<SensorImage>>;

    /// NMEA text the capture carried, if any.
    fn extract_embedded_gps(&self, frame: &RawFrame) -> Option<String>;

    /// Adjustment applied to frames that have no explicit overlay entry.
    fn default_adjustment_for(&self, format: DataFormat) -> FullAdjustment {
        FullAdjustment::default_for(format)
    }
}
