//! Image record module
//!
//! One recorded frame: a fixed metadata block, the opaque payload and a
//! zero pad up to the stream's alignment unit.

mod codec;
pub mod types;

pub use codec::{
    METADATA_SIZE, RecordCodec, RecordMetadata, padded_record_size, read_metadata,
};
pub use types::{
    GPS_SENTENCE_KINDS, ImageBorder, ImageGeometry, ImageInfo, ImageRecord, MAX_NMEA_SIZE,
    SensorReadings, Timestamp, Triplet, IMAGE_INFO_FINGERPRINT, IMAGE_INFO_VERSION,
};
