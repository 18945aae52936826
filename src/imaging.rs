//! Imaging engine boundary
//!
//! The container never interprets pixels. Everything that turns sensor
//! data into payload bytes and back goes through an [`ImagingEngine`].
//! [`RawEngine`] handles the uncompressed raw formats; JPEG payloads need
//! an engine backed by a real codec.

pub mod debayer;
pub mod engine;
pub mod error;
pub mod raw_engine;
pub mod tiff_writer;
pub mod types;

pub use debayer::CpuDebayer;
pub use engine::ImagingEngine;
pub use error::{ImagingError, Result};
pub use raw_engine::RawEngine;
pub use tiff_writer::{StandardTiffWriter, TiffWriter};
pub use types::{
    EncodedFrame, ExportConfig, ExportConfigBuilder, RawFrame, RgbImageData, SensorImage,
    TiffCompression,
};
