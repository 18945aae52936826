//! Multi-camera stream container
//!
//! A stream is a sequence of six-sensor frames split over segment files
//! of bounded size. [`StreamWriter`] records one, [`StreamReader`] reads
//! it back with indexed random access. Post-processing adjustments live
//! in a per-generation sidecar and GPS sentences ride inside each frame.

pub mod adjustment;
pub mod common;
pub mod config;
pub mod format;
pub mod gps;
pub mod index;
pub mod reader;
pub mod record;
pub mod segment;
pub mod writer;

#[cfg(test)]
mod tests;

pub use adjustment::{FullAdjustment, OverlayStore};
pub use common::{ErrorKind, Result, StreamError};
pub use config::{ReaderConfig, ReaderConfigBuilder, WriterConfig, WriterConfigBuilder};
pub use format::{DataFormat, GpsFileType, Resolution, StippledFormat, StreamHeader};
pub use gps::{GpsSummary, NmeaGpsData, NmeaSentence, NmeaSentenceId};
pub use index::IndexTable;
pub use reader::{Frame, FrameLocation, StreamReader};
pub use record::{ImageGeometry, ImageRecord, RecordCodec};
pub use segment::SegmentName;
pub use writer::{CameraConfigSource, StreamWriter, WriteProgress};
