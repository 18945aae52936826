//! On-disk layout of a stream segment
//!
//! ```text
//! [ signature "PGRLADYBUGSTREAM" ]   16 bytes
//! [ StreamHeader ]                   3056 bytes, embeds the index table
//! [ camera configuration blob ]      header.configuration_data_size bytes
//! [ image record ]*                  header.number_of_images records
//! [ GPS summary block ]              final segment only
//! ```
//!
//! All integers are little-endian and fixed width.

mod header;
mod tags;

pub use header::{SensorRange, StreamHeader, HEADER_SIZE};
pub use tags::{DataFormat, GpsFileType, Resolution, StippledFormat};

/// Signature at the start of every segment file.
pub const STREAM_SIGNATURE: &[u8; 16] = b"PGRLADYBUGSTREAM";

/// Format version written by this crate.
pub const STREAM_VERSION: u32 = 7;

/// Oldest format version accepted by the reader.
pub const MIN_STREAM_VERSION: u32 = 1;

/// Number of slots in the per-segment offset table.
pub const INDEX_CAPACITY: usize = 512;

/// Number of sensors in one camera head.
pub const NUM_CAMERAS: usize = 6;

/// Byte offset of the first byte after the header block.
pub const PREAMBLE_SIZE: u64 = STREAM_SIGNATURE.len() as u64 + HEADER_SIZE as u64;
