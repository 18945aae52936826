//! Stream header codec
//!
//! The header is a fixed 3056-byte block following the signature. It is
//! replicated at the start of every segment; only the image count, the
//! index table and the GPS summary location differ between segments.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::format::{
    DataFormat, INDEX_CAPACITY, MIN_STREAM_VERSION, PREAMBLE_SIZE, Resolution,
    STREAM_SIGNATURE, STREAM_VERSION, StippledFormat,
};
use crate::stream::index::IndexTable;

/// Size in bytes of the encoded header, signature excluded.
pub const HEADER_SIZE: usize = 3056;

const RESERVED_WORDS: usize = 25;
const RESERVED_TAIL: usize = 780;

/// Availability and range of one environmental sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorRange {
    pub available: bool,
    pub min: f32,
    pub max: f32,
}

impl SensorRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self {
            available: true,
            min,
            max,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamHeader {
    pub version: u32,
    /// Integer frame rate kept for old readers; see `frame_rate_precise`.
    pub frame_rate: u32,
    pub serial_base: u32,
    pub serial_head: u32,
    /// Alignment unit for the zero pad that follows every record.
    pub padding_size: u32,
    pub data_format: DataFormat,
    pub resolution: Resolution,
    pub stippled_format: StippledFormat,
    pub configuration_data_size: u32,
    /// Images stored in this segment, not in the whole stream.
    pub number_of_images: u32,
    pub stream_data_offset: u32,
    pub gps_data_offset: u32,
    pub gps_data_size: u32,
    pub frame_header_size: u32,
    pub humidity: SensorRange,
    pub air_pressure: SensorRange,
    pub compass: SensorRange,
    pub accelerometer: SensorRange,
    pub gyroscope: SensorRange,
    pub frame_rate_precise: f32,
    pub index: IndexTable,
}

impl StreamHeader {
    /// Header template for a new stream. The caller fills in serials,
    /// sensor ranges and frame rate as known.
    pub fn new(data_format: DataFormat, resolution: Resolution, stippled_format: StippledFormat) -> Self {
        Self {
            version: STREAM_VERSION,
            frame_rate: 0,
            serial_base: 0,
            serial_head: 0,
            padding_size: 512,
            data_format,
            resolution,
            stippled_format,
            configuration_data_size: 0,
            number_of_images: 0,
            stream_data_offset: PREAMBLE_SIZE as u32,
            gps_data_offset: 0,
            gps_data_size: 0,
            frame_header_size: 0,
            humidity: SensorRange::default(),
            air_pressure: SensorRange::default(),
            compass: SensorRange::default(),
            accelerometer: SensorRange::default(),
            gyroscope: SensorRange::default(),
            frame_rate_precise: 0.0,
            index: IndexTable::new(1, INDEX_CAPACITY),
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = frame_rate.round().max(0.0) as u32;
        self.frame_rate_precise = frame_rate;
        self
    }

    pub fn with_serials(mut self, serial_base: u32, serial_head: u32) -> Self {
        self.serial_base = serial_base;
        self.serial_head = serial_head;
        self
    }

    /// Frame rate preferring the precise value on version 7+ streams.
    pub fn effective_frame_rate(&self) -> f32 {
        if self.version >= 7 && self.frame_rate_precise > 0.0 {
            self.frame_rate_precise
        } else {
            self.frame_rate as f32
        }
    }

    /// Encodes signature plus header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PREAMBLE_SIZE as usize);
        buf.extend_from_slice(STREAM_SIGNATURE);
        // Writing into a Vec cannot fail.
        let _ = self.write_fields(&mut buf);
        debug_assert_eq!(buf.len(), PREAMBLE_SIZE as usize);
        buf
    }

    fn write_fields(&self, w: &mut Vec<u8>) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(self.version)?;
        w.write_u32::<LittleEndian>(self.frame_rate)?;
        w.write_u32::<LittleEndian>(self.serial_base)?;
        w.write_u32::<LittleEndian>(self.serial_head)?;
        for _ in 0..RESERVED_WORDS {
            w.write_u32::<LittleEndian>(0)?;
        }
        w.write_u32::<LittleEndian>(self.padding_size)?;
        w.write_u32::<LittleEndian>(self.data_format.as_u32())?;
        w.write_u32::<LittleEndian>(self.resolution.as_u32())?;
        w.write_u32::<LittleEndian>(self.stippled_format.as_u32())?;
        w.write_u32::<LittleEndian>(self.configuration_data_size)?;
        w.write_u32::<LittleEndian>(self.number_of_images)?;
        w.write_u32::<LittleEndian>(self.index.len() as u32)?;
        w.write_u32::<LittleEndian>(self.index.stride())?;
        w.write_u32::<LittleEndian>(self.stream_data_offset)?;
        w.write_u32::<LittleEndian>(self.gps_data_offset)?;
        w.write_u32::<LittleEndian>(self.gps_data_size)?;
        w.write_u32::<LittleEndian>(self.frame_header_size)?;
        for range in self.sensor_ranges() {
            w.write_u32::<LittleEndian>(range.available as u32)?;
            w.write_f32::<LittleEndian>(range.min)?;
            w.write_f32::<LittleEndian>(range.max)?;
        }
        w.write_f32::<LittleEndian>(self.frame_rate_precise)?;
        w.write_all(&[0u8; RESERVED_TAIL])?;
        for slot in self.index.to_slots() {
            w.write_u32::<LittleEndian>(slot)?;
        }
        Ok(())
    }

    fn sensor_ranges(&self) -> [SensorRange; 5] {
        [
            self.humidity,
            self.air_pressure,
            self.compass,
            self.accelerometer,
            self.gyroscope,
        ]
    }

    /// Decodes signature plus header. `path` is only used for error context.
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        if bytes.len() < PREAMBLE_SIZE as usize {
            return Err(StreamError::corrupted(
                path,
                format!(
                    "truncated header: {} of {} bytes",
                    bytes.len(),
                    PREAMBLE_SIZE
                ),
            ));
        }
        if &bytes[..STREAM_SIGNATURE.len()] != STREAM_SIGNATURE {
            return Err(StreamError::corrupted(path, "bad stream signature"));
        }

        let mut r = Cursor::new(&bytes[STREAM_SIGNATURE.len()..PREAMBLE_SIZE as usize]);
        Self::read_fields(&mut r, path).map_err(|e| match e {
            StreamError::Io(io) => StreamError::corrupted(path, io.to_string()),
            other => other,
        })
    }

    fn read_fields(r: &mut Cursor<&[u8]>, path: &Path) -> Result<Self> {
        let version = r.read_u32::<LittleEndian>()?;
        if !(MIN_STREAM_VERSION..=STREAM_VERSION).contains(&version) {
            return Err(StreamError::corrupted(
                path,
                format!("unsupported stream version {version}"),
            ));
        }
        let frame_rate = r.read_u32::<LittleEndian>()?;
        let serial_base = r.read_u32::<LittleEndian>()?;
        let serial_head = r.read_u32::<LittleEndian>()?;
        let mut reserved = [0u8; RESERVED_WORDS * 4];
        r.read_exact(&mut reserved)?;

        let padding_size = r.read_u32::<LittleEndian>()?;
        let tag_error = |e: StreamError| StreamError::corrupted(path, e.to_string());
        let data_format = DataFormat::from_u32(r.read_u32::<LittleEndian>()?).map_err(tag_error)?;
        let resolution = Resolution::from_u32(r.read_u32::<LittleEndian>()?).map_err(tag_error)?;
        let stippled_format =
            StippledFormat::from_u32(r.read_u32::<LittleEndian>()?).map_err(tag_error)?;
        let configuration_data_size = r.read_u32::<LittleEndian>()?;
        let number_of_images = r.read_u32::<LittleEndian>()?;
        let number_of_key_index = r.read_u32::<LittleEndian>()?;
        let increment = r.read_u32::<LittleEndian>()?;
        let stream_data_offset = r.read_u32::<LittleEndian>()?;
        let gps_data_offset = r.read_u32::<LittleEndian>()?;
        let gps_data_size = r.read_u32::<LittleEndian>()?;
        let frame_header_size = r.read_u32::<LittleEndian>()?;

        let mut ranges = [SensorRange::default(); 5];
        for range in ranges.iter_mut() {
            range.available = r.read_u32::<LittleEndian>()? & 0xFF != 0;
            range.min = r.read_f32::<LittleEndian>()?;
            range.max = r.read_f32::<LittleEndian>()?;
        }
        let frame_rate_precise = r.read_f32::<LittleEndian>()?;
        let mut tail = [0u8; RESERVED_TAIL];
        r.read_exact(&mut tail)?;

        let mut slots = [0u32; INDEX_CAPACITY];
        r.read_u32_into::<LittleEndian>(&mut slots)?;

        if number_of_key_index as usize > INDEX_CAPACITY {
            return Err(StreamError::corrupted(
                path,
                format!("{number_of_key_index} index entries exceed the table capacity"),
            ));
        }
        if number_of_key_index > 0 && increment == 0 {
            return Err(StreamError::corrupted(path, "index increment is zero"));
        }
        if number_of_key_index > 0
            && (number_of_key_index - 1).checked_mul(increment).is_none()
        {
            return Err(StreamError::corrupted(
                path,
                format!("{number_of_key_index} index entries at increment {increment} overflow 32-bit ordinals"),
            ));
        }
        if padding_size == 0 {
            return Err(StreamError::corrupted(path, "padding size is zero"));
        }

        let [humidity, air_pressure, compass, accelerometer, gyroscope] = ranges;
        Ok(Self {
            version,
            frame_rate,
            serial_base,
            serial_head,
            padding_size,
            data_format,
            resolution,
            stippled_format,
            configuration_data_size,
            number_of_images,
            stream_data_offset,
            gps_data_offset,
            gps_data_size,
            frame_header_size,
            humidity,
            air_pressure,
            compass,
            accelerometer,
            gyroscope,
            frame_rate_precise,
            index: IndexTable::from_slots(&slots, number_of_key_index as usize, increment),
        })
    }

    /// Writes signature plus header to `w`.
    pub fn write_to(&self, w: &mut impl Write) -> Result<()> {
        w.write_all(&self.encode())?;
        Ok(())
    }
}
