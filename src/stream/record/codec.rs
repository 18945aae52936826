//! Frame record codec
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Metadata (1536 bytes)        │ geometry, formats, payload size,
//! │                              │ timestamp, image info, sensors,
//! │                              │ NMEA blob, sentence counters
//! ├──────────────────────────────┤
//! │ Payload (data_size bytes)    │ opaque, encoded by the imaging engine
//! ├──────────────────────────────┤
//! │ Zero pad                     │ up to a multiple of padding_size
//! └──────────────────────────────┘
//! ```

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::format::{DataFormat, NUM_CAMERAS, Resolution, StippledFormat};
use crate::stream::record::types::{
    GPS_SENTENCE_KINDS, IMAGE_INFO_FINGERPRINT, ImageBorder, ImageGeometry, ImageInfo,
    ImageRecord, MAX_NMEA_SIZE, SensorReadings, Timestamp, Triplet,
};

/// Size of the fixed metadata block at the start of every record.
pub const METADATA_SIZE: usize = 1536;

/// Total on-disk size of a record with `data_size` payload bytes.
pub fn padded_record_size(data_size: u32, padding_size: u32) -> u64 {
    let unpadded = METADATA_SIZE as u64 + data_size as u64;
    let align = padding_size.max(1) as u64;
    unpadded.div_ceil(align) * align
}

/// Decoded metadata of a record whose payload has not been read yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMetadata {
    /// The record with an empty payload.
    pub record: ImageRecord,
    pub data_size: u32,
}

impl RecordMetadata {
    pub fn into_record(mut self, payload: Vec<u8>) -> ImageRecord {
        self.record.payload = payload;
        self.record
    }
}

/// Encodes and decodes records for one stream.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    padding_size: u32,
}

impl RecordCodec {
    pub fn new(padding_size: u32) -> Self {
        Self {
            padding_size: padding_size.max(1),
        }
    }

    pub fn padding_size(&self) -> u32 {
        self.padding_size
    }

    pub fn record_size(&self, data_size: u32) -> u64 {
        padded_record_size(data_size, self.padding_size)
    }

    /// Full record bytes: metadata, payload, pad.
    pub fn encode(&self, record: &ImageRecord) -> Result<Vec<u8>> {
        if record.nmea.len() > MAX_NMEA_SIZE {
            return Err(StreamError::InvalidArgument(format!(
                "NMEA data of {} bytes exceeds {MAX_NMEA_SIZE}",
                record.nmea.len()
            )));
        }
        if record.payload.len() > u32::MAX as usize {
            return Err(StreamError::InvalidArgument(
                "payload does not fit a 32-bit size".to_string(),
            ));
        }

        let total = self.record_size(record.data_size()) as usize;
        let mut buf = Vec::with_capacity(total);
        write_metadata(&mut buf, record)?;
        buf.resize(METADATA_SIZE, 0);
        buf.extend_from_slice(&record.payload);
        buf.resize(total, 0);
        Ok(buf)
    }

    /// Decodes a complete record from `bytes`, which must hold at least
    /// the metadata block and the declared payload.
    pub fn decode(&self, bytes: &[u8]) -> std::result::Result<ImageRecord, String> {
        if bytes.len() < METADATA_SIZE {
            return Err(format!("record truncated at {} bytes", bytes.len()));
        }
        let meta = read_metadata(&bytes[..METADATA_SIZE])?;
        let end = METADATA_SIZE + meta.data_size as usize;
        if bytes.len() < end {
            return Err(format!(
                "payload of {} bytes truncated at {}",
                meta.data_size,
                bytes.len() - METADATA_SIZE
            ));
        }
        let payload = bytes[METADATA_SIZE..end].to_vec();
        Ok(meta.into_record(payload))
    }
}

fn write_metadata(w: &mut Vec<u8>, record: &ImageRecord) -> std::io::Result<()> {
    let g = &record.geometry;
    w.write_u32::<LittleEndian>(g.cols)?;
    w.write_u32::<LittleEndian>(g.rows)?;
    w.write_u32::<LittleEndian>(g.border.top_rows)?;
    w.write_u32::<LittleEndian>(g.border.bottom_rows)?;
    w.write_u32::<LittleEndian>(g.border.left_cols)?;
    w.write_u32::<LittleEndian>(g.border.right_cols)?;
    w.write_u32::<LittleEndian>(g.full_cols)?;
    w.write_u32::<LittleEndian>(g.full_rows)?;
    w.write_u32::<LittleEndian>(record.data_format.as_u32())?;
    w.write_u32::<LittleEndian>(record.resolution.as_u32())?;
    w.write_u32::<LittleEndian>(record.stippled as u32)?;
    w.write_u32::<LittleEndian>(record.stippled_format.as_u32())?;
    w.write_u32::<LittleEndian>(record.data_size())?;

    let t = &record.timestamp;
    w.write_i64::<LittleEndian>(t.seconds)?;
    w.write_u32::<LittleEndian>(t.micro_seconds)?;
    w.write_u32::<LittleEndian>(t.cycle_seconds)?;
    w.write_u32::<LittleEndian>(t.cycle_count)?;
    w.write_u32::<LittleEndian>(t.cycle_offset)?;

    let info = &record.info;
    w.write_u32::<LittleEndian>(info.fingerprint)?;
    w.write_u32::<LittleEndian>(info.version)?;
    w.write_u32::<LittleEndian>(info.time_seconds)?;
    w.write_u32::<LittleEndian>(info.time_micro_seconds)?;
    w.write_u32::<LittleEndian>(info.sequence_id)?;
    w.write_u32::<LittleEndian>(info.h_rate)?;
    for gain in info.gain_adjust {
        w.write_u32::<LittleEndian>(gain)?;
    }
    w.write_u32::<LittleEndian>(info.white_balance)?;
    w.write_u32::<LittleEndian>(info.bayer_gain)?;
    w.write_u32::<LittleEndian>(info.bayer_map)?;
    w.write_u32::<LittleEndian>(info.brightness)?;
    w.write_u32::<LittleEndian>(info.gamma)?;
    w.write_u32::<LittleEndian>(info.serial_number)?;
    for shutter in info.shutter {
        w.write_u32::<LittleEndian>(shutter)?;
    }
    w.write_u32::<LittleEndian>(info.gps_fix_quality)?;
    w.write_all(&[info.pps_status as u8, info.gps_status as u8, 0, 0])?;
    w.write_f64::<LittleEndian>(info.gps_latitude)?;
    w.write_f64::<LittleEndian>(info.gps_longitude)?;
    w.write_f64::<LittleEndian>(info.gps_altitude)?;

    let s = &record.sensors;
    w.write_u32::<LittleEndian>(s.temperature)?;
    w.write_u32::<LittleEndian>(s.humidity)?;
    w.write_u32::<LittleEndian>(s.air_pressure)?;
    for triplet in [s.compass, s.accelerometer, s.gyroscope] {
        w.write_f32::<LittleEndian>(triplet.x)?;
        w.write_f32::<LittleEndian>(triplet.y)?;
        w.write_f32::<LittleEndian>(triplet.z)?;
    }
    w.write_all(&[s.needs_software_adjustment as u8, 0, 0, 0])?;

    w.write_u32::<LittleEndian>(record.nmea.len() as u32)?;
    w.write_all(&record.nmea)?;
    w.write_all(&vec![0u8; MAX_NMEA_SIZE - record.nmea.len()])?;
    for counter in record.gps_counters {
        w.write_u32::<LittleEndian>(counter)?;
    }
    debug_assert!(w.len() <= METADATA_SIZE);
    Ok(())
}

/// Parses a metadata block. Errors carry a human-readable reason that the
/// caller attaches to the segment path.
pub fn read_metadata(block: &[u8]) -> std::result::Result<RecordMetadata, String> {
    if block.len() < METADATA_SIZE {
        return Err(format!("metadata truncated at {} bytes", block.len()));
    }
    let mut r = Cursor::new(&block[..METADATA_SIZE]);
    parse_metadata(&mut r).map_err(|e| match e {
        ParseError::Io(io) => io.to_string(),
        ParseError::Invalid(reason) => reason,
    })
}

enum ParseError {
    Io(std::io::Error),
    Invalid(String),
}

impl From<std::io::Error> for ParseError {
    fn from(e: std::io::Error) -> Self {
        ParseError::Io(e)
    }
}

fn parse_metadata(r: &mut Cursor<&[u8]>) -> std::result::Result<RecordMetadata, ParseError> {
    let cols = r.read_u32::<LittleEndian>()?;
    let rows = r.read_u32::<LittleEndian>()?;
    let border = ImageBorder {
        top_rows: r.read_u32::<LittleEndian>()?,
        bottom_rows: r.read_u32::<LittleEndian>()?,
        left_cols: r.read_u32::<LittleEndian>()?,
        right_cols: r.read_u32::<LittleEndian>()?,
    };
    let full_cols = r.read_u32::<LittleEndian>()?;
    let full_rows = r.read_u32::<LittleEndian>()?;
    let invalid = |e: StreamError| ParseError::Invalid(e.to_string());
    let data_format = DataFormat::from_u32(r.read_u32::<LittleEndian>()?).map_err(invalid)?;
    let resolution = Resolution::from_u32(r.read_u32::<LittleEndian>()?).map_err(invalid)?;
    let stippled = r.read_u32::<LittleEndian>()? != 0;
    let stippled_format = StippledFormat::from_u32(r.read_u32::<LittleEndian>()?).map_err(invalid)?;
    let data_size = r.read_u32::<LittleEndian>()?;

    let timestamp = Timestamp {
        seconds: r.read_i64::<LittleEndian>()?,
        micro_seconds: r.read_u32::<LittleEndian>()?,
        cycle_seconds: r.read_u32::<LittleEndian>()?,
        cycle_count: r.read_u32::<LittleEndian>()?,
        cycle_offset: r.read_u32::<LittleEndian>()?,
    };

    let fingerprint = r.read_u32::<LittleEndian>()?;
    if fingerprint != IMAGE_INFO_FINGERPRINT {
        return Err(ParseError::Invalid(format!(
            "bad image fingerprint {fingerprint:#010x}"
        )));
    }
    let version = r.read_u32::<LittleEndian>()?;
    let time_seconds = r.read_u32::<LittleEndian>()?;
    let time_micro_seconds = r.read_u32::<LittleEndian>()?;
    let sequence_id = r.read_u32::<LittleEndian>()?;
    let h_rate = r.read_u32::<LittleEndian>()?;
    let mut gain_adjust = [0u32; NUM_CAMERAS];
    r.read_u32_into::<LittleEndian>(&mut gain_adjust)?;
    let white_balance = r.read_u32::<LittleEndian>()?;
    let bayer_gain = r.read_u32::<LittleEndian>()?;
    let bayer_map = r.read_u32::<LittleEndian>()?;
    let brightness = r.read_u32::<LittleEndian>()?;
    let gamma = r.read_u32::<LittleEndian>()?;
    let serial_number = r.read_u32::<LittleEndian>()?;
    let mut shutter = [0u32; NUM_CAMERAS];
    r.read_u32_into::<LittleEndian>(&mut shutter)?;
    let gps_fix_quality = r.read_u32::<LittleEndian>()?;
    let mut flags = [0u8; 4];
    r.read_exact(&mut flags)?;
    let info = ImageInfo {
        fingerprint,
        version,
        time_seconds,
        time_micro_seconds,
        sequence_id,
        h_rate,
        gain_adjust,
        white_balance,
        bayer_gain,
        bayer_map,
        brightness,
        gamma,
        serial_number,
        shutter,
        gps_fix_quality,
        pps_status: flags[0] != 0,
        gps_status: flags[1] != 0,
        gps_latitude: r.read_f64::<LittleEndian>()?,
        gps_longitude: r.read_f64::<LittleEndian>()?,
        gps_altitude: r.read_f64::<LittleEndian>()?,
    };

    let temperature = r.read_u32::<LittleEndian>()?;
    let humidity = r.read_u32::<LittleEndian>()?;
    let air_pressure = r.read_u32::<LittleEndian>()?;
    let mut triplets = [Triplet::default(); 3];
    for triplet in triplets.iter_mut() {
        triplet.x = r.read_f32::<LittleEndian>()?;
        triplet.y = r.read_f32::<LittleEndian>()?;
        triplet.z = r.read_f32::<LittleEndian>()?;
    }
    let mut adjust_flag = [0u8; 4];
    r.read_exact(&mut adjust_flag)?;
    let [compass, accelerometer, gyroscope] = triplets;
    let sensors = SensorReadings {
        temperature,
        humidity,
        air_pressure,
        compass,
        accelerometer,
        gyroscope,
        needs_software_adjustment: adjust_flag[0] != 0,
    };

    let nmea_len = r.read_u32::<LittleEndian>()? as usize;
    if nmea_len > MAX_NMEA_SIZE {
        return Err(ParseError::Invalid(format!(
            "NMEA length {nmea_len} exceeds {MAX_NMEA_SIZE}"
        )));
    }
    let mut nmea_area = vec![0u8; MAX_NMEA_SIZE];
    r.read_exact(&mut nmea_area)?;
    nmea_area.truncate(nmea_len);
    let mut gps_counters = [0u32; GPS_SENTENCE_KINDS];
    r.read_u32_into::<LittleEndian>(&mut gps_counters)?;

    let record = ImageRecord {
        geometry: ImageGeometry {
            cols,
            rows,
            border,
            full_cols,
            full_rows,
        },
        data_format,
        resolution,
        stippled,
        stippled_format,
        timestamp,
        info,
        sensors,
        nmea: nmea_area,
        gps_counters,
        payload: Vec::new(),
    };
    Ok(RecordMetadata { record, data_size })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(payload: Vec<u8>) -> ImageRecord {
        let mut record = ImageRecord::new(
            ImageGeometry::new(8, 4),
            DataFormat::ColorSepJpeg8,
            Resolution::R2448x2048,
            payload,
        );
        record.timestamp = Timestamp {
            seconds: 1_700_000_000,
            micro_seconds: 250,
            cycle_seconds: 17,
            cycle_count: 4000,
            cycle_offset: 12,
        };
        record.info.time_seconds = 1_700_000_000;
        record.info.sequence_id = 42;
        record.info.shutter = [1, 2, 3, 4, 5, 6];
        record.info.gps_latitude = 45.5;
        record.info.gps_status = true;
        record.sensors.compass = Triplet {
            x: 0.5,
            y: -0.25,
            z: 1.0,
        };
        record.nmea = b"$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n".to_vec();
        record.gps_counters[0] = 3;
        record
    }

    #[test]
    fn test_record_is_padded_to_alignment() {
        let codec = RecordCodec::new(512);
        let bytes = codec.encode(&sample_record(vec![7u8; 100])).unwrap();
        assert_eq!(bytes.len() % 512, 0);
        assert_eq!(bytes.len() as u64, codec.record_size(100));
        assert!(bytes[METADATA_SIZE + 100..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_restores_metadata_and_payload() {
        let codec = RecordCodec::new(512);
        let record = sample_record((0..=255).collect());
        let decoded = codec.decode(&codec.encode(&record).unwrap()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_zero_payload_is_tolerated() {
        let codec = RecordCodec::new(512);
        let record = sample_record(Vec::new());
        let bytes = codec.encode(&record).unwrap();
        assert_eq!(bytes.len(), METADATA_SIZE);

        let decoded = codec.decode(&bytes).unwrap();
        assert!(decoded.is_empty_payload());
    }

    #[test]
    fn test_bad_fingerprint_is_rejected() {
        let codec = RecordCodec::new(512);
        let mut record = sample_record(vec![1, 2, 3]);
        record.info.fingerprint = 0xDEAD_BEEF;
        let bytes = codec.encode(&record).unwrap();
        let err = codec.decode(&bytes).unwrap_err();
        assert!(err.contains("fingerprint"));
    }

    #[test]
    fn test_oversized_nmea_is_rejected() {
        let codec = RecordCodec::new(512);
        let mut record = sample_record(vec![1]);
        record.nmea = vec![b'x'; MAX_NMEA_SIZE + 1];
        assert!(matches!(
            codec.encode(&record),
            Err(StreamError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_truncated_payload_is_reported() {
        let codec = RecordCodec::new(512);
        let bytes = codec.encode(&sample_record(vec![9u8; 2000])).unwrap();
        assert!(codec.decode(&bytes[..METADATA_SIZE + 10]).is_err());
    }
}
