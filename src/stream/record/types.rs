//! Types describing one recorded frame

use crate::stream::format::{DataFormat, NUM_CAMERAS, Resolution, StippledFormat};

/// Fingerprint every valid image info block carries.
pub const IMAGE_INFO_FINGERPRINT: u32 = 0xCAFE_BABE;

/// Current image info structure version.
pub const IMAGE_INFO_VERSION: u32 = 2;

/// Largest NMEA blob that can be attached to a frame.
pub const MAX_NMEA_SIZE: usize = 1024;

/// Number of NMEA sentence kinds with a per-kind counter.
pub const GPS_SENTENCE_KINDS: usize = 9;

/// Masked border pixels around the useful sensor area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageBorder {
    pub top_rows: u32,
    pub bottom_rows: u32,
    pub left_cols: u32,
    pub right_cols: u32,
}

/// Per-sensor geometry of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageGeometry {
    pub cols: u32,
    pub rows: u32,
    pub border: ImageBorder,
    pub full_cols: u32,
    pub full_rows: u32,
}

impl ImageGeometry {
    /// Geometry without a border.
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            border: ImageBorder::default(),
            full_cols: cols,
            full_rows: rows,
        }
    }

    pub fn with_border(cols: u32, rows: u32, border: ImageBorder) -> Self {
        Self {
            cols,
            rows,
            border,
            full_cols: cols + border.left_cols + border.right_cols,
            full_rows: rows + border.top_rows + border.bottom_rows,
        }
    }

    /// Full dimensions must equal the useful area plus the border.
    pub fn is_consistent(&self) -> bool {
        self.full_cols as u64
            == self.cols as u64 + self.border.left_cols as u64 + self.border.right_cols as u64
            && self.full_rows as u64
                == self.rows as u64 + self.border.top_rows as u64 + self.border.bottom_rows as u64
    }

    /// Byte size of a raw payload holding all sensors, `None` for JPEG.
    pub fn raw_payload_size(&self, format: DataFormat) -> Option<u64> {
        let bits = format.raw_bits_per_pixel()? as u64;
        let pixels = self.full_cols as u64 * self.full_rows as u64 * NUM_CAMERAS as u64;
        Some(pixels * bits / 8)
    }
}

/// Capture time of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Seconds since the UNIX epoch.
    pub seconds: i64,
    pub micro_seconds: u32,
    /// Bus cycle seconds, wraps after 128.
    pub cycle_seconds: u32,
    /// 1/8000 s component.
    pub cycle_count: u32,
    /// 1/3072 of a cycle count.
    pub cycle_offset: u32,
}

/// Camera status snapshot stored with each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageInfo {
    pub fingerprint: u32,
    pub version: u32,
    /// Seconds since the UNIX epoch. Zero marks all GPS and sensor data of
    /// the frame as invalid.
    pub time_seconds: u32,
    pub time_micro_seconds: u32,
    /// Increments per image; resets to zero when the head powers up.
    pub sequence_id: u32,
    pub h_rate: u32,
    pub gain_adjust: [u32; NUM_CAMERAS],
    pub white_balance: u32,
    pub bayer_gain: u32,
    pub bayer_map: u32,
    pub brightness: u32,
    pub gamma: u32,
    pub serial_number: u32,
    pub shutter: [u32; NUM_CAMERAS],
    pub gps_fix_quality: u32,
    pub pps_status: bool,
    pub gps_status: bool,
    pub gps_latitude: f64,
    pub gps_longitude: f64,
    pub gps_altitude: f64,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            fingerprint: IMAGE_INFO_FINGERPRINT,
            version: IMAGE_INFO_VERSION,
            time_seconds: 0,
            time_micro_seconds: 0,
            sequence_id: 0,
            h_rate: 0,
            gain_adjust: [0; NUM_CAMERAS],
            white_balance: 0,
            bayer_gain: 0,
            bayer_map: 0,
            brightness: 0,
            gamma: 0,
            serial_number: 0,
            shutter: [0; NUM_CAMERAS],
            gps_fix_quality: 0,
            pps_status: false,
            gps_status: false,
            gps_latitude: 0.0,
            gps_longitude: 0.0,
            gps_altitude: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Triplet {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Environmental sensor readings taken with the frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorReadings {
    pub temperature: u32,
    pub humidity: u32,
    pub air_pressure: u32,
    pub compass: Triplet,
    pub accelerometer: Triplet,
    pub gyroscope: Triplet,
    pub needs_software_adjustment: bool,
}

/// One frame as stored in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub geometry: ImageGeometry,
    pub data_format: DataFormat,
    pub resolution: Resolution,
    pub stippled: bool,
    pub stippled_format: StippledFormat,
    pub timestamp: Timestamp,
    pub info: ImageInfo,
    pub sensors: SensorReadings,
    /// Raw NMEA sentences attached to the frame.
    pub nmea: Vec<u8>,
    /// Per sentence-kind counters since the GPS channel started, in the
    /// order of `NmeaSentenceId::ALL`.
    pub gps_counters: [u32; GPS_SENTENCE_KINDS],
    pub payload: Vec<u8>,
}

impl ImageRecord {
    pub fn new(
        geometry: ImageGeometry,
        data_format: DataFormat,
        resolution: Resolution,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            geometry,
            data_format,
            resolution,
            stippled: true,
            stippled_format: StippledFormat::default(),
            timestamp: Timestamp::default(),
            info: ImageInfo::default(),
            sensors: SensorReadings::default(),
            nmea: Vec::new(),
            gps_counters: [0; GPS_SENTENCE_KINDS],
            payload,
        }
    }

    /// Declared payload size in bytes.
    pub fn data_size(&self) -> u32 {
        self.payload.len() as u32
    }

    /// A zero-sized payload marks a dropped or corrupted frame; it must be
    /// skipped rather than decoded.
    pub fn is_empty_payload(&self) -> bool {
        self.payload.is_empty()
    }

    /// GPS and environmental data are only meaningful when the embedded
    /// capture time is set.
    pub fn has_valid_embedded_data(&self) -> bool {
        self.info.time_seconds != 0
    }

    /// Embedded position as (latitude, longitude, altitude).
    pub fn embedded_position(&self) -> Option<(f64, f64, f64)> {
        self.has_valid_embedded_data().then_some((
            self.info.gps_latitude,
            self.info.gps_longitude,
            self.info.gps_altitude,
        ))
    }

    /// Environmental readings, if the frame's embedded data is valid.
    pub fn sensor_readings(&self) -> Option<&SensorReadings> {
        self.has_valid_embedded_data().then_some(&self.sensors)
    }

    pub fn nmea_text(&self) -> String {
        String::from_utf8_lossy(&self.nmea).into_owned()
    }
}
