//! End-of-stream GPS summary
//!
//! ```text
//! "GPSSUMRY"  u32 version  u32 count
//! count x { u32 ordinal, u32 time_s, u32 time_us, u32 fix_quality,
//!           f64 lat, f64 lon, f64 alt, f64 speed_kmh }
//! ```

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::stream::common::error::Result;
use crate::stream::format::GpsFileType;
use crate::stream::gps::nmea::NmeaGpsData;
use crate::stream::record::ImageRecord;

pub const SUMMARY_TAG: &[u8; 8] = b"GPSSUMRY";
pub const SUMMARY_VERSION: u32 = 1;
pub const SUMMARY_ENTRY_SIZE: usize = 48;
const SUMMARY_PREFIX_SIZE: usize = 16;

const KNOTS_TO_KMH: f64 = 1.852;

/// Position fix of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsSummaryEntry {
    pub ordinal: u32,
    pub time_seconds: u32,
    pub time_micro_seconds: u32,
    pub fix_quality: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed_kmh: f64,
}

impl GpsSummaryEntry {
    /// Fix for a frame, preferring decoded NMEA over the position the
    /// camera embedded. `None` when the frame carries no usable position.
    pub fn from_record(ordinal: u32, record: &ImageRecord, gps: &NmeaGpsData) -> Option<Self> {
        if !record.has_valid_embedded_data() {
            return None;
        }
        let (latitude, longitude, altitude, fix_quality) = if gps.gga.valid {
            (
                gps.gga.latitude,
                gps.gga.longitude,
                gps.gga.altitude,
                gps.gga.quality as u32,
            )
        } else if gps.rmc.valid {
            (gps.rmc.latitude, gps.rmc.longitude, 0.0, 1)
        } else if record.info.gps_status {
            let (lat, lon, alt) = record.embedded_position()?;
            (lat, lon, alt, record.info.gps_fix_quality)
        } else {
            return None;
        };
        let speed_kmh = if gps.vtg.valid {
            gps.vtg.speed_kmh
        } else if gps.rmc.valid {
            gps.rmc.ground_speed * KNOTS_TO_KMH
        } else {
            0.0
        };
        Some(Self {
            ordinal,
            time_seconds: record.info.time_seconds,
            time_micro_seconds: record.info.time_micro_seconds,
            fix_quality,
            latitude,
            longitude,
            altitude,
            speed_kmh,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GpsSummary {
    pub entries: Vec<GpsSummaryEntry>,
}

impl GpsSummary {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn encoded_size(&self) -> usize {
        SUMMARY_PREFIX_SIZE + self.entries.len() * SUMMARY_ENTRY_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.extend_from_slice(SUMMARY_TAG);
        // Writing into a Vec cannot fail.
        let _ = self.write_entries(&mut buf);
        buf
    }

    fn write_entries(&self, w: &mut Vec<u8>) -> std::io::Result<()> {
        w.write_u32::<LittleEndian>(SUMMARY_VERSION)?;
        w.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for e in &self.entries {
            w.write_u32::<LittleEndian>(e.ordinal)?;
            w.write_u32::<LittleEndian>(e.time_seconds)?;
            w.write_u32::<LittleEndian>(e.time_micro_seconds)?;
            w.write_u32::<LittleEndian>(e.fix_quality)?;
            w.write_f64::<LittleEndian>(e.latitude)?;
            w.write_f64::<LittleEndian>(e.longitude)?;
            w.write_f64::<LittleEndian>(e.altitude)?;
            w.write_f64::<LittleEndian>(e.speed_kmh)?;
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < SUMMARY_PREFIX_SIZE || &bytes[..SUMMARY_TAG.len()] != SUMMARY_TAG {
            return Err("missing GPS summary tag".to_string());
        }
        let mut r = Cursor::new(&bytes[SUMMARY_TAG.len()..]);
        Self::read_entries(&mut r).map_err(|e| format!("GPS summary: {e}"))
    }

    fn read_entries(r: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let version = r.read_u32::<LittleEndian>()?;
        if version > SUMMARY_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported version {version}"),
            ));
        }
        let count = r.read_u32::<LittleEndian>()? as usize;
        let remaining = r.get_ref().len() - r.position() as usize;
        if count * SUMMARY_ENTRY_SIZE > remaining {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{count} entries declared, {remaining} bytes left"),
            ));
        }
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(GpsSummaryEntry {
                ordinal: r.read_u32::<LittleEndian>()?,
                time_seconds: r.read_u32::<LittleEndian>()?,
                time_micro_seconds: r.read_u32::<LittleEndian>()?,
                fix_quality: r.read_u32::<LittleEndian>()?,
                latitude: r.read_f64::<LittleEndian>()?,
                longitude: r.read_f64::<LittleEndian>()?,
                altitude: r.read_f64::<LittleEndian>()?,
                speed_kmh: r.read_f64::<LittleEndian>()?,
            });
        }
        Ok(Self { entries })
    }

    /// Exports the track to `path` in the requested format. `width` and
    /// `height` size the HTML track view and are ignored otherwise.
    pub fn export(&self, path: &Path, kind: GpsFileType, width: u32, height: u32) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        match kind {
            GpsFileType::Text => self.write_text(&mut w)?,
            GpsFileType::Html => self.write_html(&mut w, width, height)?,
            GpsFileType::Kml => self.write_kml(&mut w)?,
        }
        w.flush()?;
        Ok(())
    }

    pub fn write_text(&self, w: &mut impl Write) -> std::io::Result<()> {
        writeln!(
            w,
            "frame\ttime_s\ttime_us\tfix\tlatitude\tlongitude\taltitude\tspeed_kmh"
        )?;
        for e in &self.entries {
            writeln!(
                w,
                "{}\t{}\t{}\t{}\t{:.7}\t{:.7}\t{:.2}\t{:.2}",
                e.ordinal,
                e.time_seconds,
                e.time_micro_seconds,
                e.fix_quality,
                e.latitude,
                e.longitude,
                e.altitude,
                e.speed_kmh
            )?;
        }
        Ok(())
    }

    pub fn write_html(&self, w: &mut impl Write, width: u32, height: u32) -> std::io::Result<()> {
        let width = width.max(1);
        let height = height.max(1);
        writeln!(w, "<!DOCTYPE html>")?;
        writeln!(w, "<html><head><meta charset=\"utf-8\"><title>GPS track</title></head><body>")?;
        writeln!(
            w,
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" style=\"border:1px solid #888\">"
        )?;
        if !self.entries.is_empty() {
            let points = self.project(width as f64, height as f64);
            let path: Vec<String> = points.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
            writeln!(
                w,
                "<polyline fill=\"none\" stroke=\"#c00\" stroke-width=\"2\" points=\"{}\"/>",
                path.join(" ")
            )?;
        }
        writeln!(w, "</svg>")?;
        writeln!(w, "<table border=\"1\">")?;
        writeln!(
            w,
            "<tr><th>Frame</th><th>Latitude</th><th>Longitude</th><th>Altitude</th><th>Speed (km/h)</th></tr>"
        )?;
        for e in &self.entries {
            writeln!(
                w,
                "<tr><td>{}</td><td>{:.7}</td><td>{:.7}</td><td>{:.2}</td><td>{:.2}</td></tr>",
                e.ordinal, e.latitude, e.longitude, e.altitude, e.speed_kmh
            )?;
        }
        writeln!(w, "</table></body></html>")
    }

    /// Maps positions into a `width` x `height` box, north up.
    fn project(&self, width: f64, height: f64) -> Vec<(f64, f64)> {
        let (mut min_lat, mut max_lat) = (f64::MAX, f64::MIN);
        let (mut min_lon, mut max_lon) = (f64::MAX, f64::MIN);
        for e in &self.entries {
            min_lat = min_lat.min(e.latitude);
            max_lat = max_lat.max(e.latitude);
            min_lon = min_lon.min(e.longitude);
            max_lon = max_lon.max(e.longitude);
        }
        let span_lat = (max_lat - min_lat).max(f64::EPSILON);
        let span_lon = (max_lon - min_lon).max(f64::EPSILON);
        self.entries
            .iter()
            .map(|e| {
                (
                    (e.longitude - min_lon) / span_lon * width,
                    height - (e.latitude - min_lat) / span_lat * height,
                )
            })
            .collect()
    }

    pub fn write_kml(&self, w: &mut impl Write) -> std::io::Result<()> {
        writeln!(w, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        writeln!(w, "<kml xmlns=\"http://www.opengis.net/kml/2.2\">")?;
        writeln!(w, "<Document><name>GPS track</name>")?;
        writeln!(w, "<Placemark><name>Track</name><LineString><altitudeMode>absolute</altitudeMode><coordinates>")?;
        for e in &self.entries {
            writeln!(w, "{:.7},{:.7},{:.2}", e.longitude, e.latitude, e.altitude)?;
        }
        writeln!(w, "</coordinates></LineString></Placemark>")?;
        for e in &self.entries {
            writeln!(
                w,
                "<Placemark><name>Frame {}</name><Point><coordinates>{:.7},{:.7},{:.2}</coordinates></Point></Placemark>",
                e.ordinal, e.longitude, e.latitude, e.altitude
            )?;
        }
        writeln!(w, "</Document></kml>")
    }
}
