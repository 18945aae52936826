//! GPS channel
//!
//! Raw NMEA text rides inside each frame's metadata block, together with
//! a running count of every sentence kind seen since the stream started.
//! Decoding happens on demand from the frame in hand; a frame whose
//! embedded capture time is zero reports every sentence as invalid.

pub mod nmea;
pub mod summary;

pub use nmea::{
    GgaData, GllData, GsaData, GsvData, HdtData, NmeaGpsData, NmeaSentence, NmeaSentenceId,
    PrdidData, RmcData, SatelliteInfo, UtcTime, VtgData, ZdaData,
};
pub use summary::{GpsSummary, GpsSummaryEntry};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::record::{GPS_SENTENCE_KINDS, ImageRecord, MAX_NMEA_SIZE};

impl ImageRecord {
    /// Every decoded sentence kind carried by this frame.
    pub fn all_gps_data(&self) -> NmeaGpsData {
        let mut data = NmeaGpsData::parse(&self.nmea_text());
        data.apply_counters(&self.gps_counters);
        if !self.has_valid_embedded_data() {
            data.invalidate();
        }
        data
    }

    /// One decoded sentence kind. Check its valid flag before use.
    pub fn gps_sentence(&self, id: NmeaSentenceId) -> NmeaSentence {
        self.all_gps_data().sentence(id)
    }
}

/// Running per-kind sentence counters of one writer session.
#[derive(Debug, Clone, Default)]
pub struct GpsCounters {
    totals: [u32; GPS_SENTENCE_KINDS],
}

impl GpsCounters {
    pub fn totals(&self) -> [u32; GPS_SENTENCE_KINDS] {
        self.totals
    }

    /// Attaches `nmea` to `record` and stamps it with the counters
    /// including the sentences just attached.
    pub fn attach(&mut self, record: &mut ImageRecord, nmea: &str) -> Result<()> {
        if nmea.len() > MAX_NMEA_SIZE {
            return Err(StreamError::InvalidArgument(format!(
                "NMEA text of {} bytes exceeds {MAX_NMEA_SIZE}",
                nmea.len()
            )));
        }
        let counts = nmea::count_sentences(nmea);
        for (total, count) in self.totals.iter_mut().zip(counts) {
            *total = total.saturating_add(count);
        }
        record.nmea = nmea.as_bytes().to_vec();
        record.gps_counters = self.totals;
        Ok(())
    }
}
