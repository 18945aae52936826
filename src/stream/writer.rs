//! Writer session
//!
//! `StreamWriter` is open from construction until `close`. Frames are
//! validated against the stream header and encoded on the caller's
//! thread; the bytes are then written inline or handed to a background
//! worker, depending on [`WriterConfig::asynchronous`].

mod sink;
mod worker;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::imaging::{ImagingEngine, RawFrame};
use crate::stream::adjustment::{FullAdjustment, OverlayStore, sidecar_path};
use crate::stream::common::error::{Result, StreamError};
use crate::stream::config::WriterConfig;
use crate::stream::format::{STREAM_VERSION, StreamHeader};
use crate::stream::gps::{GpsCounters, GpsSummaryEntry};
use crate::stream::index::IndexTable;
use crate::stream::record::{ImageRecord, RecordCodec};
use crate::stream::segment::{SegmentName, WriterClaim, disk};

use sink::{PendingFrame, SegmentSink};
use worker::AsyncWorker;

const MEGABYTE: f64 = 1024.0 * 1024.0;

/// Device-side source of the stream header and configuration blob, used
/// when recording straight from a live camera context.
pub trait CameraConfigSource {
    /// Header template describing the frames that will be recorded.
    fn stream_header(&self) -> Result<StreamHeader>;
    /// Opaque camera configuration (calibration) stored in every segment.
    fn configuration_data(&self) -> Result<Vec<u8>>;
}

/// Running totals after an append.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteProgress {
    pub megabytes_written: f64,
    pub images_written: u64,
}

enum Backend {
    Inline(SegmentSink),
    Background(AsyncWorker),
}

pub struct StreamWriter {
    first: SegmentName,
    header: StreamHeader,
    codec: RecordCodec,
    backend: Option<Backend>,
    overlay: OverlayStore,
    gps: GpsCounters,
    images_written: u64,
    bytes_written: u64,
    /// Held until close so another writer cannot record to the same base.
    claim: Option<WriterClaim>,
}

impl StreamWriter {
    /// Starts a recording whose header and configuration come from a live
    /// camera context.
    pub fn create(
        base: impl AsRef<Path>,
        source: &dyn CameraConfigSource,
        config: WriterConfig,
    ) -> Result<Self> {
        let header = source.stream_header()?;
        let config_blob = source.configuration_data()?;
        Self::open(base.as_ref(), header, config_blob, config)
    }

    /// Starts a recording from an explicit header and an optional
    /// configuration file.
    pub fn create_with_header(
        base: impl AsRef<Path>,
        header: StreamHeader,
        config_path: Option<&Path>,
        config: WriterConfig,
    ) -> Result<Self> {
        let config_blob = match config_path {
            Some(path) => fs::read(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
                _ => StreamError::Io(e),
            })?,
            None => Vec::new(),
        };
        Self::open(base.as_ref(), header, config_blob, config)
    }

    #[instrument(skip(base, header, config_blob, config), fields(base = %base.display()))]
    fn open(
        base: &Path,
        mut header: StreamHeader,
        config_blob: Vec<u8>,
        config: WriterConfig,
    ) -> Result<Self> {
        config.validate()?;
        let first = SegmentName::next_generation(base)?;
        let claim = WriterClaim::acquire(&first.base)?;

        let dir = match first.base.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let sector_size = config
            .sector_size
            .or_else(|| disk::sector_size(&dir))
            .unwrap_or(disk::FALLBACK_SECTOR_SIZE);

        header.version = STREAM_VERSION;
        header.padding_size = sector_size;
        header.index = IndexTable::new(config.index_stride, config.index_capacity);

        let defaults = config
            .default_adjustment
            .clone()
            .unwrap_or_else(|| FullAdjustment::default_for(header.data_format));
        let overlay = OverlayStore::new(sidecar_path(&first), defaults);

        let sink = SegmentSink::create(
            first.clone(),
            header.clone(),
            config_blob,
            config.max_segment_size,
            config.min_free_space,
        )?;
        let backend = if config.asynchronous {
            Backend::Background(AsyncWorker::spawn(sink, config.queue_depth)?)
        } else {
            Backend::Inline(sink)
        };

        info!(
            "Recording to {} (generation {:03}, {}, {} byte sectors, {} mode)",
            first.path().display(),
            first.generation,
            header.data_format,
            sector_size,
            if config.asynchronous { "async" } else { "sync" }
        );
        Ok(Self {
            codec: RecordCodec::new(sector_size),
            first,
            header,
            backend: Some(backend),
            overlay,
            gps: GpsCounters::default(),
            images_written: 0,
            bytes_written: 0,
            claim: Some(claim),
        })
    }

    pub fn header(&self) -> &StreamHeader {
        &self.header
    }

    pub fn first_file_name(&self) -> PathBuf {
        self.first.path()
    }

    pub fn generation(&self) -> u32 {
        self.first.generation
    }

    /// Segment files written so far.
    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.first.discover()
    }

    pub fn images_written(&self) -> u64 {
        self.images_written
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_none()
    }

    fn backend(&self) -> Result<&Backend> {
        self.backend.as_ref().ok_or(StreamError::SessionClosed)
    }

    /// Attaches NMEA text to a frame that is about to be appended and
    /// stamps the running sentence counters.
    pub fn write_gps_data_to_image(&mut self, record: &mut ImageRecord, nmea: &str) -> Result<()> {
        self.backend()?;
        self.gps.attach(record, nmea)
    }

    /// Appends a frame, optionally with its own adjustment record.
    ///
    /// In asynchronous mode the frame is queued and a failure of an
    /// earlier queued frame is returned instead. After such a failure the
    /// worker writes nothing more and every later append fails.
    pub fn append_frame(
        &mut self,
        record: &ImageRecord,
        adjustment: Option<&FullAdjustment>,
    ) -> Result<WriteProgress> {
        self.backend()?;
        self.validate_frame(record)?;
        if let Some(adjustment) = adjustment {
            adjustment.validate().map_err(StreamError::InvalidArgument)?;
        }

        let ordinal = u32::try_from(self.images_written).map_err(|_| {
            StreamError::InvalidArgument("stream holds the maximum number of frames".to_string())
        })?;
        let bytes = self.codec.encode(record)?;
        let size = bytes.len() as u64;
        let frame = PendingFrame {
            bytes,
            gps_entry: GpsSummaryEntry::from_record(0, record, &record.all_gps_data()),
        };
        match self.backend.as_mut() {
            Some(Backend::Inline(sink)) => {
                sink.append(frame)?;
            }
            Some(Backend::Background(worker)) => worker.submit(frame)?,
            None => return Err(StreamError::SessionClosed),
        }
        // Recorded on this thread so a replacement made while the frame is
        // still queued is not overwritten.
        if let Some(adjustment) = adjustment {
            self.overlay.replace(ordinal, adjustment.clone());
        }

        self.images_written += 1;
        self.bytes_written += size;
        Ok(self.progress())
    }

    /// Encodes a capture with `engine` into the stream's format and appends
    /// it. Everything but the payload comes from `template`; NMEA text the
    /// capture carried is attached and counted.
    pub fn append_raw_frame(
        &mut self,
        engine: &dyn ImagingEngine,
        frame: &RawFrame,
        template: &ImageRecord,
        adjustment: Option<&FullAdjustment>,
    ) -> Result<WriteProgress> {
        self.backend()?;
        let encoded = engine.encode_frame(frame, self.header.data_format)?;
        if encoded.declared_size as usize != encoded.payload.len() {
            return Err(StreamError::InvalidArgument(format!(
                "engine declared {} bytes for a payload of {}",
                encoded.declared_size,
                encoded.payload.len()
            )));
        }
        let mut record = template.clone();
        record.data_format = encoded.data_format;
        record.payload = encoded.payload;
        if let Some(nmea) = engine.extract_embedded_gps(frame) {
            self.gps.attach(&mut record, &nmea)?;
        }
        debug!("Encoded frame {} into {} bytes", self.images_written, record.data_size());
        self.append_frame(&record, adjustment)
    }

    fn progress(&self) -> WriteProgress {
        WriteProgress {
            megabytes_written: self.bytes_written as f64 / MEGABYTE,
            images_written: self.images_written,
        }
    }

    fn validate_frame(&self, record: &ImageRecord) -> Result<()> {
        if record.data_format != self.header.data_format {
            return Err(StreamError::FormatMismatch {
                field: "data format",
                expected: self.header.data_format.to_string(),
                found: record.data_format.to_string(),
            });
        }
        if record.resolution != self.header.resolution {
            return Err(StreamError::FormatMismatch {
                field: "resolution",
                expected: self.header.resolution.to_string(),
                found: record.resolution.to_string(),
            });
        }
        if !record.geometry.is_consistent() {
            return Err(StreamError::InvalidArgument(format!(
                "frame geometry {:?} is inconsistent",
                record.geometry
            )));
        }
        if record.is_empty_payload() {
            return Ok(());
        }
        if let Some(expected) = record.geometry.raw_payload_size(record.data_format) {
            if record.payload.len() as u64 != expected {
                return Err(StreamError::FormatMismatch {
                    field: "payload size",
                    expected: expected.to_string(),
                    found: record.payload.len().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Replaces the adjustment of an already appended frame in memory.
    pub fn replace_adjustment(&mut self, ordinal: u32, adjustment: FullAdjustment) -> Result<()> {
        self.backend()?;
        if ordinal as u64 >= self.images_written {
            return Err(StreamError::ImageOutOfRange {
                ordinal,
                count: self.images_written as u32,
            });
        }
        adjustment.validate().map_err(StreamError::InvalidArgument)?;
        self.overlay.replace(ordinal, adjustment);
        Ok(())
    }

    /// Makes everything appended so far readable: waits for queued frames,
    /// writes the GPS summary, back-patches the headers and saves the
    /// adjustment sidecar.
    pub fn flush(&mut self) -> Result<()> {
        match self.backend.as_mut() {
            Some(Backend::Inline(sink)) => sink.checkpoint()?,
            Some(Backend::Background(worker)) => worker.checkpoint()?,
            None => return Err(StreamError::SessionClosed),
        }
        self.save_overlay()
    }

    fn save_overlay(&mut self) -> Result<()> {
        self.overlay.set_frame_count(self.images_written as u32);
        if self.header.data_format.requires_post_processing() || self.overlay.has_explicit_entries() {
            self.overlay.flush()?;
        }
        Ok(())
    }

    /// Drains the queue, finalizes every segment and saves the adjustment
    /// sidecar. Closing twice is a no-op.
    #[instrument(skip(self), fields(stream = %self.first.path().display()))]
    pub fn close(&mut self) -> Result<()> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };
        let (sink, pending_failure) = match backend {
            Backend::Inline(sink) => (sink, None),
            Backend::Background(worker) => worker.join()?,
        };
        let finished = sink.finish();
        self.claim = None;
        let report = finished?;
        if report.images < self.images_written {
            warn!(
                "{} queued frame(s) were not written after a failure",
                self.images_written - report.images
            );
        }
        self.images_written = report.images;
        self.overlay.truncate(report.images as u32);
        self.save_overlay()?;

        info!(
            "Closed stream: {} frames, {:.1} MB in {} segment(s), index stride {}",
            report.images,
            report.bytes as f64 / MEGABYTE,
            report.segments,
            report.stride
        );
        match pending_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if self.backend.is_some() {
            if let Err(e) = self.close() {
                warn!("Closing {} on drop failed: {}", self.first.path().display(), e);
            }
        }
    }
}
