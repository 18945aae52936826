//! Reader session
//!
//! Opening any member of a generation loads every segment header and
//! splices their index tables by ordinal range. Frames are read from a
//! cursor; seeking jumps to the nearest indexed frame and walks forward
//! over record metadata. Adjustment replacements stay in memory until
//! saved, and `close` refuses to drop them silently.

mod catalog;
mod prefetch;

pub use catalog::FrameLocation;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::stream::adjustment::{FullAdjustment, OverlayStore, sidecar_path};
use crate::stream::common::error::{Result, StreamError};
use crate::stream::config::ReaderConfig;
use crate::stream::format::{GpsFileType, StreamHeader};
use crate::stream::gps::{GpsSummary, GpsSummaryEntry, NmeaGpsData, NmeaSentence, NmeaSentenceId};
use crate::stream::record::ImageRecord;
use crate::stream::segment::SegmentName;

use catalog::{Position, SegmentCatalog, SegmentFiles};
use prefetch::Prefetcher;

/// A frame returned by the reader.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub ordinal: u32,
    pub image: ImageRecord,
    /// The sequence id went down since the previous frame read, which
    /// happens when the camera head was power-cycled mid-recording.
    pub discontinuity: bool,
}

pub struct StreamReader {
    first: SegmentName,
    files: SegmentFiles,
    cursor: Position,
    prefetch: Option<Prefetcher>,
    overlay: OverlayStore,
    last_sequence_id: Option<u32>,
    closed: bool,
}

impl StreamReader {
    /// Opens the stream any segment of `path` belongs to.
    #[instrument(skip(path, config), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let first = SegmentName::resolve_for_read(path)?;
        let paths = first.discover();
        let catalog = Arc::new(SegmentCatalog::open(
            &paths,
            config.max_payload_size,
            config.recover_truncated,
        )?);

        let header = &catalog.first().header;
        let overlay = open_overlay(
            &first,
            header,
            catalog.frame_count(),
            config.default_adjustment.clone(),
        )?;
        let prefetch = if config.asynchronous && catalog.frame_count() > 0 {
            Some(Prefetcher::spawn(Arc::clone(&catalog), config.prefetch_depth)?)
        } else {
            None
        };

        info!(
            "Opened {} ({} frames in {} segment(s), {}, {})",
            first.path().display(),
            catalog.frame_count(),
            catalog.segments().len(),
            header.data_format,
            header.resolution
        );
        let cursor = catalog.start();
        let reader = Self {
            first,
            files: SegmentFiles::new(catalog),
            cursor,
            prefetch,
            overlay,
            last_sequence_id: None,
            closed: false,
        };
        if let Some(prefetch) = &reader.prefetch {
            prefetch.retarget(cursor);
        }
        Ok(reader)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StreamError::SessionClosed);
        }
        Ok(())
    }

    fn catalog(&self) -> &SegmentCatalog {
        self.files.catalog()
    }

    /// Header of the first segment.
    pub fn header(&self) -> &StreamHeader {
        &self.catalog().first().header
    }

    /// Per-segment headers, each with its own image count and index table.
    pub fn segment_headers(&self) -> Vec<&StreamHeader> {
        self.catalog().segments().iter().map(|s| &s.header).collect()
    }

    pub fn segment_paths(&self) -> Vec<PathBuf> {
        self.catalog().segments().iter().map(|s| s.path.clone()).collect()
    }

    pub fn first_file_name(&self) -> PathBuf {
        self.first.path()
    }

    pub fn frame_count(&self) -> u32 {
        self.catalog().frame_count()
    }

    /// Ordinal the next `read_next` returns.
    pub fn position(&self) -> u32 {
        self.cursor.ordinal
    }

    /// Index entry a seek to `ordinal` starts from.
    pub fn locate(&self, ordinal: u32) -> Result<FrameLocation> {
        self.ensure_open()?;
        self.catalog().locate(ordinal)
    }

    /// Moves the cursor to `ordinal`.
    pub fn go_to_image(&mut self, ordinal: u32) -> Result<()> {
        self.ensure_open()?;
        self.cursor = self.files.seek(ordinal)?;
        self.last_sequence_id = None;
        if let Some(prefetch) = &self.prefetch {
            prefetch.retarget(self.cursor);
        }
        Ok(())
    }

    /// Reads the frame at the cursor and advances it.
    pub fn read_next(&mut self) -> Result<Frame> {
        self.ensure_open()?;
        let ordinal = self.cursor.ordinal;
        if ordinal >= self.frame_count() {
            return Err(StreamError::ImageOutOfRange {
                ordinal,
                count: self.frame_count(),
            });
        }

        let prefetched = self.prefetch.as_ref().and_then(|p| p.take(ordinal));
        let (image, next) = match prefetched {
            Some(hit) => hit,
            None => {
                if self.prefetch.is_some() {
                    debug!("Prefetch miss at frame {}", ordinal);
                }
                self.files.read_at(self.cursor)?
            }
        };
        self.cursor = next;
        if let Some(prefetch) = &self.prefetch {
            prefetch.retarget(next);
        }

        let sequence_id = image.info.sequence_id;
        let discontinuity = self
            .last_sequence_id
            .is_some_and(|previous| sequence_id < previous);
        if discontinuity {
            warn!(
                "Sequence id went from {:?} to {} at frame {}",
                self.last_sequence_id, sequence_id, ordinal
            );
        }
        self.last_sequence_id = Some(sequence_id);
        if image.is_empty_payload() {
            warn!("Frame {} has no payload", ordinal);
        }
        Ok(Frame {
            ordinal,
            image,
            discontinuity,
        })
    }

    /// `read_next` plus the frame's effective adjustment.
    pub fn read_next_with_adjustment(&mut self) -> Result<(Frame, FullAdjustment)> {
        let frame = self.read_next()?;
        let adjustment = self.overlay.get(frame.ordinal).clone();
        Ok((frame, adjustment))
    }

    /// Reads `ordinal` without moving the cursor.
    pub fn read_frame(&mut self, ordinal: u32) -> Result<ImageRecord> {
        self.ensure_open()?;
        let pos = self.files.seek(ordinal)?;
        Ok(self.files.read_at(pos)?.0)
    }

    /// Camera configuration blob stored with the stream.
    pub fn configuration_data(&mut self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        self.files.configuration_data()
    }

    /// Writes the configuration blob to `path`.
    pub fn write_config_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let blob = self.configuration_data()?;
        fs::write(path.as_ref(), blob)?;
        Ok(())
    }

    pub fn gps_for_frame(&mut self, ordinal: u32, id: NmeaSentenceId) -> Result<NmeaSentence> {
        Ok(self.read_frame(ordinal)?.gps_sentence(id))
    }

    pub fn all_gps_for_frame(&mut self, ordinal: u32) -> Result<NmeaGpsData> {
        Ok(self.read_frame(ordinal)?.all_gps_data())
    }

    /// The GPS summary written at close, or one rebuilt from frame
    /// metadata when the stream has none.
    pub fn gps_summary(&mut self) -> Result<GpsSummary> {
        self.ensure_open()?;
        if let Some(block) = self.files.summary_block()? {
            match GpsSummary::decode(&block) {
                Ok(summary) => return Ok(summary),
                Err(reason) => warn!("Ignoring GPS summary: {}", reason),
            }
        }
        debug!("Scanning {} frames for GPS fixes", self.frame_count());
        let mut summary = GpsSummary::default();
        if self.frame_count() == 0 {
            return Ok(summary);
        }
        let mut pos = self.files.seek(0)?;
        while pos.ordinal < self.frame_count() {
            let (meta, next) = self.files.peek(pos)?;
            let record = &meta.record;
            if let Some(entry) = GpsSummaryEntry::from_record(pos.ordinal, record, &record.all_gps_data()) {
                summary.entries.push(entry);
            }
            pos = next;
        }
        Ok(summary)
    }

    /// Exports the GPS track. `width` and `height` size the HTML view.
    pub fn write_gps_summary(
        &mut self,
        path: impl AsRef<Path>,
        kind: GpsFileType,
        width: u32,
        height: u32,
    ) -> Result<usize> {
        let summary = self.gps_summary()?;
        summary.export(path.as_ref(), kind, width, height)?;
        Ok(summary.len())
    }

    fn check_ordinal(&self, ordinal: u32) -> Result<()> {
        self.ensure_open()?;
        if ordinal >= self.frame_count() {
            return Err(StreamError::ImageOutOfRange {
                ordinal,
                count: self.frame_count(),
            });
        }
        Ok(())
    }

    /// Effective adjustment of `ordinal`, including unsaved replacements.
    pub fn adjustment_for(&self, ordinal: u32) -> Result<FullAdjustment> {
        self.check_ordinal(ordinal)?;
        Ok(self.overlay.get(ordinal).clone())
    }

    /// Replaces the adjustment of `ordinal` in memory.
    pub fn replace_adjustment(&mut self, ordinal: u32, adjustment: FullAdjustment) -> Result<()> {
        self.check_ordinal(ordinal)?;
        adjustment.validate().map_err(StreamError::InvalidArgument)?;
        self.overlay.replace(ordinal, adjustment);
        Ok(())
    }

    /// Writes pending replacements to the sidecar. Returns how many were
    /// saved.
    pub fn save_outstanding_adjustments(&mut self) -> Result<usize> {
        self.ensure_open()?;
        self.overlay.set_frame_count(self.frame_count());
        self.overlay.flush()
    }

    /// Drops pending replacements. Returns how many were dropped.
    pub fn discard_adjustments(&mut self) -> usize {
        let dropped = self.overlay.discard();
        if dropped > 0 {
            info!("Discarded {} unsaved adjustment replacement(s)", dropped);
        }
        dropped
    }

    pub fn has_unsaved_adjustments(&self) -> bool {
        self.overlay.is_dirty()
    }

    /// Closes the session. Fails with [`StreamError::UnflushedAdjustments`]
    /// and stays open while replacements are unsaved; save or discard them
    /// first. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.overlay.is_dirty() {
            return Err(StreamError::UnflushedAdjustments {
                count: self.overlay.dirty_count(),
            });
        }
        if let Some(mut prefetch) = self.prefetch.take() {
            prefetch.stop();
        }
        self.closed = true;
        debug!("Closed reader on {}", self.first.path().display());
        Ok(())
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        if !self.closed && self.overlay.is_dirty() {
            warn!(
                "Dropping reader on {} loses {} unsaved adjustment replacement(s)",
                self.first.path().display(),
                self.overlay.dirty_count()
            );
        }
    }
}

/// Loads the generation's sidecar, creating it with stream-wide defaults
/// when the frames need post-processing and none exists yet.
fn open_overlay(
    first: &SegmentName,
    header: &StreamHeader,
    frame_count: u32,
    defaults: Option<FullAdjustment>,
) -> Result<OverlayStore> {
    let path = sidecar_path(first);
    if let Some(store) = OverlayStore::load(&path)? {
        return Ok(store);
    }
    let defaults = defaults.unwrap_or_else(|| FullAdjustment::default_for(header.data_format));
    let mut store = OverlayStore::new(&path, defaults);
    store.set_frame_count(frame_count);
    if header.data_format.requires_post_processing() {
        if let Err(e) = store.flush() {
            warn!("Could not create adjustment sidecar {}: {}", path.display(), e);
        }
    }
    Ok(store)
}
