//! Segment files as seen by the writer
//!
//! The sink owns every file handle of the recording. Records are appended
//! to the current segment until the next one would push it past the size
//! cap, then a new segment is opened with its own header and a copy of
//! the configuration blob. Headers are back-patched on checkpoint and
//! finish, once counts and index tables are known.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::format::{PREAMBLE_SIZE, StreamHeader};
use crate::stream::gps::{GpsSummary, GpsSummaryEntry};
use crate::stream::index::{IndexTable, IndexUpdate};
use crate::stream::segment::{MAX_SEGMENT_INDEX, SegmentName, disk};

/// A frame already encoded by the producer, waiting to hit the disk.
#[derive(Debug)]
pub(crate) struct PendingFrame {
    pub bytes: Vec<u8>,
    /// Position fix without its ordinal, which the sink assigns.
    pub gps_entry: Option<GpsSummaryEntry>,
}

#[derive(Debug)]
struct Segment {
    path: PathBuf,
    header: StreamHeader,
    size: u64,
}

/// Totals reported when the sink is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SinkReport {
    pub images: u64,
    pub bytes: u64,
    pub segments: usize,
    pub stride: u32,
}

pub(crate) struct SegmentSink {
    first: SegmentName,
    dir: PathBuf,
    template: StreamHeader,
    config_blob: Vec<u8>,
    max_segment_size: u64,
    min_free_space: u64,
    index_capacity: usize,
    stride: u32,
    segments: Vec<Segment>,
    current: File,
    images: u64,
    bytes: u64,
    summary: GpsSummary,
}

impl SegmentSink {
    /// Creates segment 000 of `first`'s generation.
    pub(crate) fn create(
        first: SegmentName,
        template: StreamHeader,
        config_blob: Vec<u8>,
        max_segment_size: u64,
        min_free_space: u64,
    ) -> Result<Self> {
        let dir = parent_dir(&first.path());
        let stride = template.index.stride();
        let index_capacity = template.index.capacity();
        let preamble = PREAMBLE_SIZE + config_blob.len() as u64;
        if preamble >= max_segment_size {
            return Err(StreamError::InvalidArgument(format!(
                "configuration data of {} bytes does not fit in a segment",
                config_blob.len()
            )));
        }
        disk::ensure_space(&dir, preamble, min_free_space)?;

        let (current, segment) = open_segment(&first, &template, &config_blob)?;
        debug!("Opened segment {}", segment.path.display());
        Ok(Self {
            first,
            dir,
            template,
            config_blob,
            max_segment_size,
            min_free_space,
            index_capacity,
            stride,
            segments: vec![segment],
            current,
            images: 0,
            bytes: preamble,
            summary: GpsSummary::default(),
        })
    }

    fn preamble_size(&self) -> u64 {
        PREAMBLE_SIZE + self.config_blob.len() as u64
    }

    /// Appends one encoded frame. Nothing is written when the frame does
    /// not fit or the disk is short on space.
    pub(crate) fn append(&mut self, frame: PendingFrame) -> Result<u32> {
        let record_size = frame.bytes.len() as u64;
        if self.preamble_size() + record_size > self.max_segment_size {
            return Err(StreamError::FrameTooLarge {
                record_size,
                max_segment_size: self.max_segment_size,
            });
        }
        let ordinal = u32::try_from(self.images).map_err(|_| {
            StreamError::InvalidArgument("stream holds the maximum number of frames".to_string())
        })?;

        let current_size = self.current_segment().size;
        let rollover = current_size + record_size > self.max_segment_size;
        let required = if rollover {
            self.preamble_size() + record_size
        } else {
            record_size
        };
        disk::ensure_space(&self.dir, required, self.min_free_space)?;
        if rollover {
            self.roll_over()?;
        }

        let stride = self.stride;
        let segment = self.current_segment_mut();
        let offset = segment.size;
        let local = segment.header.number_of_images;
        // Any summary left by a checkpoint is about to be overwritten.
        segment.header.gps_data_offset = 0;
        segment.header.gps_data_size = 0;
        if segment.header.index.stride() < stride {
            segment.header.index.resample(stride);
        }
        let update = segment.header.index.record(local, offset as u32);

        self.current.seek(SeekFrom::Start(offset))?;
        self.current.write_all(&frame.bytes)?;

        let segment = self.current_segment_mut();
        segment.size += record_size;
        segment.header.number_of_images += 1;
        if let IndexUpdate::StrideDoubled { new_stride, .. } = update {
            self.stride = self.stride.max(new_stride);
            info!(
                "Index table full at frame {}; stride is now {}",
                ordinal, self.stride
            );
        }
        self.images += 1;
        self.bytes += record_size;

        if let Some(mut entry) = frame.gps_entry {
            entry.ordinal = ordinal;
            self.summary.entries.push(entry);
        }
        Ok(ordinal)
    }

    fn current_segment(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    fn current_segment_mut(&mut self) -> &mut Segment {
        let last = self.segments.len() - 1;
        &mut self.segments[last]
    }

    fn roll_over(&mut self) -> Result<()> {
        let next_index = self.segments.len() as u32;
        if next_index > MAX_SEGMENT_INDEX {
            return Err(StreamError::InvalidStreamFileName(format!(
                "{} already has {} segments",
                self.first.path().display(),
                MAX_SEGMENT_INDEX + 1
            )));
        }
        self.patch_current()?;
        self.current.sync_data()?;

        let mut template = self.template.clone();
        template.index = IndexTable::new(self.stride, self.index_capacity);
        let name = self.first.with_index(next_index);
        let (file, segment) = open_segment(&name, &template, &self.config_blob)?;
        info!(
            "Segment {} full after {} frames; continuing in {}",
            self.current_segment().path.display(),
            self.current_segment().header.number_of_images,
            segment.path.display()
        );
        self.current = file;
        self.segments.push(segment);
        self.bytes += self.preamble_size();
        Ok(())
    }

    fn patch_current(&mut self) -> Result<()> {
        let encoded = self.current_segment().header.encode();
        self.current.seek(SeekFrom::Start(0))?;
        self.current.write_all(&encoded)?;
        Ok(())
    }

    /// Writes the GPS summary after the last record and rewrites every
    /// segment header with final counts and uniformly strided tables.
    pub(crate) fn checkpoint(&mut self) -> Result<()> {
        let stride = self.stride;
        let summary = (!self.summary.is_empty()).then(|| self.summary.encode());
        let end = self.current_segment().size;
        if let Some(block) = &summary {
            self.current.seek(SeekFrom::Start(end))?;
            self.current.write_all(block)?;
        }
        self.current.set_len(end + summary.as_ref().map_or(0, |b| b.len() as u64))?;

        let segment = self.current_segment_mut();
        segment.header.gps_data_offset = if summary.is_some() { end as u32 } else { 0 };
        segment.header.gps_data_size = summary.as_ref().map_or(0, |b| b.len() as u32);

        let last = self.segments.len() - 1;
        for (i, segment) in self.segments.iter_mut().enumerate() {
            segment.header.index.resample(stride);
            if i == last {
                continue;
            }
            let mut file = OpenOptions::new().write(true).open(&segment.path)?;
            segment.header.write_to(&mut file)?;
            file.sync_data()?;
        }
        self.patch_current()?;
        self.current.sync_all()?;
        debug!(
            "Checkpoint: {} frames in {} segment(s), stride {}",
            self.images,
            self.segments.len(),
            stride
        );
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<SinkReport> {
        self.checkpoint()?;
        Ok(self.report())
    }

    pub(crate) fn report(&self) -> SinkReport {
        SinkReport {
            images: self.images,
            bytes: self.bytes,
            segments: self.segments.len(),
            stride: self.stride,
        }
    }
}

fn open_segment(
    name: &SegmentName,
    template: &StreamHeader,
    config_blob: &[u8],
) -> Result<(File, Segment)> {
    let path = name.path();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)?;
    let mut header = template.clone();
    header.number_of_images = 0;
    header.gps_data_offset = 0;
    header.gps_data_size = 0;
    header.configuration_data_size = config_blob.len() as u32;
    header.stream_data_offset = (PREAMBLE_SIZE + config_blob.len() as u64) as u32;

    header.write_to(&mut file)?;
    file.write_all(config_blob)?;
    let size = PREAMBLE_SIZE + config_blob.len() as u64;
    Ok((file, Segment { path, header, size }))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::format::{DataFormat, INDEX_CAPACITY, Resolution, StippledFormat};
    use crate::stream::record::{ImageGeometry, ImageRecord, RecordCodec};

    fn sink_in(dir: &Path, max_segment_size: u64, stride: u32, capacity: usize) -> SegmentSink {
        let mut template = StreamHeader::new(
            DataFormat::ColorSepJpeg8,
            Resolution::R2448x2048,
            StippledFormat::Bggr,
        );
        template.index = IndexTable::new(stride, capacity);
        SegmentSink::create(
            SegmentName::new(dir.join("run"), 0, 0),
            template,
            vec![0xAB; 100],
            max_segment_size,
            0,
        )
        .unwrap()
    }

    fn frame(payload: usize) -> PendingFrame {
        let record = ImageRecord::new(
            ImageGeometry::new(8, 8),
            DataFormat::ColorSepJpeg8,
            Resolution::R2448x2048,
            vec![1; payload],
        );
        PendingFrame {
            bytes: RecordCodec::new(512).encode(&record).unwrap(),
            gps_entry: None,
        }
    }

    #[test]
    fn test_frames_roll_into_new_segment() {
        let dir = tempfile::tempdir().unwrap();
        // Preamble plus two 2048-byte records per segment.
        let cap = PREAMBLE_SIZE + 100 + 2 * 2048;
        let mut sink = sink_in(dir.path(), cap, 1, INDEX_CAPACITY);
        for _ in 0..5 {
            sink.append(frame(400)).unwrap();
        }
        let report = sink.finish().unwrap();
        assert_eq!(report.images, 5);
        assert_eq!(report.segments, 3);
        for index in 0..3 {
            let path = SegmentName::new(dir.path().join("run"), 0, index).path();
            assert!(std::fs::metadata(&path).unwrap().len() <= cap);
        }
    }

    #[test]
    fn test_oversized_frame_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink_in(dir.path(), PREAMBLE_SIZE + 100 + 2048, 1, INDEX_CAPACITY);
        let err = sink.append(frame(5000)).unwrap_err();
        assert!(matches!(err, StreamError::FrameTooLarge { .. }));
        assert_eq!(sink.report().images, 0);
    }

    #[test]
    fn test_full_table_doubles_stride() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink_in(dir.path(), u32::MAX as u64, 1, 4);
        for _ in 0..9 {
            sink.append(frame(10)).unwrap();
        }
        assert_eq!(sink.report().stride, 4);
        let table = &sink.current_segment().header.index;
        assert_eq!(table.entries().map(|(o, _)| o).collect::<Vec<_>>(), vec![0, 4, 8]);
    }

    #[cfg(unix)]
    #[test]
    fn test_low_disk_space_refuses_frame_and_keeps_sink_usable() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = sink_in(dir.path(), u32::MAX as u64, 1, INDEX_CAPACITY);
        sink.append(frame(10)).unwrap();
        let size = sink.current_segment().size;

        sink.min_free_space = u64::MAX / 2;
        let err = sink.append(frame(10)).unwrap_err();
        assert!(matches!(err, StreamError::DiskNotEnoughSpace { .. }));
        assert_eq!(sink.current_segment().size, size);
        assert_eq!(sink.report().images, 1);

        sink.min_free_space = 0;
        assert_eq!(sink.append(frame(10)).unwrap(), 1);
    }
}
