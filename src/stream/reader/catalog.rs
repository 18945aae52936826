//! Segment set of an open stream and record addressing
//!
//! Global ordinals are spliced from per-segment counts: segment `i`
//! holds ordinals `[first_ordinal, first_ordinal + number_of_images)`.
//! Each segment's own index table keys on segment-local ordinals.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::stream::common::error::{Result, StreamError};
use crate::stream::format::{INDEX_CAPACITY, PREAMBLE_SIZE, StreamHeader};
use crate::stream::index::IndexTable;
use crate::stream::record::{ImageRecord, METADATA_SIZE, RecordMetadata, padded_record_size, read_metadata};

/// Where a frame lives and how it is reached from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLocation {
    /// Segment number within the generation.
    pub segment: usize,
    /// Global ordinal of the key frame the walk starts from.
    pub key_ordinal: u32,
    /// Byte offset of that key frame within the segment file.
    pub offset: u64,
    /// Records skipped between the key frame and the target.
    pub steps: u32,
}

/// Exact byte position of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub ordinal: u32,
    pub segment: usize,
    pub offset: u64,
}

#[derive(Debug)]
pub(crate) struct SegmentEntry {
    pub path: PathBuf,
    pub header: StreamHeader,
    pub first_ordinal: u32,
    /// End of the record area: the GPS summary or the end of the file.
    pub data_end: u64,
}

#[derive(Debug)]
pub(crate) struct SegmentCatalog {
    segments: Vec<SegmentEntry>,
    frame_count: u32,
    max_payload: u32,
}

impl SegmentCatalog {
    pub(crate) fn open(paths: &[PathBuf], max_payload: u32, recover: bool) -> Result<Self> {
        let mut segments: Vec<SegmentEntry> = Vec::with_capacity(paths.len());
        let mut next_ordinal: u64 = 0;
        for path in paths {
            let mut entry = load_segment(path)?;
            if let Some(first) = segments.first() {
                check_compatible(&first.header, &entry.header, path)?;
            }
            if let Some(reason) = entry.check()? {
                if !recover {
                    return Err(StreamError::corrupted(path, reason));
                }
                warn!("{}: {}; rebuilding from records", path.display(), reason);
                entry.rebuild(max_payload)?;
            } else if recover {
                let declared = entry.header.number_of_images;
                entry.rebuild(max_payload)?;
                if entry.header.number_of_images != declared {
                    warn!(
                        "{}: header declares {} frames, found {}",
                        path.display(),
                        declared,
                        entry.header.number_of_images
                    );
                }
            }
            entry.first_ordinal = u32::try_from(next_ordinal)
                .map_err(|_| StreamError::corrupted(path, "frame count overflows 32 bits"))?;
            next_ordinal += entry.header.number_of_images as u64;
            segments.push(entry);
        }
        if segments.is_empty() {
            return Err(StreamError::InvalidArgument("no segment files given".to_string()));
        }
        let frame_count = u32::try_from(next_ordinal)
            .map_err(|_| StreamError::corrupted(&paths[0], "frame count overflows 32 bits"))?;
        debug!("Catalogued {} segment(s), {} frames", segments.len(), frame_count);
        Ok(Self {
            segments,
            frame_count,
            max_payload,
        })
    }

    pub(crate) fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub(crate) fn segments(&self) -> &[SegmentEntry] {
        &self.segments
    }

    pub(crate) fn first(&self) -> &SegmentEntry {
        &self.segments[0]
    }

    pub(crate) fn last(&self) -> &SegmentEntry {
        &self.segments[self.segments.len() - 1]
    }

    fn segment_of(&self, ordinal: u32) -> usize {
        self.segments
            .partition_point(|s| s.first_ordinal <= ordinal)
            .saturating_sub(1)
    }

    /// Nearest indexed frame at or before `ordinal`.
    pub(crate) fn locate(&self, ordinal: u32) -> Result<FrameLocation> {
        if ordinal >= self.frame_count {
            return Err(StreamError::ImageOutOfRange {
                ordinal,
                count: self.frame_count,
            });
        }
        let segment = self.segment_of(ordinal);
        let entry = &self.segments[segment];
        let local = ordinal - entry.first_ordinal;
        let (key_local, offset) = entry
            .header
            .index
            .nearest(local)
            .map(|(key, offset)| (key, offset as u64))
            .unwrap_or((0, entry.header.stream_data_offset as u64));
        Ok(FrameLocation {
            segment,
            key_ordinal: entry.first_ordinal + key_local,
            offset,
            steps: local - key_local,
        })
    }

    /// Position of the first frame, or the end position of an empty stream.
    pub(crate) fn start(&self) -> Position {
        let segment = self
            .segments
            .iter()
            .position(|s| s.header.number_of_images > 0)
            .unwrap_or(0);
        Position {
            ordinal: 0,
            segment,
            offset: self.segments[segment].header.stream_data_offset as u64,
        }
    }
}

fn load_segment(path: &Path) -> Result<SegmentEntry> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => StreamError::NotFound(path.to_path_buf()),
        _ => StreamError::Io(e),
    })?;
    let file_len = file.metadata()?.len();
    let mut preamble = Vec::with_capacity(PREAMBLE_SIZE as usize);
    (&mut file).take(PREAMBLE_SIZE).read_to_end(&mut preamble)?;
    let header = StreamHeader::decode(&preamble, path)?;

    let data_start = header.stream_data_offset as u64;
    if data_start < PREAMBLE_SIZE + header.configuration_data_size as u64 || data_start > file_len {
        return Err(StreamError::corrupted(
            path,
            format!("stream data offset {data_start} is outside the file ({file_len} bytes)"),
        ));
    }
    let summary_end = header.gps_data_offset as u64 + header.gps_data_size as u64;
    let data_end = if header.gps_data_size > 0
        && header.gps_data_offset as u64 >= data_start
        && summary_end <= file_len
    {
        header.gps_data_offset as u64
    } else {
        file_len
    };
    Ok(SegmentEntry {
        path: path.to_path_buf(),
        header,
        first_ordinal: 0,
        data_end,
    })
}

fn check_compatible(first: &StreamHeader, other: &StreamHeader, path: &Path) -> Result<()> {
    if first.data_format != other.data_format || first.resolution != other.resolution {
        return Err(StreamError::corrupted(
            path,
            format!(
                "segment holds {} {} frames, stream holds {} {}",
                other.data_format, other.resolution, first.data_format, first.resolution
            ),
        ));
    }
    Ok(())
}

impl SegmentEntry {
    /// Reason the segment cannot be trusted as declared, if any.
    fn check(&self) -> Result<Option<String>> {
        if let Err(reason) = self.check_layout() {
            return Ok(Some(reason));
        }
        self.check_trailing_records()
    }

    /// Structural checks that need no record reads.
    fn check_layout(&self) -> std::result::Result<(), String> {
        let start = self.header.stream_data_offset as u64;
        self.header.index.validate(start, self.data_end.max(start + 1))?;
        if self.header.number_of_images > 0 && self.data_end < start + METADATA_SIZE as u64 {
            return Err(format!(
                "{} frames declared but the record area is empty",
                self.header.number_of_images
            ));
        }
        if self.header.index.len() as u64
            > (self.header.number_of_images as u64).div_ceil(self.header.index.stride().max(1) as u64)
        {
            return Err("index table has more entries than frames".to_string());
        }
        Ok(())
    }

    /// Looks for a record after the last declared one, which is what a
    /// writer that stopped before patching its header leaves behind. Walks
    /// from the last key frame, so at most one stride of records is read.
    /// Damage inside the declared records is left to the frame reads.
    fn check_trailing_records(&self) -> Result<Option<String>> {
        let declared = self.header.number_of_images;
        let start = self.header.stream_data_offset as u64;
        let (mut ordinal, mut offset) = match declared.checked_sub(1) {
            Some(last) => self
                .header
                .index
                .nearest(last)
                .map(|(key, offset)| (key, offset as u64))
                .unwrap_or((0, start)),
            None => (0, start),
        };

        let mut file = File::open(&self.path)?;
        let mut block = vec![0u8; METADATA_SIZE];
        loop {
            if offset + METADATA_SIZE as u64 > self.data_end {
                return Ok(None);
            }
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut block)?;
            let Ok(meta) = read_metadata(&block) else {
                return Ok(None);
            };
            if ordinal >= declared {
                return Ok(Some(format!(
                    "a record follows the {declared} declared frame(s) at offset {offset}; \
                     the header was never finalized"
                )));
            }
            offset += padded_record_size(meta.data_size, self.header.padding_size);
            ordinal += 1;
        }
    }

    /// Recounts frames and rebuilds the index table by walking records up
    /// to the first one that does not fit.
    fn rebuild(&mut self, max_payload: u32) -> Result<()> {
        let mut file = File::open(&self.path)?;
        let stride = self.header.index.stride().max(1);
        let mut index = IndexTable::new(stride, INDEX_CAPACITY);
        let mut offset = self.header.stream_data_offset as u64;
        let mut count: u32 = 0;
        let mut block = vec![0u8; METADATA_SIZE];
        while offset + METADATA_SIZE as u64 <= self.data_end {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut block)?;
            let Ok(meta) = read_metadata(&block) else {
                break;
            };
            let size = padded_record_size(meta.data_size, self.header.padding_size);
            if meta.data_size > max_payload || offset + METADATA_SIZE as u64 + meta.data_size as u64 > self.data_end {
                break;
            }
            index.record(count, offset as u32);
            count += 1;
            offset += size;
        }
        self.header.number_of_images = count;
        self.header.index = index;
        if self.data_end > offset && self.header.gps_data_size == 0 {
            self.data_end = offset;
        }
        Ok(())
    }
}

/// File handles over a catalog. The reader and its prefetcher each own one.
pub(crate) struct SegmentFiles {
    catalog: Arc<SegmentCatalog>,
    files: Vec<Option<File>>,
    metadata: Vec<u8>,
}

impl SegmentFiles {
    pub(crate) fn new(catalog: Arc<SegmentCatalog>) -> Self {
        let files = catalog.segments.iter().map(|_| None).collect();
        Self {
            catalog,
            files,
            metadata: vec![0u8; METADATA_SIZE],
        }
    }

    pub(crate) fn catalog(&self) -> &Arc<SegmentCatalog> {
        &self.catalog
    }

    fn file(&mut self, segment: usize) -> Result<&mut File> {
        let slot = &mut self.files[segment];
        if slot.is_none() {
            *slot = Some(File::open(&self.catalog.segments[segment].path)?);
        }
        slot.as_mut()
            .ok_or_else(|| StreamError::WorkerFailed("segment handle missing".to_string()))
    }

    fn read_metadata_at(&mut self, pos: Position) -> Result<RecordMetadata> {
        let entry = &self.catalog.segments[pos.segment];
        let path = entry.path.clone();
        let data_end = entry.data_end;
        if pos.offset + METADATA_SIZE as u64 > data_end {
            return Err(StreamError::corrupted(
                &path,
                format!("frame {} at offset {} runs past the record area", pos.ordinal, pos.offset),
            ));
        }
        let mut block = std::mem::take(&mut self.metadata);
        let read = self.file(pos.segment).and_then(|file| {
            file.seek(SeekFrom::Start(pos.offset))?;
            file.read_exact(&mut block)?;
            Ok(())
        });
        let parsed = read.and_then(|_| {
            read_metadata(&block).map_err(|reason| {
                StreamError::corrupted(&path, format!("frame {}: {}", pos.ordinal, reason))
            })
        });
        self.metadata = block;
        let meta = parsed?;
        if meta.data_size > self.catalog.max_payload {
            return Err(StreamError::corrupted(
                &path,
                format!(
                    "frame {} declares {} payload bytes, limit is {}",
                    pos.ordinal, meta.data_size, self.catalog.max_payload
                ),
            ));
        }
        if pos.offset + METADATA_SIZE as u64 + meta.data_size as u64 > data_end {
            return Err(StreamError::corrupted(
                &path,
                format!("frame {} payload runs past the record area", pos.ordinal),
            ));
        }
        Ok(meta)
    }

    /// Position that follows the record at `pos` whose payload is
    /// `data_size` bytes.
    fn advance(&self, pos: Position, data_size: u32) -> Position {
        let segments = &self.catalog.segments;
        let entry = &segments[pos.segment];
        let ordinal = pos.ordinal + 1;
        let mut next_segment = pos.segment + 1;
        while next_segment < segments.len() && segments[next_segment].header.number_of_images == 0 {
            next_segment += 1;
        }
        if ordinal >= entry.first_ordinal + entry.header.number_of_images
            && next_segment < segments.len()
        {
            return Position {
                ordinal,
                segment: next_segment,
                offset: segments[next_segment].header.stream_data_offset as u64,
            };
        }
        Position {
            ordinal,
            segment: pos.segment,
            offset: pos.offset + padded_record_size(data_size, entry.header.padding_size),
        }
    }

    /// Exact position of `ordinal`: index lookup plus a metadata-only walk.
    pub(crate) fn seek(&mut self, ordinal: u32) -> Result<Position> {
        let location = self.catalog.locate(ordinal)?;
        let mut pos = Position {
            ordinal: location.key_ordinal,
            segment: location.segment,
            offset: location.offset,
        };
        while pos.ordinal < ordinal {
            let meta = self.read_metadata_at(pos)?;
            pos = self.advance(pos, meta.data_size);
        }
        Ok(pos)
    }

    /// Metadata of the frame at `pos` without its payload.
    pub(crate) fn peek(&mut self, pos: Position) -> Result<(RecordMetadata, Position)> {
        let meta = self.read_metadata_at(pos)?;
        let next = self.advance(pos, meta.data_size);
        Ok((meta, next))
    }

    /// Reads the frame at `pos` and returns it with the next position.
    pub(crate) fn read_at(&mut self, pos: Position) -> Result<(ImageRecord, Position)> {
        if pos.ordinal >= self.catalog.frame_count {
            return Err(StreamError::ImageOutOfRange {
                ordinal: pos.ordinal,
                count: self.catalog.frame_count,
            });
        }
        let meta = self.read_metadata_at(pos)?;
        let mut payload = vec![0u8; meta.data_size as usize];
        if !payload.is_empty() {
            let file = self.file(pos.segment)?;
            file.seek(SeekFrom::Start(pos.offset + METADATA_SIZE as u64))?;
            file.read_exact(&mut payload)?;
        }
        let next = self.advance(pos, meta.data_size);
        Ok((meta.into_record(payload), next))
    }

    /// Configuration blob stored after the first segment's header.
    pub(crate) fn configuration_data(&mut self) -> Result<Vec<u8>> {
        let size = self.catalog.first().header.configuration_data_size as usize;
        let file = self.file(0)?;
        file.seek(SeekFrom::Start(PREAMBLE_SIZE))?;
        let mut blob = vec![0u8; size];
        file.read_exact(&mut blob)?;
        Ok(blob)
    }

    /// Raw GPS summary block of the final segment, if it has one.
    pub(crate) fn summary_block(&mut self) -> Result<Option<Vec<u8>>> {
        let last = self.catalog.segments.len() - 1;
        let header = &self.catalog.segments[last].header;
        if header.gps_data_size == 0 {
            return Ok(None);
        }
        let (offset, size) = (header.gps_data_offset as u64, header.gps_data_size as usize);
        let file = self.file(last)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut block = vec![0u8; size];
        match file.read_exact(&mut block) {
            Ok(()) => Ok(Some(block)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
