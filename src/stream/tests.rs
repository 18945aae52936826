use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::imaging::{ImagingEngine, RawEngine, RawFrame, SensorImage};
use crate::stream::adjustment::{FullAdjustment, sidecar_path};
use crate::stream::common::error::{ErrorKind, Result, StreamError};
use crate::stream::config::{ReaderConfig, WriterConfig, WriterConfigBuilder};
use crate::stream::format::{
    DataFormat, GpsFileType, NUM_CAMERAS, PREAMBLE_SIZE, Resolution, StippledFormat, StreamHeader,
};
use crate::stream::gps::NmeaSentenceId;
use crate::stream::reader::StreamReader;
use crate::stream::record::{ImageGeometry, ImageRecord, Timestamp};
use crate::stream::segment::SegmentName;
use crate::stream::writer::{CameraConfigSource, StreamWriter};

const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\r\n";

struct MockCamera {
    header: StreamHeader,
    blob: Vec<u8>,
    should_fail: bool,
}

impl CameraConfigSource for MockCamera {
    fn stream_header(&self) -> Result<StreamHeader> {
        if self.should_fail {
            return Err(StreamError::InvalidArgument("camera not initialized".to_string()));
        }
        Ok(self.header.clone())
    }

    fn configuration_data(&self) -> Result<Vec<u8>> {
        Ok(self.blob.clone())
    }
}

fn jpeg_header() -> StreamHeader {
    StreamHeader::new(
        DataFormat::ColorSepJpeg8,
        Resolution::R2448x2048,
        StippledFormat::Bggr,
    )
    .with_frame_rate(10.0)
    .with_serials(7_000_123, 7_000_124)
}

fn camera() -> MockCamera {
    MockCamera {
        header: jpeg_header(),
        blob: (0..64u8).collect(),
        should_fail: false,
    }
}

fn writer_config() -> WriterConfigBuilder {
    WriterConfig::builder()
        .sector_size(Some(512))
        .min_free_space(0)
}

fn frame(i: u32, payload_len: usize) -> ImageRecord {
    let payload = (0..payload_len).map(|b| (b as u32 ^ i) as u8).collect();
    let mut record = ImageRecord::new(
        ImageGeometry::new(8, 4),
        DataFormat::ColorSepJpeg8,
        Resolution::R2448x2048,
        payload,
    );
    record.stippled_format = StippledFormat::Bggr;
    record.timestamp = Timestamp {
        seconds: 1_700_000_000 + i as i64,
        micro_seconds: i * 100,
        cycle_seconds: i % 128,
        cycle_count: i * 3 % 8000,
        cycle_offset: i,
    };
    record.info.time_seconds = 1_700_000_000 + i;
    record.info.sequence_id = i;
    record.info.shutter = [i; 6];
    record
}

fn write_stream(base: &Path, frames: &[ImageRecord], config: WriterConfig) -> PathBuf {
    let mut writer = StreamWriter::create(base, &camera(), config).unwrap();
    for record in frames {
        writer.append_frame(record, None).unwrap();
    }
    writer.close().unwrap();
    writer.first_file_name()
}

fn read_all(reader: &mut StreamReader) -> Vec<ImageRecord> {
    (0..reader.frame_count())
        .map(|_| reader.read_next().unwrap().image)
        .collect()
}

#[test]
fn test_round_trip_preserves_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..20).map(|i| frame(i, 100 + 37 * i as usize)).collect();
    let first = write_stream(&dir.path().join("run"), &frames, writer_config().build());

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 20);
    assert_eq!(read_all(&mut reader), frames);
    assert!(matches!(
        reader.read_next(),
        Err(StreamError::ImageOutOfRange { ordinal: 20, count: 20 })
    ));
    reader.close().unwrap();
}

#[test]
fn test_empty_payload_frame_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let frames = vec![frame(0, 300), frame(1, 0), frame(2, 300)];
    let first = write_stream(&dir.path().join("run"), &frames, writer_config().build());

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let read = read_all(&mut reader);
    assert!(read[1].is_empty_payload());
    assert_eq!(read, frames);
}

#[test]
fn test_seek_matches_linear_scan() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..25).map(|i| frame(i, 200 + (i as usize % 5) * 600)).collect();
    let config = writer_config().index_stride(3).build();
    let first = write_stream(&dir.path().join("run"), &frames, config);

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let linear = read_all(&mut reader);
    for k in (0..25).rev() {
        reader.go_to_image(k).unwrap();
        let frame = reader.read_next().unwrap();
        assert_eq!(frame.ordinal, k);
        assert_eq!(frame.image, linear[k as usize]);
        assert!(reader.locate(k).unwrap().steps < 3);
    }
    assert!(matches!(
        reader.go_to_image(25),
        Err(StreamError::ImageOutOfRange { .. })
    ));
}

#[test]
fn test_stride_two_example() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..3).map(|i| frame(i, 500)).collect();
    let config = writer_config().index_stride(2).build();
    let first = write_stream(&dir.path().join("run"), &frames, config);

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let header = reader.header().clone();
    let entries: Vec<_> = header.index.entries().collect();
    let first_offset = header.stream_data_offset;
    // 1536 + 500 bytes padded to 2048.
    assert_eq!(entries, vec![(0, first_offset), (2, first_offset + 2 * 2048)]);

    let one = reader.locate(1).unwrap();
    assert_eq!((one.key_ordinal, one.offset, one.steps), (0, first_offset as u64, 1));
    let two = reader.locate(2).unwrap();
    assert_eq!((two.key_ordinal, two.steps), (2, 0));

    reader.go_to_image(1).unwrap();
    assert_eq!(reader.read_next().unwrap().image, frames[1]);
    assert_eq!(reader.read_next().unwrap().image, frames[2]);
}

#[test]
fn test_segments_split_at_size_cap() {
    let dir = tempfile::tempdir().unwrap();
    // Preamble, 64 configuration bytes and three 2048-byte records.
    let cap = PREAMBLE_SIZE + 64 + 3 * 2048;
    let frames: Vec<_> = (0..10).map(|i| frame(i, 400)).collect();
    let config = writer_config().max_segment_size(cap).build();
    let first = write_stream(&dir.path().join("run"), &frames, config);

    let name = SegmentName::parse(&first).unwrap();
    let paths = name.discover();
    let total: u64 = paths.iter().map(|p| fs::metadata(p).unwrap().len()).sum();
    assert_eq!(paths.len() as u64, total.div_ceil(cap));
    assert_eq!(paths.len(), 4);

    let mut counted = 0;
    for path in &paths {
        let bytes = fs::read(path).unwrap();
        assert!(bytes.len() as u64 <= cap);
        let header = StreamHeader::decode(&bytes, path).unwrap();
        counted += header.number_of_images;

        let mut reader = StreamReader::open(path, ReaderConfig::default()).unwrap();
        assert_eq!(reader.frame_count(), 10);
        assert_eq!(reader.configuration_data().unwrap(), camera().blob);
    }
    assert_eq!(counted, 10);

    let mut reader = StreamReader::open(&paths[2], ReaderConfig::default()).unwrap();
    assert_eq!(read_all(&mut reader), frames);
}

#[test]
fn test_index_stays_monotonic_and_uniform() {
    let dir = tempfile::tempdir().unwrap();
    let cap = PREAMBLE_SIZE + 64 + 16 * 2048;
    let frames: Vec<_> = (0..40).map(|i| frame(i, 400)).collect();
    let config = writer_config()
        .index_stride(1)
        .index_capacity(8)
        .max_segment_size(cap)
        .build();
    let first = write_stream(&dir.path().join("run"), &frames, config);

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let headers: Vec<StreamHeader> = reader.segment_headers().into_iter().cloned().collect();
    assert_eq!(headers.len(), 3);
    let stride = headers[0].index.stride();
    assert!(stride > 1);
    for header in &headers {
        assert_eq!(header.index.stride(), stride);
        let offsets: Vec<u32> = header.index.entries().map(|(_, offset)| offset).collect();
        assert!(offsets.windows(2).all(|w| w[0] < w[1]));
    }
    for k in [0, 15, 16, 33, 39] {
        reader.go_to_image(k).unwrap();
        assert_eq!(reader.read_next().unwrap().image, frames[k as usize]);
    }
}

#[test]
fn test_adjustment_replacement_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorded = FullAdjustment::default();
    recorded.post_processing.saturation = 0.5;
    let mut replaced = FullAdjustment::default();
    replaced.post_processing.gamma = 2.2;

    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), writer_config().build()).unwrap();
    for i in 0..5 {
        let adjustment = (i == 2).then_some(&recorded);
        writer.append_frame(&frame(i, 256), adjustment).unwrap();
    }
    writer.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.adjustment_for(2).unwrap(), recorded);
    let original = reader.adjustment_for(3).unwrap();
    reader.replace_adjustment(3, replaced.clone()).unwrap();
    assert_eq!(reader.adjustment_for(3).unwrap(), replaced);
    assert_eq!(reader.save_outstanding_adjustments().unwrap(), 1);
    reader.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.adjustment_for(3).unwrap(), replaced);
    assert_ne!(reader.adjustment_for(3).unwrap(), original);
    reader.go_to_image(2).unwrap();
    let (frame, adjustment) = reader.read_next_with_adjustment().unwrap();
    assert_eq!(frame.ordinal, 2);
    assert_eq!(adjustment, recorded);
}

#[test]
fn test_close_refuses_unsaved_adjustments() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_stream(&dir.path().join("run"), &[frame(0, 64), frame(1, 64)], writer_config().build());

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    reader.replace_adjustment(1, FullAdjustment::default()).unwrap();
    let err = reader.close().unwrap_err();
    assert!(matches!(err, StreamError::UnflushedAdjustments { count: 1 }));
    assert_eq!(err.kind(), ErrorKind::OverlayLoss);

    // Still open after the refusal.
    assert!(reader.has_unsaved_adjustments());
    reader.go_to_image(0).unwrap();
    assert_eq!(reader.discard_adjustments(), 1);
    reader.close().unwrap();
    reader.close().unwrap();
    assert!(matches!(reader.read_next(), Err(StreamError::SessionClosed)));
}

#[test]
fn test_truncated_header_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_stream(&dir.path().join("run"), &[frame(0, 64)], writer_config().build());
    OpenOptions::new().write(true).open(&first).unwrap().set_len(1000).unwrap();

    let err = StreamReader::open(&first, ReaderConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Corruption);
}

#[test]
fn test_bad_record_fingerprint_is_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_stream(&dir.path().join("run"), &[frame(0, 64), frame(1, 64)], writer_config().build());
    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let second = reader.locate(1).unwrap().offset + 2048;
    drop(reader);

    // Fingerprint sits right after geometry (52 bytes) and timestamp (24 bytes).
    let mut bytes = fs::read(&first).unwrap();
    let at = second as usize + 76;
    bytes[at..at + 4].copy_from_slice(&0u32.to_le_bytes());
    fs::write(&first, bytes).unwrap();

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    reader.read_next().unwrap();
    assert!(reader.read_next().unwrap_err().is_corruption());
}

#[test]
fn test_missing_file_and_missing_first_segment_differ() {
    let dir = tempfile::tempdir().unwrap();
    let err = StreamReader::open(dir.path().join("ghost-000000.pgr"), ReaderConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let cap = PREAMBLE_SIZE + 64 + 2048;
    let frames: Vec<_> = (0..2).map(|i| frame(i, 400)).collect();
    let first = write_stream(&dir.path().join("run"), &frames, writer_config().max_segment_size(cap).build());
    let second = SegmentName::parse(&first).unwrap().with_index(1).path();
    fs::remove_file(&first).unwrap();
    let err = StreamReader::open(&second, ReaderConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Corruption);
}

#[test]
fn test_zero_time_frame_reports_invalid_gps() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), writer_config().build()).unwrap();
    let mut valid = frame(0, 64);
    let mut invalid = frame(1, 64);
    invalid.info.time_seconds = 0;
    invalid.info.gps_status = true;
    invalid.info.gps_latitude = 45.0;
    invalid.sensors.humidity = 55;
    writer.write_gps_data_to_image(&mut valid, GGA).unwrap();
    writer.write_gps_data_to_image(&mut invalid, GGA).unwrap();
    writer.append_frame(&valid, None).unwrap();
    writer.append_frame(&invalid, None).unwrap();
    writer.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert!(reader.gps_for_frame(0, NmeaSentenceId::Gpgga).unwrap().is_valid());
    let data = reader.all_gps_for_frame(1).unwrap();
    assert!(!data.any_valid());
    assert_eq!(data.gga.count, 2);

    let image = reader.read_frame(1).unwrap();
    assert!(image.embedded_position().is_none());
    assert!(image.sensor_readings().is_none());
    assert_eq!(reader.position(), 0);
}

#[test]
fn test_gps_summary_is_written_and_exported() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), writer_config().build()).unwrap();
    for i in 0..6 {
        let mut record = frame(i, 128);
        if i % 2 == 0 {
            writer.write_gps_data_to_image(&mut record, GGA).unwrap();
        }
        writer.append_frame(&record, None).unwrap();
    }
    writer.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert!(reader.header().gps_data_size > 0);
    let summary = reader.gps_summary().unwrap();
    let ordinals: Vec<u32> = summary.entries.iter().map(|e| e.ordinal).collect();
    assert_eq!(ordinals, vec![0, 2, 4]);
    assert!((summary.entries[0].latitude - 48.1173).abs() < 1e-4);

    let kml = dir.path().join("track.kml");
    assert_eq!(reader.write_gps_summary(&kml, GpsFileType::Kml, 0, 0).unwrap(), 3);
    assert!(fs::read_to_string(&kml).unwrap().contains("<LineString>"));
}

#[test]
fn test_async_writer_and_prefetching_reader() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..30).map(|i| frame(i, 100 + 50 * i as usize)).collect();
    let config = writer_config()
        .asynchronous(true)
        .queue_depth(2)
        .index_stride(4)
        .max_segment_size(PREAMBLE_SIZE + 64 + 12 * 4096)
        .build();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), config).unwrap();
    for (i, record) in frames.iter().enumerate() {
        let progress = writer.append_frame(record, None).unwrap();
        assert_eq!(progress.images_written, i as u64 + 1);
    }
    writer.flush().unwrap();
    writer.close().unwrap();

    let config = ReaderConfig::builder().asynchronous(true).prefetch_depth(3).build();
    let mut reader = StreamReader::open(writer.first_file_name(), config).unwrap();
    assert_eq!(read_all(&mut reader), frames);
    for k in [29, 3, 17, 0] {
        reader.go_to_image(k).unwrap();
        assert_eq!(reader.read_next().unwrap().image, frames[k as usize]);
        if k < 29 {
            assert_eq!(reader.read_next().unwrap().image, frames[k as usize + 1]);
        }
    }
    reader.close().unwrap();
}

#[test]
fn test_second_writer_on_same_base_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("run");
    let mut writer = StreamWriter::create(&base, &camera(), writer_config().build()).unwrap();
    let err = StreamWriter::create(&base, &camera(), writer_config().build()).err().unwrap();
    assert!(matches!(err, StreamError::AlreadyInitialized(_)));
    writer.close().unwrap();
    assert!(StreamWriter::create(&base, &camera(), writer_config().build()).is_ok());
}

#[test]
fn test_new_recording_takes_next_generation() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("run");
    let first = write_stream(&base, &[frame(0, 64)], writer_config().build());
    let second = write_stream(&first, &[frame(10, 64), frame(11, 64)], writer_config().build());
    assert_eq!(first, SegmentName::new(&base, 0, 0).path());
    assert_eq!(second, SegmentName::new(&base, 1, 0).path());

    let mut reader = StreamReader::open(&second, ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 2);
    assert_eq!(reader.read_next().unwrap().image, frame(10, 64));
}

#[test]
fn test_mismatched_frame_is_rejected_and_session_continues() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), writer_config().build()).unwrap();
    let mut wrong = frame(0, 64);
    wrong.data_format = DataFormat::Raw8;
    let err = writer.append_frame(&wrong, None).unwrap_err();
    assert!(matches!(err, StreamError::FormatMismatch { field: "data format", .. }));
    assert_eq!(err.kind(), ErrorKind::Usage);

    let mut broken = frame(0, 64);
    broken.geometry.full_cols = 1;
    assert!(writer.append_frame(&broken, None).is_err());

    let progress = writer.append_frame(&frame(0, 64), None).unwrap();
    assert_eq!(progress.images_written, 1);
    assert!(writer.replace_adjustment(1, FullAdjustment::default()).is_err());
    writer.close().unwrap();
    writer.close().unwrap();
    assert!(matches!(
        writer.append_frame(&frame(1, 64), None),
        Err(StreamError::SessionClosed)
    ));
}

#[test]
fn test_oversized_frame_keeps_session_usable() {
    let dir = tempfile::tempdir().unwrap();
    let config = writer_config().max_segment_size(PREAMBLE_SIZE + 64 + 2048).build();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), config).unwrap();
    let err = writer.append_frame(&frame(0, 4000), None).unwrap_err();
    assert!(matches!(err, StreamError::FrameTooLarge { .. }));
    writer.append_frame(&frame(0, 100), None).unwrap();
    writer.close().unwrap();

    let reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 1);
}

#[cfg(unix)]
#[test]
fn test_insufficient_disk_space_is_refused_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("run");
    let config = writer_config().min_free_space(u64::MAX / 2).build();
    let err = StreamWriter::create(&base, &camera(), config).err().unwrap();
    assert!(matches!(err, StreamError::DiskNotEnoughSpace { .. }));
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(!SegmentName::new(&base, 0, 0).path().exists());
}

#[test]
fn test_header_and_config_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("camera.cal");
    fs::write(&config_path, b"calibration").unwrap();

    let mut writer = StreamWriter::create_with_header(
        dir.path().join("run"),
        jpeg_header(),
        Some(&config_path),
        writer_config().build(),
    )
    .unwrap();
    writer.append_frame(&frame(0, 10), None).unwrap();
    writer.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.header().serial_base, 7_000_123);
    assert_eq!(reader.header().effective_frame_rate(), 10.0);
    let copy = dir.path().join("copy.cal");
    reader.write_config_file(&copy).unwrap();
    assert_eq!(fs::read(copy).unwrap(), b"calibration");

    let missing = StreamWriter::create_with_header(
        dir.path().join("other"),
        jpeg_header(),
        Some(&dir.path().join("nope.cal")),
        writer_config().build(),
    );
    assert!(matches!(missing, Err(StreamError::NotFound(_))));

    let failing = MockCamera {
        should_fail: true,
        ..camera()
    };
    assert!(StreamWriter::create(dir.path().join("third"), &failing, writer_config().build()).is_err());
}

#[test]
fn test_recovering_open_rebuilds_unpatched_headers() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<_> = (0..6).map(|i| frame(i, 300)).collect();
    let first = write_stream(&dir.path().join("run"), &frames, writer_config().index_stride(2).build());

    // Emulate a crash before close: counts and table never written, last
    // record cut short.
    let mut bytes = fs::read(&first).unwrap();
    for field in [136usize, 140] {
        let at = 16 + field;
        bytes[at..at + 4].copy_from_slice(&0u32.to_le_bytes());
    }
    let gps_size_at = 16 + 156;
    bytes[gps_size_at..gps_size_at + 4].copy_from_slice(&0u32.to_le_bytes());
    let cut = bytes.len() - 1000;
    bytes.truncate(cut);
    let mut file = fs::File::create(&first).unwrap();
    file.write_all(&bytes).unwrap();
    drop(file);

    let err = StreamReader::open(&first, ReaderConfig::default()).err().unwrap();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("never finalized"));

    let config = ReaderConfig::builder().recover_truncated(true).build();
    let mut reader = StreamReader::open(&first, config).unwrap();
    assert_eq!(reader.frame_count(), 5);
    reader.go_to_image(4).unwrap();
    assert_eq!(reader.read_next().unwrap().image, frames[4]);
}

#[test]
fn test_sequence_reset_marks_discontinuity() {
    let dir = tempfile::tempdir().unwrap();
    let mut frames: Vec<_> = (0..4).map(|i| frame(i, 64)).collect();
    frames[2].info.sequence_id = 0;
    frames[3].info.sequence_id = 1;
    frames[0].info.sequence_id = 5;
    frames[1].info.sequence_id = 6;
    let first = write_stream(&dir.path().join("run"), &frames, writer_config().build());

    let mut reader = StreamReader::open(&first, ReaderConfig::default()).unwrap();
    let flags: Vec<bool> = (0..4).map(|_| reader.read_next().unwrap().discontinuity).collect();
    assert_eq!(flags, vec![false, false, true, false]);
}

#[test]
fn test_replacement_of_a_queued_frame_wins() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorded = FullAdjustment::default();
    recorded.post_processing.saturation = 0.5;
    let mut replaced = FullAdjustment::default();
    replaced.post_processing.gamma = 2.2;

    let config = writer_config().asynchronous(true).queue_depth(8).build();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), config).unwrap();
    // Large frames keep the worker behind the producer.
    for i in 0..6 {
        writer.append_frame(&frame(i, 400_000), None).unwrap();
    }
    writer.append_frame(&frame(6, 400_000), Some(&recorded)).unwrap();
    writer.replace_adjustment(6, replaced.clone()).unwrap();
    writer.close().unwrap();

    let reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 7);
    assert_eq!(reader.adjustment_for(6).unwrap(), replaced);
}

#[test]
fn test_async_failure_stops_later_frames() {
    let dir = tempfile::tempdir().unwrap();
    let config = writer_config()
        .asynchronous(true)
        .queue_depth(8)
        .max_segment_size(PREAMBLE_SIZE + 64 + 2048)
        .build();
    let mut writer = StreamWriter::create(dir.path().join("run"), &camera(), config).unwrap();
    let mut reported = Vec::new();
    writer.append_frame(&frame(0, 100), None).unwrap();
    // Does not fit any segment; the worker finds out after it was queued.
    writer.append_frame(&frame(1, 4000), None).unwrap();
    let mut late = FullAdjustment::default();
    late.post_processing.gamma = 1.8;
    for i in 2..5 {
        if let Err(e) = writer.append_frame(&frame(i, 100), Some(&late)) {
            reported.push(e);
        }
    }
    if let Err(e) = writer.close() {
        reported.push(e);
    }

    assert!(matches!(reported.first(), Some(StreamError::FrameTooLarge { .. })));
    assert_eq!(writer.images_written(), 1);
    let reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 1);
    assert!(reader.adjustment_for(2).is_err());
}

/// Raw engine with its own idea of the fallback adjustment.
struct TunedEngine {
    inner: RawEngine,
}

impl ImagingEngine for TunedEngine {
    fn encode_frame(
        &self,
        frame: &RawFrame,
        format: DataFormat,
    ) -> crate::imaging::Result<crate::imaging::EncodedFrame> {
        self.inner.encode_frame(frame, format)
    }

    fn decode_frame(
        &self,
        payload: &[u8],
        format: DataFormat,
        geometry: &ImageGeometry,
    ) -> crate::imaging::Result<Vec<SensorImage>> {
        self.inner.decode_frame(payload, format, geometry)
    }

    fn extract_embedded_gps(&self, frame: &RawFrame) -> Option<String> {
        self.inner.extract_embedded_gps(frame)
    }

    fn default_adjustment_for(&self, format: DataFormat) -> FullAdjustment {
        let mut adjustment = FullAdjustment::default_for(format);
        adjustment.post_processing.gamma = 1.6;
        adjustment.sharpening = true;
        adjustment
    }
}

fn capture(i: u16, nmea: Option<&str>) -> RawFrame {
    let sensors = (0..NUM_CAMERAS as u16)
        .map(|s| SensorImage::new(4, 3, 16, (0..12).map(|p| i * 1000 + s * 12 + p).collect()))
        .collect();
    RawFrame {
        sensors,
        nmea: nmea.map(str::to_string),
    }
}

#[test]
fn test_recording_through_an_imaging_engine() {
    let dir = tempfile::tempdir().unwrap();
    let engine = TunedEngine { inner: RawEngine::new() };
    let header = StreamHeader::new(DataFormat::Raw16, Resolution::R1024x768, StippledFormat::Bggr);
    let config = writer_config()
        .default_adjustment_from(&engine, DataFormat::Raw16)
        .build();
    let mut writer =
        StreamWriter::create_with_header(dir.path().join("raw"), header, None, config).unwrap();

    let template = ImageRecord::new(
        ImageGeometry::new(4, 3),
        DataFormat::Raw16,
        Resolution::R1024x768,
        Vec::new(),
    );
    let captures = [capture(0, Some(GGA)), capture(1, None), capture(2, Some(GGA))];
    for raw in &captures {
        writer.append_raw_frame(&engine, raw, &template, None).unwrap();
    }
    let mut too_few = capture(3, None);
    too_few.sensors.pop();
    let err = writer.append_raw_frame(&engine, &too_few, &template, None).unwrap_err();
    assert!(matches!(err, StreamError::Imaging(_)));
    writer.close().unwrap();

    let mut reader = StreamReader::open(writer.first_file_name(), ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 3);
    let expected = engine.default_adjustment_for(DataFormat::Raw16);
    assert_eq!(reader.adjustment_for(1).unwrap(), expected);
    let records = read_all(&mut reader);
    for (record, raw) in records.iter().zip(&captures) {
        let sensors = engine
            .decode_frame(&record.payload, DataFormat::Raw16, &record.geometry)
            .unwrap();
        assert_eq!(sensors[5].data, raw.sensors[5].data);
    }
    assert_eq!(records[0].nmea_text(), GGA);
    assert!(records[1].nmea.is_empty());
    assert_eq!(records[2].gps_counters[NmeaSentenceId::Gpgga.index()], 2);
    reader.close().unwrap();

    // A sidecar created on open takes its defaults from the reader config.
    let first = SegmentName::resolve_for_read(&writer.first_file_name()).unwrap();
    fs::remove_file(sidecar_path(&first)).unwrap();
    let config = ReaderConfig::builder()
        .default_adjustment_from(&engine, DataFormat::Raw16)
        .build();
    let reader = StreamReader::open(writer.first_file_name(), config).unwrap();
    assert_eq!(reader.adjustment_for(0).unwrap(), expected);
}
