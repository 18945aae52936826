use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use crate::imaging::{
    EncodedFrame, ExportConfig, ImagingEngine, ImagingError, RawEngine, RawFrame, RgbImageData,
    SensorImage, TiffWriter,
};
use crate::pipeline::{
    CopyConfig, CopyOutcome, FrameExportPipeline, PipelineError, PipelineOutcome,
    StreamCopyPipeline,
};
use crate::stream::format::NUM_CAMERAS;
use crate::stream::{
    DataFormat, ErrorKind, FullAdjustment, ImageGeometry, ImageRecord, ReaderConfig, Resolution,
    StippledFormat, StreamHeader, StreamReader, StreamWriter, WriterConfig,
};

struct MockEngine {
    should_fail: bool,
}

impl ImagingEngine for MockEngine {
    fn encode_frame(&self, _frame: &RawFrame, format: DataFormat) -> crate::imaging::Result<EncodedFrame> {
        Err(ImagingError::UnsupportedFormat(format))
    }

    fn decode_frame(
        &self,
        payload: &[u8],
        format: DataFormat,
        _geometry: &ImageGeometry,
    ) -> crate::imaging::Result<Vec<SensorImage>> {
        if self.should_fail {
            return Err(ImagingError::DecodeError {
                format,
                reason: "Mock decode error".to_string(),
            });
        }
        Ok((0..NUM_CAMERAS)
            .map(|_| SensorImage::new(2, 2, 8, payload.iter().take(4).map(|&b| b as u16).collect()))
            .collect())
    }

    fn extract_embedded_gps(&self, _frame: &RawFrame) -> Option<String> {
        None
    }
}

struct MockWriter {
    should_fail: bool,
    written_data: Arc<Mutex<Vec<SensorImage>>>,
}

impl TiffWriter for MockWriter {
    fn write_mosaic(
        &self,
        image: &SensorImage,
        output: &mut dyn Write,
        _config: &ExportConfig,
    ) -> crate::imaging::Result<()> {
        if self.should_fail {
            return Err(ImagingError::TiffError("Mock encode error".to_string()));
        }
        output.write_all(b"mock")?;
        self.written_data.lock().unwrap().push(image.clone());
        Ok(())
    }

    fn write_rgb(
        &self,
        _image: &RgbImageData,
        _output: &mut dyn Write,
        _config: &ExportConfig,
    ) -> crate::imaging::Result<()> {
        Ok(())
    }
}

fn writer_config() -> WriterConfig {
    WriterConfig::builder()
        .sector_size(Some(512))
        .min_free_space(0)
        .index_stride(3)
        .build()
}

fn raw_header() -> StreamHeader {
    StreamHeader::new(DataFormat::Raw8, Resolution::R2448x2048, StippledFormat::Rggb)
}

fn raw_frame(i: u32, empty: bool) -> ImageRecord {
    let payload = if empty {
        Vec::new()
    } else {
        (0..4 * 4 * NUM_CAMERAS).map(|p| (p as u32 + i) as u8).collect()
    };
    let mut record = ImageRecord::new(
        ImageGeometry::new(4, 4),
        DataFormat::Raw8,
        Resolution::R2448x2048,
        payload,
    );
    record.stippled_format = StippledFormat::Rggb;
    record.info.sequence_id = i;
    record.info.time_seconds = 1_000 + i;
    record
}

/// Writes `count` RAW8 frames with a configuration file and returns the
/// first segment path.
fn source_stream(dir: &Path, count: u32, empty: &[u32]) -> PathBuf {
    let config_path = dir.join("source.cal");
    fs::write(&config_path, b"source calibration").unwrap();
    let mut writer =
        StreamWriter::create_with_header(dir.join("source"), raw_header(), Some(&config_path), writer_config())
            .unwrap();
    for i in 0..count {
        writer.append_frame(&raw_frame(i, empty.contains(&i)), None).unwrap();
    }
    writer.close().unwrap();
    writer.first_file_name()
}

fn copy_config() -> crate::pipeline::CopyConfigBuilder {
    CopyConfig::builder().writer(writer_config())
}

#[test]
fn test_copy_range_into_new_stream() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 10, &[]);
    let pipeline = StreamCopyPipeline::new(copy_config().from(2).to(Some(5)).build());

    let cancel = AtomicBool::new(false);
    let (outcome, copy) = pipeline.run(&source, dir.path().join("copy"), &cancel).unwrap();
    assert_eq!(outcome, CopyOutcome::Completed { frames: 4 });

    let mut reader = StreamReader::open(&copy, ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 4);
    assert_eq!(reader.configuration_data().unwrap(), b"source calibration");
    for i in 2..=5 {
        assert_eq!(reader.read_next().unwrap().image, raw_frame(i, false));
    }
}

#[test]
fn test_copy_to_end_with_replacement_config() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 7, &[3]);
    let replacement = dir.path().join("new.cal");
    fs::write(&replacement, b"new calibration").unwrap();
    let config = copy_config().from(4).config_file(Some(replacement)).build();

    let cancel = AtomicBool::new(false);
    let (outcome, copy) = StreamCopyPipeline::new(config)
        .run(&source, dir.path().join("copy"), &cancel)
        .unwrap();
    assert_eq!(outcome.frames(), 3);
    assert!(outcome.is_completed());

    let mut reader = StreamReader::open(&copy, ReaderConfig::default()).unwrap();
    assert_eq!(reader.configuration_data().unwrap(), b"new calibration");
    assert_eq!(reader.read_next().unwrap().image, raw_frame(4, false));
}

#[test]
fn test_copy_carries_adjustments() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 5, &[]);
    let mut adjusted = FullAdjustment::default();
    adjusted.post_processing.gamma = 1.8;
    let mut reader = StreamReader::open(&source, ReaderConfig::default()).unwrap();
    reader.replace_adjustment(3, adjusted.clone()).unwrap();
    reader.save_outstanding_adjustments().unwrap();
    reader.close().unwrap();

    let config = copy_config().from(2).carry_adjustments(true).build();
    let cancel = AtomicBool::new(false);
    let (_, copy) = StreamCopyPipeline::new(config)
        .run(&source, dir.path().join("copy"), &cancel)
        .unwrap();

    let reader = StreamReader::open(&copy, ReaderConfig::default()).unwrap();
    assert_eq!(reader.adjustment_for(1).unwrap(), adjusted);
    assert_ne!(reader.adjustment_for(0).unwrap(), adjusted);
}

#[test]
fn test_cancelled_copy_reports_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 5, &[]);
    let cancel = AtomicBool::new(true);
    let (outcome, copy) = StreamCopyPipeline::new(copy_config().build())
        .run(&source, dir.path().join("copy"), &cancel)
        .unwrap();
    assert_eq!(outcome, CopyOutcome::Aborted { frames: 0 });

    // Partial output is kept and readable.
    let reader = StreamReader::open(&copy, ReaderConfig::default()).unwrap();
    assert_eq!(reader.frame_count(), 0);
}

#[test]
fn test_copy_failures_are_distinguishable() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = AtomicBool::new(false);
    let pipeline = StreamCopyPipeline::new(copy_config().build());

    let err = pipeline
        .run(dir.path().join("missing-000000.pgr"), dir.path().join("copy"), &cancel)
        .unwrap_err();
    assert_eq!(err.stream_kind(), Some(ErrorKind::NotFound));

    let source = source_stream(dir.path(), 3, &[]);
    let pipeline = StreamCopyPipeline::new(copy_config().from(5).build());
    let err = pipeline.run(&source, dir.path().join("copy"), &cancel).unwrap_err();
    assert!(matches!(err, PipelineError::InvalidRange { from: 5, to: 2, count: 3 }));
}

#[test]
fn test_export_writes_selected_sensors() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 4, &[]);
    let out = dir.path().join("tiff");
    let config = ExportConfig::builder().sensors(Some(vec![0, 3])).build();
    let pipeline = FrameExportPipeline::new(config);

    let cancel = AtomicBool::new(false);
    let outcome = pipeline.run(&source, 1, Some(2), &out, &cancel).unwrap();
    assert_eq!(outcome, PipelineOutcome::Completed { frames: 2 });
    for ordinal in 1..=2 {
        for sensor in [0, 3] {
            let path = FrameExportPipeline::<RawEngine, crate::imaging::StandardTiffWriter>::output_path(
                &out, ordinal, sensor,
            );
            assert!(fs::metadata(path).unwrap().len() > 0);
        }
    }
    assert_eq!(fs::read_dir(&out).unwrap().count(), 4);
}

#[test]
fn test_export_debayers_when_requested() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 1, &[]);
    let out = dir.path().join("rgb");
    let config = ExportConfig::builder().debayer(true).sensors(Some(vec![2])).build();

    let cancel = AtomicBool::new(false);
    FrameExportPipeline::new(config)
        .run(&source, 0, None, &out, &cancel)
        .unwrap();
    assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
}

#[test]
fn test_export_skips_empty_payload() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 3, &[1]);
    let written = Arc::new(Mutex::new(Vec::new()));
    let pipeline = FrameExportPipeline::with_custom(
        MockEngine { should_fail: false },
        MockWriter {
            should_fail: false,
            written_data: written.clone(),
        },
        ExportConfig::default(),
    );

    let cancel = AtomicBool::new(false);
    let outcome = pipeline.run(&source, 0, None, dir.path().join("out"), &cancel).unwrap();
    assert_eq!(outcome.frames(), 3);
    assert_eq!(written.lock().unwrap().len(), 2 * NUM_CAMERAS);
    assert!(written.lock().unwrap().iter().all(|s| s.pattern == StippledFormat::Rggb));
}

#[test]
fn test_engine_failure() {
    let dir = tempfile::tempdir().unwrap();
    let written = Arc::new(Mutex::new(Vec::new()));
    let pipeline = FrameExportPipeline::with_custom(
        MockEngine { should_fail: true },
        MockWriter {
            should_fail: false,
            written_data: written.clone(),
        },
        ExportConfig::default(),
    );

    let result = pipeline.export_frame(0, &raw_frame(0, false), dir.path());
    assert!(matches!(
        result.unwrap_err(),
        PipelineError::Imaging(ImagingError::DecodeError { .. })
    ));
    assert!(written.lock().unwrap().is_empty());
}

#[test]
fn test_writer_failure() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = FrameExportPipeline::with_custom(
        MockEngine { should_fail: false },
        MockWriter {
            should_fail: true,
            written_data: Arc::new(Mutex::new(Vec::new())),
        },
        ExportConfig::default(),
    );

    let result = pipeline.export_frame(0, &raw_frame(0, false), dir.path());
    assert!(matches!(
        result.unwrap_err(),
        PipelineError::Imaging(ImagingError::TiffError(_))
    ));
}

#[test]
fn test_cancelled_export_reports_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_stream(dir.path(), 2, &[]);
    let cancel = AtomicBool::new(true);
    let outcome = FrameExportPipeline::new(ExportConfig::default())
        .run(&source, 0, None, dir.path().join("out"), &cancel)
        .unwrap();
    assert_eq!(outcome, PipelineOutcome::Aborted { frames: 0 });
}
