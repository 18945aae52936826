use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, info_span, instrument, warn};

use crate::imaging::{
    CpuDebayer, ExportConfig, ImagingEngine, RawEngine, StandardTiffWriter, TiffWriter,
};
use crate::pipeline::error::{PipelineError, Result};
use crate::pipeline::{PipelineOutcome, frame_range};
use crate::stream::{ImageRecord, ReaderConfig, StreamReader};

/// Decodes frames through an imaging engine and writes one TIFF per
/// sensor, named `frame<ordinal>-cam<sensor>.tiff`.
pub struct FrameExportPipeline<E: ImagingEngine, W: TiffWriter> {
    engine: E,
    writer: W,
    debayer: CpuDebayer,
    config: ExportConfig,
}

impl FrameExportPipeline<RawEngine, StandardTiffWriter> {
    pub fn new(config: ExportConfig) -> Self {
        Self::with_custom(RawEngine, StandardTiffWriter, config)
    }
}

impl<E: ImagingEngine, W: TiffWriter> FrameExportPipeline<E, W> {
    pub fn with_custom(engine: E, writer: W, config: ExportConfig) -> Self {
        Self {
            engine,
            writer,
            debayer: CpuDebayer::new(),
            config,
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn output_path(dir: &Path, ordinal: u32, sensor: usize) -> PathBuf {
        dir.join(format!("frame{ordinal:06}-cam{sensor}.tiff"))
    }

    /// Exports one frame already read from a stream. Frames without a
    /// payload are skipped and yield no files.
    #[instrument(skip(self, record, out_dir), fields(size = record.data_size()))]
    pub fn export_frame(&self, ordinal: u32, record: &ImageRecord, out_dir: &Path) -> Result<Vec<PathBuf>> {
        if record.is_empty_payload() {
            warn!("Frame {} has no payload, skipping", ordinal);
            return Ok(Vec::new());
        }

        let sensors = {
            let _span = info_span!("decode_frame", format = %record.data_format).entered();
            self.engine
                .decode_frame(&record.payload, record.data_format, &record.geometry)?
        };

        let mut written = Vec::new();
        for (index, sensor) in sensors.into_iter().enumerate() {
            if !self.config.exports_sensor(index) {
                continue;
            }
            let sensor = sensor.with_pattern(record.stippled_format);
            let path = Self::output_path(out_dir, ordinal, index);
            let file = File::create(&path).map_err(|e| {
                PipelineError::OutputWriteError(format!("{}: {}", path.display(), e))
            })?;
            let mut output = BufWriter::new(file);

            let _span = info_span!("encode_tiff", sensor = index).entered();
            if self.config.debayer {
                let rgb = self.debayer.process(&sensor)?;
                self.writer.write_rgb(&rgb, &mut output, &self.config)?;
            } else {
                self.writer.write_mosaic(&sensor, &mut output, &self.config)?;
            }
            output
                .flush()
                .map_err(|e| PipelineError::OutputWriteError(format!("{}: {}", path.display(), e)))?;
            written.push(path);
        }
        Ok(written)
    }

    /// Exports frames `from..=to` of the stream at `source` into `out_dir`.
    #[instrument(skip(self, source, out_dir, cancel), fields(source = %source.as_ref().display()))]
    pub fn run(
        &self,
        source: impl AsRef<Path>,
        from: u32,
        to: Option<u32>,
        out_dir: impl AsRef<Path>,
        cancel: &AtomicBool,
    ) -> Result<PipelineOutcome> {
        let out_dir = out_dir.as_ref();
        std::fs::create_dir_all(out_dir)
            .map_err(|e| PipelineError::OutputWriteError(format!("{}: {}", out_dir.display(), e)))?;

        let mut reader = StreamReader::open(source.as_ref(), ReaderConfig::default())?;
        let range = frame_range(from, to, reader.frame_count())?;
        reader.go_to_image(*range.start())?;

        let mut frames = 0u32;
        let mut files = 0usize;
        for _ in range {
            if cancel.load(Ordering::Relaxed) {
                info!("Export cancelled after {} frames", frames);
                return Ok(PipelineOutcome::Aborted { frames });
            }
            let frame = reader.read_next()?;
            files += self.export_frame(frame.ordinal, &frame.image, out_dir)?.len();
            frames += 1;
        }
        info!("Exported {} frames into {} files", frames, files);
        Ok(PipelineOutcome::Completed { frames })
    }
}
