use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use crate::pipeline::error::Result;
use crate::pipeline::{CopyOutcome, frame_range};
use crate::stream::{
    CameraConfigSource, ReaderConfig, StreamHeader, StreamReader, StreamWriter, WriterConfig,
};

const PROGRESS_INTERVAL: u32 = 100;

/// Settings for copying part of a stream into a new one
#[derive(Debug, Clone, Default)]
pub struct CopyConfig {
    pub from: u32,
    /// Last frame to copy, inclusive; `None` copies to the end.
    pub to: Option<u32>,
    /// Replaces the source's configuration blob.
    pub config_file: Option<PathBuf>,
    /// Store each frame's effective adjustment in the new stream's sidecar.
    pub carry_adjustments: bool,
    pub reader: ReaderConfig,
    pub writer: WriterConfig,
}

impl CopyConfig {
    pub fn builder() -> CopyConfigBuilder {
        CopyConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct CopyConfigBuilder {
    from: Option<u32>,
    to: Option<Option<u32>>,
    config_file: Option<Option<PathBuf>>,
    carry_adjustments: Option<bool>,
    reader: Option<ReaderConfig>,
    writer: Option<WriterConfig>,
}

impl CopyConfigBuilder {
    pub fn from(mut self, from: u32) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Option<u32>) -> Self {
        self.to = Some(to);
        self
    }

    pub fn config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = Some(path);
        self
    }

    pub fn carry_adjustments(mut self, carry: bool) -> Self {
        self.carry_adjustments = Some(carry);
        self
    }

    pub fn reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn writer(mut self, writer: WriterConfig) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn build(self) -> CopyConfig {
        let default = CopyConfig::default();
        CopyConfig {
            from: self.from.unwrap_or(default.from),
            to: self.to.unwrap_or(default.to),
            config_file: self.config_file.unwrap_or(default.config_file),
            carry_adjustments: self.carry_adjustments.unwrap_or(default.carry_adjustments),
            reader: self.reader.unwrap_or(default.reader),
            writer: self.writer.unwrap_or(default.writer),
        }
    }
}

/// Header and configuration blob of an already recorded stream.
struct RecordedSource {
    header: StreamHeader,
    blob: Vec<u8>,
}

impl CameraConfigSource for RecordedSource {
    fn stream_header(&self) -> crate::stream::Result<StreamHeader> {
        Ok(self.header.clone())
    }

    fn configuration_data(&self) -> crate::stream::Result<Vec<u8>> {
        Ok(self.blob.clone())
    }
}

pub struct StreamCopyPipeline {
    config: CopyConfig,
}

impl StreamCopyPipeline {
    pub fn new(config: CopyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Copies the configured frame range of `source` into a new stream
    /// at `destination`. `cancel` is checked between frames.
    #[instrument(skip(self, source, destination, cancel), fields(source = %source.as_ref().display()))]
    pub fn run(
        &self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        cancel: &AtomicBool,
    ) -> Result<(CopyOutcome, PathBuf)> {
        let mut reader = StreamReader::open(source.as_ref(), self.config.reader.clone())?;
        let range = frame_range(self.config.from, self.config.to, reader.frame_count())?;

        let header = reader.header().clone();
        let mut writer = match &self.config.config_file {
            Some(path) => StreamWriter::create_with_header(
                destination.as_ref(),
                header,
                Some(path),
                self.config.writer.clone(),
            )?,
            None => {
                let source = RecordedSource {
                    header,
                    blob: reader.configuration_data()?,
                };
                StreamWriter::create(destination.as_ref(), &source, self.config.writer.clone())?
            }
        };
        let first_file = writer.first_file_name();
        info!(
            "Copying frames {}..={} to {}",
            range.start(),
            range.end(),
            first_file.display()
        );

        reader.go_to_image(*range.start())?;
        let mut copied = 0u32;
        for ordinal in range.clone() {
            if cancel.load(Ordering::Relaxed) {
                writer.close()?;
                info!("Copy cancelled after {} frames", copied);
                return Ok((CopyOutcome::Aborted { frames: copied }, first_file));
            }
            let (frame, adjustment) = reader.read_next_with_adjustment()?;
            if frame.image.is_empty_payload() {
                warn!("Frame {} has no payload; copied as is", ordinal);
            }
            let carried = self.config.carry_adjustments.then_some(&adjustment);
            let progress = writer.append_frame(&frame.image, carried)?;
            copied += 1;
            if copied % PROGRESS_INTERVAL == 0 {
                info!(
                    "Copied {} frames ({:.1} MB)",
                    copied, progress.megabytes_written
                );
            }
        }

        writer.close()?;
        reader.close()?;
        info!("Copy complete: {} frames", copied);
        Ok((CopyOutcome::Completed { frames: copied }, first_file))
    }
}
