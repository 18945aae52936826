use crate::imaging::ImagingEngine;
use crate::stream::adjustment::FullAdjustment;
use crate::stream::common::error::{Result, StreamError};
use crate::stream::format::{DataFormat, INDEX_CAPACITY, PREAMBLE_SIZE};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Hand frames to a background worker instead of writing inline.
    pub asynchronous: bool,
    /// Frames the async queue holds before `append_frame` blocks.
    pub queue_depth: usize,
    pub index_stride: u32,
    pub index_capacity: usize,
    pub max_segment_size: u64,
    /// Record alignment. `None` probes the filesystem.
    pub sector_size: Option<u32>,
    /// Free space that must remain after every write. 0 disables the check.
    pub min_free_space: u64,
    /// Overlay defaults. `None` uses the default for the stream's format.
    pub default_adjustment: Option<FullAdjustment>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            asynchronous: false,
            queue_depth: 4,
            index_stride: 50,
            index_capacity: INDEX_CAPACITY,
            max_segment_size: 2 * GIB,
            sector_size: None,
            min_free_space: 2 * GIB,
            default_adjustment: None,
        }
    }
}

impl WriterConfig {
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(StreamError::InvalidArgument(
                "queue depth must be at least 1".to_string(),
            ));
        }
        if self.index_stride == 0 {
            return Err(StreamError::InvalidArgument(
                "index stride must be at least 1".to_string(),
            ));
        }
        if self.index_capacity == 0 || self.index_capacity > INDEX_CAPACITY {
            return Err(StreamError::InvalidArgument(format!(
                "index capacity must be in 1..={INDEX_CAPACITY}"
            )));
        }
        // Offsets in the index table are 32-bit.
        if self.max_segment_size <= PREAMBLE_SIZE || self.max_segment_size > u32::MAX as u64 {
            return Err(StreamError::InvalidArgument(format!(
                "max segment size {} must be in {}..={}",
                self.max_segment_size,
                PREAMBLE_SIZE + 1,
                u32::MAX
            )));
        }
        if let Some(sector) = self.sector_size {
            if sector == 0 || !sector.is_power_of_two() {
                return Err(StreamError::InvalidArgument(format!(
                    "sector size {sector} is not a power of two"
                )));
            }
        }
        if let Some(adjustment) = &self.default_adjustment {
            adjustment.validate().map_err(StreamError::InvalidArgument)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct WriterConfigBuilder {
    asynchronous: Option<bool>,
    queue_depth: Option<usize>,
    index_stride: Option<u32>,
    index_capacity: Option<usize>,
    max_segment_size: Option<u64>,
    sector_size: Option<Option<u32>>,
    min_free_space: Option<u64>,
    default_adjustment: Option<Option<FullAdjustment>>,
}

impl WriterConfigBuilder {
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = Some(asynchronous);
        self
    }

    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    pub fn index_stride(mut self, stride: u32) -> Self {
        self.index_stride = Some(stride);
        self
    }

    pub fn index_capacity(mut self, capacity: usize) -> Self {
        self.index_capacity = Some(capacity);
        self
    }

    pub fn max_segment_size(mut self, bytes: u64) -> Self {
        self.max_segment_size = Some(bytes);
        self
    }

    pub fn sector_size(mut self, sector_size: Option<u32>) -> Self {
        self.sector_size = Some(sector_size);
        self
    }

    pub fn min_free_space(mut self, bytes: u64) -> Self {
        self.min_free_space = Some(bytes);
        self
    }

    pub fn default_adjustment(mut self, adjustment: Option<FullAdjustment>) -> Self {
        self.default_adjustment = Some(adjustment);
        self
    }

    /// Takes the overlay defaults from the engine that will process the
    /// frames.
    pub fn default_adjustment_from(self, engine: &dyn ImagingEngine, format: DataFormat) -> Self {
        self.default_adjustment(Some(engine.default_adjustment_for(format)))
    }

    pub fn build(self) -> WriterConfig {
        let default = WriterConfig::default();
        WriterConfig {
            asynchronous: self.asynchronous.unwrap_or(default.asynchronous),
            queue_depth: self.queue_depth.unwrap_or(default.queue_depth),
            index_stride: self.index_stride.unwrap_or(default.index_stride),
            index_capacity: self.index_capacity.unwrap_or(default.index_capacity),
            max_segment_size: self.max_segment_size.unwrap_or(default.max_segment_size),
            sector_size: self.sector_size.unwrap_or(default.sector_size),
            min_free_space: self.min_free_space.unwrap_or(default.min_free_space),
            default_adjustment: self.default_adjustment.unwrap_or(default.default_adjustment),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Prefetch upcoming frames on a background thread.
    pub asynchronous: bool,
    pub prefetch_depth: usize,
    /// Largest payload a record may declare.
    pub max_payload_size: u32,
    /// Rebuild counts and index tables by walking records when the
    /// headers disagree with the file contents.
    pub recover_truncated: bool,
    /// Defaults for a sidecar created on open. `None` uses the default
    /// for the stream's format.
    pub default_adjustment: Option<FullAdjustment>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            asynchronous: false,
            prefetch_depth: 4,
            max_payload_size: 256 * 1024 * 1024,
            recover_truncated: false,
            default_adjustment: None,
        }
    }
}

impl ReaderConfig {
    pub fn builder() -> ReaderConfigBuilder {
        ReaderConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct ReaderConfigBuilder {
    asynchronous: Option<bool>,
    prefetch_depth: Option<usize>,
    max_payload_size: Option<u32>,
    recover_truncated: Option<bool>,
    default_adjustment: Option<Option<FullAdjustment>>,
}

impl ReaderConfigBuilder {
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = Some(asynchronous);
        self
    }

    pub fn prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = Some(depth);
        self
    }

    pub fn max_payload_size(mut self, bytes: u32) -> Self {
        self.max_payload_size = Some(bytes);
        self
    }

    pub fn recover_truncated(mut self, recover: bool) -> Self {
        self.recover_truncated = Some(recover);
        self
    }

    pub fn default_adjustment(mut self, adjustment: Option<FullAdjustment>) -> Self {
        self.default_adjustment = Some(adjustment);
        self
    }

    pub fn default_adjustment_from(self, engine: &dyn ImagingEngine, format: DataFormat) -> Self {
        self.default_adjustment(Some(engine.default_adjustment_for(format)))
    }

    pub fn build(self) -> ReaderConfig {
        let default = ReaderConfig::default();
        ReaderConfig {
            asynchronous: self.asynchronous.unwrap_or(default.asynchronous),
            prefetch_depth: self.prefetch_depth.unwrap_or(default.prefetch_depth).max(1),
            max_payload_size: self.max_payload_size.unwrap_or(default.max_payload_size),
            recover_truncated: self.recover_truncated.unwrap_or(default.recover_truncated),
            default_adjustment: self.default_adjustment.unwrap_or(default.default_adjustment),
        }
    }
}
