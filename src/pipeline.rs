//! Processing pipelines built on the stream container
//!
//! Each pipeline ends in one of three ways the caller can tell apart:
//! `Ok(Completed)`, `Ok(Aborted)` after a cancellation request (partial
//! output is kept), or `Err` for a fatal stream or imaging failure.

pub mod error;
pub mod frame_export;
pub mod stream_copy;

#[cfg(test)]
mod tests;

use std::ops::RangeInclusive;

pub use error::{PipelineError, Result};
pub use frame_export::FrameExportPipeline;
pub use stream_copy::{CopyConfig, CopyConfigBuilder, StreamCopyPipeline};

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every frame in range was processed.
    Completed { frames: u32 },
    /// Stopped on request after `frames` frames.
    Aborted { frames: u32 },
}

pub type CopyOutcome = PipelineOutcome;

impl PipelineOutcome {
    pub fn frames(&self) -> u32 {
        match self {
            PipelineOutcome::Completed { frames } | PipelineOutcome::Aborted { frames } => *frames,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed { .. })
    }
}

/// Clamps an optional `[from, to]` request to a stream of `count` frames.
pub(crate) fn frame_range(from: u32, to: Option<u32>, count: u32) -> Result<RangeInclusive<u32>> {
    if count == 0 {
        return Err(PipelineError::EmptyStream);
    }
    let to = to.unwrap_or(u32::MAX).min(count - 1);
    if from > to {
        return Err(PipelineError::InvalidRange { from, to, count });
    }
    Ok(from..=to)
}
