use thiserror::Error;

use crate::imaging::ImagingError;
use crate::stream::{ErrorKind, StreamError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Imaging(#[from] ImagingError),

    #[error("Frame range {from}..={to} is empty for a stream of {count} frames")]
    InvalidRange { from: u32, to: u32, count: u32 },

    #[error("Source stream holds no frames")]
    EmptyStream,

    #[error("Failed to write output file: {0}")]
    OutputWriteError(String),
}

impl PipelineError {
    /// Stream error category, if the failure came from the container.
    pub fn stream_kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::Stream(e) => Some(e.kind()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
