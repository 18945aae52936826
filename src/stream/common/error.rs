use std::path::PathBuf;

use thiserror::Error;

use crate::imaging::ImagingError;

/// Broad category of a [`StreamError`], so callers can pick a recovery
/// strategy without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller misuse: bad ordinal, mismatched frame, closed session.
    Usage,
    /// The named file does not exist.
    NotFound,
    /// The container is structurally damaged.
    Corruption,
    /// Not enough disk space; the session stays usable.
    ResourceExhausted,
    /// Unsaved adjustment replacements would be lost.
    OverlayLoss,
    /// Any other I/O failure.
    Io,
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream file not found: {0}")]
    NotFound(PathBuf),

    #[error("Corrupted stream {path}: {reason}")]
    CorruptedStream { path: PathBuf, reason: String },

    #[error("Image {ordinal} is out of range (stream has {count} images)")]
    ImageOutOfRange { ordinal: u32, count: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Frame {field} mismatch: stream expects {expected}, frame has {found}")]
    FormatMismatch {
        field: &'static str,
        expected: String,
        found: String,
    },

    #[error("Invalid stream file name: {0}")]
    InvalidStreamFileName(String),

    #[error("Stream already initialized for writing: {0}")]
    AlreadyInitialized(PathBuf),

    #[error("Stream session is closed")]
    SessionClosed,

    #[error("Frame of {record_size} bytes does not fit in a segment of at most {max_segment_size} bytes")]
    FrameTooLarge {
        record_size: u64,
        max_segment_size: u64,
    },

    #[error("Not enough disk space: need {required} bytes, {available} available")]
    DiskNotEnoughSpace { required: u64, available: u64 },

    #[error("{count} adjustment replacement(s) have not been saved")]
    UnflushedAdjustments { count: usize },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Background worker failed: {0}")]
    WorkerFailed(String),

    #[error("Imaging engine error: {0}")]
    Imaging(#[from] ImagingError),

    #[error("Adjustment sidecar error: {0}")]
    Sidecar(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StreamError::CorruptedStream {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::NotFound(_) => ErrorKind::NotFound,
            StreamError::CorruptedStream { .. } => ErrorKind::Corruption,
            StreamError::DiskNotEnoughSpace { .. } => ErrorKind::ResourceExhausted,
            StreamError::UnflushedAdjustments { .. } => ErrorKind::OverlayLoss,
            StreamError::Io(_)
            | StreamError::Sidecar(_)
            | StreamError::WorkerFailed(_)
            | StreamError::Imaging(ImagingError::IoError(_)) => ErrorKind::Io,
            StreamError::ImageOutOfRange { .. }
            | StreamError::InvalidArgument(_)
            | StreamError::FormatMismatch { .. }
            | StreamError::InvalidStreamFileName(_)
            | StreamError::AlreadyInitialized(_)
            | StreamError::SessionClosed
            | StreamError::FrameTooLarge { .. }
            | StreamError::UnsupportedFormat(_)
            | StreamError::Imaging(_) => ErrorKind::Usage,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corruption
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinguishable() {
        let corrupt = StreamError::corrupted("a-000000.pgr", "bad signature");
        let missing = StreamError::NotFound(PathBuf::from("a-000000.pgr"));
        let disk = StreamError::DiskNotEnoughSpace {
            required: 10,
            available: 1,
        };

        assert_eq!(corrupt.kind(), ErrorKind::Corruption);
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(disk.kind(), ErrorKind::ResourceExhausted);
        assert!(corrupt.is_corruption());
        assert!(!missing.is_corruption());
    }

    #[test]
    fn test_io_error_converts() {
        let err: StreamError = std::io::Error::other("boom").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_imaging_errors_are_usage_unless_io() {
        let encode: StreamError = ImagingError::EncodeError("short sensor".to_string()).into();
        let io: StreamError = ImagingError::IoError(std::io::Error::other("boom")).into();
        assert_eq!(encode.kind(), ErrorKind::Usage);
        assert_eq!(io.kind(), ErrorKind::Io);
    }
}
