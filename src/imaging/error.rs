use thiserror::Error;

use crate::stream::format::DataFormat;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Failed to decode {format} payload: {reason}")]
    DecodeError { format: DataFormat, reason: String },

    #[error("Failed to encode frame: {0}")]
    EncodeError(String),

    #[error("Failed to write TIFF image: {0}")]
    TiffError(String),

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(DataFormat),

    #[error("Demosaic failed: {0}")]
    DemosaicError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImagingError>;
