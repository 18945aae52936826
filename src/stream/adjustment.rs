//! Per-frame adjustment overlay
//!
//! Post-processing parameters are kept outside the segment files in a JSON
//! sidecar, one per generation, so they can be replaced after recording
//! without rewriting frames. Replacements are cached in memory and only
//! reach the sidecar on an explicit flush.

mod store;
mod types;

pub use store::{OverlayStore, SIDECAR_VERSION};
pub use types::{
    AdjustmentMode, AdjustmentParameters, AutoExposureRoi, FullAdjustment, GainMode,
    SmearCorrection, ToneMappingMode, ToneMappingParams,
};

use std::path::PathBuf;

use crate::stream::segment::SegmentName;

/// Sidecar path for the generation `name` belongs to.
pub fn sidecar_path(name: &SegmentName) -> PathBuf {
    let mut path = name.generation_stem().into_os_string();
    path.push(".json");
    PathBuf::from(path)
}
