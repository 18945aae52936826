//! Segment files of one stream
//!
//! A stream is split into segment files named `<base>-<GGG><NNN>.pgr`,
//! where `GGG` is the generation (one per recording run on the same base
//! name) and `NNN` the segment index within the generation. Every segment
//! starts with its own signature, header and configuration blob.

pub mod disk;
pub mod naming;

pub use naming::{SegmentName, MAX_GENERATION, MAX_SEGMENT_INDEX, SEGMENT_EXTENSION};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::debug;

use crate::stream::common::error::{Result, StreamError};

fn active_writers() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive claim on a base name for writing, released on drop.
#[derive(Debug)]
pub(crate) struct WriterClaim {
    key: PathBuf,
}

impl WriterClaim {
    pub(crate) fn acquire(base: &Path) -> Result<Self> {
        let key = std::path::absolute(base)?;
        let mut active = active_writers()
            .lock()
            .map_err(|_| StreamError::WorkerFailed("writer registry poisoned".to_string()))?;
        if !active.insert(key.clone()) {
            return Err(StreamError::AlreadyInitialized(base.to_path_buf()));
        }
        debug!("Claimed {} for writing", key.display());
        Ok(Self { key })
    }
}

impl Drop for WriterClaim {
    fn drop(&mut self) {
        if let Ok(mut active) = active_writers().lock() {
            active.remove(&self.key);
        }
    }
}
