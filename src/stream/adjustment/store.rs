use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::stream::adjustment::types::FullAdjustment;
use crate::stream::common::error::{Result, StreamError};

pub const SIDECAR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SidecarFile {
    version: u32,
    frame_count: u32,
    defaults: FullAdjustment,
    frames: BTreeMap<u32, FullAdjustment>,
}

/// Write-back cache over the adjustment sidecar of one generation.
///
/// Lookups fall through pending replacements, then persisted records,
/// then the stream-wide defaults. Pending replacements form the dirty set.
#[derive(Debug)]
pub struct OverlayStore {
    path: PathBuf,
    defaults: FullAdjustment,
    frame_count: u32,
    persisted: BTreeMap<u32, FullAdjustment>,
    pending: BTreeMap<u32, FullAdjustment>,
}

impl OverlayStore {
    /// Empty store that has not touched the disk yet.
    pub fn new(path: impl Into<PathBuf>, defaults: FullAdjustment) -> Self {
        Self {
            path: path.into(),
            defaults,
            frame_count: 0,
            persisted: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Loads the sidecar at `path`, or returns `None` if there is none.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let sidecar: SidecarFile = serde_json::from_reader(BufReader::new(file))?;
        if sidecar.version > SIDECAR_VERSION {
            return Err(StreamError::UnsupportedFormat(format!(
                "adjustment sidecar version {} in {}",
                sidecar.version,
                path.display()
            )));
        }
        debug!(
            "Loaded {} adjustment record(s) from {}",
            sidecar.frames.len(),
            path.display()
        );
        Ok(Some(Self {
            path: path.to_path_buf(),
            defaults: sidecar.defaults,
            frame_count: sidecar.frame_count,
            persisted: sidecar.frames,
            pending: BTreeMap::new(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn defaults(&self) -> &FullAdjustment {
        &self.defaults
    }

    pub fn set_frame_count(&mut self, frame_count: u32) {
        self.frame_count = frame_count;
    }

    /// Effective adjustment for `ordinal`.
    pub fn get(&self, ordinal: u32) -> &FullAdjustment {
        self.explicit(ordinal).unwrap_or(&self.defaults)
    }

    /// Adjustment set specifically for `ordinal`, if any.
    pub fn explicit(&self, ordinal: u32) -> Option<&FullAdjustment> {
        self.pending
            .get(&ordinal)
            .or_else(|| self.persisted.get(&ordinal))
    }

    pub fn has_explicit_entries(&self) -> bool {
        !self.pending.is_empty() || !self.persisted.is_empty()
    }

    /// Replaces the record for `ordinal` in memory only.
    pub fn replace(&mut self, ordinal: u32, adjustment: FullAdjustment) {
        self.pending.insert(ordinal, adjustment);
    }

    pub fn dirty_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drops unsaved replacements for frames at or past `frame_count`.
    pub fn truncate(&mut self, frame_count: u32) {
        self.pending.retain(|&ordinal, _| ordinal < frame_count);
    }

    /// Persists every record and clears the dirty set. Returns the number
    /// of replacements that were saved.
    pub fn flush(&mut self) -> Result<usize> {
        let saved = self.pending.len();
        let mut frames = self.persisted.clone();
        frames.extend(self.pending.iter().map(|(&k, v)| (k, v.clone())));

        let sidecar = SidecarFile {
            version: SIDECAR_VERSION,
            frame_count: self.frame_count,
            defaults: self.defaults.clone(),
            frames,
        };
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &sidecar)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        self.persisted = sidecar.frames;
        self.pending.clear();
        info!(
            "Saved {} adjustment replacement(s) to {}",
            saved,
            self.path.display()
        );
        Ok(saved)
    }

    /// Drops unsaved replacements. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
