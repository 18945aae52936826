use std::path::{Path, PathBuf};

use crate::stream::common::error::{Result, StreamError};

pub const SEGMENT_EXTENSION: &str = "pgr";
pub const MAX_GENERATION: u32 = 999;
pub const MAX_SEGMENT_INDEX: u32 = 999;

/// One segment file name, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentName {
    /// Directory plus stem, without the numeric suffix.
    pub base: PathBuf,
    pub generation: u32,
    pub index: u32,
}

impl SegmentName {
    pub fn new(base: impl Into<PathBuf>, generation: u32, index: u32) -> Self {
        Self {
            base: base.into(),
            generation,
            index,
        }
    }

    pub fn path(&self) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(format!(
            "-{:03}{:03}.{SEGMENT_EXTENSION}",
            self.generation, self.index
        ));
        PathBuf::from(name)
    }

    /// The same generation's segment `index`.
    pub fn with_index(&self, index: u32) -> Self {
        Self::new(self.base.clone(), self.generation, index)
    }

    /// `<base>-<GGG>` without extension, shared by the generation's
    /// segments and its adjustment sidecar.
    pub fn generation_stem(&self) -> PathBuf {
        let mut name = self.base.as_os_str().to_os_string();
        name.push(format!("-{:03}", self.generation));
        PathBuf::from(name)
    }

    /// Splits `path` into base, generation and index. Returns `None` when
    /// the file stem carries no `-GGGNNN` suffix.
    pub fn parse(path: &Path) -> Option<Self> {
        let stem = strip_extension(path);
        let text = stem.to_str()?;
        let (base, suffix) = text.rsplit_once('-')?;
        if suffix.len() != 6 || !suffix.bytes().all(|b| b.is_ascii_digit()) || base.is_empty() {
            return None;
        }
        let generation = suffix[..3].parse().ok()?;
        let index = suffix[3..].parse().ok()?;
        Some(Self::new(base, generation, index))
    }

    /// Resolves any member (or the bare base name) of a stream to its
    /// first segment.
    pub fn resolve_for_read(path: &Path) -> Result<Self> {
        if let Some(name) = Self::parse(path) {
            if !path.exists() {
                return Err(StreamError::NotFound(path.to_path_buf()));
            }
            let first = name.with_index(0);
            if !first.path().exists() {
                return Err(StreamError::corrupted(
                    path,
                    format!("first segment {} is missing", first.path().display()),
                ));
            }
            return Ok(first);
        }

        let first = Self::new(strip_extension(path), 0, 0);
        if first.path().exists() {
            Ok(first)
        } else {
            Err(StreamError::NotFound(path.to_path_buf()))
        }
    }

    /// Consecutive existing segments starting at this one.
    pub fn discover(&self) -> Vec<PathBuf> {
        (self.index..=MAX_SEGMENT_INDEX)
            .map(|index| self.with_index(index).path())
            .take_while(|path| path.exists())
            .collect()
    }

    /// First free generation for a new recording on `requested`. A `.pgr`
    /// extension and a six-digit suffix are stripped first, so passing an
    /// existing segment name starts the next generation.
    pub fn next_generation(requested: &Path) -> Result<Self> {
        let base = match Self::parse(requested) {
            Some(name) => name.base,
            None => strip_extension(requested),
        };
        if base.file_name().is_none() {
            return Err(StreamError::InvalidStreamFileName(
                requested.display().to_string(),
            ));
        }
        (0..=MAX_GENERATION)
            .map(|generation| Self::new(base.clone(), generation, 0))
            .find(|name| !name.path().exists())
            .ok_or_else(|| {
                StreamError::InvalidStreamFileName(format!(
                    "all {} generations of {} are in use",
                    MAX_GENERATION + 1,
                    base.display()
                ))
            })
    }
}

fn strip_extension(path: &Path) -> PathBuf {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case(SEGMENT_EXTENSION) => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}
