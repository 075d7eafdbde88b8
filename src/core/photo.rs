use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::policy::GroupingStrategy;

/// Opaque, unique photo identifier supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhotoId(pub String);

impl PhotoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Caller-owned input photo. The uri is an opaque locator; the CLI uses
/// file paths, other callers may use media-store uris.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub uri: String,
}

impl Photo {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: PhotoId::new(id),
            uri: uri.into(),
        }
    }
}

/// Downsampled, JPEG-encoded working copy of a photo for one clustering
/// pass. Recomputed whenever the pass resolution changes. The compressed
/// artifact lives in a pass-scoped temp directory and is released when the
/// owning `ThumbnailBatch` is dropped.
#[derive(Debug, Clone)]
pub struct ThumbnailEntry {
    pub id: PhotoId,
    pub original_uri: String,
    pub compressed_path: PathBuf,
    pub payload: Vec<u8>,
}

/// A photo mapped back to its original (uncompressed) uri for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRef {
    pub id: PhotoId,
    pub uri: String,
}

impl From<&ThumbnailEntry> for PhotoRef {
    fn from(entry: &ThumbnailEntry) -> Self {
        Self {
            id: entry.id.clone(),
            uri: entry.original_uri.clone(),
        }
    }
}

pub type PhotoGroup = Vec<PhotoRef>;

/// A photo excluded from a run because its source image could not be
/// decoded or resized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedPhoto {
    pub id: PhotoId,
    pub uri: String,
    pub reason: String,
}

/// Per-run diagnostics. Oracle failures never abort a run; they are
/// absorbed as "not similar" and surfaced here.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub strategy: GroupingStrategy,
    pub threshold: f64,
    pub oracle_calls: usize,
    pub cache_hits: usize,
    pub failed_comparisons: usize,
    pub skipped: Vec<SkippedPhoto>,
    pub elapsed_ms: u64,
}

/// Final result of one grouping run: every group has at least two members,
/// every input photo appears in at most one group or in `report.skipped`.
#[derive(Debug, Clone, Serialize)]
pub struct FinalPartition {
    pub groups: Vec<PhotoGroup>,
    pub report: RunReport,
}
