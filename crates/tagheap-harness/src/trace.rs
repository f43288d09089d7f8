//! Trace fixtures.
//!
//! A fixture is a named allocate/release script with a page budget and
//! terminal expectations, serialized as JSON so traces can be committed,
//! diffed, and replayed byte-for-byte. Allocations are tracked by caller
//! chosen ids rather than raw addresses, which keeps fixtures stable across
//! layout changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tagheap_core::AllocError;

/// Default page budget for a trace: 4096 pages (16 MiB).
pub const DEFAULT_PAGE_LIMIT: usize = 4096;

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

/// Reasons a fixture cannot be loaded or replayed.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("fixture io: {0}")]
    Io(#[from] std::io::Error),
    #[error("fixture json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("op {index}: allocate reuses id {id}")]
    DuplicateId { index: usize, id: u64 },
    #[error("op {index}: release of unknown id {id}")]
    UnknownId { index: usize, id: u64 },
    #[error("op {index}: release of already released id {id}")]
    DoubleRelease { index: usize, id: u64 },
    #[error("page_limit {page_limit} overflows the pool's byte budget")]
    PageLimitTooLarge { page_limit: usize },
    #[error("heap init failed: {0}")]
    Init(#[from] AllocError),
}

/// One scripted allocator call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    /// `allocate(size)`, with the result tracked under `id`.
    Allocate { id: u64, size: usize },
    /// `release` of the address tracked under `id`.
    Release { id: u64 },
}

/// A named, replayable allocate/release script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceFixture {
    /// Fixture identifier.
    pub name: String,
    /// What the trace exercises.
    #[serde(default)]
    pub description: String,
    /// Page budget for the pool backing this trace.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Require every chunk handed back to the provider by the end.
    #[serde(default)]
    pub expect_all_returned: bool,
    /// The script.
    pub ops: Vec<TraceOp>,
}

impl TraceFixture {
    /// Parses a fixture from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serializes the fixture as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Loads a fixture from a file.
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// Writes the fixture to a file.
    pub fn to_file(&self, path: &Path) -> Result<(), TraceError> {
        let mut json = self.to_json()?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Checks the script's shape: each id is allocated once, and released
    /// only after its allocation and at most once.
    pub fn validate(&self) -> Result<(), TraceError> {
        let mut live = std::collections::BTreeSet::new();
        let mut seen = std::collections::BTreeSet::new();
        for (index, op) in self.ops.iter().enumerate() {
            match *op {
                TraceOp::Allocate { id, .. } => {
                    if !seen.insert(id) {
                        return Err(TraceError::DuplicateId { index, id });
                    }
                    live.insert(id);
                }
                TraceOp::Release { id } => {
                    if !live.remove(&id) {
                        if seen.contains(&id) {
                            return Err(TraceError::DoubleRelease { index, id });
                        }
                        return Err(TraceError::UnknownId { index, id });
                    }
                }
            }
        }
        Ok(())
    }
}
