//! Optional snapshot cache for fast bootstrap.
//!
//! Nothing in the sync pipeline depends on the cache being present or
//! correct; a failing cache only costs a full pull.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::RecordNode;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("cache entry is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

/// A page's content as last pulled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    pub page_id: String,
    pub title: String,
    pub last_edited_time: Option<String>,
    /// Hex SHA-256 of the records as JSON
    pub content_hash: String,
    pub records: Vec<RecordNode>,
}

impl CachedSnapshot {
    pub fn new(
        page_id: impl Into<String>,
        title: impl Into<String>,
        last_edited_time: Option<String>,
        records: Vec<RecordNode>,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            page_id: page_id.into(),
            title: title.into(),
            last_edited_time,
            content_hash: content_hash(&records)?,
            records,
        })
    }

    /// The stored hash still matches the stored records
    pub fn is_intact(&self) -> bool {
        content_hash(&self.records).is_ok_and(|hash| hash == self.content_hash)
    }
}

pub trait SnapshotCache {
    fn load(&self, page_id: &str) -> Result<Option<CachedSnapshot>, CacheError>;
    fn store(&self, snapshot: &CachedSnapshot) -> Result<(), CacheError>;
}

/// One JSON file per page under a directory
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, page_id: &str) -> PathBuf {
        let name: String = page_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl SnapshotCache for FileCache {
    fn load(&self, page_id: &str) -> Result<Option<CachedSnapshot>, CacheError> {
        let path = self.path_for(page_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn store(&self, snapshot: &CachedSnapshot) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let contents = serde_json::to_string_pretty(snapshot)?;
        fs::write(self.path_for(&snapshot.page_id), contents)?;
        Ok(())
    }
}

/// SHA-256 of a pulled tree, hex encoded
pub fn content_hash(records: &[RecordNode]) -> Result<String, CacheError> {
    let json = serde_json::to_vec(records)?;
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Ok(hex::encode(hasher.finalize()))
}
