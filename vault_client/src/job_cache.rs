use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ByteRange;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedJob {
    pub archive_id: String,
    pub range: ByteRange,
    pub job_id: String,
}

/// On-disk record of initiated retrieval jobs. A restarted process looks up
/// the live job for an `(archive, range)` pair here instead of paying the
/// store for a second retrieval of the same bytes.
///
/// Entries are removed once a part has been fully downloaded, or when the
/// store reports the job id as unknown.
#[derive(Debug)]
pub struct JobCache {
    path: PathBuf,
    entries: Vec<CachedJob>,
}

impl JobCache {
    /// Opens the cache file, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let entries = if path.exists() {
            let data = std::fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            Vec::new()
        };
        Ok(Self { path, entries })
    }

    pub fn lookup(&self, archive_id: &str, range: ByteRange) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.archive_id == archive_id && e.range == range)
            .map(|e| e.job_id.as_str())
    }

    pub fn insert(&mut self, archive_id: &str, range: ByteRange, job_id: &str) -> Result<()> {
        self.entries.push(CachedJob {
            archive_id: archive_id.to_string(),
            range,
            job_id: job_id.to_string(),
        });
        self.persist()
    }

    pub fn remove(&mut self, archive_id: &str, range: ByteRange) -> Result<()> {
        let before = self.entries.len();
        self.entries.retain(|e| e.archive_id != archive_id || e.range != range);
        if self.entries.len() != before {
            debug!(archive_id, %range, "Dropped cached retrieval job");
            self.persist()?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(&self.entries)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}
