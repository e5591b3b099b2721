use std::collections::HashMap;
use std::path::PathBuf;

use mapping_store::FileRecord;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::{Result, RestoreError};
use crate::planner::ArchivePlan;

struct ArchiveState {
    declared_size: u64,
    bytes_materialized: u64,
    targets: Vec<FileRecord>,
}

/// Accumulates retrieved archive bytes in an append-only staging file at
/// `<dest>/<archiveId>` and, once the last byte lands, fans the staged
/// content out to every destination file sharing the archive.
///
/// Destination files are created only at finalization, so a crash mid-archive
/// leaves nothing but the staging file that the next run resumes from.
pub struct Materializer {
    dest_dir: PathBuf,
    states: HashMap<String, ArchiveState>,
}

impl Materializer {
    pub fn new(dest_dir: PathBuf) -> Self {
        Self {
            dest_dir,
            states: HashMap::new(),
        }
    }

    pub fn register(&mut self, plan: &ArchivePlan) {
        self.states.insert(
            plan.archive_id.clone(),
            ArchiveState {
                declared_size: plan.declared_size,
                bytes_materialized: plan.resume_offset,
                targets: plan.targets.clone(),
            },
        );
    }

    fn staging_path(&self, archive_id: &str) -> PathBuf {
        self.dest_dir.join(archive_id)
    }

    /// Appends one downloaded chunk to the staging file. `offset` is absolute
    /// within the archive and must equal the bytes already materialized;
    /// out-of-order delivery is a pipeline bug, not a recoverable condition.
    pub async fn write_chunk<R>(
        &mut self,
        archive_id: &str,
        offset: u64,
        mut body: R,
        expected_len: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let state = self
            .states
            .get_mut(archive_id)
            .ok_or_else(|| RestoreError::InternalError(format!("Unknown archive {archive_id}")))?;

        if offset != state.bytes_materialized {
            return Err(RestoreError::InternalError(format!(
                "Chunk not sequential for {archive_id}: expected offset {}, got {offset}",
                state.bytes_materialized
            )));
        }

        let staging = self.dest_dir.join(archive_id);
        let mut file = OpenOptions::new().create(true).append(true).open(&staging).await?;
        let copied = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        if copied != expected_len {
            return Err(RestoreError::InternalError(format!(
                "Job output truncated for {archive_id}: expected {expected_len} bytes at offset {offset}, got {copied}"
            )));
        }

        state.bytes_materialized += copied;
        debug!(
            archive_id,
            bytes_materialized = state.bytes_materialized,
            declared_size = state.declared_size,
            "Staged chunk"
        );
        Ok(())
    }

    pub fn is_complete(&self, archive_id: &str) -> bool {
        self.states
            .get(archive_id)
            .is_some_and(|s| s.bytes_materialized >= s.declared_size)
    }

    /// Copies the staged archive to every target in mapping-row order,
    /// truncating each to its own declared size, then drops the staging file.
    pub async fn finalize(&mut self, archive_id: &str) -> Result<()> {
        let state = self
            .states
            .remove(archive_id)
            .ok_or_else(|| RestoreError::InternalError(format!("Unknown archive {archive_id}")))?;

        let staging = self.staging_path(archive_id);
        for target in &state.targets {
            let dest = self.dest_dir.join(&target.share_name).join(&target.base_path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&staging, &dest).await?;
            // A target smaller than the archive keeps only the prefix.
            let file = OpenOptions::new().write(true).open(&dest).await?;
            file.set_len(target.file_size).await?;
        }
        fs::remove_file(&staging).await?;

        info!(archive_id, targets = state.targets.len(), "Archive materialized");
        Ok(())
    }

    /// Creates an empty destination file for a record that needs no
    /// retrieval.
    pub async fn materialize_empty(&self, record: &FileRecord) -> Result<()> {
        let dest = self.dest_dir.join(&record.share_name).join(&record.base_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::File::create(&dest).await?;
        Ok(())
    }

    /// Forgets an archive whose retrieval failed terminally. Any staged
    /// bytes stay on disk for a later run.
    pub fn abandon(&mut self, archive_id: &str) {
        self.states.remove(archive_id);
    }
}
