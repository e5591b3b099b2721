use std::path::PathBuf;
use std::sync::Arc;

use vault_client::ArchiveService;

/// Everything a restore run needs to reach the cold store and the local
/// disk. Built once by the caller and threaded through both phases.
pub struct RestorationContext {
    pub service: Arc<dyn ArchiveService>,
    pub region: String,
    /// Vault holding the backed-up archives.
    pub vault: String,
    /// Companion vault holding the mapping archive.
    pub mapping_vault: String,
    pub cache_dir: PathBuf,
    pub dest_dir: PathBuf,
}

impl RestorationContext {
    /// Where the downloaded mapping database lives.
    pub fn mapping_file_path(&self) -> PathBuf {
        self.cache_dir.join("mapping.sqlite")
    }

    /// Persisted progress of the mapping phase for this region/vault pair.
    pub fn region_vault_cache_path(&self) -> PathBuf {
        self.cache_dir.join(&self.region).join(&self.vault).join("region-vault-cache")
    }

    /// Persisted record of initiated retrieval jobs.
    pub fn job_cache_path(&self) -> PathBuf {
        self.cache_dir.join("retrieval-jobs.json")
    }
}
