use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::ByteRange;
use crate::error::Result;

/// Body of a retrieval job's output. Ranged reads stream so the caller can
/// keep memory bounded regardless of the window size.
pub type JobOutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Parameters for initiating an asynchronous job against a vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobParams {
    /// Retrieve a byte range of one archive. `byte_range: None` asks for the
    /// whole archive.
    ArchiveRetrieval {
        archive_id: String,
        byte_range: Option<ByteRange>,
    },
    /// List the archives of a vault. The store returns a JSON inventory
    /// document; `limit` caps the number of entries.
    InventoryRetrieval { description: String, limit: u32 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobDescription {
    pub completed: bool,
}

/// A client to the cold archive store. Jobs are asynchronous on the store
/// side: an initiated retrieval becomes downloadable hours later, and its
/// output is read by job-relative byte range.
///
/// The production implementation wraps the provider SDK and carries the
/// account id and wait tunables in its constructor; tests inject
/// [`LocalVaultService`](crate::LocalVaultService).
#[async_trait]
pub trait ArchiveService: Send + Sync {
    /// Starts a job and returns its id. Fails with
    /// [`ArchiveNotFound`](crate::VaultClientError::ArchiveNotFound) when the
    /// requested archive does not exist.
    async fn initiate_job(&self, vault: &str, params: JobParams) -> Result<String>;

    async fn describe_job(&self, vault: &str, job_id: &str) -> Result<JobDescription>;

    /// Streams a completed job's output. `range` is relative to the job's own
    /// byte range, not to the archive; `None` reads the whole output.
    async fn get_job_output(
        &self,
        vault: &str,
        job_id: &str,
        range: Option<ByteRange>,
    ) -> Result<JobOutputStream>;
}
