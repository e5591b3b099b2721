mod byte_range;
mod error;
mod interface;
mod job_cache;
mod local_service;
mod retry_wrapper;

pub use byte_range::ByteRange;
pub use error::{Result, VaultClientError};
pub use interface::{ArchiveService, JobDescription, JobOutputStream, JobParams};
pub use job_cache::{CachedJob, JobCache};
pub use local_service::LocalVaultService;
pub use retry_wrapper::RetryWrapper;
