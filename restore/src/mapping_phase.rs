use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tracing::warn;
use vault_client::{ByteRange, JobDescription, JobParams, RetryWrapper, VaultClientError};

use crate::config::RestoreConfig;
use crate::console::Console;
use crate::context::RestorationContext;
use crate::error::{RestoreError, Result};

/// Inventory document returned by the store for the mapping vault. The
/// backup agent keeps exactly one archive there: the mapping database.
#[derive(Debug, Deserialize)]
struct InventoryDocument {
    #[serde(rename = "ArchiveList")]
    archive_list: Vec<InventoryArchive>,
}

#[derive(Debug, Deserialize)]
struct InventoryArchive {
    #[serde(rename = "ArchiveId")]
    archive_id: String,
    #[serde(rename = "Size")]
    size: u64,
}

/// Descriptor of the mapping archive discovered through the inventory job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingArchive {
    pub archive_id: String,
    pub size: u64,
}

/// Persisted progress of the mapping phase. A restart resumes the cached
/// inventory or retrieval job instead of initiating (and paying for) a new
/// one; the file is cleared once the mapping has been downloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionVaultCache {
    pub inventory_job_id: Option<String>,
    pub mapping_archive: Option<MappingArchive>,
    pub retrieval_job_id: Option<String>,
}

impl RegionVaultCache {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        match serde_json::from_slice(&data) {
            Ok(cache) => Ok(cache),
            Err(e) => {
                warn!("Discarding unreadable region vault cache: {e}");
                Ok(Self::default())
            },
        }
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec(self)
            .map_err(|e| RestoreError::InternalError(format!("Serializing region vault cache: {e}")))?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn clear(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Drives the two-job mapping phase: an inventory of the mapping vault to
/// learn the mapping archive's id and size, then a ranged retrieval of that
/// archive into `<cache>/mapping.sqlite`.
///
/// An existing mapping file is kept unless the user opts into a fresh
/// download. Both job ids are cached across restarts; stale cached jobs are
/// re-initiated with a warning.
pub async fn download_mapping_archive(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    console: &mut Console,
) -> Result<()> {
    let mapping_path = ctx.mapping_file_path();
    let cache_path = ctx.region_vault_cache_path();
    let mut cache = RegionVaultCache::load(&cache_path)?;

    if mapping_path.exists() {
        let modified: DateTime<Local> = std::fs::metadata(&mapping_path)?.modified()?.into();
        let prompt = format!(
            "Local mapping archive already exists with last modification date {}, retrieve a new mapping file ?[y/N]",
            modified.format("%Y-%m-%d %H:%M:%S")
        );
        if !console.confirm(&prompt) {
            RegionVaultCache::clear(&cache_path)?;
            return Ok(());
        }
        // Fresh download requested: cached jobs refer to the old attempt.
        cache = RegionVaultCache::default();
    }

    let archive = match cache.mapping_archive.clone() {
        Some(archive) => archive,
        None => {
            let archive = find_mapping_archive(ctx, config, console, &mut cache, &cache_path).await?;
            cache.inventory_job_id = None;
            cache.mapping_archive = Some(archive.clone());
            cache.store(&cache_path)?;
            archive
        },
    };

    retrieve_mapping_archive(ctx, config, console, &mut cache, &cache_path, &archive, &mapping_path).await?;
    console.info("Mapping archive has been downloaded");
    RegionVaultCache::clear(&cache_path)?;
    Ok(())
}

/// Runs the inventory job and picks the first archive of the returned list.
async fn find_mapping_archive(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    console: &mut Console,
    cache: &mut RegionVaultCache,
    cache_path: &Path,
) -> Result<MappingArchive> {
    let params = JobParams::InventoryRetrieval {
        description: format!("inventory {}", ctx.mapping_vault),
        limit: 2,
    };

    let cached_job_id = cache.inventory_job_id.clone();
    let job_id = run_job_to_completion(
        ctx,
        config,
        console,
        cached_job_id,
        "Job to find mapping archive id",
        "Inventory job cahed for mapping vaul was not found",
        params,
        &mut |id| {
            cache.inventory_job_id = Some(id.to_string());
            cache.store(cache_path)
        },
    )
    .await?;

    let body = read_job_output(ctx, config, &job_id).await?;
    let document: InventoryDocument =
        serde_json::from_slice(&body).map_err(|e| RestoreError::InvalidInventory(e.to_string()))?;
    let first = document
        .archive_list
        .into_iter()
        .next()
        .ok_or_else(|| RestoreError::InvalidInventory("mapping vault inventory is empty".to_string()))?;
    if first.size == 0 {
        return Err(RestoreError::InvalidInventory("mapping archive has zero size".to_string()));
    }
    Ok(MappingArchive {
        archive_id: first.archive_id,
        size: first.size,
    })
}

/// Runs the archive-retrieval job for the mapping archive and streams its
/// output into the mapping file.
#[allow(clippy::too_many_arguments)]
async fn retrieve_mapping_archive(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    console: &mut Console,
    cache: &mut RegionVaultCache,
    cache_path: &Path,
    archive: &MappingArchive,
    mapping_path: &Path,
) -> Result<()> {
    if archive.size == 0 {
        return Err(RestoreError::InvalidInventory("mapping archive has zero size".to_string()));
    }
    let params = JobParams::ArchiveRetrieval {
        archive_id: archive.archive_id.clone(),
        byte_range: Some(ByteRange::from_offset_len(0, archive.size)),
    };

    let cached_job_id = cache.retrieval_job_id.clone();
    let job_id = run_job_to_completion(
        ctx,
        config,
        console,
        cached_job_id,
        "Job to retrieve mapping archive",
        "Retrieve mapping archive job cached was not found",
        params,
        &mut |id| {
            cache.retrieval_job_id = Some(id.to_string());
            cache.store(cache_path)
        },
    )
    .await?;

    if let Some(parent) = mapping_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut body = job_output_stream(ctx, config, &job_id).await?;
    let mut file = tokio::fs::File::create(mapping_path).await?;
    tokio::io::copy(&mut body, &mut file).await?;
    file.flush().await?;
    Ok(())
}

/// Ensures a job for this phase exists and is complete, reusing a cached job
/// id when the store still knows it. Prints the phase's progress contract:
/// a start or in-progress line (none when the cached job already completed)
/// followed by the finished line.
#[allow(clippy::too_many_arguments)]
async fn run_job_to_completion(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    console: &mut Console,
    cached_job_id: Option<String>,
    label: &str,
    stale_warning: &str,
    params: JobParams,
    persist: &mut dyn FnMut(&str) -> Result<()>,
) -> Result<String> {
    let mut job_id = None;

    if let Some(id) = cached_job_id {
        match describe(ctx, config, &id).await {
            Ok(description) if description.completed => {
                console.info(&format!("Job has finished: {id}"));
                return Ok(id);
            },
            Ok(_) => {
                console.info(&format!("{label} is in progress (can last up to 4 hours): {id}"));
                job_id = Some(id);
            },
            Err(VaultClientError::JobNotFound(_)) => {
                console.warning(stale_warning);
            },
            Err(e) => return Err(e.into()),
        }
    }

    let job_id = match job_id {
        Some(id) => id,
        None => {
            let service = ctx.service.clone();
            let vault = ctx.mapping_vault.clone();
            let id = RetryWrapper::new("initiate_job")
                .with_max_attempts(config.retry_max_attempts)
                .with_base_delay(config.retry_base_delay)
                .run(move || {
                    let service = service.clone();
                    let vault = vault.clone();
                    let params = params.clone();
                    async move { service.initiate_job(&vault, params).await }
                })
                .await?;
            persist(&id)?;
            console.info(&format!("{label} has started (can last up to 4 hours): {id}"));
            id
        },
    };

    loop {
        let description = describe(ctx, config, &job_id).await?;
        if description.completed {
            break;
        }
        sleep(config.job_poll_interval).await;
    }
    console.info(&format!("Job has finished: {job_id}"));
    Ok(job_id)
}

async fn describe(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    job_id: &str,
) -> std::result::Result<JobDescription, VaultClientError> {
    let service = ctx.service.clone();
    let vault = ctx.mapping_vault.clone();
    let job_id = job_id.to_string();
    RetryWrapper::new("describe_job")
        .with_max_attempts(config.retry_max_attempts)
        .with_base_delay(config.retry_base_delay)
        .run(move || {
            let service = service.clone();
            let vault = vault.clone();
            let job_id = job_id.clone();
            async move { service.describe_job(&vault, &job_id).await }
        })
        .await
}

async fn job_output_stream(
    ctx: &RestorationContext,
    config: &RestoreConfig,
    job_id: &str,
) -> Result<vault_client::JobOutputStream> {
    let service = ctx.service.clone();
    let vault = ctx.mapping_vault.clone();
    let job_id = job_id.to_string();
    let stream = RetryWrapper::new("get_job_output")
        .with_max_attempts(config.retry_max_attempts)
        .with_base_delay(config.retry_base_delay)
        .run(move || {
            let service = service.clone();
            let vault = vault.clone();
            let job_id = job_id.clone();
            async move { service.get_job_output(&vault, &job_id, None).await }
        })
        .await?;
    Ok(stream)
}

async fn read_job_output(ctx: &RestorationContext, config: &RestoreConfig, job_id: &str) -> Result<Vec<u8>> {
    let mut stream = job_output_stream(ctx, config, job_id).await?;
    let mut body = Vec::new();
    stream.read_to_end(&mut body).await?;
    Ok(body)
}
