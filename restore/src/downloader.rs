use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use mapping_store::{MappingStore, PathFilterSet};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vault_client::{ArchiveService, ByteRange, JobCache, JobParams, RetryWrapper, VaultClientError};

use crate::config::RestoreConfig;
use crate::console::{Console, format_byte_count};
use crate::context::RestorationContext;
use crate::error::Result;
use crate::materializer::Materializer;
use crate::planner::{ArchivePartRetrieval, PartCandidate, RetrievalPlanner, plan_retrievals};
use crate::rate_budget::RateBudget;

/// Restores every filtered mapping record into the destination tree.
///
/// Plans retrievals against the byte budget, initiates jobs (reusing cached
/// live ones), polls them to completion, streams their output window by
/// window into staging, and materializes each archive once its last byte
/// lands. Missing archives are skipped; filesystem errors abort the run.
pub async fn download_archives(
    ctx: &RestorationContext,
    store: &dyn MappingStore,
    filters: &PathFilterSet,
    config: &RestoreConfig,
    console: &mut Console,
) -> Result<()> {
    let records = store.file_records(filters)?;
    tokio::fs::create_dir_all(&ctx.dest_dir).await?;

    let outcome = plan_retrievals(&records, &ctx.dest_dir, config.archives_retrieval_max_size)?;
    console.info(&format!("{} to restore", format_byte_count(outcome.total_bytes)));

    let mut materializer = Materializer::new(ctx.dest_dir.clone());
    for record in &outcome.empty_targets {
        materializer.materialize_empty(record).await?;
    }
    for plan in &outcome.already_staged {
        materializer.register(plan);
        materializer.finalize(&plan.archive_id).await?;
    }
    for plan in outcome.planner.remaining_archives() {
        materializer.register(plan);
    }

    let mut download_loop = DownloadLoop {
        service: ctx.service.clone(),
        vault: ctx.vault.clone(),
        config,
        budget: RateBudget::new(config.speed_bytes_per_sec, config.retrieval_latency),
        job_cache: JobCache::open(ctx.job_cache_path())?,
        planner: outcome.planner,
        materializer,
        pending: VecDeque::new(),
    };
    download_loop.run().await
}

/// The two cooperating pipeline stages collapsed into one state machine:
/// each turn tops up retrieval initiations as far as the budget and the
/// part-list ceiling allow, then advances the head part by one download
/// window. Budget is released as bytes drain, so fresh initiations overlap
/// the draining of earlier parts.
struct DownloadLoop<'a> {
    service: Arc<dyn ArchiveService>,
    vault: String,
    config: &'a RestoreConfig,
    budget: RateBudget,
    job_cache: JobCache,
    planner: RetrievalPlanner,
    materializer: Materializer,
    pending: VecDeque<ArchivePartRetrieval>,
}

impl DownloadLoop<'_> {
    async fn run(&mut self) -> Result<()> {
        loop {
            self.initiate_ready_parts().await?;
            let Some(part) = self.pending.pop_front() else {
                if self.planner.is_exhausted() {
                    break;
                }
                continue;
            };
            self.download_part(part).await?;
        }
        Ok(())
    }

    /// Initiates retrievals until the budget denies, the part list fills, or
    /// planning is exhausted. When nothing is pending the head part is
    /// force-reserved so a budget smaller than one part cannot stall the run.
    async fn initiate_ready_parts(&mut self) -> Result<()> {
        while self.pending.len() < self.config.archive_part_retrieval_list_max_size {
            let candidate = match self.planner.next_candidate(self.budget.available_bytes()) {
                Some(candidate) => {
                    if !self.budget.try_reserve(candidate.range.len()) {
                        // The planner sized the part to the available budget.
                        break;
                    }
                    candidate
                },
                None if self.pending.is_empty() && !self.planner.is_exhausted() => {
                    // Nothing in flight and nothing fits: take the head part
                    // whole rather than waiting on budget that will never come.
                    let Some(candidate) = self.planner.next_candidate(u64::MAX) else {
                        break;
                    };
                    self.budget.force_reserve(candidate.range.len());
                    candidate
                },
                None => break,
            };

            match self.initiate_part(&candidate).await {
                Ok(job_id) => {
                    self.planner.advance(candidate.range.len());
                    debug!(archive_id = %candidate.archive_id, range = %candidate.range, job_id, "Part in retrieval");
                    self.pending.push_back(ArchivePartRetrieval {
                        archive_id: candidate.archive_id,
                        range: candidate.range,
                        job_id,
                    });
                },
                Err(VaultClientError::ArchiveNotFound(_)) => {
                    warn!(archive_id = %candidate.archive_id, "Archive not found at the source; skipping its files");
                    self.budget.release(candidate.range.len());
                    self.fail_archive(&candidate.archive_id);
                },
                Err(e) => {
                    self.budget.release(candidate.range.len());
                    return Err(e.into());
                },
            }
        }
        Ok(())
    }

    /// Looks the part up in the job cache, falling back to a fresh
    /// `initiate_job` (retried on transient errors).
    async fn initiate_part(
        &mut self,
        candidate: &PartCandidate,
    ) -> std::result::Result<String, VaultClientError> {
        if let Some(job_id) = self.job_cache.lookup(&candidate.archive_id, candidate.range) {
            info!(archive_id = %candidate.archive_id, range = %candidate.range, job_id, "Reusing cached retrieval job");
            return Ok(job_id.to_string());
        }

        let service = self.service.clone();
        let vault = self.vault.clone();
        let archive_id = candidate.archive_id.clone();
        let range = candidate.range;
        let job_id = RetryWrapper::new("initiate_job")
            .with_max_attempts(self.config.retry_max_attempts)
            .with_base_delay(self.config.retry_base_delay)
            .run(move || {
                let service = service.clone();
                let vault = vault.clone();
                let archive_id = archive_id.clone();
                async move {
                    service
                        .initiate_job(
                            &vault,
                            JobParams::ArchiveRetrieval {
                                archive_id,
                                byte_range: Some(range),
                            },
                        )
                        .await
                }
            })
            .await?;

        self.job_cache.insert(&candidate.archive_id, candidate.range, &job_id)?;
        Ok(job_id)
    }

    /// Drops every trace of an archive whose retrieval failed terminally.
    /// Staged bytes stay on disk for a later run against a repaired vault.
    fn fail_archive(&mut self, archive_id: &str) {
        self.planner.fail_archive(archive_id);
        let reclaimed: u64 = self
            .pending
            .iter()
            .filter(|p| p.archive_id == archive_id)
            .map(|p| p.range.len())
            .sum();
        self.pending.retain(|p| p.archive_id != archive_id);
        self.budget.release(reclaimed);
        self.materializer.abandon(archive_id);
    }

    /// Streams one part into staging, one download window at a time,
    /// interleaving fresh initiations as budget drains free.
    async fn download_part(&mut self, mut part: ArchivePartRetrieval) -> Result<()> {
        if !self.wait_until_completed(&mut part).await? {
            // The archive vanished while its cached job was being replaced.
            return Ok(());
        }

        let total = part.range.len();
        let mut offset = 0u64;
        while offset < total {
            let step = self.download_window_bytes().min(total - offset);
            let sub_range = ByteRange::from_offset_len(offset, step);

            let service = self.service.clone();
            let vault = self.vault.clone();
            let job_id = part.job_id.clone();
            let started = Instant::now();
            let body = RetryWrapper::new("get_job_output")
                .with_max_attempts(self.config.retry_max_attempts)
                .with_base_delay(self.config.retry_base_delay)
                .run(move || {
                    let service = service.clone();
                    let vault = vault.clone();
                    let job_id = job_id.clone();
                    async move { service.get_job_output(&vault, &job_id, Some(sub_range)).await }
                })
                .await
                .map_err(crate::error::RestoreError::from)?;

            self.materializer
                .write_chunk(&part.archive_id, part.range.start + offset, body, step)
                .await?;

            offset += step;
            self.budget.release(step);
            if self.config.speed_auto_update {
                self.update_speed(step, started.elapsed());
            }
            self.initiate_ready_parts().await?;
        }

        self.job_cache.remove(&part.archive_id, part.range)?;
        if self.materializer.is_complete(&part.archive_id) {
            self.materializer.finalize(&part.archive_id).await?;
        }
        Ok(())
    }

    /// Polls `describe_job` until the part's job completes. A job-not-found
    /// answer means the cache went stale: the entry is dropped and the part
    /// re-initiated. Returns false when the archive itself is gone.
    async fn wait_until_completed(&mut self, part: &mut ArchivePartRetrieval) -> Result<bool> {
        loop {
            let service = self.service.clone();
            let vault = self.vault.clone();
            let job_id = part.job_id.clone();
            let described = RetryWrapper::new("describe_job")
                .with_max_attempts(self.config.retry_max_attempts)
                .with_base_delay(self.config.retry_base_delay)
                .run(move || {
                    let service = service.clone();
                    let vault = vault.clone();
                    let job_id = job_id.clone();
                    async move { service.describe_job(&vault, &job_id).await }
                })
                .await;

            match described {
                Ok(description) if description.completed => return Ok(true),
                Ok(_) => sleep(self.config.job_poll_interval).await,
                Err(VaultClientError::JobNotFound(_)) => {
                    warn!(job_id = %part.job_id, archive_id = %part.archive_id, "Cached retrieval job was not found; initiating a new one");
                    self.job_cache.remove(&part.archive_id, part.range)?;
                    let candidate = PartCandidate {
                        archive_id: part.archive_id.clone(),
                        range: part.range,
                    };
                    match self.initiate_part(&candidate).await {
                        Ok(job_id) => part.job_id = job_id,
                        Err(VaultClientError::ArchiveNotFound(_)) => {
                            warn!(archive_id = %part.archive_id, "Archive not found at the source; skipping its files");
                            self.budget.release(part.range.len());
                            self.fail_archive(&part.archive_id);
                            return Ok(false);
                        },
                        Err(e) => return Err(e.into()),
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn download_window_bytes(&self) -> u64 {
        self.budget
            .speed_bytes_per_sec()
            .saturating_mul(self.config.download_window.as_secs())
            .max(1)
    }

    fn update_speed(&mut self, bytes: u64, elapsed: std::time::Duration) {
        let secs = elapsed.as_secs_f64();
        if secs < 1e-6 {
            return;
        }
        let observed = (bytes as f64 / secs) as u64;
        if observed > 0 {
            debug!(observed, "Adjusting budget to observed throughput");
            self.budget.set_speed(observed);
        }
    }
}
