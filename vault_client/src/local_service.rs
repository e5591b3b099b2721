use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;

use crate::error::{Result, VaultClientError};
use crate::interface::{ArchiveService, JobDescription, JobOutputStream, JobParams};
use crate::ByteRange;

struct JobState {
    body: Bytes,
    polls_remaining: u32,
}

#[derive(Default)]
struct ServiceState {
    /// Archives in insertion order; the inventory document lists them in this
    /// order, so the first entry plays the mapping archive in tests.
    archives: Vec<(String, Bytes)>,
    missing: HashSet<String>,
    jobs: HashMap<String, JobState>,
    vanished_jobs: HashSet<String>,
    pending_polls: u32,
    next_job_number: u64,
    initiated: Vec<(String, JobParams)>,
}

/// In-memory stand-in for the cold store, playing the role the mock service
/// played in the original test harness.
///
/// Retrieval jobs complete after a configurable number of `describe_job`
/// polls (zero by default), job output is sliced by job-relative range, and
/// every `initiate_job` call is recorded for assertions. Archives can be
/// marked missing to exercise the not-found path, and job ids can be
/// "vanished" to exercise stale-cache recovery.
#[derive(Default)]
pub struct LocalVaultService {
    state: Mutex<ServiceState>,
}

impl LocalVaultService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_archive(&self, archive_id: impl Into<String>, content: impl Into<Bytes>) {
        let mut state = self.state.lock().unwrap();
        state.archives.push((archive_id.into(), content.into()));
    }

    /// Makes `initiate_job` fail with `ArchiveNotFound` for this archive.
    pub fn mark_missing(&self, archive_id: impl Into<String>) {
        self.state.lock().unwrap().missing.insert(archive_id.into());
    }

    /// Newly created jobs report `completed = false` for this many describe
    /// polls before completing.
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().unwrap().pending_polls = polls;
    }

    /// Installs a job directly, as if it had been initiated by an earlier
    /// process run.
    pub fn add_job(&self, job_id: impl Into<String>, body: impl Into<Bytes>) {
        self.add_job_with_polls(job_id, body, 0);
    }

    pub fn add_job_with_polls(&self, job_id: impl Into<String>, body: impl Into<Bytes>, polls: u32) {
        let mut state = self.state.lock().unwrap();
        state.jobs.insert(
            job_id.into(),
            JobState {
                body: body.into(),
                polls_remaining: polls,
            },
        );
    }

    /// Makes the store forget a job id: describes and output reads fail with
    /// `JobNotFound`.
    pub fn vanish_job(&self, job_id: impl Into<String>) {
        self.state.lock().unwrap().vanished_jobs.insert(job_id.into());
    }

    /// Every `initiate_job` call so far, in order, as `(job_id, params)`.
    pub fn initiated_jobs(&self) -> Vec<(String, JobParams)> {
        self.state.lock().unwrap().initiated.clone()
    }

    pub fn initiate_count(&self) -> usize {
        self.state.lock().unwrap().initiated.len()
    }

    fn slice_body(body: &Bytes, range: Option<ByteRange>, job_id: &str) -> Result<Bytes> {
        match range {
            None => Ok(body.clone()),
            Some(r) => {
                let end = r.end_inclusive + 1;
                if end > body.len() as u64 {
                    return Err(VaultClientError::InternalError(format!(
                        "Range {r} exceeds output of job {job_id} ({} bytes)",
                        body.len()
                    )));
                }
                Ok(body.slice(r.start as usize..end as usize))
            },
        }
    }
}

#[async_trait]
impl ArchiveService for LocalVaultService {
    async fn initiate_job(&self, _vault: &str, params: JobParams) -> Result<String> {
        let mut state = self.state.lock().unwrap();

        let body = match &params {
            JobParams::ArchiveRetrieval { archive_id, byte_range } => {
                if state.missing.contains(archive_id) {
                    return Err(VaultClientError::ArchiveNotFound(archive_id.clone()));
                }
                let content = state
                    .archives
                    .iter()
                    .find(|(id, _)| id == archive_id)
                    .map(|(_, content)| content.clone())
                    .ok_or_else(|| VaultClientError::ArchiveNotFound(archive_id.clone()))?;
                match byte_range {
                    None => content,
                    Some(r) => Self::slice_body(&content, Some(*r), archive_id)?,
                }
            },
            JobParams::InventoryRetrieval { limit, .. } => {
                let entries: Vec<_> = state
                    .archives
                    .iter()
                    .take(*limit as usize)
                    .map(|(id, content)| json!({"ArchiveId": id, "Size": content.len()}))
                    .collect();
                Bytes::from(serde_json::to_vec(&json!({"ArchiveList": entries}))?)
            },
        };

        state.next_job_number += 1;
        let job_id = format!("jobId{}", state.next_job_number);
        let polls = state.pending_polls;
        state.jobs.insert(
            job_id.clone(),
            JobState {
                body,
                polls_remaining: polls,
            },
        );
        state.initiated.push((job_id.clone(), params));
        Ok(job_id)
    }

    async fn describe_job(&self, _vault: &str, job_id: &str) -> Result<JobDescription> {
        let mut state = self.state.lock().unwrap();
        if state.vanished_jobs.contains(job_id) {
            return Err(VaultClientError::JobNotFound(job_id.to_string()));
        }
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| VaultClientError::JobNotFound(job_id.to_string()))?;
        if job.polls_remaining > 0 {
            job.polls_remaining -= 1;
            Ok(JobDescription { completed: false })
        } else {
            Ok(JobDescription { completed: true })
        }
    }

    async fn get_job_output(
        &self,
        _vault: &str,
        job_id: &str,
        range: Option<ByteRange>,
    ) -> Result<JobOutputStream> {
        let state = self.state.lock().unwrap();
        if state.vanished_jobs.contains(job_id) {
            return Err(VaultClientError::JobNotFound(job_id.to_string()));
        }
        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| VaultClientError::JobNotFound(job_id.to_string()))?;
        let body = Self::slice_body(&job.body, range, job_id)?;
        Ok(Box::new(Cursor::new(body)))
    }
}
