use std::time::Duration;

/// Tunables for the download orchestrator. Defaults suit production pacing
/// against the real store; tests shrink the waits and ceilings.
#[derive(Debug, Clone)]
pub struct RestoreConfig {
    /// Target download throughput. Sizes the retrieval budget and the
    /// job-output read window.
    pub speed_bytes_per_sec: u64,

    /// Measure observed throughput while downloading and resize the budget
    /// accordingly.
    pub speed_auto_update: bool,

    /// Ceiling on the byte length of a single retrieval job.
    pub archives_retrieval_max_size: u64,

    /// Ceiling on how many initiated-but-undrained parts may be queued.
    pub archive_part_retrieval_list_max_size: usize,

    /// Time the store takes to surface a retrieval. The budget pre-schedules
    /// this much lead time worth of bytes.
    pub retrieval_latency: Duration,

    /// Pacing window for job-output reads; one `get_job_output` call covers
    /// at most `speed × window` bytes.
    pub download_window: Duration,

    /// Sleep between `describe_job` polls while a job is pending.
    pub job_poll_interval: Duration,

    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            speed_bytes_per_sec: 1024 * 1024,
            speed_auto_update: true,
            archives_retrieval_max_size: 256 * 1024 * 1024,
            archive_part_retrieval_list_max_size: 16,
            retrieval_latency: Duration::from_secs(4 * 3600),
            download_window: Duration::from_secs(5 * 60),
            job_poll_interval: Duration::from_secs(5 * 60),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

impl RestoreConfig {
    /// Applies `GLACIER_RESTORE_*` environment overrides to the defaults.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_u64("GLACIER_RESTORE_SPEED_BYTES_PER_SEC") {
            self.speed_bytes_per_sec = v;
        }
        if let Some(v) = env_bool("GLACIER_RESTORE_SPEED_AUTO_UPDATE") {
            self.speed_auto_update = v;
        }
        if let Some(v) = env_u64("GLACIER_RESTORE_RETRIEVAL_MAX_SIZE") {
            self.archives_retrieval_max_size = v;
        }
        if let Some(v) = env_u64("GLACIER_RESTORE_PART_LIST_MAX_SIZE") {
            self.archive_part_retrieval_list_max_size = v as usize;
        }
        if let Some(v) = env_u64("GLACIER_RESTORE_JOB_POLL_INTERVAL_SECS") {
            self.job_poll_interval = Duration::from_secs(v);
        }
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    match std::env::var(name).ok()?.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
