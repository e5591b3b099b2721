//! End-to-end restore scenarios driving the full pipeline against the
//! in-memory vault service and a seeded sqlite mapping database.

use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mapping_store::{PathFilterSet, SqliteMappingStore, ZERO_SIZE_ARCHIVE_ID};
use more_asserts::assert_lt;
use restore::{Console, RestorationContext, RestoreConfig, download_archives};
use tempfile::TempDir;
use vault_client::{ByteRange, JobCache, JobParams, LocalVaultService};

/// Writer over a shared buffer so tests can read back console output.
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct TestHarness {
    _tmp: TempDir,
    service: Arc<LocalVaultService>,
    ctx: RestorationContext,
    output: Arc<Mutex<Vec<u8>>>,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let service = Arc::new(LocalVaultService::new());
        std::fs::create_dir_all(tmp.path().join("cache")).unwrap();
        std::fs::create_dir_all(tmp.path().join("dest")).unwrap();
        let ctx = RestorationContext {
            service: service.clone(),
            region: "region".to_string(),
            vault: "vault".to_string(),
            mapping_vault: "vault_mapping".to_string(),
            cache_dir: tmp.path().join("cache"),
            dest_dir: tmp.path().join("dest"),
        };
        Self {
            _tmp: tmp,
            service,
            ctx,
            output: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn mapping(&self) -> SqliteMappingStore {
        SqliteMappingStore::create(self.ctx.mapping_file_path()).unwrap()
    }

    fn console(&self) -> Console {
        Console::new(
            Box::new(SharedBuffer(self.output.clone())),
            Box::new(SharedBuffer(self.output.clone())),
            Box::new(BufReader::new("".as_bytes())),
        )
    }

    fn output(&self) -> String {
        String::from_utf8(self.output.lock().unwrap().clone()).unwrap()
    }

    fn dest(&self, rel: &str) -> PathBuf {
        self.ctx.dest_dir.join(rel)
    }

    async fn run(&self, config: &RestoreConfig, filters: &[&str]) -> restore::Result<()> {
        let store = SqliteMappingStore::open(self.ctx.mapping_file_path()).unwrap();
        let filters = PathFilterSet::new(filters).unwrap();
        let mut console = self.console();
        download_archives(&self.ctx, &store, &filters, config, &mut console).await
    }
}

/// Pacing config mirroring the original harness: observable download windows
/// of `speed × 5 min`, a small retrieval budget, instant polls and retries.
fn test_config(speed: u64, max_part_size: u64, part_list_max: usize) -> RestoreConfig {
    RestoreConfig {
        speed_bytes_per_sec: speed,
        speed_auto_update: false,
        archives_retrieval_max_size: max_part_size,
        archive_part_retrieval_list_max_size: part_list_max,
        retrieval_latency: Duration::from_secs(600),
        download_window: Duration::from_secs(300),
        job_poll_interval: Duration::from_nanos(1),
        retry_max_attempts: 3,
        retry_base_delay: Duration::from_nanos(1),
    }
}

const S_1MB: u64 = 1024 * 1024;

/// Archive-retrieval initiations as `(archive_id, range)` pairs, in order.
fn retrieval_requests(service: &LocalVaultService) -> Vec<(String, String)> {
    service
        .initiated_jobs()
        .into_iter()
        .filter_map(|(_, params)| match params {
            JobParams::ArchiveRetrieval { archive_id, byte_range } => {
                Some((archive_id, byte_range.map(|r| r.to_string()).unwrap_or_default()))
            },
            _ => None,
        })
        .collect()
}

fn assert_file_content(path: &PathBuf, expected: &[u8]) {
    let content = std::fs::read(path).unwrap_or_else(|_| panic!("missing file {}", path.display()));
    assert_eq!(content, expected, "content mismatch for {}", path.display());
}

#[tokio::test]
async fn retrieve_and_download_file_in_one_part() {
    let harness = TestHarness::new();
    harness.service.add_archive("archiveId1", "hello");
    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();

    harness.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();

    assert_eq!(
        retrieval_requests(&harness.service),
        vec![("archiveId1".to_string(), "0-4".to_string())]
    );
    assert_file_content(&harness.dest("share/data/file1.txt"), b"hello");
    assert!(!harness.dest("archiveId1").exists());
}

#[tokio::test]
async fn retrieve_and_download_file_with_multipart() {
    let harness = TestHarness::new();
    let mut content = vec![b'_'; 4194304];
    content[4194299..].copy_from_slice(b"hello");
    harness.service.add_archive("archiveId1", content.clone());

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 4194304).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_eq!(
        retrieval_requests(&harness.service),
        vec![
            ("archiveId1".to_string(), "0-2097151".to_string()),
            ("archiveId1".to_string(), "2097152-3145727".to_string()),
            ("archiveId1".to_string(), "3145728-4194303".to_string()),
        ]
    );
    assert_file_content(&harness.dest("share/data/file1.txt"), &content);
}

#[tokio::test]
async fn retrieve_and_download_two_files_with_multipart() {
    let harness = TestHarness::new();
    let mut content1 = vec![b'_'; 4194304];
    content1[4194299..].copy_from_slice(b"hello");
    let mut content2 = vec![b'_'; 2097152];
    content2[2097147..].copy_from_slice(b"olleh");
    harness.service.add_archive("archiveId1", content1.clone());
    harness.service.add_archive("archiveId2", content2.clone());

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 4194304).unwrap();
    mapping.insert_record("share", "data/file2.txt", "archiveId2", 2097152).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_eq!(
        retrieval_requests(&harness.service),
        vec![
            ("archiveId1".to_string(), "0-2097151".to_string()),
            ("archiveId1".to_string(), "2097152-3145727".to_string()),
            ("archiveId1".to_string(), "3145728-4194303".to_string()),
            ("archiveId2".to_string(), "0-1048575".to_string()),
            ("archiveId2".to_string(), "1048576-2097151".to_string()),
        ]
    );
    assert_file_content(&harness.dest("share/data/file1.txt"), &content1);
    assert_file_content(&harness.dest("share/data/file2.txt"), &content2);
}

#[tokio::test]
async fn shared_archive_materializes_identical_files() {
    let harness = TestHarness::new();
    let mut content1 = vec![b'_'; 4194304];
    content1[4194299..].copy_from_slice(b"hello");
    let mut content2 = vec![b'_'; 2097152];
    content2[2097147..].copy_from_slice(b"olleh");
    harness.service.add_archive("archiveId1", content1.clone());
    harness.service.add_archive("archiveId2", content2.clone());

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 4194304).unwrap();
    mapping.insert_record("share", "data/file2.txt", "archiveId2", 2097152).unwrap();
    mapping.insert_record("share", "data/file3.txt", "archiveId1", 4194304).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    // The shared archive is retrieved once; five parts across two archives.
    let requests = retrieval_requests(&harness.service);
    assert_eq!(requests.len(), 5);
    assert!(requests.iter().take(3).all(|(id, _)| id == "archiveId1"));
    assert!(requests.iter().skip(3).all(|(id, _)| id == "archiveId2"));

    assert_file_content(&harness.dest("share/data/file1.txt"), &content1);
    assert_file_content(&harness.dest("share/data/file2.txt"), &content2);
    assert_file_content(&harness.dest("share/data/file3.txt"), &content1);
}

#[tokio::test]
async fn retrieve_and_download_only_filtered_files() {
    let harness = TestHarness::new();
    let mapping = harness.mapping();
    let rows = [
        "data/folder/file1.txt",
        "data/folder/file2.bin",
        "data/folderno/no.bin",
        "data/no",
        "data/otherfolder/no",
        "data/otherfolder/file3.info",
        "data/otherfolder/no.txt",
        "data/file4.info",
        "data/file41.bin",
        "data/file42.bin",
        "data/filenop.bin",
        "data/iwantthis",
    ];
    for (i, base_path) in rows.iter().enumerate() {
        let archive_id = format!("archiveId{}", i + 1);
        harness.service.add_archive(archive_id.clone(), "ok");
        mapping.insert_record("share", base_path, &archive_id, 2).unwrap();
    }

    harness
        .run(
            &test_config(3496, 2 * S_1MB, 10),
            &["data/folder/*", "*.info", "data/file??.bin", "data/iwantthis"],
        )
        .await
        .unwrap();

    assert_file_content(&harness.dest("share/data/folder/file1.txt"), b"ok");
    assert_file_content(&harness.dest("share/data/folder/file2.bin"), b"ok");
    assert!(!harness.dest("share/data/folderno/no.bin").exists());
    assert!(!harness.dest("share/data/no").exists());
    assert!(!harness.dest("share/data/otherfolder/no").exists());
    assert_file_content(&harness.dest("share/data/otherfolder/file3.info"), b"ok");
    assert!(!harness.dest("share/data/otherfolder/no.txt").exists());
    assert_file_content(&harness.dest("share/data/file4.info"), b"ok");
    assert_file_content(&harness.dest("share/data/file41.bin"), b"ok");
    assert_file_content(&harness.dest("share/data/file42.bin"), b"ok");
    assert!(!harness.dest("share/data/filenop.bin").exists());
    assert_file_content(&harness.dest("share/data/iwantthis"), b"ok");
}

#[tokio::test]
async fn reports_total_size_of_distinct_archives() {
    let harness = TestHarness::new();
    harness.service.add_archive("archiveId1", "ok");
    harness.service.add_archive("archiveId2", "ok");
    harness.service.add_archive("archiveId3", "ok");

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/folder/file1.txt", "archiveId1", 2).unwrap();
    mapping.insert_record("share", "data/folder/file2.bin", "archiveId2", 2).unwrap();
    mapping.insert_record("share", "data/folder/file3.txt", "archiveId1", 2).unwrap();
    mapping.insert_record("share", "data/no", "archiveId3", 2).unwrap();
    mapping.insert_record("share", "data/nop", "archiveId1", 2).unwrap();

    harness
        .run(
            &test_config(3496, 2 * S_1MB, 10),
            &["data/folder/*", "*.info", "data/file??.bin", "data/iwantthis"],
        )
        .await
        .unwrap();

    assert!(harness.output().contains("4B to restore"), "output was: {}", harness.output());
}

#[tokio::test]
async fn resumes_partially_staged_archive() {
    let harness = TestHarness::new();
    let mut content = vec![b'_'; 1048581];
    content[1048576..].copy_from_slice(b"hello");
    harness.service.add_archive("archiveId1", content.clone());

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/folder/file1.txt", "archiveId1", 1048581).unwrap();

    std::fs::write(harness.dest("archiveId1"), vec![b'_'; 1048576]).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_eq!(
        retrieval_requests(&harness.service),
        vec![("archiveId1".to_string(), "1048576-1048580".to_string())]
    );
    assert_file_content(&harness.dest("share/data/folder/file1.txt"), &content);
    assert!(!harness.dest("archiveId1").exists());
}

#[tokio::test]
async fn complete_staging_skips_the_store_entirely() {
    let harness = TestHarness::new();
    let mut content = vec![b'_'; 1048581];
    content[1048576..].copy_from_slice(b"hello");

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/folder/file1.txt", "archiveId1", 1048581).unwrap();
    mapping.insert_record("share", "data/folder/file2.txt", "archiveId1", 1048581).unwrap();

    std::fs::write(harness.dest("archiveId1"), &content).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_eq!(harness.service.initiate_count(), 0);
    assert_file_content(&harness.dest("share/data/folder/file1.txt"), &content);
    assert_file_content(&harness.dest("share/data/folder/file2.txt"), &content);
    assert!(!harness.dest("archiveId1").exists());
}

#[tokio::test]
async fn missing_archive_skips_its_files_and_continues() {
    let harness = TestHarness::new();
    harness.service.add_archive("archiveId1", "1");
    harness.service.mark_missing("archiveId2");
    harness.service.add_archive("archiveId3", "3");

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/folder/file1.txt", "archiveId1", 1).unwrap();
    mapping.insert_record("share", "data/folder/file2.txt", "archiveId2", 1).unwrap();
    mapping.insert_record("share", "data/folder/file3.txt", "archiveId3", 1).unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_file_content(&harness.dest("share/data/folder/file1.txt"), b"1");
    assert!(!harness.dest("share/data/folder/file2.txt").exists());
    assert_file_content(&harness.dest("share/data/folder/file3.txt"), b"3");
}

#[tokio::test]
async fn zero_size_sentinel_creates_empty_files_without_retrieval() {
    let harness = TestHarness::new();
    let mapping = harness.mapping();
    mapping
        .insert_record("share", "data/folder/file1.txt", ZERO_SIZE_ARCHIVE_ID, 0)
        .unwrap();
    mapping
        .insert_record("share", "data/folder/file2.txt", ZERO_SIZE_ARCHIVE_ID, 0)
        .unwrap();

    harness.run(&test_config(3496, 2 * S_1MB, 10), &[]).await.unwrap();

    assert_eq!(harness.service.initiate_count(), 0);
    assert_file_content(&harness.dest("share/data/folder/file1.txt"), b"");
    assert_file_content(&harness.dest("share/data/folder/file2.txt"), b"");
}

#[tokio::test]
async fn cached_retrieval_job_suppresses_initiation() {
    let harness = TestHarness::new();
    harness.service.add_job("jobId1", "hello");

    let mut job_cache = JobCache::open(harness.ctx.job_cache_path()).unwrap();
    job_cache.insert("archiveId1", ByteRange::new(0, 4), "jobId1").unwrap();
    drop(job_cache);

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();

    harness.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();

    assert_eq!(harness.service.initiate_count(), 0);
    assert_file_content(&harness.dest("share/data/file1.txt"), b"hello");
}

#[tokio::test]
async fn stale_cached_job_is_reinitiated() {
    let harness = TestHarness::new();
    harness.service.add_archive("archiveId1", "hello");
    harness.service.vanish_job("staleJobId");

    let mut job_cache = JobCache::open(harness.ctx.job_cache_path()).unwrap();
    job_cache.insert("archiveId1", ByteRange::new(0, 4), "staleJobId").unwrap();
    drop(job_cache);

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();

    harness.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();

    assert_eq!(
        retrieval_requests(&harness.service),
        vec![("archiveId1".to_string(), "0-4".to_string())]
    );
    assert_file_content(&harness.dest("share/data/file1.txt"), b"hello");
}

#[tokio::test]
async fn jobs_pending_several_polls_complete_eventually() {
    let harness = TestHarness::new();
    harness.service.add_archive("archiveId1", "hello");
    harness.service.set_pending_polls(3);

    let mapping = harness.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();

    harness.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();

    assert_file_content(&harness.dest("share/data/file1.txt"), b"hello");
}

#[tokio::test]
async fn rerun_after_completion_issues_fewer_initiations() {
    // A cold run pays for every part; a run that finds complete staging
    // (an interrupted run's leftovers) pays for none.
    let cold = TestHarness::new();
    cold.service.add_archive("archiveId1", "hello");
    let mapping = cold.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();
    cold.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();
    let cold_initiations = cold.service.initiate_count();
    assert!(cold_initiations > 0);

    let resumed = TestHarness::new();
    resumed.service.add_archive("archiveId1", "hello");
    let mapping = resumed.mapping();
    mapping.insert_record("share", "data/file1.txt", "archiveId1", 5).unwrap();
    std::fs::write(resumed.dest("archiveId1"), b"hello").unwrap();
    resumed.run(&test_config(1, S_1MB, 1), &[]).await.unwrap();

    assert_lt!(resumed.service.initiate_count(), cold_initiations);
    assert_file_content(&resumed.dest("share/data/file1.txt"), b"hello");

    let cold_tree = std::fs::read(cold.dest("share/data/file1.txt")).unwrap();
    let resumed_tree = std::fs::read(resumed.dest("share/data/file1.txt")).unwrap();
    assert_eq!(cold_tree, resumed_tree);
}
